use crate::queue::key::{QueueKey, ResourceKind};
use crate::queue::partition::WorkQueueProducer;
use crate::router::handler::{namespace_field, resolve_deleted, EventAction, ResourceEventHandler};
use crate::router::index::OwnerIndex;
use crate::router::object::{DeletedObject, ObjectRef};
use std::sync::Arc;

/// Handler for objects controlled by an object of another kind.
///
/// The owner is read from the controller reference. Objects without one are
/// mapped through the [`OwnerIndex`], which covers children observed before
/// their reference is set and deletions of unreferenced children. Owners and
/// the objects they control always live in the same namespace.
pub struct OwnerRefHandler {
    owner_kind: ResourceKind,
    queue: Arc<dyn WorkQueueProducer>,
    index: Option<Arc<dyn OwnerIndex>>,
}

impl OwnerRefHandler {
    pub fn new(owner_kind: ResourceKind, queue: Arc<dyn WorkQueueProducer>) -> Self {
        Self {
            owner_kind,
            queue,
            index: None,
        }
    }

    pub fn with_index(mut self, index: Arc<dyn OwnerIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Name of the owner of the expected kind, if the object names one.
    fn owner_name<'a>(&self, obj: &'a ObjectRef) -> Option<&'a str> {
        obj.controller_ref()
            .filter(|owner| owner.kind == self.owner_kind)
            .map(|owner| owner.name.as_str())
    }

    fn enqueue_mapped(&self, obj: &ObjectRef, action: EventAction) {
        if let Some(owner) = self.owner_name(obj) {
            self.enqueue_owner(obj, obj.namespace(), owner, action);
            return;
        }

        let Some(index) = &self.index else {
            tracing::trace!(
                ctrl_kind = %self.owner_kind,
                obj_kind = %obj.kind(),
                namespace = namespace_field(obj.namespace()),
                obj_name = obj.name(),
                "object has no controller owner and no index is configured"
            );
            return;
        };

        match index.candidate_owners(obj.kind(), obj.namespace(), obj.name()) {
            Ok(owners) => {
                for owner in &owners {
                    self.enqueue_owner(obj, owner.namespace(), owner.name(), action);
                }
            }
            Err(err) => {
                tracing::error!(
                    ctrl_kind = %self.owner_kind,
                    obj_kind = %obj.kind(),
                    namespace = namespace_field(obj.namespace()),
                    obj_name = obj.name(),
                    error = %err,
                    "failed to resolve candidate owners for object"
                );
            }
        }
    }

    fn enqueue_owner(&self, obj: &ObjectRef, namespace: &str, owner: &str, action: EventAction) {
        if owner.is_empty() {
            return;
        }
        tracing::info!(
            ctrl_kind = %self.owner_kind,
            obj_kind = %obj.kind(),
            namespace = namespace_field(namespace),
            obj_name = obj.name(),
            owner_name = owner,
            "enqueuing owner because controlled object was {action}"
        );
        self.queue.add(QueueKey::new(namespace, owner));
    }
}

impl ResourceEventHandler for OwnerRefHandler {
    fn on_add(&self, obj: &ObjectRef) {
        self.enqueue_mapped(obj, EventAction::Added);
    }

    fn on_update(&self, old: &ObjectRef, new: &ObjectRef) {
        // Re-parented objects notify the previous owner as well.
        if self.owner_name(old) != self.owner_name(new) {
            self.enqueue_mapped(old, EventAction::Updated);
        }
        self.enqueue_mapped(new, EventAction::Updated);
    }

    fn on_delete(&self, obj: &DeletedObject) {
        if let Some(obj) = resolve_deleted(&self.owner_kind, obj) {
            self.enqueue_mapped(&obj, EventAction::Deleted);
        }
    }
}
