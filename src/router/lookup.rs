use crate::queue::key::ResourceKind;
use crate::queue::partition::WorkQueueProducer;
use crate::router::handler::{namespace_field, resolve_deleted, EventAction, ResourceEventHandler};
use crate::router::object::{DeletedObject, ObjectRef};
use anyhow::Result;
use std::sync::Arc;

pub type LookupFn = Arc<dyn Fn(&ObjectRef) -> Result<Vec<ObjectRef>> + Send + Sync>;

/// Handler that maps an object to any number of targets through a lookup
/// function. Every returned target is enqueued on every event.
pub struct LookupHandler {
    ctrl_kind: ResourceKind,
    queue: Arc<dyn WorkQueueProducer>,
    lookup: LookupFn,
}

impl LookupHandler {
    pub fn new<F>(ctrl_kind: ResourceKind, queue: Arc<dyn WorkQueueProducer>, lookup: F) -> Self
    where
        F: Fn(&ObjectRef) -> Result<Vec<ObjectRef>> + Send + Sync + 'static,
    {
        Self {
            ctrl_kind,
            queue,
            lookup: Arc::new(lookup),
        }
    }

    fn enqueue_mapped(&self, obj: &ObjectRef, action: EventAction) {
        let targets = match (self.lookup)(obj) {
            Ok(targets) => targets,
            Err(err) => {
                tracing::error!(
                    ctrl_kind = %self.ctrl_kind,
                    obj_kind = %obj.kind(),
                    namespace = namespace_field(obj.namespace()),
                    obj_name = obj.name(),
                    error = %err,
                    "failed to look up objects to enqueue; dropping event"
                );
                return;
            }
        };

        for target in &targets {
            tracing::info!(
                ctrl_kind = %self.ctrl_kind,
                obj_kind = %obj.kind(),
                namespace = namespace_field(obj.namespace()),
                obj_name = obj.name(),
                target_namespace = namespace_field(target.namespace()),
                target_name = target.name(),
                "enqueuing looked up object because related object was {action}"
            );
            self.queue.add(target.queue_key());
        }
    }
}

impl ResourceEventHandler for LookupHandler {
    fn on_add(&self, obj: &ObjectRef) {
        self.enqueue_mapped(obj, EventAction::Added);
    }

    fn on_update(&self, _old: &ObjectRef, new: &ObjectRef) {
        self.enqueue_mapped(new, EventAction::Updated);
    }

    fn on_delete(&self, obj: &DeletedObject) {
        if let Some(obj) = resolve_deleted(&self.ctrl_kind, obj) {
            self.enqueue_mapped(&obj, EventAction::Deleted);
        }
    }
}
