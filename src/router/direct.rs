use crate::queue::key::ResourceKind;
use crate::queue::partition::WorkQueueProducer;
use crate::router::handler::{namespace_field, resolve_deleted, EventAction, ResourceEventHandler};
use crate::router::object::{DeletedObject, ObjectRef};
use std::sync::Arc;

/// Enqueues the changed object itself. Used for the kind a controller reconciles.
pub struct DirectHandler {
    kind: ResourceKind,
    queue: Arc<dyn WorkQueueProducer>,
}

impl DirectHandler {
    pub fn new(kind: ResourceKind, queue: Arc<dyn WorkQueueProducer>) -> Self {
        Self { kind, queue }
    }

    fn enqueue(&self, obj: &ObjectRef, action: EventAction) {
        tracing::info!(
            ctrl_kind = %self.kind,
            namespace = namespace_field(obj.namespace()),
            obj_name = obj.name(),
            "enqueuing object because it was {action}"
        );
        self.queue.add(obj.queue_key());
    }
}

impl ResourceEventHandler for DirectHandler {
    fn on_add(&self, obj: &ObjectRef) {
        self.enqueue(obj, EventAction::Added);
    }

    fn on_update(&self, _old: &ObjectRef, new: &ObjectRef) {
        self.enqueue(new, EventAction::Updated);
    }

    fn on_delete(&self, obj: &DeletedObject) {
        if let Some(obj) = resolve_deleted(&self.kind, obj) {
            self.enqueue(&obj, EventAction::Deleted);
        }
    }
}
