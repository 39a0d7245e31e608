use crate::queue::key::{QueueKey, ResourceKind, TypedKey};
use crate::queue::work_queue::WorkQueue;
use std::sync::Arc;

/// Producer side of the work queue as seen by event handlers.
pub trait WorkQueueProducer: Send + Sync {
    fn add(&self, key: QueueKey);
}

/// View of the shared queue that tags every key with one kind.
#[derive(Clone)]
pub struct QueuePartition {
    kind: ResourceKind,
    queue: Arc<WorkQueue>,
}

impl QueuePartition {
    pub fn new(kind: ResourceKind, queue: Arc<WorkQueue>) -> Self {
        Self { kind, queue }
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }
}

impl WorkQueueProducer for QueuePartition {
    fn add(&self, key: QueueKey) {
        self.queue.add(TypedKey::new(self.kind.clone(), key));
    }
}
