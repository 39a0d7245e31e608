//! Fixed-size pool of workers launched into the last runtime stage.

use crate::processor::worker::{Worker, WorkerShared};
use crate::runtime::stager::Stage;

pub(crate) struct WorkerPool {
    size: usize,
    shared: WorkerShared,
}

impl WorkerPool {
    pub(crate) fn new(size: usize, shared: WorkerShared) -> Self {
        Self {
            size: size.max(1),
            shared,
        }
    }

    /// Spawns every worker as a task of `stage`. Workers exit once the queue
    /// is shut down, so the stage token is not consulted.
    pub(crate) fn launch(self, stage: &mut Stage) {
        for worker_id in 0..self.size {
            let worker = Worker::new(worker_id, self.shared.clone());
            stage.spawn(format!("worker {worker_id}"), worker.run());
        }
        self.shared.telemetry.record_worker_pool_size(self.size);
        tracing::info!(workers = self.size, "worker pool started");
    }
}
