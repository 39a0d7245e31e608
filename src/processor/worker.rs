//! Worker loop draining the shared queue into controllers.

use crate::controller::protocol::{ProcessContext, ProcessError};
use crate::queue::key::TypedKey;
use crate::queue::work_queue::WorkQueue;
use crate::runtime::config::FaultPolicy;
use crate::runtime::fatal::{panic_message, FatalErrorHandler};
use crate::runtime::generic::HolderRegistry;
use crate::runtime::telemetry::Telemetry;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::Instrument;

/// Everything every worker in a pool shares.
#[derive(Clone)]
pub(crate) struct WorkerShared {
    pub queue: Arc<WorkQueue>,
    pub controllers: Arc<HolderRegistry>,
    pub telemetry: Arc<Telemetry>,
    pub fault_policy: FaultPolicy,
    pub fatal_handler: FatalErrorHandler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Continue,
    Stop,
}

pub(crate) struct Worker {
    id: usize,
    shared: WorkerShared,
}

impl Worker {
    pub(crate) fn new(id: usize, shared: WorkerShared) -> Self {
        Self { id, shared }
    }

    /// Processes keys until the queue shuts down, or until a panic under
    /// [`FaultPolicy::Crash`] takes the runtime down.
    #[tracing::instrument(name = "worker", skip_all, fields(worker = self.id))]
    pub(crate) async fn run(self) -> anyhow::Result<()> {
        tracing::debug!("worker started");
        while let Some(key) = self.shared.queue.get().await {
            let outcome = self.process_key(&key).await;
            self.shared.queue.done(&key);
            if outcome == Outcome::Stop {
                break;
            }
        }
        tracing::debug!("worker stopped");
        Ok(())
    }

    async fn process_key(&self, key: &TypedKey) -> Outcome {
        let WorkerShared {
            queue,
            controllers,
            telemetry,
            ..
        } = &self.shared;

        let Some(holder) = controllers.get(key.kind()) else {
            tracing::error!(
                worker = self.id,
                ctrl_kind = %key.kind(),
                key = %key.key(),
                "got an item of unknown kind"
            );
            queue.forget(key);
            telemetry.record_dropped();
            return Outcome::Continue;
        };

        let ctx = ProcessContext::new(key.kind().clone(), key.key().clone());
        let span = ctx.span().clone();
        let result = AssertUnwindSafe(holder.controller().process(&ctx).instrument(span.clone()))
            .catch_unwind()
            .await;

        span.in_scope(|| self.settle(key, result))
    }

    fn settle(
        &self,
        key: &TypedKey,
        result: Result<Result<(), ProcessError>, Box<dyn Any + Send>>,
    ) -> Outcome {
        let WorkerShared {
            queue,
            telemetry,
            fault_policy,
            fatal_handler,
            ..
        } = &self.shared;

        match result {
            Ok(Ok(())) => {
                queue.forget(key);
                telemetry.record_processed();
                Outcome::Continue
            }
            Ok(Err(err)) if err.is_retriable() => {
                tracing::warn!(
                    worker = self.id,
                    requeues = queue.num_requeues(key),
                    error = %err,
                    "failed to process object; will retry"
                );
                queue.add_rate_limited(key.clone());
                telemetry.record_retried();
                Outcome::Continue
            }
            Ok(Err(err)) => {
                tracing::error!(
                    worker = self.id,
                    error = %err,
                    "failed to process object; dropping it"
                );
                queue.forget(key);
                telemetry.record_dropped();
                Outcome::Continue
            }
            Err(payload) => {
                telemetry.record_panic();
                queue.forget(key);
                match fault_policy {
                    FaultPolicy::Isolate => {
                        tracing::error!(
                            worker = self.id,
                            panic = %panic_message(payload.as_ref()),
                            "processing panicked; dropping object"
                        );
                        Outcome::Continue
                    }
                    FaultPolicy::Crash => {
                        let context = format!("worker {} processing {key}", self.id);
                        fatal_handler.trigger_panic(&context, payload);
                        Outcome::Stop
                    }
                }
            }
        }
    }
}
