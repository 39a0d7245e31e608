//! Ordered startup and reverse-ordered teardown of groups of tasks.

use crate::runtime::fatal::FatalErrorHandler;
use futures::future::join_all;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Sequence of stages. Stages are shut down last-started first, and each one
/// is fully joined before the previous one is cancelled.
pub(crate) struct Stager {
    root: CancellationToken,
    fatal: FatalErrorHandler,
    stages: Vec<Stage>,
}

pub(crate) struct Stage {
    name: &'static str,
    token: CancellationToken,
    fatal: FatalErrorHandler,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl Stager {
    pub(crate) fn new(fatal: FatalErrorHandler) -> Self {
        Self {
            root: CancellationToken::new(),
            fatal,
            stages: Vec::new(),
        }
    }

    pub(crate) fn next_stage(&mut self, name: &'static str) -> &mut Stage {
        let stage = Stage {
            name,
            token: self.root.child_token(),
            fatal: self.fatal.clone(),
            tasks: Vec::new(),
        };
        self.stages.push(stage);
        let last = self.stages.len() - 1;
        &mut self.stages[last]
    }

    pub(crate) async fn shutdown(&mut self) {
        while let Some(stage) = self.stages.pop() {
            stage.shutdown().await;
        }
    }
}

impl Stage {
    /// Token cancelled when this stage is shut down.
    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawns a task owned by this stage. Errors and panics escaping the task
    /// are reported to the fatal handler.
    pub(crate) fn spawn<F>(&mut self, task: impl Into<String>, future: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let task = task.into();
        let fatal = self.fatal.clone();
        let context = format!("{} stage task {task}", self.name);
        let handle = tokio::spawn(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => fatal.trigger_error(&context, err),
                Err(payload) => fatal.trigger_panic(&context, payload),
            }
        });
        self.tasks.push((task, handle));
    }

    async fn shutdown(self) {
        tracing::debug!(stage = self.name, tasks = self.tasks.len(), "stopping stage");
        self.token.cancel();
        let (names, handles): (Vec<_>, Vec<_>) = self.tasks.into_iter().unzip();
        for (task, joined) in names.iter().zip(join_all(handles).await) {
            if let Err(err) = joined {
                tracing::warn!(stage = self.name, task = %task, error = %err, "stage task failed to join");
            }
        }
    }
}
