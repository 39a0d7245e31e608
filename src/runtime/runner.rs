use crate::controller::constructor::Constructor;
use crate::runtime::config::RuntimeConfig;
use crate::runtime::fatal::install_panic_hook;
use crate::runtime::generic::{Generic, RunError};
use anyhow::{bail, Context, Result};
use core::future::Future;
use core::pin::Pin;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

pub type LeaderFuture<'a> = Pin<Box<dyn Future<Output = Result<CancellationToken>> + Send + 'a>>;

/// Acquires leadership for this process.
///
/// `acquire` resolves once leadership is held and returns a token that is
/// cancelled when leadership is lost. It should give up when `shutdown` is
/// cancelled.
pub trait LeaderElector: Send + Sync {
    fn acquire<'a>(&'a self, shutdown: CancellationToken) -> LeaderFuture<'a>;
}

/// Builds the controller runtime and runs it, optionally behind leader
/// election, until cancelled.
pub struct App {
    config: RuntimeConfig,
    constructors: Vec<Box<dyn Constructor>>,
    leader_elector: Option<Arc<dyn LeaderElector>>,
    shutdown: CancellationToken,
}

impl App {
    pub fn new(config: RuntimeConfig, constructors: Vec<Box<dyn Constructor>>) -> Self {
        Self {
            config,
            constructors,
            leader_elector: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Only run controllers while holding leadership.
    pub fn with_leader_elector(mut self, elector: Arc<dyn LeaderElector>) -> Self {
        self.leader_elector = Some(elector);
        self
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs until the shutdown token is cancelled. Cancellation is a clean exit;
    /// losing leadership is an error so that the process restarts.
    pub async fn run(self) -> Result<()> {
        let Self {
            config,
            constructors,
            leader_elector,
            shutdown,
        } = self;

        let app_name = config.app_name().to_owned();
        let generic = Generic::new(config, constructors).context("failed to construct controllers")?;

        let (run_token, leader_token) = match leader_elector {
            Some(elector) => {
                tracing::info!(app = %app_name, "starting leader election");
                let leader = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return Ok(()),
                    leader = elector.acquire(shutdown.clone()) => {
                        leader.context("leader election failed")?
                    }
                };
                tracing::info!(app = %app_name, "started leading");
                (bridge_leadership(&shutdown, leader.clone()), Some(leader))
            }
            None => (shutdown.clone(), None),
        };

        let result = generic.run(run_token.clone()).await;
        run_token.cancel();

        match result {
            Ok(()) | Err(RunError::Cancelled { .. }) => {}
            Err(err) => return Err(err).context("controller runtime failed"),
        }

        if let Some(leader) = leader_token {
            if leader.is_cancelled() && !shutdown.is_cancelled() {
                bail!("leader status lost");
            }
        }
        Ok(())
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the shutdown token is cancelled elsewhere.
    ///
    /// Meant for binaries: also installs the panic-logging hook.
    pub async fn run_until_ctrl_c(self) -> Result<()> {
        install_panic_hook();
        let shutdown = self.shutdown.clone();
        let signal_task = tokio::spawn(async move {
            tokio::select! {
                result = signal::ctrl_c() => {
                    match result {
                        Ok(()) => tracing::info!("Ctrl-C received; shutting down"),
                        Err(err) => tracing::error!(error = %err, "failed to listen for Ctrl-C; shutting down"),
                    }
                    shutdown.cancel();
                }
                _ = shutdown.cancelled() => {}
            }
        });

        tracing::info!("runner started; waiting for Ctrl-C (SIGINT) to initiate shutdown");
        let result = self.run().await;
        signal_task.abort();
        result
    }
}

/// Child of `shutdown` that is also cancelled when leadership is lost.
fn bridge_leadership(shutdown: &CancellationToken, leader: CancellationToken) -> CancellationToken {
    let run_token = shutdown.child_token();
    let bridged = run_token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = leader.cancelled() => {
                tracing::warn!("leader status lost");
                bridged.cancel();
            }
            _ = bridged.cancelled() => {}
        }
    });
    run_token
}
