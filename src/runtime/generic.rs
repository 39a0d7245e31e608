//! The controller runtime: construction of every controller into an immutable
//! registry, then the staged run loop.

use crate::controller::constructor::{
    ConstructionContext, ConstructionError, Constructor, ControllerRegistry, InformerRegistry,
};
use crate::controller::gate::{ready_gate, ReadyGate};
use crate::controller::protocol::Controller;
use crate::processor::lifecycle::{LifecycleHandles, LifecycleSpawnParams};
use crate::processor::worker::WorkerShared;
use crate::processor::worker_pool::WorkerPool;
use crate::queue::key::ResourceKind;
use crate::queue::partition::QueuePartition;
use crate::queue::work_queue::WorkQueue;
use crate::router::direct::DirectHandler;
use crate::runtime::config::RuntimeConfig;
use crate::runtime::fatal::Fault;
use crate::runtime::stager::Stager;
use crate::runtime::state::{ControllerState, StateCell};
use crate::runtime::telemetry::Telemetry;
use anyhow::Error as AnyError;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub type HolderRegistry = HashMap<ResourceKind, Holder>;

/// A constructed controller together with its readiness gate and state.
pub struct Holder {
    controller: Arc<dyn Controller>,
    gate: ReadyGate,
    state: Arc<StateCell>,
}

impl Holder {
    pub fn controller(&self) -> &Arc<dyn Controller> {
        &self.controller
    }

    pub fn state(&self) -> ControllerState {
        self.state.load()
    }

    pub fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }
}

/// Stage the run was in when it was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    CacheSync,
    Activation,
    Dispatching,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunStage::CacheSync => "cache sync",
            RunStage::Activation => "controller activation",
            RunStage::Dispatching => "work dispatch",
        })
    }
}

#[derive(Debug)]
pub enum RunError {
    /// The run token was cancelled. Every stage has been torn down.
    Cancelled { stage: RunStage },
    /// A controller dropped its readiness signal without firing it.
    ReadinessAbandoned { kind: ResourceKind },
    /// An informer or controller task failed.
    Fatal(AnyError),
    /// `run` was called a second time.
    AlreadyStarted,
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Cancelled { stage } => write!(f, "cancelled during {stage}"),
            RunError::ReadinessAbandoned { kind } => {
                write!(f, "controller for {kind} dropped its readiness signal")
            }
            RunError::Fatal(err) => write!(f, "runtime task failed: {err}"),
            RunError::AlreadyStarted => f.write_str("controller runtime has already been started"),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Fatal(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

/// Immutable snapshot of every constructed controller and informer, plus the
/// queue they share.
pub struct Generic {
    config: RuntimeConfig,
    queue: Arc<WorkQueue>,
    controllers: Arc<HolderRegistry>,
    informers: Arc<InformerRegistry>,
    telemetry: Arc<Telemetry>,
    started: AtomicBool,
}

impl Generic {
    /// Constructs every controller against a queue built from `config`.
    pub fn new(
        config: RuntimeConfig,
        constructors: impl IntoIterator<Item = Box<dyn Constructor>>,
    ) -> Result<Self, ConstructionError> {
        let queue = Arc::new(config.work_queue());
        Self::with_queue(config, queue, constructors)
    }

    pub fn with_queue(
        config: RuntimeConfig,
        queue: Arc<WorkQueue>,
        constructors: impl IntoIterator<Item = Box<dyn Constructor>>,
    ) -> Result<Self, ConstructionError> {
        let mut informers = InformerRegistry::new();
        let mut controllers = ControllerRegistry::new();
        let mut holders = HolderRegistry::new();

        for constructor in constructors {
            let kind = constructor.describe().kind;
            if holders.contains_key(&kind) {
                return Err(ConstructionError::DuplicateController { kind });
            }

            let (signal, gate) = ready_gate();
            let partition = QueuePartition::new(kind.clone(), queue.clone());
            let mut ctx = ConstructionContext::new(
                kind.clone(),
                signal.clone(),
                &mut informers,
                &controllers,
                partition.clone(),
            );
            let controller = constructor
                .construct(&config, &mut ctx)
                .map_err(|err| match err.downcast::<ConstructionError>() {
                    Ok(err) => err,
                    Err(source) => ConstructionError::Constructor {
                        kind: kind.clone(),
                        source,
                    },
                })?;
            if !ctx.ready_requested() {
                signal.ready();
            }
            drop(ctx);

            let informer = informers
                .get(&kind)
                .ok_or_else(|| ConstructionError::MissingInformer { kind: kind.clone() })?;
            informer.add_event_handler(Arc::new(DirectHandler::new(kind.clone(), Arc::new(partition))));

            tracing::info!(app = config.app_name(), ctrl_kind = %kind, "controller constructed");
            controllers.insert(kind.clone(), controller.clone());
            holders.insert(
                kind,
                Holder {
                    controller,
                    gate,
                    state: Arc::new(StateCell::new()),
                },
            );
        }

        Ok(Self {
            config,
            queue,
            controllers: Arc::new(holders),
            informers: Arc::new(informers),
            telemetry: Arc::new(Telemetry::default()),
            started: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn holder(&self, kind: &ResourceKind) -> Option<&Holder> {
        self.controllers.get(kind)
    }

    pub fn controller_state(&self, kind: &ResourceKind) -> Option<ControllerState> {
        self.controllers.get(kind).map(Holder::state)
    }

    /// Kinds with a registered informer, including those no controller reconciles.
    pub fn informer_kinds(&self) -> Vec<ResourceKind> {
        let mut kinds: Vec<_> = self.informers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Runs informers, then controllers, then workers, each stage only once
    /// the previous one is ready, until `token` is cancelled.
    ///
    /// Cancellation always surfaces as [`RunError::Cancelled`] naming the
    /// stage it interrupted. On return the queue is shut down and every stage has been joined in
    /// reverse order. A panic in `Controller::process` under
    /// [`FaultPolicy::Crash`](crate::runtime::config::FaultPolicy::Crash) is
    /// resumed here once shutdown completes.
    pub async fn run(&self, token: CancellationToken) -> Result<(), RunError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RunError::AlreadyStarted);
        }

        let lifecycle = LifecycleHandles::spawn(LifecycleSpawnParams {
            shutdown_root: &token,
            telemetry: self.telemetry.clone(),
            queue: self.queue.clone(),
            metrics_interval: self.config.metrics_interval(),
        });
        let run_token = lifecycle.run_token.clone();
        let fatal_handler = lifecycle.fatal_handler();
        let mut stager = Stager::new(fatal_handler.clone());

        let result = self.run_stages(&mut stager, &run_token, &lifecycle).await;

        tracing::info!("shutting down controller runtime");
        self.queue.shut_down();
        self.advance_all(ControllerState::ShuttingDown);
        stager.shutdown().await;
        self.advance_all(ControllerState::Stopped);
        lifecycle.shutdown().await;

        match fatal_handler.take_fault() {
            Some(Fault::Panic(payload)) => std::panic::resume_unwind(payload),
            Some(Fault::Error(err)) => Err(RunError::Fatal(err)),
            None => result,
        }
    }

    async fn run_stages(
        &self,
        stager: &mut Stager,
        run_token: &CancellationToken,
        lifecycle: &LifecycleHandles,
    ) -> Result<(), RunError> {
        let stage = stager.next_stage("informers");
        for (kind, informer) in self.informers.iter() {
            stage.spawn(format!("informer {kind}"), informer.clone().run(stage.token()));
        }
        self.advance_all(ControllerState::CacheSyncing);
        tracing::info!(informers = self.informers.len(), "waiting for informers to sync");
        self.wait_for_cache_sync(run_token).await?;
        self.advance_all(ControllerState::CacheSynced);
        tracing::info!("informers synced");

        let stage = stager.next_stage("controllers");
        for (kind, holder) in self.controllers.iter() {
            holder.state.advance(ControllerState::Activating);
            stage.spawn(format!("controller {kind}"), holder.controller.clone().run(stage.token()));
        }
        for (kind, holder) in self.controllers.iter() {
            tokio::select! {
                biased;
                _ = run_token.cancelled() => {
                    tracing::info!(
                        ctrl_kind = %kind,
                        "was waiting for the controller to become ready for processing"
                    );
                    return Err(RunError::Cancelled { stage: RunStage::Activation });
                }
                ready = holder.gate.wait() => {
                    ready.map_err(|_| RunError::ReadinessAbandoned { kind: kind.clone() })?;
                    holder.state.advance(ControllerState::ReadyForWork);
                }
            }
        }

        let stage = stager.next_stage("workers");
        WorkerPool::new(
            self.config.workers(),
            WorkerShared {
                queue: self.queue.clone(),
                controllers: self.controllers.clone(),
                telemetry: self.telemetry.clone(),
                fault_policy: self.config.fault_policy(),
                fatal_handler: lifecycle.fatal_handler(),
            },
        )
        .launch(stage);
        self.advance_all(ControllerState::Dispatching);

        run_token.cancelled().await;
        Err(RunError::Cancelled {
            stage: RunStage::Dispatching,
        })
    }

    async fn wait_for_cache_sync(&self, run_token: &CancellationToken) -> Result<(), RunError> {
        let mut ticker = time::interval(self.config.cache_sync_poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = run_token.cancelled() => {
                    return Err(RunError::Cancelled { stage: RunStage::CacheSync });
                }
                _ = ticker.tick() => {}
            }
            if self.informers.values().all(|informer| informer.has_synced()) {
                return Ok(());
            }
        }
    }

    fn advance_all(&self, state: ControllerState) {
        for holder in self.controllers.values() {
            holder.state.advance(state);
        }
    }
}
