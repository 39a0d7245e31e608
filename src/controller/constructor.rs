use crate::controller::gate::ReadySignal;
use crate::controller::protocol::Controller;
use crate::informer::Informer;
use crate::queue::key::ResourceKind;
use crate::queue::partition::{QueuePartition, WorkQueueProducer};
use crate::runtime::config::RuntimeConfig;
use anyhow::Error as AnyError;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub type InformerRegistry = HashMap<ResourceKind, Arc<dyn Informer>>;
pub type ControllerRegistry = HashMap<ResourceKind, Arc<dyn Controller>>;

/// Static description of what a constructor builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    /// Kind of object the controller reconciles.
    pub kind: ResourceKind,
}

impl Descriptor {
    pub fn new(kind: ResourceKind) -> Self {
        Self { kind }
    }
}

/// Factory for one controller.
///
/// `construct` must register an informer for the described kind through
/// [`ConstructionContext::register_informer`] or
/// [`ConstructionContext::main_informer`].
pub trait Constructor: Send + Sync {
    fn describe(&self) -> Descriptor;

    fn construct(
        &self,
        config: &RuntimeConfig,
        ctx: &mut ConstructionContext<'_>,
    ) -> anyhow::Result<Arc<dyn Controller>>;
}

/// What a constructor may see and change while building its controller.
pub struct ConstructionContext<'a> {
    kind: ResourceKind,
    ready: ReadySignal,
    ready_requested: bool,
    informers: &'a mut InformerRegistry,
    controllers: &'a ControllerRegistry,
    work_queue: QueuePartition,
}

impl<'a> ConstructionContext<'a> {
    pub(crate) fn new(
        kind: ResourceKind,
        ready: ReadySignal,
        informers: &'a mut InformerRegistry,
        controllers: &'a ControllerRegistry,
        work_queue: QueuePartition,
    ) -> Self {
        Self {
            kind,
            ready,
            ready_requested: false,
            informers,
            controllers,
            work_queue,
        }
    }

    /// Kind being constructed.
    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    /// Signal the controller fires from `run` once it can accept work.
    ///
    /// Controllers that never ask for it are considered ready as soon as
    /// they are started.
    pub fn ready_signal(&mut self) -> ReadySignal {
        self.ready_requested = true;
        self.ready.clone()
    }

    pub(crate) fn ready_requested(&self) -> bool {
        self.ready_requested
    }

    pub fn register_informer(&mut self, informer: Arc<dyn Informer>) -> Result<(), ConstructionError> {
        let kind = informer.kind().clone();
        if self.informers.contains_key(&kind) {
            return Err(ConstructionError::DuplicateInformer { kind });
        }
        self.informers.insert(kind, informer);
        Ok(())
    }

    pub fn informer(&self, kind: &ResourceKind) -> Option<Arc<dyn Informer>> {
        self.informers.get(kind).cloned()
    }

    /// Returns the informer registered for `kind`, creating and registering
    /// one with `create` if there is none. `create` receives the configured
    /// namespace and resync period.
    pub fn main_informer<F>(
        &mut self,
        config: &RuntimeConfig,
        kind: &ResourceKind,
        create: F,
    ) -> Result<Arc<dyn Informer>, ConstructionError>
    where
        F: FnOnce(&ResourceKind, &str, Duration) -> Arc<dyn Informer>,
    {
        if let Some(informer) = self.informer(kind) {
            return Ok(informer);
        }

        let informer = create(kind, config.namespace(), config.resync_period());
        if informer.kind() != kind {
            return Err(ConstructionError::InformerKindMismatch {
                expected: kind.clone(),
                actual: informer.kind().clone(),
            });
        }
        self.register_informer(informer.clone())?;
        Ok(informer)
    }

    /// Controllers constructed before this one.
    pub fn controllers(&self) -> &ControllerRegistry {
        self.controllers
    }

    /// Producer that enqueues keys for this controller's kind.
    pub fn work_queue(&self) -> Arc<dyn WorkQueueProducer> {
        Arc::new(self.work_queue.clone())
    }
}

/// Fatal error raised while constructing controllers, before anything runs.
#[derive(Debug)]
pub enum ConstructionError {
    Constructor { kind: ResourceKind, source: AnyError },
    DuplicateController { kind: ResourceKind },
    MissingInformer { kind: ResourceKind },
    DuplicateInformer { kind: ResourceKind },
    InformerKindMismatch { expected: ResourceKind, actual: ResourceKind },
}

impl ConstructionError {
    /// Kind of the controller or informer the error concerns.
    pub fn kind(&self) -> &ResourceKind {
        match self {
            ConstructionError::Constructor { kind, .. }
            | ConstructionError::DuplicateController { kind }
            | ConstructionError::MissingInformer { kind }
            | ConstructionError::DuplicateInformer { kind } => kind,
            ConstructionError::InformerKindMismatch { expected, .. } => expected,
        }
    }
}

impl fmt::Display for ConstructionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstructionError::Constructor { kind, source } => {
                write!(f, "failed to construct controller for {kind}: {source}")
            }
            ConstructionError::DuplicateController { kind } => {
                write!(f, "duplicate controller for {kind}")
            }
            ConstructionError::MissingInformer { kind } => {
                write!(f, "controller for {kind} did not register an informer for that kind")
            }
            ConstructionError::DuplicateInformer { kind } => {
                write!(f, "informer for {kind} has been registered already")
            }
            ConstructionError::InformerKindMismatch { expected, actual } => {
                write!(f, "informer created for {expected} watches {actual}")
            }
        }
    }
}

impl std::error::Error for ConstructionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConstructionError::Constructor { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
