use crate::queue::key::{QueueKey, ResourceKind};
use anyhow::Error as AnyError;
use core::future::Future;
use core::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub type ControllerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;
pub type ProcessFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ProcessError>> + Send + 'a>>;

/// Reconciler for one resource kind.
pub trait Controller: Send + Sync + 'static {
    /// Long-running loop started once caches have synced. Must fire the
    /// readiness signal obtained during construction (if it took one) before
    /// workers dispatch keys to it, and return once the token is cancelled.
    fn run(self: Arc<Self>, token: CancellationToken) -> ControllerFuture;

    /// Reconciles one key. Never called concurrently for the same key.
    fn process<'a>(&'a self, ctx: &'a ProcessContext) -> ProcessFuture<'a>;
}

/// Everything a controller receives about one unit of work.
#[derive(Debug, Clone)]
pub struct ProcessContext {
    kind: ResourceKind,
    key: QueueKey,
    span: tracing::Span,
}

impl ProcessContext {
    pub(crate) fn new(kind: ResourceKind, key: QueueKey) -> Self {
        let span = tracing::info_span!(
            "process",
            ctrl_kind = %kind,
            namespace = %key.namespace,
            obj_name = %key.name,
        );
        Self { kind, key, span }
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn key(&self) -> &QueueKey {
        &self.key
    }

    pub fn namespace(&self) -> &str {
        &self.key.namespace
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    /// Span carrying the kind and key, entered around `process`.
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}

/// Failure reported by [`Controller::process`].
///
/// Retriable failures are re-queued with backoff; terminal ones are logged
/// and dropped until the object changes again.
#[derive(Debug)]
pub struct ProcessError {
    retriable: bool,
    source: AnyError,
}

impl ProcessError {
    pub fn retriable(source: impl Into<AnyError>) -> Self {
        Self {
            retriable: true,
            source: source.into(),
        }
    }

    pub fn terminal(source: impl Into<AnyError>) -> Self {
        Self {
            retriable: false,
            source: source.into(),
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.retriable
    }

    pub fn into_source(self) -> AnyError {
        self.source
    }
}

impl core::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let kind = if self.retriable { "retriable" } else { "terminal" };
        write!(f, "{kind} processing error: {}", self.source)
    }
}

impl std::error::Error for ProcessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}
