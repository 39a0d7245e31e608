//! Watch-backed caches that feed change notifications to event handlers.

pub mod memory;

use crate::queue::key::ResourceKind;
use crate::router::handler::ResourceEventHandler;
use core::future::Future;
use core::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub type InformerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

/// A cache of one resource kind kept current by a watch.
///
/// `run` lists, then watches until the token is cancelled. `has_synced`
/// reports whether the initial listing has been delivered to the handlers.
pub trait Informer: Send + Sync + 'static {
    fn kind(&self) -> &ResourceKind;

    fn run(self: Arc<Self>, token: CancellationToken) -> InformerFuture;

    fn has_synced(&self) -> bool;

    /// Handlers added after the initial listing receive the current contents
    /// as additions.
    fn add_event_handler(&self, handler: Arc<dyn ResourceEventHandler>);
}
