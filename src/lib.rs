pub mod controller;
pub mod informer;
mod processor;
pub mod queue;
pub mod router;
pub mod runtime;

pub use controller::constructor::{
    ConstructionContext, ConstructionError, Constructor, ControllerRegistry, Descriptor,
    InformerRegistry,
};
pub use controller::gate::{ready_gate, GateAbandoned, ReadyGate, ReadySignal};
pub use controller::protocol::{
    Controller, ControllerFuture, ProcessContext, ProcessError, ProcessFuture,
};
pub use informer::memory::MemoryInformer;
pub use informer::{Informer, InformerFuture};
pub use queue::key::{QueueKey, ResourceKind, TypedKey};
pub use queue::partition::{QueuePartition, WorkQueueProducer};
pub use queue::rate_limiter::{
    BucketRateLimiter, ItemExponentialRateLimiter, MaxOfRateLimiter, RateLimiter,
};
pub use queue::work_queue::WorkQueue;
pub use router::direct::DirectHandler;
pub use router::handler::ResourceEventHandler;
pub use router::index::OwnerIndex;
pub use router::lookup::LookupHandler;
pub use router::object::{
    ChangeEvent, ControllerRef, DeletedObject, ObjectDecodeError, ObjectRef, Tombstone,
};
pub use router::owner::OwnerRefHandler;
pub use runtime::config::{FaultPolicy, RuntimeConfig, RuntimeConfigBuilder, RuntimeConfigParams};
pub use runtime::fatal::install_panic_hook;
pub use runtime::generic::{Generic, Holder, RunError, RunStage};
pub use runtime::runner::{App, LeaderElector, LeaderFuture};
pub use runtime::state::ControllerState;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
