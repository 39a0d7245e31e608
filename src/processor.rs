//! Worker orchestration: the per-key processing loop, the pool that runs it,
//! and per-run lifecycle handles.

pub(crate) mod lifecycle;
pub(crate) mod worker;
pub(crate) mod worker_pool;
