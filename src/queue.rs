//! Work queue primitives: reconciliation keys, per-item rate limiters, the
//! deduplicating queue shared by every controller, and per-kind producer views.

pub mod key;
pub mod partition;
pub mod rate_limiter;
pub mod work_queue;
