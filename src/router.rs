//! Translation of object change notifications into queue keys.
//!
//! Three strategies share the [`handler::ResourceEventHandler`] interface:
//! the object itself, its controlling owner, or an arbitrary lookup. None of
//! them deduplicate; repeated adds collapse in the work queue.

pub mod direct;
pub mod handler;
pub mod index;
pub mod lookup;
pub mod object;
pub mod owner;
