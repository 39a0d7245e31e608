//! Controller contract: the trait reconcilers implement, their readiness
//! gates, and the construction phase that wires them to informers and queues.

pub mod constructor;
pub mod gate;
pub mod protocol;
