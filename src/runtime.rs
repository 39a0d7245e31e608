//! Controller runtime: configuration, fault handling, staged startup and
//! teardown, and the application runner.

pub mod config;
pub mod fatal;
pub mod generic;
pub mod runner;
pub(crate) mod stager;
pub mod state;
pub mod telemetry;
