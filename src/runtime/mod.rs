//! Cooperative scheduling primitives: the worker pool and the delivery
//! drain gate.

pub(crate) mod drainer;
pub mod worker;

pub use worker::{current_worker, Job, WorkerPool};

pub(crate) use drainer::Drainer;
