//! Queueing and the per-root worker loop

pub mod queue;
pub mod worker;

pub use queue::DocumentQueue;
pub use worker::RootWorker;
