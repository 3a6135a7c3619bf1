//! Worker pool: one isolated task per inbound request.

pub mod pool;

pub use pool::WorkerPool;
