//! Host-side API for running commands in sandboxed worker processes: a
//! single [`WorkerHandle`] for one long-lived worker, and a [`WorkerPool`]
//! that manages a bounded set of them.

mod error;
mod handle;
mod pool;

pub use error::HostError;
pub use handle::{ExecOutcome, ExecRequest, WorkerHandle};
pub use pool::{PoolConfig, WorkerPool};
