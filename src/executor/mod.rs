//! Scenario execution engine
//!
//! Worker pool, retry classification and the command-driven executor used by the CLI.

pub mod classify;
pub mod command;
mod error;
mod pool;
mod worker;

pub use classify::{classify, FailureCategory, FailureClassification};
pub use command::{CommandConfig, CommandRunner};
pub use error::PoolError;
pub use pool::{TargetSlots, WorkerPool, WorkerPoolConfig};
pub use worker::{TeardownHandle, WorkerSnapshot, WorkerState};
