//! Worker pool errors

use thiserror::Error;

/// Worker pool errors
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("No idle workers available")]
    NoIdleWorkers,

    #[error("No idle workers available for target {0}")]
    NoIdleWorkersForTarget(String),

    #[error("Failed to spawn worker {worker}: {source:#}")]
    SpawnFailed {
        worker: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Spawning worker {worker} timed out after {timeout_ms}ms")]
    SpawnTimeout { worker: String, timeout_ms: u64 },
}
