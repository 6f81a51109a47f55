//! Worker records owned by the pool

use futures::future::BoxFuture;
use serde::Serialize;
use std::fmt;
use std::future::Future;

use crate::models::{WorkItem, WorkerInfo};

/// Worker lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Starting,
    Idle,
    Busy,
    Error,
    Terminated,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Starting => "starting",
            WorkerState::Idle => "idle",
            WorkerState::Busy => "busy",
            WorkerState::Error => "error",
            WorkerState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

type TeardownFn = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Releases the execution context a worker was spawned with
pub struct TeardownHandle {
    teardown: TeardownFn,
}

impl TeardownHandle {
    pub fn new<F, Fut>(teardown: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            teardown: Box::new(move || Box::pin(teardown())),
        }
    }

    /// Handle for contexts that need no cleanup
    pub fn noop() -> Self {
        Self::new(|| async { Ok(()) })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        (self.teardown)().await
    }
}

impl fmt::Debug for TeardownHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TeardownHandle")
    }
}

/// Mutable worker record; only the pool touches it
#[derive(Debug)]
pub(crate) struct Worker {
    pub info: WorkerInfo,
    pub state: WorkerState,
    pub current_item: Option<WorkItem>,
    pub completed: usize,
    pub teardown: Option<TeardownHandle>,
}

impl Worker {
    pub fn new(info: WorkerInfo) -> Self {
        Self {
            info,
            state: WorkerState::Starting,
            current_item: None,
            completed: 0,
            teardown: None,
        }
    }

    pub fn assign(&mut self, item: WorkItem) {
        self.state = WorkerState::Busy;
        self.current_item = Some(item);
    }

    pub fn release(&mut self) {
        self.state = WorkerState::Idle;
        self.current_item = None;
        self.completed += 1;
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            info: self.info.clone(),
            state: self.state,
            current_item: self.current_item.as_ref().map(|i| i.id.clone()),
            completed: self.completed,
        }
    }
}

/// Read-only copy of a worker record
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WorkerSnapshot {
    pub info: WorkerInfo,
    pub state: WorkerState,
    pub current_item: Option<String>,
    pub completed: usize,
}
