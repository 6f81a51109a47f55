//! Event vocabulary published during a run

use serde::Serialize;
use std::fmt;

use crate::models::{ItemError, RunTotals, TargetSummary, WorkItem, WorkItemResult, WorkerInfo};
use crate::scheduler::Strategy;

/// Lifecycle notification
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStart {
        strategy: Strategy,
        targets: Vec<String>,
        total_items: usize,
    },
    RunEnd {
        strategy: Strategy,
        totals: RunTotals,
        duration_ms: u64,
    },

    WorkerSpawn {
        worker: WorkerInfo,
    },
    WorkerReady {
        worker: WorkerInfo,
    },
    WorkerBusy {
        worker: WorkerInfo,
        item: WorkItem,
    },
    WorkerIdle {
        worker: WorkerInfo,
    },
    WorkerError {
        worker: WorkerInfo,
        error: String,
    },
    WorkerTerminate {
        worker: WorkerInfo,
    },

    ItemEnqueue {
        item: WorkItem,
    },
    ItemStart {
        item: WorkItem,
        worker: WorkerInfo,
    },
    ItemPass {
        result: WorkItemResult,
    },
    ItemFail {
        result: WorkItemResult,
    },
    ItemSkip {
        result: WorkItemResult,
    },
    ItemRetry {
        item: WorkItem,
        worker: WorkerInfo,
        /// 1-based retry attempt about to start
        attempt: u32,
        max_retries: u32,
        error: Option<ItemError>,
    },
    ItemEnd {
        result: WorkItemResult,
    },

    TargetStart {
        target: String,
        workers: usize,
    },
    TargetEnd {
        summary: TargetSummary,
        elapsed_ms: u64,
    },

    Progress {
        completed: usize,
        total: usize,
        passed: usize,
        failed: usize,
        skipped: usize,
    },
}

impl RunEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RunEvent::RunStart { .. } => EventKind::RunStart,
            RunEvent::RunEnd { .. } => EventKind::RunEnd,
            RunEvent::WorkerSpawn { .. } => EventKind::WorkerSpawn,
            RunEvent::WorkerReady { .. } => EventKind::WorkerReady,
            RunEvent::WorkerBusy { .. } => EventKind::WorkerBusy,
            RunEvent::WorkerIdle { .. } => EventKind::WorkerIdle,
            RunEvent::WorkerError { .. } => EventKind::WorkerError,
            RunEvent::WorkerTerminate { .. } => EventKind::WorkerTerminate,
            RunEvent::ItemEnqueue { .. } => EventKind::ItemEnqueue,
            RunEvent::ItemStart { .. } => EventKind::ItemStart,
            RunEvent::ItemPass { .. } => EventKind::ItemPass,
            RunEvent::ItemFail { .. } => EventKind::ItemFail,
            RunEvent::ItemSkip { .. } => EventKind::ItemSkip,
            RunEvent::ItemRetry { .. } => EventKind::ItemRetry,
            RunEvent::ItemEnd { .. } => EventKind::ItemEnd,
            RunEvent::TargetStart { .. } => EventKind::TargetStart,
            RunEvent::TargetEnd { .. } => EventKind::TargetEnd,
            RunEvent::Progress { .. } => EventKind::Progress,
        }
    }
}

/// Discriminant of [`RunEvent`], used as the subscription key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStart,
    RunEnd,
    WorkerSpawn,
    WorkerReady,
    WorkerBusy,
    WorkerIdle,
    WorkerError,
    WorkerTerminate,
    ItemEnqueue,
    ItemStart,
    ItemPass,
    ItemFail,
    ItemSkip,
    ItemRetry,
    ItemEnd,
    TargetStart,
    TargetEnd,
    Progress,
}

impl EventKind {
    pub fn all() -> Vec<EventKind> {
        vec![
            EventKind::RunStart,
            EventKind::RunEnd,
            EventKind::WorkerSpawn,
            EventKind::WorkerReady,
            EventKind::WorkerBusy,
            EventKind::WorkerIdle,
            EventKind::WorkerError,
            EventKind::WorkerTerminate,
            EventKind::ItemEnqueue,
            EventKind::ItemStart,
            EventKind::ItemPass,
            EventKind::ItemFail,
            EventKind::ItemSkip,
            EventKind::ItemRetry,
            EventKind::ItemEnd,
            EventKind::TargetStart,
            EventKind::TargetEnd,
            EventKind::Progress,
        ]
    }

    /// Wire name, e.g. `item:pass`
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::RunStart => "run:start",
            EventKind::RunEnd => "run:end",
            EventKind::WorkerSpawn => "worker:spawn",
            EventKind::WorkerReady => "worker:ready",
            EventKind::WorkerBusy => "worker:busy",
            EventKind::WorkerIdle => "worker:idle",
            EventKind::WorkerError => "worker:error",
            EventKind::WorkerTerminate => "worker:terminate",
            EventKind::ItemEnqueue => "item:enqueue",
            EventKind::ItemStart => "item:start",
            EventKind::ItemPass => "item:pass",
            EventKind::ItemFail => "item:fail",
            EventKind::ItemSkip => "item:skip",
            EventKind::ItemRetry => "item:retry",
            EventKind::ItemEnd => "item:end",
            EventKind::TargetStart => "target:start",
            EventKind::TargetEnd => "target:end",
            EventKind::Progress => "progress",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        let event = RunEvent::WorkerIdle {
            worker: WorkerInfo::new("webkit", 0),
        };
        assert_eq!(event.kind(), EventKind::WorkerIdle);
        assert_eq!(event.kind().name(), "worker:idle");
    }

    #[test]
    fn test_all_kinds_have_unique_names() {
        let mut names: Vec<_> = EventKind::all().iter().map(|k| k.name()).collect();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = RunEvent::TargetStart {
            target: "chromium".to_string(),
            workers: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "target_start");
        assert_eq!(json["workers"], 2);
    }
}
