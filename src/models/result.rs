//! Result models for scenario execution
//!
//! Defines worker identities, item outcomes and per-target summaries.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::WorkItem;

/// Identity of one execution slot
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerInfo {
    /// Unique worker id, `<target>-<index>`
    pub id: String,

    /// Execution target the worker belongs to
    pub target: String,

    /// 0-based index within the target's slots
    pub index: usize,
}

impl WorkerInfo {
    pub fn new(target: impl Into<String>, index: usize) -> Self {
        let target = target.into();
        Self {
            id: format!("{target}-{index}"),
            target,
            index,
        }
    }
}

impl fmt::Display for WorkerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Final status of a work item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Passed,
    Failed,
    Skipped,
}

impl ItemStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            ItemStatus::Passed => "✓",
            ItemStatus::Failed => "✗",
            ItemStatus::Skipped => "○",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ItemStatus::Passed)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::Passed => write!(f, "PASS"),
            ItemStatus::Failed => write!(f, "FAIL"),
            ItemStatus::Skipped => write!(f, "SKIP"),
        }
    }
}

/// Error reported by an item executor
///
/// `name` follows the executor's error vocabulary (`TimeoutError`,
/// `AssertionError`, ...) and drives failure classification.
#[derive(Error, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[error("{name}: {message}")]
pub struct ItemError {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ItemError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Generic error carrying only a message
    pub fn from_message(message: impl Into<String>) -> Self {
        Self::new("Error", message)
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl From<&anyhow::Error> for ItemError {
    fn from(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<ItemError>() {
            Some(item_error) => item_error.clone(),
            None => ItemError::from_message(format!("{err:#}")),
        }
    }
}

/// Outcome of a single attempt, as returned by an item executor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub status: ItemStatus,
    pub duration_ms: u64,
    pub error: Option<ItemError>,
}

impl ItemOutcome {
    pub fn passed(duration_ms: u64) -> Self {
        Self {
            status: ItemStatus::Passed,
            duration_ms,
            error: None,
        }
    }

    pub fn failed(duration_ms: u64, error: ItemError) -> Self {
        Self {
            status: ItemStatus::Failed,
            duration_ms,
            error: Some(error),
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: ItemStatus::Skipped,
            duration_ms: 0,
            error: None,
        }
    }
}

/// Final result of one (item, worker) execution, including retries
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkItemResult {
    pub item: WorkItem,
    pub worker: WorkerInfo,
    pub status: ItemStatus,
    pub duration_ms: u64,
    pub error: Option<ItemError>,
    pub retries: u32,
}

impl WorkItemResult {
    pub fn from_outcome(
        item: WorkItem,
        worker: WorkerInfo,
        outcome: ItemOutcome,
        retries: u32,
    ) -> Self {
        Self {
            item,
            worker,
            status: outcome.status,
            duration_ms: outcome.duration_ms,
            error: outcome.error,
            retries,
        }
    }

    /// Result for an executor that errored instead of reporting an outcome
    pub fn errored(item: WorkItem, worker: WorkerInfo, error: &anyhow::Error) -> Self {
        Self {
            item,
            worker,
            status: ItemStatus::Failed,
            duration_ms: 0,
            error: Some(ItemError::from(error)),
            retries: 0,
        }
    }

    pub fn target(&self) -> &str {
        &self.worker.target
    }

    /// Passed, but only after at least one retry
    pub fn is_flaky(&self) -> bool {
        self.retries > 0 && self.status == ItemStatus::Passed
    }
}

impl fmt::Display for WorkItemResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}] [{}ms]",
            self.status.symbol(),
            self.item.full_title(),
            self.worker,
            self.duration_ms
        )?;
        if self.retries > 0 {
            write!(f, " (retries: {})", self.retries)?;
        }
        if let Some(err) = &self.error {
            write!(f, " - {err}")?;
        }
        Ok(())
    }
}

/// Per-target breakdown of a run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetSummary {
    pub target: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
}

impl TargetSummary {
    pub fn from_results<'a>(
        target: impl Into<String>,
        results: impl IntoIterator<Item = &'a WorkItemResult>,
    ) -> Self {
        let mut summary = Self {
            target: target.into(),
            ..Default::default()
        };

        for result in results {
            summary.total += 1;
            summary.duration_ms += result.duration_ms;
            match result.status {
                ItemStatus::Passed => summary.passed += 1,
                ItemStatus::Failed => summary.failed += 1,
                ItemStatus::Skipped => summary.skipped += 1,
            }
        }

        summary
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }
}

impl fmt::Display for TargetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} total | {} passed | {} failed | {} skipped | {}ms",
            self.target, self.total, self.passed, self.failed, self.skipped, self.duration_ms
        )
    }
}

/// Grand totals across all targets
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTotals {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunTotals {
    pub fn from_summaries(summaries: &[TargetSummary]) -> Self {
        summaries.iter().fold(Self::default(), |mut acc, s| {
            acc.total += s.total;
            acc.passed += s.passed;
            acc.failed += s.failed;
            acc.skipped += s.skipped;
            acc
        })
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }

    pub fn is_all_passed(&self) -> bool {
        self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(target: &str, status: ItemStatus, duration_ms: u64, retries: u32) -> WorkItemResult {
        WorkItemResult {
            item: WorkItem::new("a", "scenario a", "a.feature"),
            worker: WorkerInfo::new(target, 0),
            status,
            duration_ms,
            error: None,
            retries,
        }
    }

    #[test]
    fn test_worker_info_id() {
        let info = WorkerInfo::new("chromium", 2);
        assert_eq!(info.id, "chromium-2");
        assert_eq!(info.target, "chromium");
        assert_eq!(info.index, 2);
    }

    #[test]
    fn test_errored_result_keeps_item_error() {
        let err = anyhow::Error::new(ItemError::new("TimeoutError", "waited 30s"));
        let result = WorkItemResult::errored(
            WorkItem::new("a", "a", "a.feature"),
            WorkerInfo::new("firefox", 0),
            &err,
        );

        assert_eq!(result.status, ItemStatus::Failed);
        assert_eq!(result.duration_ms, 0);
        assert_eq!(result.retries, 0);
        assert_eq!(result.error.unwrap().name, "TimeoutError");
    }

    #[test]
    fn test_errored_result_wraps_plain_error() {
        let err = anyhow::anyhow!("browser crashed");
        let result = WorkItemResult::errored(
            WorkItem::new("a", "a", "a.feature"),
            WorkerInfo::new("firefox", 0),
            &err,
        );

        let error = result.error.unwrap();
        assert_eq!(error.name, "Error");
        assert_eq!(error.message, "browser crashed");
    }

    #[test]
    fn test_flaky_only_when_passed_after_retry() {
        assert!(result("x", ItemStatus::Passed, 10, 1).is_flaky());
        assert!(!result("x", ItemStatus::Failed, 10, 2).is_flaky());
        assert!(!result("x", ItemStatus::Passed, 10, 0).is_flaky());
    }

    #[test]
    fn test_target_summary_and_totals() {
        let results = vec![
            result("chromium", ItemStatus::Passed, 100, 0),
            result("chromium", ItemStatus::Failed, 50, 0),
            result("chromium", ItemStatus::Skipped, 0, 0),
        ];
        let chromium = TargetSummary::from_results("chromium", &results);
        assert_eq!(chromium.total, 3);
        assert_eq!(chromium.passed, 1);
        assert_eq!(chromium.failed, 1);
        assert_eq!(chromium.skipped, 1);
        assert_eq!(chromium.duration_ms, 150);

        let firefox = TargetSummary::from_results("firefox", &results[..1]);
        let totals = RunTotals::from_summaries(&[chromium, firefox]);
        assert_eq!(totals.total, 4);
        assert_eq!(totals.passed + totals.failed + totals.skipped, totals.total);
        assert!(!totals.is_all_passed());
    }
}
