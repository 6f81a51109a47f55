//! Result aggregation
//!
//! Turns the flat result list of a run into a scenario × target matrix with
//! flakiness, cross-target consistency and timing analysis.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::timing::TimingStats;
use crate::models::{ItemError, ItemStatus, RunTotals, TargetSummary, WorkItemResult};
use crate::scheduler::{SchedulerResult, Strategy};

const SLOWEST_LIMIT: usize = 5;

/// Outcome of one scenario on one target
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MatrixCell {
    Ran {
        status: ItemStatus,
        duration_ms: u64,
        error: Option<ItemError>,
        retries: u32,
    },
    NotRun,
}

impl MatrixCell {
    pub fn status(&self) -> Option<ItemStatus> {
        match self {
            MatrixCell::Ran { status, .. } => Some(*status),
            MatrixCell::NotRun => None,
        }
    }

    fn from_result(result: &WorkItemResult) -> Self {
        MatrixCell::Ran {
            status: result.status,
            duration_ms: result.duration_ms,
            error: result.error.clone(),
            retries: result.retries,
        }
    }
}

/// One scenario across every participating target
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioMatrixRow {
    pub id: String,
    pub title: String,
    pub file: String,
    pub cells: BTreeMap<String, MatrixCell>,

    /// Passed on some target only after a retry
    pub flaky: bool,

    /// Run cells disagree on the final status
    pub cross_target_inconsistent: bool,
}

impl ScenarioMatrixRow {
    pub fn cell(&self, target: &str) -> &MatrixCell {
        self.cells.get(target).unwrap_or(&MatrixCell::NotRun)
    }

    pub fn has_failure(&self) -> bool {
        self.cells
            .values()
            .any(|c| c.status() == Some(ItemStatus::Failed))
    }
}

/// Slow scenario entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlowItem {
    pub title: String,
    pub duration_ms: u64,
    pub target: String,
}

/// Failed scenario entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailedItem {
    pub title: String,
    pub error: String,
    pub target: String,
}

/// Aggregated view of a run, handed to reporting
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AggregatedSummary {
    pub strategy: Strategy,

    /// Participating targets in declaration order
    pub targets: Vec<String>,

    /// Matrix rows in order of first appearance
    pub rows: Vec<ScenarioMatrixRow>,

    pub target_summaries: Vec<TargetSummary>,
    pub totals: RunTotals,

    /// Statistics over non-skipped durations
    pub timing: TimingStats,

    pub flaky: Vec<String>,
    pub inconsistent: Vec<String>,
    pub slowest: Vec<SlowItem>,
    pub failures: Vec<FailedItem>,

    /// Wall-clock duration of the run
    pub duration_ms: u64,
}

impl AggregatedSummary {
    pub fn has_failures(&self) -> bool {
        self.totals.failed > 0
    }

    pub fn row(&self, id: &str) -> Option<&ScenarioMatrixRow> {
        self.rows.iter().find(|r| r.id == id)
    }
}

/// Builds an [`AggregatedSummary`] from a scheduler result
pub struct ResultAggregator;

impl ResultAggregator {
    pub fn aggregate(run: &SchedulerResult) -> AggregatedSummary {
        let targets: Vec<String> = run.targets.iter().map(|t| t.target.clone()).collect();
        let rows = Self::build_rows(&run.results, &targets);

        let durations: Vec<u64> = run
            .results
            .iter()
            .filter(|r| r.status != ItemStatus::Skipped)
            .map(|r| r.duration_ms)
            .collect();

        AggregatedSummary {
            strategy: run.strategy,
            flaky: rows
                .iter()
                .filter(|r| r.flaky)
                .map(|r| r.title.clone())
                .collect(),
            inconsistent: rows
                .iter()
                .filter(|r| r.cross_target_inconsistent)
                .map(|r| r.title.clone())
                .collect(),
            slowest: Self::slowest(&run.results),
            failures: Self::failures(&run.results),
            timing: TimingStats::from_durations(&durations),
            target_summaries: run.targets.clone(),
            totals: run.totals.clone(),
            duration_ms: run.duration_ms,
            targets,
            rows,
        }
    }

    fn build_rows(results: &[WorkItemResult], targets: &[String]) -> Vec<ScenarioMatrixRow> {
        let mut rows: Vec<ScenarioMatrixRow> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();

        for result in results {
            let position = *index.entry(result.item.id.as_str()).or_insert_with(|| {
                rows.push(ScenarioMatrixRow {
                    id: result.item.id.clone(),
                    title: result.item.full_title(),
                    file: result.item.location(),
                    cells: targets
                        .iter()
                        .map(|t| (t.clone(), MatrixCell::NotRun))
                        .collect(),
                    flaky: false,
                    cross_target_inconsistent: false,
                });
                rows.len() - 1
            });

            let row = &mut rows[position];
            row.cells
                .insert(result.target().to_string(), MatrixCell::from_result(result));
            if result.is_flaky() {
                row.flaky = true;
            }
        }

        for row in &mut rows {
            let statuses: BTreeSet<ItemStatus> =
                row.cells.values().filter_map(MatrixCell::status).collect();
            row.cross_target_inconsistent = statuses.len() > 1;
        }

        rows
    }

    fn slowest(results: &[WorkItemResult]) -> Vec<SlowItem> {
        let mut ran: Vec<&WorkItemResult> = results
            .iter()
            .filter(|r| r.status != ItemStatus::Skipped)
            .collect();
        ran.sort_by(|a, b| b.duration_ms.cmp(&a.duration_ms));

        ran.into_iter()
            .take(SLOWEST_LIMIT)
            .map(|r| SlowItem {
                title: r.item.full_title(),
                duration_ms: r.duration_ms,
                target: r.target().to_string(),
            })
            .collect()
    }

    fn failures(results: &[WorkItemResult]) -> Vec<FailedItem> {
        results
            .iter()
            .filter(|r| r.status == ItemStatus::Failed)
            .map(|r| FailedItem {
                title: r.item.full_title(),
                error: r
                    .error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "Unknown error".to_string()),
                target: r.target().to_string(),
            })
            .collect()
    }
}
