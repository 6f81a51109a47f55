//! Run comparison
//!
//! Compare two stored runs scenario by scenario and target by target.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::aggregate::ScenarioMatrixRow;
use super::storage::StoredRun;
use crate::models::ItemStatus;

/// How one scenario/target cell changed between runs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Passed in the baseline, failed now
    Regression,
    /// Failed in the baseline, passed now
    Fix,
    /// Not run in the baseline
    New,
    /// Not run in the current run
    Removed,
    Unchanged,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::Regression => "regression",
            ChangeKind::Fix => "fix",
            ChangeKind::New => "new",
            ChangeKind::Removed => "removed",
            ChangeKind::Unchanged => "unchanged",
        };
        f.write_str(name)
    }
}

/// Change of one scenario on one target
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CellChange {
    pub id: String,
    pub title: String,
    pub target: String,
    pub kind: ChangeKind,
    pub baseline: Option<ItemStatus>,
    pub current: Option<ItemStatus>,
}

/// Pass-rate movement of one target
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TargetDelta {
    pub target: String,
    /// Percentages; `None` when the target is absent from that run
    pub baseline_pass_rate: Option<f64>,
    pub current_pass_rate: Option<f64>,
    pub delta: f64,
}

/// Counts per change kind
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ComparisonSummary {
    pub regressions: usize,
    pub fixes: usize,
    pub new: usize,
    pub removed: usize,
    pub unchanged: usize,
}

/// Comparison between a baseline run and a current run
#[derive(Clone, Debug, Serialize)]
pub struct RunComparison {
    pub baseline_id: String,
    pub current_id: String,
    pub changes: Vec<CellChange>,
    pub targets: Vec<TargetDelta>,
    pub summary: ComparisonSummary,
}

impl RunComparison {
    pub fn has_regressions(&self) -> bool {
        self.summary.regressions > 0
    }

    pub fn changes_of(&self, kind: ChangeKind) -> impl Iterator<Item = &CellChange> {
        self.changes.iter().filter(move |c| c.kind == kind)
    }
}

/// Run comparator
pub struct RunComparator;

impl RunComparator {
    /// Compare two stored runs
    pub fn compare(baseline: &StoredRun, current: &StoredRun) -> RunComparison {
        let changes = Self::build_changes(baseline, current);
        let targets = Self::target_deltas(baseline, current);

        let mut summary = ComparisonSummary::default();
        for change in &changes {
            match change.kind {
                ChangeKind::Regression => summary.regressions += 1,
                ChangeKind::Fix => summary.fixes += 1,
                ChangeKind::New => summary.new += 1,
                ChangeKind::Removed => summary.removed += 1,
                ChangeKind::Unchanged => summary.unchanged += 1,
            }
        }

        RunComparison {
            baseline_id: baseline.id.clone(),
            current_id: current.id.clone(),
            changes,
            targets,
            summary,
        }
    }

    fn build_changes(baseline: &StoredRun, current: &StoredRun) -> Vec<CellChange> {
        let before: BTreeMap<&str, &ScenarioMatrixRow> = baseline
            .summary
            .rows
            .iter()
            .map(|r| (r.id.as_str(), r))
            .collect();
        let after: BTreeMap<&str, &ScenarioMatrixRow> = current
            .summary
            .rows
            .iter()
            .map(|r| (r.id.as_str(), r))
            .collect();

        let ids: BTreeSet<&str> = before.keys().chain(after.keys()).copied().collect();
        let targets = merged_targets(baseline, current);

        let mut changes = Vec::new();
        for id in ids {
            let old_row = before.get(id);
            let new_row = after.get(id);
            let title = new_row
                .or(old_row)
                .map(|r| r.title.clone())
                .unwrap_or_default();

            for target in &targets {
                let old = old_row.and_then(|r| r.cell(target).status());
                let new = new_row.and_then(|r| r.cell(target).status());
                let Some(kind) = classify_change(old, new) else {
                    continue;
                };

                changes.push(CellChange {
                    id: id.to_string(),
                    title: title.clone(),
                    target: target.clone(),
                    kind,
                    baseline: old,
                    current: new,
                });
            }
        }

        changes
    }

    fn target_deltas(baseline: &StoredRun, current: &StoredRun) -> Vec<TargetDelta> {
        let rate = |run: &StoredRun, target: &str| {
            run.summary
                .target_summaries
                .iter()
                .find(|t| t.target == target && t.total > 0)
                .map(|t| t.pass_rate())
        };

        merged_targets(baseline, current)
            .into_iter()
            .map(|target| {
                let baseline_pass_rate = rate(baseline, &target);
                let current_pass_rate = rate(current, &target);
                TargetDelta {
                    delta: current_pass_rate.unwrap_or(0.0) - baseline_pass_rate.unwrap_or(0.0),
                    target,
                    baseline_pass_rate,
                    current_pass_rate,
                }
            })
            .collect()
    }
}

/// Baseline targets first, then targets only the current run has
fn merged_targets(baseline: &StoredRun, current: &StoredRun) -> Vec<String> {
    let mut targets = baseline.summary.targets.clone();
    for target in &current.summary.targets {
        if !targets.contains(target) {
            targets.push(target.clone());
        }
    }
    targets
}

fn classify_change(old: Option<ItemStatus>, new: Option<ItemStatus>) -> Option<ChangeKind> {
    let kind = match (old, new) {
        (None, None) => return None,
        (None, Some(_)) => ChangeKind::New,
        (Some(_), None) => ChangeKind::Removed,
        (Some(ItemStatus::Passed), Some(ItemStatus::Failed)) => ChangeKind::Regression,
        (Some(ItemStatus::Failed), Some(ItemStatus::Passed)) => ChangeKind::Fix,
        (Some(_), Some(_)) => ChangeKind::Unchanged,
    };
    Some(kind)
}

/// Comparison report formatter
pub struct ComparisonFormatter;

impl ComparisonFormatter {
    /// Format comparison as table
    pub fn format_table(comparison: &RunComparison) -> String {
        let mut output = String::new();

        output
            .push_str("\n╔════════════════════════════════════════════════════════════════════╗\n");
        output
            .push_str("║                       Run Comparison Report                        ║\n");
        output.push_str("╠════════════════════════════════════════════════════════════════════╣\n");
        output.push_str(&format!(
            "║ Baseline: {:<24} Current: {:<24} ║\n",
            comparison.baseline_id, comparison.current_id
        ));
        let s = &comparison.summary;
        output.push_str(&format!(
            "║ Regressions: {:<4} Fixes: {:<4} New: {:<4} Removed: {:<4} Same: {:<5}║\n",
            s.regressions, s.fixes, s.new, s.removed, s.unchanged
        ));
        output.push_str("╠════════════════════════════════════════════════════════════════════╣\n");

        output.push_str("║ Pass rate by target:                                               ║\n");
        for t in &comparison.targets {
            output.push_str(&format!(
                "║   {:<24} {:>7} → {:>7}  ({:+6.1}%)                  ║\n",
                truncate(&t.target, 24),
                format_rate(t.baseline_pass_rate),
                format_rate(t.current_pass_rate),
                t.delta
            ));
        }

        for (kind, label) in [
            (ChangeKind::Regression, "Regressions"),
            (ChangeKind::Fix, "Fixes"),
            (ChangeKind::New, "New"),
            (ChangeKind::Removed, "Removed"),
        ] {
            let changes: Vec<&CellChange> = comparison.changes_of(kind).collect();
            if changes.is_empty() {
                continue;
            }
            output.push_str(
                "╟────────────────────────────────────────────────────────────────────╢\n",
            );
            output.push_str(&format!("║ {:<67}║\n", format!("{label}:")));
            for change in changes {
                output.push_str(&format!(
                    "║   {:<46} {:<18}║\n",
                    truncate(&change.title, 46),
                    truncate(&change.target, 18)
                ));
            }
        }

        output.push_str("╚════════════════════════════════════════════════════════════════════╝\n");
        output
    }

    /// Format comparison as JSON
    pub fn format_json(comparison: &RunComparison) -> String {
        serde_json::to_string_pretty(comparison).unwrap_or_default()
    }
}

fn format_rate(rate: Option<f64>) -> String {
    rate.map(|r| format!("{r:.1}%"))
        .unwrap_or_else(|| "-".to_string())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::WorkerPoolConfig;
    use crate::models::{ItemError, ItemOutcome, RunTotals, TargetSummary, WorkItem, WorkItemResult, WorkerInfo};
    use crate::results::storage::RunSettings;
    use crate::results::ResultAggregator;
    use crate::scheduler::{SchedulerConfig, SchedulerResult, Strategy};

    fn outcome(passed: bool) -> ItemOutcome {
        if passed {
            ItemOutcome::passed(10)
        } else {
            ItemOutcome::failed(10, ItemError::new("AssertionError", "nope"))
        }
    }

    fn stored(id: &str, cells: &[(&str, &str, bool)]) -> StoredRun {
        let results: Vec<WorkItemResult> = cells
            .iter()
            .map(|(item, target, passed)| {
                WorkItemResult::from_outcome(
                    WorkItem::new(*item, format!("scenario {item}"), "a.feature"),
                    WorkerInfo::new(*target, 0),
                    outcome(*passed),
                    0,
                )
            })
            .collect();

        let mut names: Vec<&str> = Vec::new();
        for (_, target, _) in cells {
            if !names.contains(target) {
                names.push(*target);
            }
        }
        let summaries: Vec<TargetSummary> = names
            .iter()
            .map(|t| TargetSummary::from_results(*t, results.iter().filter(|r| r.target() == *t)))
            .collect();

        let summary = ResultAggregator::aggregate(&SchedulerResult {
            strategy: Strategy::Matrix,
            totals: RunTotals::from_summaries(&summaries),
            targets: summaries,
            results,
            duration_ms: 10,
        });
        let config = SchedulerConfig::new(WorkerPoolConfig::new().with_target("x", 1));
        let mut run = StoredRun::new(RunSettings::from(&config), summary);
        run.id = id.to_string();
        run
    }

    #[test]
    fn test_classify_change() {
        use ItemStatus::*;
        assert_eq!(classify_change(Some(Passed), Some(Failed)), Some(ChangeKind::Regression));
        assert_eq!(classify_change(Some(Failed), Some(Passed)), Some(ChangeKind::Fix));
        assert_eq!(classify_change(None, Some(Passed)), Some(ChangeKind::New));
        assert_eq!(classify_change(Some(Skipped), None), Some(ChangeKind::Removed));
        assert_eq!(classify_change(Some(Skipped), Some(Passed)), Some(ChangeKind::Unchanged));
        assert_eq!(classify_change(None, None), None);
    }

    #[test]
    fn test_compare_runs() {
        let baseline = stored(
            "base",
            &[
                ("a", "chromium", true),
                ("b", "chromium", false),
                ("c", "chromium", true),
                ("gone", "chromium", true),
            ],
        );
        let current = stored(
            "cur",
            &[
                ("a", "chromium", false),
                ("b", "chromium", true),
                ("c", "chromium", true),
                ("fresh", "chromium", true),
            ],
        );

        let cmp = RunComparator::compare(&baseline, &current);
        assert_eq!(
            cmp.summary,
            ComparisonSummary {
                regressions: 1,
                fixes: 1,
                new: 1,
                removed: 1,
                unchanged: 1,
            }
        );
        assert!(cmp.has_regressions());
        let regression = cmp.changes_of(ChangeKind::Regression).next().unwrap();
        assert_eq!(regression.id, "a");
        assert_eq!(regression.target, "chromium");

        assert_eq!(cmp.targets.len(), 1);
        assert_eq!(cmp.targets[0].baseline_pass_rate, Some(75.0));
        assert_eq!(cmp.targets[0].current_pass_rate, Some(75.0));
        assert_eq!(cmp.targets[0].delta, 0.0);
    }

    #[test]
    fn test_target_only_in_current_run() {
        let baseline = stored("base", &[("a", "chromium", true)]);
        let current = stored("cur", &[("a", "chromium", true), ("a", "firefox", false)]);

        let cmp = RunComparator::compare(&baseline, &current);
        let firefox = cmp.targets.iter().find(|t| t.target == "firefox").unwrap();
        assert_eq!(firefox.baseline_pass_rate, None);
        assert_eq!(firefox.current_pass_rate, Some(0.0));
        assert_eq!(cmp.changes_of(ChangeKind::New).count(), 1);
    }

    #[test]
    fn test_formatters() {
        let baseline = stored("base", &[("a", "chromium", true)]);
        let current = stored("cur", &[("a", "chromium", false)]);
        let cmp = RunComparator::compare(&baseline, &current);

        let table = ComparisonFormatter::format_table(&cmp);
        assert!(table.contains("Run Comparison Report"));
        assert!(table.contains("Regressions:"));
        assert!(table.contains("scenario a"));

        let json: serde_json::Value =
            serde_json::from_str(&ComparisonFormatter::format_json(&cmp)).unwrap();
        assert_eq!(json["summary"]["regressions"], 1);
        assert_eq!(json["changes"][0]["kind"], "regression");
    }
}
