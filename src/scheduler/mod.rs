//! Run scheduler
//!
//! Filters the work list, drives the worker pool with the selected strategy
//! and assembles a single result across all targets.

mod filter;
pub mod tags;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::{EventBus, RunEvent};
use crate::executor::{PoolError, TeardownHandle, WorkerPool, WorkerPoolConfig};
use crate::models::{ItemOutcome, RunTotals, TargetSummary, WorkItem, WorkItemResult, WorkerInfo};
use crate::utils::Timer;

pub use filter::ItemFilter;
pub use tags::{TagExpr, TagExprError};

/// Distribution strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// One queue shared by every worker of every target
    #[default]
    Parallel,
    /// Targets one after another, each running the full list
    Sequential,
    /// Every target runs the full list concurrently
    Matrix,
}

impl Strategy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "parallel" => Some(Strategy::Parallel),
            "sequential" => Some(Strategy::Sequential),
            "matrix" => Some(Strategy::Matrix),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Parallel => "parallel",
            Strategy::Sequential => "sequential",
            Strategy::Matrix => "matrix",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduler errors
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Invalid tag filter: {0}")]
    TagExpr(#[from] TagExprError),

    #[error("No targets configured")]
    NoTargets,

    #[error("Target {0} is configured more than once")]
    DuplicateTarget(String),

    #[error("Target {0} has no workers")]
    EmptyTarget(String),

    #[error("Work item id {0} appears more than once")]
    DuplicateItem(String),
}

/// Scheduler configuration
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SchedulerConfig {
    pub strategy: Strategy,

    /// Title substring filter
    pub grep: Option<String>,

    /// Tag expression filter
    pub tags: Option<String>,

    pub pool: WorkerPoolConfig,
}

impl SchedulerConfig {
    pub fn new(pool: WorkerPoolConfig) -> Self {
        Self {
            pool,
            ..Default::default()
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_grep(mut self, grep: impl Into<String>) -> Self {
        self.grep = Some(grep.into());
        self
    }

    pub fn with_tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = Some(tags.into());
        self
    }

    /// Check targets and parse the tag filter
    pub fn validate(&self) -> Result<ItemFilter, SchedulerError> {
        if self.pool.targets.is_empty() {
            return Err(SchedulerError::NoTargets);
        }

        let mut seen = HashSet::new();
        for target in &self.pool.targets {
            if !seen.insert(target.name.as_str()) {
                return Err(SchedulerError::DuplicateTarget(target.name.clone()));
            }
            if target.workers == 0 {
                return Err(SchedulerError::EmptyTarget(target.name.clone()));
            }
        }

        let tags = match self.tags.as_deref().map(str::trim) {
            Some(expr) if !expr.is_empty() => Some(TagExpr::parse(expr)?),
            _ => None,
        };
        Ok(ItemFilter::new(self.grep.clone(), tags))
    }

    /// Strategy actually used; a one-target matrix is a parallel run
    pub fn effective_strategy(&self) -> Strategy {
        match self.strategy {
            Strategy::Matrix if self.pool.targets.len() == 1 => Strategy::Parallel,
            other => other,
        }
    }
}

/// Outcome of one scheduler run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerResult {
    pub strategy: Strategy,

    /// Per-target breakdown in declaration order
    pub targets: Vec<TargetSummary>,

    /// Every result, in completion order
    pub results: Vec<WorkItemResult>,

    pub totals: RunTotals,

    /// Wall-clock duration of the run
    pub duration_ms: u64,
}

impl SchedulerResult {
    pub fn has_failures(&self) -> bool {
        self.totals.failed > 0
    }
}

/// Orchestrates filtering, distribution and the worker pool lifecycle
pub struct Scheduler {
    config: SchedulerConfig,
    filter: ItemFilter,
    bus: EventBus,
    pool: WorkerPool,
}

impl Scheduler {
    /// Validate the configuration; fails before any worker exists
    pub fn new(config: SchedulerConfig, bus: EventBus) -> Result<Self, SchedulerError> {
        let filter = config.validate()?;
        let pool = WorkerPool::new(config.pool.clone(), bus.clone());

        Ok(Self {
            config,
            filter,
            bus,
            pool,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Apply grep and tag filters, preserving order
    pub fn filter_items(&self, items: Vec<WorkItem>) -> Vec<WorkItem> {
        self.filter.apply(items)
    }

    /// Spawn every worker; on failure the ones that did start are torn down
    pub async fn spawn_workers<S, Fut>(&self, spawn_fn: S) -> Result<(), SchedulerError>
    where
        S: Fn(WorkerInfo) -> Fut,
        Fut: Future<Output = anyhow::Result<TeardownHandle>>,
    {
        if let Err(e) = self.pool.spawn(spawn_fn).await {
            warn!("Worker spawn failed, tearing down started workers");
            self.pool.terminate().await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Filter the items and execute them with the configured strategy
    ///
    /// Item ids must be unique; a bail from a previous run is cleared first.
    pub async fn run<E, Fut>(
        &self,
        items: Vec<WorkItem>,
        execute_fn: &E,
    ) -> Result<SchedulerResult, SchedulerError>
    where
        E: Fn(WorkItem, WorkerInfo) -> Fut,
        Fut: Future<Output = anyhow::Result<ItemOutcome>>,
    {
        let mut seen = HashSet::new();
        if let Some(dup) = items.iter().find(|item| !seen.insert(item.id.as_str())) {
            return Err(SchedulerError::DuplicateItem(dup.id.clone()));
        }

        self.pool.clear_bail();
        let loaded = items.len();
        let items = self.filter_items(items);
        let strategy = self.config.effective_strategy();
        let target_names = self.config.pool.target_names();

        info!(
            "Running {} of {} items with {} strategy on {}",
            items.len(),
            loaded,
            strategy,
            target_names.join(", ")
        );

        let timer = Timer::start("run");
        self.bus.publish(RunEvent::RunStart {
            strategy,
            targets: target_names,
            total_items: items.len(),
        });

        let (targets, results) = match strategy {
            Strategy::Parallel => self.run_parallel(items, execute_fn).await?,
            Strategy::Sequential => self.run_sequential(items, execute_fn).await?,
            Strategy::Matrix => self.run_matrix(items, execute_fn).await?,
        };

        let totals = RunTotals::from_summaries(&targets);
        let duration_ms = timer.stop();
        self.bus.publish(RunEvent::RunEnd {
            strategy,
            totals: totals.clone(),
            duration_ms,
        });

        info!(
            "Run finished in {}ms: {} passed, {} failed, {} skipped",
            duration_ms, totals.passed, totals.failed, totals.skipped
        );

        Ok(SchedulerResult {
            strategy,
            targets,
            results,
            totals,
            duration_ms,
        })
    }

    fn target_start(&self, target: &str) {
        self.bus.publish(RunEvent::TargetStart {
            target: target.to_string(),
            workers: self.config.pool.workers_for(target),
        });
    }

    fn target_end(&self, target: &str, results: &[WorkItemResult], elapsed_ms: u64) -> TargetSummary {
        let summary = TargetSummary::from_results(
            target,
            results.iter().filter(|r| r.target() == target),
        );
        debug!("Target {} finished in {}ms: {}", target, elapsed_ms, summary);
        self.bus.publish(RunEvent::TargetEnd {
            summary: summary.clone(),
            elapsed_ms,
        });
        summary
    }

    async fn run_parallel<E, Fut>(
        &self,
        items: Vec<WorkItem>,
        execute_fn: &E,
    ) -> Result<(Vec<TargetSummary>, Vec<WorkItemResult>), SchedulerError>
    where
        E: Fn(WorkItem, WorkerInfo) -> Fut,
        Fut: Future<Output = anyhow::Result<ItemOutcome>>,
    {
        let names = self.config.pool.target_names();
        for name in &names {
            self.target_start(name);
        }

        let timer = Timer::start("parallel");
        let results = self.pool.execute(items, execute_fn).await?;
        let elapsed = timer.elapsed_ms();

        let summaries = names
            .iter()
            .map(|name| self.target_end(name, &results, elapsed))
            .collect();
        Ok((summaries, results))
    }

    async fn run_sequential<E, Fut>(
        &self,
        items: Vec<WorkItem>,
        execute_fn: &E,
    ) -> Result<(Vec<TargetSummary>, Vec<WorkItemResult>), SchedulerError>
    where
        E: Fn(WorkItem, WorkerInfo) -> Fut,
        Fut: Future<Output = anyhow::Result<ItemOutcome>>,
    {
        let mut summaries = Vec::new();
        let mut results = Vec::new();

        for name in self.config.pool.target_names() {
            if self.pool.is_bailed() {
                debug!("Skipping target {}: run bailed", name);
                summaries.push(TargetSummary::from_results(&name, std::iter::empty()));
                continue;
            }

            self.target_start(&name);
            let timer = Timer::start(&name);
            let target_results = self
                .pool
                .execute_on_target(&name, items.clone(), execute_fn)
                .await?;
            summaries.push(self.target_end(&name, &target_results, timer.elapsed_ms()));
            results.extend(target_results);
        }

        Ok((summaries, results))
    }

    async fn run_matrix<E, Fut>(
        &self,
        items: Vec<WorkItem>,
        execute_fn: &E,
    ) -> Result<(Vec<TargetSummary>, Vec<WorkItemResult>), SchedulerError>
    where
        E: Fn(WorkItem, WorkerInfo) -> Fut,
        Fut: Future<Output = anyhow::Result<ItemOutcome>>,
    {
        let names = self.config.pool.target_names();
        let runs = names.iter().map(|name| {
            let items = items.clone();
            async move {
                self.target_start(name);
                let timer = Timer::start(name.as_str());
                let outcome = self.pool.execute_on_target(name, items, execute_fn).await;
                outcome.map(|results| {
                    let summary = self.target_end(name, &results, timer.elapsed_ms());
                    (summary, results)
                })
            }
        });

        let mut summaries = Vec::with_capacity(names.len());
        let mut results = Vec::new();
        for outcome in join_all(runs).await {
            let (summary, target_results) = outcome?;
            summaries.push(summary);
            results.extend(target_results);
        }

        Ok((summaries, results))
    }

    /// Tear down every worker; safe to call more than once
    pub async fn shutdown(&self) {
        self.pool.terminate().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::models::{ItemError, ItemStatus};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn items(n: usize) -> Vec<WorkItem> {
        (1..=n)
            .map(|i| WorkItem::new(format!("item-{i}"), format!("scenario {i}"), "a.feature"))
            .collect()
    }

    fn two_targets() -> WorkerPoolConfig {
        WorkerPoolConfig::new()
            .with_target("chromium", 2)
            .with_target("firefox", 1)
    }

    async fn spawned(config: SchedulerConfig) -> Scheduler {
        let scheduler = Scheduler::new(config, EventBus::new()).unwrap();
        scheduler
            .spawn_workers(|_| async { Ok(TeardownHandle::noop()) })
            .await
            .unwrap();
        scheduler
    }

    async fn pass(_item: WorkItem, _worker: WorkerInfo) -> anyhow::Result<ItemOutcome> {
        tokio::task::yield_now().await;
        Ok(ItemOutcome::passed(2))
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!(Strategy::from_str("Matrix"), Some(Strategy::Matrix));
        assert_eq!(Strategy::from_str("sequential"), Some(Strategy::Sequential));
        assert_eq!(Strategy::from_str("random"), None);
        assert_eq!(Strategy::default().to_string(), "parallel");
    }

    #[test]
    fn test_validate_rejects_bad_config() {
        let err = SchedulerConfig::default().validate().unwrap_err();
        assert!(matches!(err, SchedulerError::NoTargets));

        let config = SchedulerConfig::new(
            WorkerPoolConfig::new()
                .with_target("x", 1)
                .with_target("x", 2),
        );
        assert!(matches!(
            config.validate(),
            Err(SchedulerError::DuplicateTarget(t)) if t == "x"
        ));

        let config = SchedulerConfig::new(WorkerPoolConfig::new().with_target("x", 0));
        assert!(matches!(config.validate(), Err(SchedulerError::EmptyTarget(_))));
    }

    #[test]
    fn test_malformed_tags_fail_before_execution() {
        let config =
            SchedulerConfig::new(WorkerPoolConfig::new().with_target("x", 1)).with_tags("@a and (");
        let err = Scheduler::new(config, EventBus::new()).err().unwrap();
        assert!(matches!(err, SchedulerError::TagExpr(_)));
    }

    #[test]
    fn test_single_target_matrix_is_parallel() {
        let config = SchedulerConfig::new(WorkerPoolConfig::new().with_target("x", 2))
            .with_strategy(Strategy::Matrix);
        assert_eq!(config.effective_strategy(), Strategy::Parallel);
        let config = SchedulerConfig::new(two_targets()).with_strategy(Strategy::Matrix);
        assert_eq!(config.effective_strategy(), Strategy::Matrix);
    }

    #[tokio::test]
    async fn test_parallel_runs_each_item_once() {
        let scheduler = spawned(SchedulerConfig::new(two_targets())).await;
        let result = scheduler.run(items(7), &pass).await.unwrap();

        assert_eq!(result.strategy, Strategy::Parallel);
        assert_eq!(result.results.len(), 7);
        assert_eq!(result.totals.total, 7);
        let sum: usize = result
            .targets
            .iter()
            .map(|t| t.passed + t.failed + t.skipped)
            .sum();
        assert_eq!(sum, result.totals.total);
    }

    #[tokio::test]
    async fn test_sequential_runs_full_list_per_target() {
        let scheduler =
            spawned(SchedulerConfig::new(two_targets()).with_strategy(Strategy::Sequential)).await;

        let order = Arc::new(Mutex::new(Vec::new()));
        let log = order.clone();
        scheduler.bus().subscribe(EventKind::TargetStart, move |event| {
            if let RunEvent::TargetStart { target, .. } = event {
                log.lock().unwrap().push(target.clone());
            }
            Ok(())
        });

        let result = scheduler.run(items(3), &pass).await.unwrap();
        assert_eq!(result.results.len(), 6);
        assert_eq!(
            *order.lock().unwrap(),
            vec!["chromium".to_string(), "firefox".to_string()]
        );
        assert!(result.results[..3].iter().all(|r| r.target() == "chromium"));
        assert!(result.results[3..].iter().all(|r| r.target() == "firefox"));
    }

    #[tokio::test]
    async fn test_matrix_runs_each_item_once_per_target() {
        let scheduler =
            spawned(SchedulerConfig::new(two_targets()).with_strategy(Strategy::Matrix)).await;
        let result = scheduler.run(items(4), &pass).await.unwrap();

        assert_eq!(result.results.len(), 8);
        let mut seen: HashMap<(String, String), usize> = HashMap::new();
        for r in &result.results {
            *seen
                .entry((r.item.id.clone(), r.target().to_string()))
                .or_default() += 1;
        }
        assert_eq!(seen.len(), 8);
        assert!(seen.values().all(|&n| n == 1));
        assert_eq!(result.targets[0].target, "chromium");
        assert_eq!(result.targets[1].total, 4);
    }

    #[tokio::test]
    async fn test_matrix_failure_on_one_target() {
        let scheduler =
            spawned(SchedulerConfig::new(two_targets()).with_strategy(Strategy::Matrix)).await;

        let execute = |item: WorkItem, worker: WorkerInfo| async move {
            if item.id == "item-1" && worker.target == "firefox" {
                Ok(ItemOutcome::failed(
                    1,
                    ItemError::new("AssertionError", "expected 1 to equal 2"),
                ))
            } else {
                Ok(ItemOutcome::passed(1))
            }
        };

        let result = scheduler.run(items(2), &execute).await.unwrap();
        let statuses: Vec<ItemStatus> = result
            .results
            .iter()
            .filter(|r| r.item.id == "item-1")
            .map(|r| r.status)
            .collect();
        assert_eq!(statuses.len(), 2);
        assert!(statuses.contains(&ItemStatus::Passed));
        assert!(statuses.contains(&ItemStatus::Failed));
        assert!(result.has_failures());
    }

    #[tokio::test]
    async fn test_filters_apply_before_distribution() {
        let config = SchedulerConfig::new(two_targets())
            .with_grep("scenario")
            .with_tags("@smoke");
        let scheduler = spawned(config).await;

        let mut list = items(3);
        list[0] = list[0].clone().with_tags(["@smoke"]);
        list[2] = list[2].clone().with_tags(["@SMOKE", "@slow"]);

        let result = scheduler.run(list, &pass).await.unwrap();
        let mut ids: Vec<String> = result.results.iter().map(|r| r.item.id.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["item-1".to_string(), "item-3".to_string()]);
    }

    #[tokio::test]
    async fn test_run_and_target_events_bracket_the_run() {
        let scheduler = spawned(SchedulerConfig::new(two_targets())).await;
        scheduler.bus().set_recording(true);
        scheduler.run(items(2), &pass).await.unwrap();

        let history = scheduler.bus().history();
        assert_eq!(history.first().unwrap().event.kind(), EventKind::RunStart);
        assert_eq!(history.last().unwrap().event.kind(), EventKind::RunEnd);
        assert_eq!(scheduler.bus().history_for(EventKind::TargetStart).len(), 2);

        let ends = scheduler.bus().history_for(EventKind::TargetEnd);
        let counted: usize = ends
            .iter()
            .map(|r| match &r.event {
                RunEvent::TargetEnd { summary, .. } => summary.total,
                _ => 0,
            })
            .sum();
        assert_eq!(counted, 2);
    }

    #[tokio::test]
    async fn test_bail_stops_sequential_run() {
        let config = SchedulerConfig::new(
            WorkerPoolConfig::new()
                .with_target("chromium", 1)
                .with_target("firefox", 1)
                .with_bail(true),
        )
        .with_strategy(Strategy::Sequential);
        let scheduler = spawned(config).await;

        let execute = |_item: WorkItem, _worker: WorkerInfo| async {
            Ok(ItemOutcome::failed(1, ItemError::from_message("boom")))
        };
        let result = scheduler.run(items(4), &execute).await.unwrap();

        assert_eq!(result.results.len(), 1);
        assert_eq!(result.targets[1].total, 0);
    }

    #[tokio::test]
    async fn test_run_after_bailed_run_executes_everything() {
        let config = SchedulerConfig::new(WorkerPoolConfig::new().with_target("x", 1).with_bail(true));
        let scheduler = spawned(config).await;

        let fail = |_item: WorkItem, _worker: WorkerInfo| async {
            Ok(ItemOutcome::failed(1, ItemError::from_message("boom")))
        };
        let first = scheduler.run(items(1), &fail).await.unwrap();
        assert_eq!(first.totals.failed, 1);
        assert!(scheduler.pool().is_bailed());

        let second = scheduler.run(items(3), &pass).await.unwrap();
        assert_eq!(second.results.len(), 3);
        assert_eq!(second.totals.passed, 3);
    }

    #[tokio::test]
    async fn test_duplicate_item_ids_are_rejected() {
        let scheduler = spawned(SchedulerConfig::new(two_targets())).await;
        let mut list = items(2);
        list.push(WorkItem::new("item-1", "again", "b.feature"));

        let err = scheduler.run(list, &pass).await.unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateItem(id) if id == "item-1"));
    }

    #[tokio::test]
    async fn test_spawn_failure_tears_down_started_workers() {
        let scheduler = Scheduler::new(SchedulerConfig::new(two_targets()), EventBus::new()).unwrap();
        let teardowns = Arc::new(AtomicUsize::new(0));
        let counter = teardowns.clone();

        let err = scheduler
            .spawn_workers(move |info| {
                let counter = counter.clone();
                async move {
                    if info.target == "firefox" {
                        anyhow::bail!("no firefox");
                    }
                    Ok(TeardownHandle::new(move || async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }))
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SchedulerError::Pool(PoolError::SpawnFailed { .. })));
        assert_eq!(teardowns.load(Ordering::SeqCst), 2);

        scheduler.shutdown().await;
        assert_eq!(teardowns.load(Ordering::SeqCst), 2);
    }
}
