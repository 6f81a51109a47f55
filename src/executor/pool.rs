//! Worker pool
//!
//! Owns the execution slots for every target. Items are distributed by pull:
//! each idle worker pops the next item from a queue shared by all workers taking
//! part in one `execute` call, until the queue is empty or the pool has bailed.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::classify::classify;
use super::error::PoolError;
use super::worker::{TeardownHandle, Worker, WorkerSnapshot, WorkerState};
use crate::events::{EventBus, RunEvent};
use crate::models::{ItemOutcome, ItemStatus, WorkItem, WorkItemResult, WorkerInfo};
use crate::utils::Timer;

/// Number of worker slots for one target
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSlots {
    pub name: String,
    pub workers: usize,
}

impl TargetSlots {
    pub fn new(name: impl Into<String>, workers: usize) -> Self {
        Self {
            name: name.into(),
            workers,
        }
    }
}

/// Worker pool configuration
#[derive(Clone, Debug, PartialEq)]
pub struct WorkerPoolConfig {
    /// Targets and their slot counts, in declaration order
    pub targets: Vec<TargetSlots>,

    /// Additional attempts for retryable failures
    pub max_retries: u32,

    /// Stop pulling new items after the first failure
    pub bail: bool,

    /// Upper bound for spawning one worker's execution context
    pub spawn_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            max_retries: 0,
            bail: false,
            spawn_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, name: impl Into<String>, workers: usize) -> Self {
        self.targets.push(TargetSlots::new(name, workers));
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_bail(mut self, bail: bool) -> Self {
        self.bail = bail;
        self
    }

    pub fn with_spawn_timeout(mut self, timeout: Duration) -> Self {
        self.spawn_timeout = timeout;
        self
    }

    pub fn total_workers(&self) -> usize {
        self.targets.iter().map(|t| t.workers).sum()
    }

    pub fn target_names(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.name.clone()).collect()
    }

    pub fn workers_for(&self, target: &str) -> usize {
        self.targets
            .iter()
            .filter(|t| t.name == target)
            .map(|t| t.workers)
            .sum()
    }
}

/// Queue and results shared by the worker loops of one `execute` call
struct QueueRun {
    queue: Mutex<VecDeque<WorkItem>>,
    results: Mutex<Vec<WorkItemResult>>,
    total: usize,
}

impl QueueRun {
    fn new(items: Vec<WorkItem>) -> Self {
        let total = items.len();
        Self {
            queue: Mutex::new(VecDeque::from(items)),
            results: Mutex::new(Vec::with_capacity(total)),
            total,
        }
    }

    fn pop(&self) -> Option<WorkItem> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Store a result and build the matching progress event
    fn record(&self, result: WorkItemResult) -> RunEvent {
        let mut results = self.results.lock().unwrap_or_else(PoisonError::into_inner);
        results.push(result);

        let count = |status: ItemStatus| results.iter().filter(|r| r.status == status).count();
        RunEvent::Progress {
            completed: results.len(),
            total: self.total,
            passed: count(ItemStatus::Passed),
            failed: count(ItemStatus::Failed),
            skipped: count(ItemStatus::Skipped),
        }
    }

    fn into_results(self) -> Vec<WorkItemResult> {
        self.results
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Pool of workers bound to externally spawned execution contexts
pub struct WorkerPool {
    config: WorkerPoolConfig,
    bus: EventBus,
    workers: Mutex<Vec<Worker>>,
    bailed: AtomicBool,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig, bus: EventBus) -> Self {
        Self {
            config,
            bus,
            workers: Mutex::new(Vec::new()),
            bailed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<Worker>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_worker(&self, id: &str, update: impl FnOnce(&mut Worker)) {
        if let Some(worker) = self.lock_workers().iter_mut().find(|w| w.info.id == id) {
            update(worker);
        }
    }

    /// Snapshots of every worker record
    pub fn workers(&self) -> Vec<WorkerSnapshot> {
        self.lock_workers().iter().map(Worker::snapshot).collect()
    }

    /// Idle workers, optionally restricted to one target
    pub fn idle_workers(&self, target: Option<&str>) -> Vec<WorkerInfo> {
        self.lock_workers()
            .iter()
            .filter(|w| w.state == WorkerState::Idle)
            .filter(|w| target.map_or(true, |t| w.info.target == t))
            .map(|w| w.info.clone())
            .collect()
    }

    pub fn is_bailed(&self) -> bool {
        self.bailed.load(Ordering::SeqCst)
    }

    /// Spawn an execution context for every configured slot
    ///
    /// All spawns run concurrently, each bounded by the spawn timeout. Every
    /// spawn is awaited before returning so that successful workers end up
    /// idle with their teardown stored; the first failure is then returned.
    pub async fn spawn<S, Fut>(&self, spawn_fn: S) -> Result<(), PoolError>
    where
        S: Fn(WorkerInfo) -> Fut,
        Fut: Future<Output = anyhow::Result<TeardownHandle>>,
    {
        let infos: Vec<WorkerInfo> = self
            .config
            .targets
            .iter()
            .flat_map(|t| (0..t.workers).map(move |i| WorkerInfo::new(&t.name, i)))
            .collect();

        self.lock_workers()
            .extend(infos.iter().cloned().map(Worker::new));
        for info in &infos {
            self.bus.publish(RunEvent::WorkerSpawn {
                worker: info.clone(),
            });
        }

        info!(
            "Spawning {} workers across {} targets",
            infos.len(),
            self.config.targets.len()
        );

        let timer = Timer::start("spawn");
        let timeout = self.config.spawn_timeout;
        let attempts = infos.into_iter().map(|info| {
            let spawning = spawn_fn(info.clone());
            async move { (info, tokio::time::timeout(timeout, spawning).await) }
        });

        let mut first_error = None;
        for (info, outcome) in join_all(attempts).await {
            let failure = match outcome {
                Ok(Ok(teardown)) => {
                    self.update_worker(&info.id, |w| {
                        w.state = WorkerState::Idle;
                        w.teardown = Some(teardown);
                    });
                    debug!("Worker {} ready", info);
                    self.bus.publish(RunEvent::WorkerReady { worker: info });
                    continue;
                }
                Ok(Err(source)) => PoolError::SpawnFailed {
                    worker: info.id.clone(),
                    source,
                },
                Err(_) => PoolError::SpawnTimeout {
                    worker: info.id.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                },
            };

            warn!("{}", failure);
            self.update_worker(&info.id, |w| w.state = WorkerState::Error);
            self.bus.publish(RunEvent::WorkerError {
                worker: info,
                error: failure.to_string(),
            });
            first_error.get_or_insert(failure);
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                info!("All workers ready in {}ms", timer.elapsed_ms());
                Ok(())
            }
        }
    }

    /// Execute items on every idle worker through one shared queue
    pub async fn execute<E, Fut>(
        &self,
        items: Vec<WorkItem>,
        execute_fn: &E,
    ) -> Result<Vec<WorkItemResult>, PoolError>
    where
        E: Fn(WorkItem, WorkerInfo) -> Fut,
        Fut: Future<Output = anyhow::Result<ItemOutcome>>,
    {
        self.run_queue(None, items, execute_fn).await
    }

    /// Execute items on the idle workers of one target only
    pub async fn execute_on_target<E, Fut>(
        &self,
        target: &str,
        items: Vec<WorkItem>,
        execute_fn: &E,
    ) -> Result<Vec<WorkItemResult>, PoolError>
    where
        E: Fn(WorkItem, WorkerInfo) -> Fut,
        Fut: Future<Output = anyhow::Result<ItemOutcome>>,
    {
        self.run_queue(Some(target), items, execute_fn).await
    }

    async fn run_queue<E, Fut>(
        &self,
        target: Option<&str>,
        items: Vec<WorkItem>,
        execute_fn: &E,
    ) -> Result<Vec<WorkItemResult>, PoolError>
    where
        E: Fn(WorkItem, WorkerInfo) -> Fut,
        Fut: Future<Output = anyhow::Result<ItemOutcome>>,
    {
        let idle = self.idle_workers(target);
        if idle.is_empty() {
            return Err(match target {
                Some(t) => PoolError::NoIdleWorkersForTarget(t.to_string()),
                None => PoolError::NoIdleWorkers,
            });
        }

        for item in &items {
            self.bus.publish(RunEvent::ItemEnqueue { item: item.clone() });
        }

        debug!(
            "Executing {} items on {} workers{}",
            items.len(),
            idle.len(),
            target.map(|t| format!(" ({t})")).unwrap_or_default()
        );

        let run = QueueRun::new(items);
        join_all(
            idle.into_iter()
                .map(|worker| self.worker_loop(worker, &run, execute_fn)),
        )
        .await;

        Ok(run.into_results())
    }

    async fn worker_loop<E, Fut>(&self, worker: WorkerInfo, run: &QueueRun, execute_fn: &E)
    where
        E: Fn(WorkItem, WorkerInfo) -> Fut,
        Fut: Future<Output = anyhow::Result<ItemOutcome>>,
    {
        loop {
            if self.is_bailed() {
                debug!("Worker {} stopping: run bailed", worker);
                break;
            }
            let Some(item) = run.pop() else {
                break;
            };

            self.update_worker(&worker.id, |w| w.assign(item.clone()));
            self.bus.publish(RunEvent::WorkerBusy {
                worker: worker.clone(),
                item: item.clone(),
            });
            self.bus.publish(RunEvent::ItemStart {
                item: item.clone(),
                worker: worker.clone(),
            });

            let result = self.run_item(&worker, item, execute_fn).await;

            if self.config.bail
                && result.status == ItemStatus::Failed
                && !self.bailed.swap(true, Ordering::SeqCst)
            {
                warn!("Bailing after failure of {}", result.item.full_title());
            }

            self.update_worker(&worker.id, Worker::release);
            debug!("{}", result);

            let outcome_event = match result.status {
                ItemStatus::Passed => RunEvent::ItemPass {
                    result: result.clone(),
                },
                ItemStatus::Failed => RunEvent::ItemFail {
                    result: result.clone(),
                },
                ItemStatus::Skipped => RunEvent::ItemSkip {
                    result: result.clone(),
                },
            };
            self.bus.publish(outcome_event);
            self.bus.publish(RunEvent::ItemEnd {
                result: result.clone(),
            });
            self.bus.publish(RunEvent::WorkerIdle {
                worker: worker.clone(),
            });

            let progress = run.record(result);
            self.bus.publish(progress);
        }
    }

    /// Run one item, retrying retryable failures without delay
    async fn run_item<E, Fut>(
        &self,
        worker: &WorkerInfo,
        item: WorkItem,
        execute_fn: &E,
    ) -> WorkItemResult
    where
        E: Fn(WorkItem, WorkerInfo) -> Fut,
        Fut: Future<Output = anyhow::Result<ItemOutcome>>,
    {
        let mut outcome = match execute_fn(item.clone(), worker.clone()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Executor error for {} on {}: {:#}", item.full_title(), worker, e);
                return WorkItemResult::errored(item, worker.clone(), &e);
            }
        };

        let max_retries = self.config.max_retries;
        let mut retries = 0;

        while outcome.status == ItemStatus::Failed && retries < max_retries {
            let classification = classify(outcome.error.as_ref());
            if !classification.retryable {
                debug!(
                    "Not retrying {}: {}",
                    item.full_title(),
                    classification.description
                );
                break;
            }

            retries += 1;
            debug!(
                "Retrying {} on {} ({}/{}): {}",
                item.full_title(),
                worker,
                retries,
                max_retries,
                classification.description
            );
            self.bus.publish(RunEvent::ItemRetry {
                item: item.clone(),
                worker: worker.clone(),
                attempt: retries,
                max_retries,
                error: outcome.error.clone(),
            });

            outcome = match execute_fn(item.clone(), worker.clone()).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Executor error for {} on {}: {:#}", item.full_title(), worker, e);
                    let mut result = WorkItemResult::errored(item, worker.clone(), &e);
                    result.retries = retries;
                    return result;
                }
            };
        }

        WorkItemResult::from_outcome(item, worker.clone(), outcome, retries)
    }

    /// Tear down every live worker; safe to call repeatedly
    pub async fn terminate(&self) {
        let (infos, handles): (Vec<WorkerInfo>, Vec<Option<TeardownHandle>>) = self
            .lock_workers()
            .iter_mut()
            .filter(|w| w.state != WorkerState::Terminated)
            .map(|w| (w.info.clone(), w.teardown.take()))
            .unzip();

        if infos.is_empty() {
            return;
        }

        info!("Terminating {} workers", infos.len());

        let teardowns = infos
            .iter()
            .cloned()
            .zip(handles)
            .filter_map(|(info, handle)| {
                handle.map(|handle| async move {
                    if let Err(e) = handle.run().await {
                        warn!("Teardown of worker {} failed: {:#}", info, e);
                    }
                })
            });
        join_all(teardowns).await;

        {
            let mut workers = self.lock_workers();
            for worker in workers.iter_mut() {
                worker.state = WorkerState::Terminated;
                worker.current_item = None;
            }
        }

        for info in infos {
            self.bus.publish(RunEvent::WorkerTerminate { worker: info });
        }
    }

    /// Let workers pull items again after a bailed run
    pub fn clear_bail(&self) {
        self.bailed.store(false, Ordering::SeqCst);
    }

    /// Forget all workers and clear the bail flag; does not tear anything down
    pub fn reset(&self) {
        self.lock_workers().clear();
        self.clear_bail();
    }
}
