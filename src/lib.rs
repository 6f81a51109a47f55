//! grid-runner - scenario scheduling across browser targets
//!
//! Distributes work items over a pool of long-lived workers, retries
//! transient failures, and reconciles the outcomes into a scenario × target
//! matrix with flakiness and timing analysis.
//!
//! ## Example
//!
//! ```no_run
//! use grid_runner::events::EventBus;
//! use grid_runner::executor::{TeardownHandle, WorkerPoolConfig};
//! use grid_runner::models::{ItemOutcome, WorkItem};
//! use grid_runner::results::ResultAggregator;
//! use grid_runner::scheduler::{Scheduler, SchedulerConfig, Strategy};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let pool = WorkerPoolConfig::new()
//!     .with_target("chromium", 2)
//!     .with_target("firefox", 2);
//! let config = SchedulerConfig::new(pool).with_strategy(Strategy::Matrix);
//! let scheduler = Scheduler::new(config, EventBus::new())?;
//!
//! scheduler
//!     .spawn_workers(|_worker| async { Ok(TeardownHandle::noop()) })
//!     .await?;
//!
//! let items = vec![WorkItem::new("1", "logs in", "auth.feature")];
//! let result = scheduler
//!     .run(items, &|_item, _worker| async { Ok(ItemOutcome::passed(10)) })
//!     .await?;
//! scheduler.shutdown().await;
//!
//! let summary = ResultAggregator::aggregate(&result);
//! assert!(!summary.has_failures());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod events;
pub mod executor;
pub mod models;
pub mod output;
pub mod results;
pub mod scheduler;
pub mod utils;
