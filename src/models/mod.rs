//! Data models for scenario scheduling
//!
//! Work items, worker identities, per-item outcomes and per-target summaries.

mod result;
mod work_item;

pub use result::{
    ItemError, ItemOutcome, ItemStatus, RunTotals, TargetSummary, WorkItemResult, WorkerInfo,
};
pub use work_item::{load_work_items, WorkItem};
