//! Result aggregation, storage and comparison

pub mod aggregate;
pub mod compare;
pub mod storage;
mod timing;

pub use aggregate::{
    AggregatedSummary, FailedItem, MatrixCell, ResultAggregator, ScenarioMatrixRow, SlowItem,
};
pub use compare::{ChangeKind, ComparisonFormatter, RunComparator, RunComparison};
pub use storage::{ExportFormat, ResultsStorage, RunInfo, RunSettings, StoredRun};
pub use timing::TimingStats;
