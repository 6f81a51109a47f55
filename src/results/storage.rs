//! Results storage and retrieval
//!
//! Persists aggregated runs as pretty JSON, one file per run.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::aggregate::{AggregatedSummary, MatrixCell};
use crate::executor::TargetSlots;
use crate::scheduler::{SchedulerConfig, Strategy};

/// Stored run: settings, environment and the aggregated outcome
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredRun {
    /// Unique run ID
    pub id: String,

    /// Timestamp when the run started
    pub started_at: DateTime<Utc>,

    /// Timestamp when the run completed
    pub completed_at: DateTime<Utc>,

    /// Scheduler settings the run used
    pub settings: RunSettings,

    /// Environment info
    pub environment: EnvironmentInfo,

    pub summary: AggregatedSummary,
}

/// Scheduler settings recorded with a run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSettings {
    pub strategy: Strategy,
    pub targets: Vec<TargetSlots>,
    pub max_retries: u32,
    pub bail: bool,
    pub grep: Option<String>,
    pub tags: Option<String>,
}

impl From<&SchedulerConfig> for RunSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            strategy: config.strategy,
            targets: config.pool.targets.clone(),
            max_retries: config.pool.max_retries,
            bail: config.pool.bail,
            grep: config.grep.clone(),
            tags: config.tags.clone(),
        }
    }
}

/// Environment information
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    /// Operating system
    pub os: String,

    /// Architecture
    pub arch: String,

    /// Tool version
    pub tool_version: String,
}

impl Default for EnvironmentInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl StoredRun {
    /// Wrap a finished run; `started_at` is derived from its duration
    pub fn new(settings: RunSettings, summary: AggregatedSummary) -> Self {
        let completed_at = Utc::now();
        let started_at = completed_at - chrono::Duration::milliseconds(summary.duration_ms as i64);

        Self {
            id: generate_run_id(),
            started_at,
            completed_at,
            settings,
            environment: EnvironmentInfo::default(),
            summary,
        }
    }

    pub fn info(&self) -> RunInfo {
        RunInfo {
            id: self.id.clone(),
            started_at: self.started_at,
            strategy: self.summary.strategy,
            targets: self.summary.targets.clone(),
            total: self.summary.totals.total,
            pass_rate: self.summary.totals.pass_rate(),
        }
    }
}

/// Generate unique run ID
fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 10000;
    format!("{timestamp}_{random:04}")
}

/// Results storage manager
pub struct ResultsStorage {
    /// Base directory for results
    base_dir: PathBuf,
}

impl ResultsStorage {
    /// Create a new results storage
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Create with default directory
    pub fn default_dir() -> Self {
        let base_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("grid-runner")
            .join("results");
        Self::new(base_dir)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get path for a specific run
    fn run_path(&self, run_id: &str) -> PathBuf {
        self.base_dir.join(format!("{run_id}.json"))
    }

    /// Save a run
    pub fn save(&self, run: &StoredRun) -> Result<PathBuf> {
        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!(
                "Failed to create results directory {}",
                self.base_dir.display()
            )
        })?;

        let path = self.run_path(&run.id);
        let file = File::create(&path).context("Failed to create results file")?;
        let writer = BufWriter::new(file);

        serde_json::to_writer_pretty(writer, run).context("Failed to write results")?;

        info!("Saved run results to {}", path.display());
        Ok(path)
    }

    /// Load a run by id
    pub fn load(&self, run_id: &str) -> Result<StoredRun> {
        let path = self.run_path(run_id);
        let run = self
            .load_from_path(&path)
            .with_context(|| format!("Run {run_id} not found in {}", self.base_dir.display()))?;

        debug!("Loaded run results from {}", path.display());
        Ok(run)
    }

    /// Load from a specific path
    pub fn load_from_path(&self, path: &Path) -> Result<StoredRun> {
        let file = File::open(path).context("Failed to open results file")?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).context("Failed to parse results")
    }

    /// Load every stored run, newest first; unreadable files are skipped
    pub fn load_all(&self) -> Result<Vec<StoredRun>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let path = entry?.path();

            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match self.load_from_path(&path) {
                    Ok(run) => runs.push(run),
                    Err(e) => {
                        debug!("Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        runs.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(runs)
    }

    /// List all runs, newest first
    pub fn list(&self) -> Result<Vec<RunInfo>> {
        Ok(self.load_all()?.iter().map(StoredRun::info).collect())
    }

    /// Get latest run
    pub fn latest(&self) -> Result<Option<StoredRun>> {
        Ok(self.load_all()?.into_iter().next())
    }

    /// Delete a run; returns false if it did not exist
    pub fn delete(&self, run_id: &str) -> Result<bool> {
        let path = self.run_path(run_id);
        if !path.exists() {
            return Ok(false);
        }

        fs::remove_file(&path)
            .with_context(|| format!("Failed to delete {}", path.display()))?;
        info!("Deleted results: {}", path.display());
        Ok(true)
    }

    /// Export run to a file
    pub fn export(&self, run: &StoredRun, path: &Path, format: ExportFormat) -> Result<()> {
        match format {
            ExportFormat::Json => {
                let file = File::create(path)
                    .with_context(|| format!("Failed to create {}", path.display()))?;
                let writer = BufWriter::new(file);
                serde_json::to_writer_pretty(writer, run)?;
            }
            ExportFormat::Csv => {
                let mut writer = csv::Writer::from_path(path)
                    .with_context(|| format!("Failed to create {}", path.display()))?;
                write_matrix_csv(&mut writer, &run.summary)?;
                writer.flush()?;
            }
        }

        info!("Exported run {} to {}", run.id, path.display());
        Ok(())
    }
}

/// One CSV record per scenario and target
pub(crate) fn write_matrix_csv<W: std::io::Write>(
    writer: &mut csv::Writer<W>,
    summary: &AggregatedSummary,
) -> Result<()> {
    writer.write_record([
        "id",
        "title",
        "target",
        "status",
        "duration_ms",
        "retries",
        "error",
        "flaky",
        "inconsistent",
    ])?;

    for row in &summary.rows {
        for target in &summary.targets {
            let (status, duration, retries, error) = match row.cell(target) {
                MatrixCell::Ran {
                    status,
                    duration_ms,
                    error,
                    retries,
                } => (
                    status.to_string().to_lowercase(),
                    duration_ms.to_string(),
                    retries.to_string(),
                    error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
                ),
                MatrixCell::NotRun => (
                    "not-run".to_string(),
                    String::new(),
                    String::new(),
                    String::new(),
                ),
            };

            writer.write_record([
                row.id.clone(),
                row.title.clone(),
                target.clone(),
                status,
                duration,
                retries,
                error,
                row.flaky.to_string(),
                row.cross_target_inconsistent.to_string(),
            ])?;
        }
    }

    Ok(())
}

/// Brief run information
#[derive(Clone, Debug, Serialize)]
pub struct RunInfo {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub strategy: Strategy,
    pub targets: Vec<String>,
    pub total: usize,
    pub pass_rate: f64,
}

/// Export format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(ExportFormat::Json),
            "csv" => Some(ExportFormat::Csv),
            _ => None,
        }
    }

    pub fn from_extension(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::WorkerPoolConfig;
    use crate::models::{ItemError, ItemOutcome, RunTotals, TargetSummary, WorkItem, WorkItemResult, WorkerInfo};
    use crate::results::ResultAggregator;
    use crate::scheduler::SchedulerResult;
    use tempfile::tempdir;

    fn summary() -> AggregatedSummary {
        let results = vec![
            WorkItemResult::from_outcome(
                WorkItem::new("a", "login", "auth.feature"),
                WorkerInfo::new("chromium", 0),
                ItemOutcome::passed(12),
                0,
            ),
            WorkItemResult::from_outcome(
                WorkItem::new("b", "logout", "auth.feature"),
                WorkerInfo::new("chromium", 1),
                ItemOutcome::failed(8, ItemError::new("TimeoutError", "slow")),
                1,
            ),
        ];
        let targets = vec![
            TargetSummary::from_results("chromium", &results),
            TargetSummary::from_results("firefox", std::iter::empty()),
        ];
        ResultAggregator::aggregate(&SchedulerResult {
            strategy: Strategy::Parallel,
            totals: RunTotals::from_summaries(&targets),
            targets,
            results,
            duration_ms: 25,
        })
    }

    fn stored() -> StoredRun {
        let config = SchedulerConfig::new(
            WorkerPoolConfig::new()
                .with_target("chromium", 2)
                .with_target("firefox", 1),
        );
        StoredRun::new(RunSettings::from(&config), summary())
    }

    #[test]
    fn test_generate_run_id_format() {
        let id = generate_run_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1].len(), 6);
        assert_eq!(parts[2].len(), 4);
    }

    #[test]
    fn test_save_load_list_delete() {
        let dir = tempdir().unwrap();
        let storage = ResultsStorage::new(dir.path().join("results"));
        assert!(storage.list().unwrap().is_empty());
        assert!(storage.latest().unwrap().is_none());

        let run = stored();
        let path = storage.save(&run).unwrap();
        assert!(path.exists());

        let loaded = storage.load(&run.id).unwrap();
        assert_eq!(loaded.id, run.id);
        assert_eq!(loaded.summary.rows.len(), 2);
        assert_eq!(loaded.settings.targets.len(), 2);

        let list = storage.list().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].total, 2);
        assert_eq!(list[0].targets, vec!["chromium", "firefox"]);

        assert!(storage.delete(&run.id).unwrap());
        assert!(!storage.delete(&run.id).unwrap());
        assert!(storage.load(&run.id).is_err());
    }

    #[test]
    fn test_list_is_newest_first() {
        let dir = tempdir().unwrap();
        let storage = ResultsStorage::new(dir.path());

        let mut older = stored();
        older.id = "20240101_000000_0001".to_string();
        older.started_at = older.started_at - chrono::Duration::hours(1);
        let mut newer = stored();
        newer.id = "20240101_010000_0002".to_string();

        storage.save(&older).unwrap();
        storage.save(&newer).unwrap();
        fs::write(dir.path().join("garbage.json"), "not json").unwrap();

        let ids: Vec<String> = storage.list().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![newer.id.clone(), older.id]);
        assert_eq!(storage.latest().unwrap().unwrap().id, newer.id);
    }

    #[test]
    fn test_export_csv_has_one_record_per_cell() {
        let dir = tempdir().unwrap();
        let storage = ResultsStorage::new(dir.path());
        let path = dir.path().join("run.csv");

        storage.export(&stored(), &path, ExportFormat::Csv).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("id,title,target,status"));
        assert!(content.contains("not-run"));
        assert!(content.contains("TimeoutError: slow"));
    }

    #[test]
    fn test_export_format() {
        assert_eq!(ExportFormat::from_str("JSON"), Some(ExportFormat::Json));
        assert_eq!(
            ExportFormat::from_extension(Path::new("out.csv")),
            Some(ExportFormat::Csv)
        );
        assert!(ExportFormat::from_str("unknown").is_none());
    }

    #[test]
    fn test_environment_info() {
        let env = EnvironmentInfo::default();
        assert!(!env.os.is_empty());
        assert_eq!(env.tool_version, env!("CARGO_PKG_VERSION"));
    }
}
