//! Output formatters for run results
//!
//! Provides table, JSON, CSV and summary output formats.

use anyhow::Context;
use std::io::Write;

use crate::models::{ItemStatus, WorkItemResult};
use crate::results::storage::write_matrix_csv;
use crate::results::{AggregatedSummary, MatrixCell, ScenarioMatrixRow};

const TITLE_WIDTH: usize = 40;
const CELL_WIDTH: usize = 10;

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    fn paint(&self, text: &str, status: ItemStatus) -> String {
        if !self.colorize {
            return text.to_string();
        }
        let code = match status {
            ItemStatus::Passed => "32",
            ItemStatus::Failed => "31",
            ItemStatus::Skipped => "33",
        };
        format!("\x1b[{code}m{text}\x1b[0m")
    }

    /// One progress line for a finished item
    pub fn format_result(&self, result: &WorkItemResult) -> String {
        let status = self.paint(
            &format!("{} {}", result.status.symbol(), result.status),
            result.status,
        );
        let mut line = format!(
            "{} {} [{}] [{}ms]",
            status,
            result.item.full_title(),
            result.worker,
            result.duration_ms
        );
        if result.retries > 0 {
            line.push_str(&format!(" (retries: {})", result.retries));
        }
        if let Some(err) = &result.error {
            line.push_str(&format!("\n    {err}"));
        }
        line
    }

    /// Format an aggregated run
    pub fn format_summary(&self, summary: &AggregatedSummary) -> String {
        match self.format {
            OutputFormat::Table => self.format_table(summary),
            OutputFormat::Json => serde_json::to_string(summary).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(summary).unwrap_or_default(),
            OutputFormat::Csv => self.format_csv(summary),
            OutputFormat::Summary => self.format_brief(summary),
        }
    }

    fn format_table(&self, summary: &AggregatedSummary) -> String {
        let mut output = self.format_matrix(summary);
        output.push_str(&self.format_totals(summary));

        if !summary.slowest.is_empty() {
            output.push_str("\n Slowest:\n");
            for slow in &summary.slowest {
                output.push_str(&format!(
                    "   {:>7}ms  {} [{}]\n",
                    slow.duration_ms, slow.title, slow.target
                ));
            }
        }

        if !summary.failures.is_empty() {
            output.push_str("\n Failures:\n");
            for failed in &summary.failures {
                output.push_str(&format!(
                    "   {} {} [{}]\n      {}\n",
                    self.paint(ItemStatus::Failed.symbol(), ItemStatus::Failed),
                    failed.title,
                    failed.target,
                    failed.error
                ));
            }
        }

        output
    }

    /// Scenario × target grid with flaky and inconsistent markers
    pub fn format_matrix(&self, summary: &AggregatedSummary) -> String {
        let mut output = String::new();
        let rule = |left: &str, mid: &str, right: &str| {
            let mut line = format!("{left}{}", "─".repeat(TITLE_WIDTH + 2));
            for _ in &summary.targets {
                line.push_str(&format!("{mid}{}", "─".repeat(CELL_WIDTH + 2)));
            }
            line.push_str(&format!("{mid}{}{right}\n", "─".repeat(8)));
            line
        };

        output.push('\n');
        output.push_str(&rule("┌", "┬", "┐"));
        output.push_str(&format!("│ {:<width$} ", "Scenario", width = TITLE_WIDTH));
        for target in &summary.targets {
            output.push_str(&format!(
                "│ {:^width$} ",
                truncate(target, CELL_WIDTH),
                width = CELL_WIDTH
            ));
        }
        output.push_str("│ Notes  │\n");
        output.push_str(&rule("├", "┼", "┤"));

        for row in &summary.rows {
            output.push_str(&format!(
                "│ {:<width$} ",
                truncate(&row.title, TITLE_WIDTH),
                width = TITLE_WIDTH
            ));
            for target in &summary.targets {
                output.push_str(&format!("│ {} ", self.format_cell(row.cell(target))));
            }
            output.push_str(&format!("│ {:<6} │\n", row_notes(row)));
        }

        output.push_str(&rule("└", "┴", "┘"));
        output
    }

    fn format_cell(&self, cell: &MatrixCell) -> String {
        match cell {
            MatrixCell::Ran {
                status,
                duration_ms,
                retries,
                ..
            } => {
                let mut text = format!("{} {}ms", status.symbol(), duration_ms);
                if *retries > 0 {
                    text.push_str(&format!(" ↻{retries}"));
                }
                let padded = format!("{:<width$}", truncate(&text, CELL_WIDTH), width = CELL_WIDTH);
                self.paint(&padded, *status)
            }
            MatrixCell::NotRun => format!("{:^width$}", "-", width = CELL_WIDTH),
        }
    }

    /// Totals, per-target and timing lines
    pub fn format_totals(&self, summary: &AggregatedSummary) -> String {
        let totals = &summary.totals;
        let passed = self.paint(&totals.passed.to_string(), ItemStatus::Passed);
        let failed = if totals.failed > 0 {
            self.paint(&totals.failed.to_string(), ItemStatus::Failed)
        } else {
            totals.failed.to_string()
        };

        let mut output = format!(
            " Total: {} | Pass: {} | Fail: {} | Skip: {} | Pass Rate: {:.1}% | {} strategy in {}ms\n",
            totals.total,
            passed,
            failed,
            totals.skipped,
            totals.pass_rate(),
            summary.strategy,
            summary.duration_ms
        );

        for target in &summary.target_summaries {
            output.push_str(&format!("   {target}\n"));
        }

        output.push_str(&format!(" Timing: {}\n", summary.timing.format_summary()));

        if !summary.flaky.is_empty() {
            output.push_str(&format!(" Flaky: {}\n", summary.flaky.join(", ")));
        }
        if !summary.inconsistent.is_empty() {
            output.push_str(&format!(
                " Inconsistent across targets: {}\n",
                summary.inconsistent.join(", ")
            ));
        }

        output
    }

    fn format_csv(&self, summary: &AggregatedSummary) -> String {
        let mut writer = csv::Writer::from_writer(Vec::new());
        if write_matrix_csv(&mut writer, summary).is_err() {
            return String::new();
        }
        writer
            .into_inner()
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_default()
    }

    fn format_brief(&self, summary: &AggregatedSummary) -> String {
        format!(
            "{} run on {}: {}/{} passed ({:.1}%), {} failed, {} skipped, {} flaky in {}ms",
            summary.strategy,
            summary.targets.join(", "),
            summary.totals.passed,
            summary.totals.total,
            summary.totals.pass_rate(),
            summary.totals.failed,
            summary.totals.skipped,
            summary.flaky.len(),
            summary.duration_ms
        )
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

fn row_notes(row: &ScenarioMatrixRow) -> String {
    let mut notes = String::new();
    if row.flaky {
        notes.push_str("flaky");
    }
    if row.cross_target_inconsistent {
        if !notes.is_empty() {
            notes.push(' ');
        }
        notes.push('≠');
    }
    notes
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

/// Write an aggregated run to a file
pub fn write_results_to_file(
    path: &str,
    summary: &AggregatedSummary,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let formatter = ResultFormatter::new(format).no_color();
    let content = formatter.format_summary(summary);

    let mut file =
        std::fs::File::create(path).with_context(|| format!("Failed to create {path}"))?;
    file.write_all(content.as_bytes())?;

    Ok(())
}
