//! Output formatting module
//!
//! Renders aggregated runs for the terminal and for files.

mod formatter;

pub use formatter::{write_results_to_file, OutputFormat, ResultFormatter};
