//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};

/// Distributes test scenarios across browser targets and reconciles the results
#[derive(Parser, Debug)]
#[command(name = "grid-runner")]
#[command(author = "hephaex@gmail.com")]
#[command(version)]
#[command(about = "Run scenarios across a pool of browser workers")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (defaults to the standard search locations)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Disable coloured output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run scenarios
    Run(RunArgs),

    /// List scenarios that would run, without executing them
    List(ListArgs),

    /// View and compare saved runs
    Results(ResultsArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Grep and tag filters shared by `run` and `list`
#[derive(Parser, Debug, Default)]
pub struct FilterArgs {
    /// Only scenarios whose title contains this text
    #[arg(short, long)]
    pub grep: Option<String>,

    /// Tag expression, e.g. "@smoke and not @slow"
    #[arg(short, long)]
    pub tags: Option<String>,
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Work item file (YAML or JSON)
    #[arg(short, long)]
    pub items: String,

    /// Target as NAME[:WORKERS]; repeatable
    #[arg(long = "target", value_name = "NAME[:N]")]
    pub targets: Vec<String>,

    /// Distribution strategy (parallel, sequential, matrix)
    #[arg(short, long)]
    pub strategy: Option<String>,

    #[command(flatten)]
    pub filter: FilterArgs,

    /// Retries for retryable failures
    #[arg(short, long)]
    pub retries: Option<u32>,

    /// Stop starting new scenarios after the first failure
    #[arg(long)]
    pub bail: bool,

    /// Worker spawn timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub spawn_timeout: Option<u64>,

    /// Run command template
    #[arg(long)]
    pub command: Option<String>,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Save the run to the results directory
    #[arg(long)]
    pub save: bool,

    /// Also write the formatted results to a file
    #[arg(short, long)]
    pub output: Option<String>,

    /// Print a line per finished scenario
    #[arg(short, long)]
    pub progress: bool,
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Work item file (YAML or JSON)
    #[arg(short, long)]
    pub items: String,

    #[command(flatten)]
    pub filter: FilterArgs,
}

/// Arguments for results command
#[derive(Parser, Debug)]
pub struct ResultsArgs {
    #[command(subcommand)]
    pub action: ResultsAction,
}

#[derive(Subcommand, Debug)]
pub enum ResultsAction {
    /// List saved runs, newest first
    List,

    /// Show a saved run (latest when no id is given)
    Show {
        /// Run id
        id: Option<String>,

        /// Output format (table, json, json-pretty, csv, summary)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Compare two saved runs
    Compare {
        /// Baseline run id
        baseline: String,

        /// Current run id
        current: String,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Export a saved run
    Export {
        /// Run id
        id: String,

        /// Destination file
        path: String,

        /// Export format (json, csv); inferred from the extension when omitted
        #[arg(short, long)]
        format: Option<String>,
    },

    /// Delete a saved run
    Delete {
        /// Run id
        id: String,
    },
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration (file plus environment)
    Show {
        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Write an example configuration file
    Init {
        /// Output path
        #[arg(default_value = "./grid-runner.yaml")]
        path: String,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show supported environment variables and their current values
    Env,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args() {
        let args = Args::parse_from([
            "grid-runner",
            "run",
            "--items",
            "scenarios.yaml",
            "--target",
            "chromium:2",
            "--target",
            "firefox",
            "--strategy",
            "matrix",
            "--tags",
            "@smoke",
            "--retries",
            "2",
            "--bail",
            "--save",
        ]);
        match args.command {
            Command::Run(run) => {
                assert_eq!(run.items, "scenarios.yaml");
                assert_eq!(run.targets, vec!["chromium:2", "firefox"]);
                assert_eq!(run.strategy.as_deref(), Some("matrix"));
                assert_eq!(run.filter.tags.as_deref(), Some("@smoke"));
                assert_eq!(run.retries, Some(2));
                assert!(run.bail);
                assert!(run.save);
                assert_eq!(run.format, "table");
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_global_flags() {
        let args = Args::parse_from([
            "grid-runner",
            "list",
            "--items",
            "s.json",
            "--verbose",
            "--config",
            "ci.yaml",
        ]);
        assert!(args.verbose);
        assert_eq!(args.config.as_deref(), Some("ci.yaml"));
        assert!(matches!(args.command, Command::List(_)));
    }

    #[test]
    fn test_results_compare_args() {
        let args = Args::parse_from(["grid-runner", "results", "compare", "a", "b"]);
        match args.command {
            Command::Results(ResultsArgs {
                action:
                    ResultsAction::Compare {
                        baseline, current, ..
                    },
            }) => {
                assert_eq!(baseline, "a");
                assert_eq!(current, "b");
            }
            _ => panic!("Expected results compare"),
        }
    }

    #[test]
    fn test_config_init_default_path() {
        let args = Args::parse_from(["grid-runner", "config", "init"]);
        match args.command {
            Command::Config(ConfigArgs {
                action: ConfigAction::Init { path, force },
            }) => {
                assert_eq!(path, "./grid-runner.yaml");
                assert!(!force);
            }
            _ => panic!("Expected config init"),
        }
    }
}
