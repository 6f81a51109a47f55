//! Environment variable configuration
//!
//! `GRID_RUNNER_*` variables override the config file and are overridden by
//! command-line flags.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

use super::RunnerConfig;
use crate::scheduler::Strategy;

/// Environment variable prefix
const ENV_PREFIX: &str = "GRID_RUNNER";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Strategy from GRID_RUNNER_STRATEGY
    pub strategy: Option<String>,
    /// Comma-separated `NAME[:N]` list from GRID_RUNNER_TARGETS
    pub targets: Option<String>,
    /// Retries from GRID_RUNNER_RETRIES
    pub retries: Option<u32>,
    /// Bail from GRID_RUNNER_BAIL
    pub bail: Option<bool>,
    /// Spawn timeout in ms from GRID_RUNNER_SPAWN_TIMEOUT
    pub spawn_timeout: Option<u64>,
    /// Title filter from GRID_RUNNER_GREP
    pub grep: Option<String>,
    /// Tag expression from GRID_RUNNER_TAGS
    pub tags: Option<String>,
    /// Run template from GRID_RUNNER_COMMAND
    pub command: Option<String>,
    /// Results directory from GRID_RUNNER_RESULTS_DIR
    pub results_dir: Option<String>,
    /// Config file from GRID_RUNNER_CONFIG
    pub config_file: Option<String>,
    /// Log level from GRID_RUNNER_LOG
    pub log: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            strategy: get_env("STRATEGY"),
            targets: get_env("TARGETS"),
            retries: get_env_parse("RETRIES"),
            bail: get_env_bool("BAIL"),
            spawn_timeout: get_env_parse("SPAWN_TIMEOUT"),
            grep: get_env("GREP"),
            tags: get_env("TAGS"),
            command: get_env("COMMAND"),
            results_dir: get_env("RESULTS_DIR"),
            config_file: get_env("CONFIG"),
            log: get_env("LOG"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.strategy.is_some()
            || self.targets.is_some()
            || self.retries.is_some()
            || self.bail.is_some()
            || self.spawn_timeout.is_some()
            || self.grep.is_some()
            || self.tags.is_some()
            || self.command.is_some()
            || self.results_dir.is_some()
            || self.config_file.is_some()
            || self.log.is_some()
    }

    /// Overlay the set variables onto a runner configuration
    pub fn apply_to(&self, config: &mut RunnerConfig) -> Result<()> {
        if let Some(strategy) = &self.strategy {
            config.strategy = Strategy::from_str(strategy).with_context(|| {
                format!("Invalid {ENV_PREFIX}_STRATEGY '{strategy}' (parallel, sequential, matrix)")
            })?;
        }
        if let Some(targets) = &self.targets {
            let specs: Vec<&str> = targets
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect();
            config
                .set_targets(&specs)
                .with_context(|| format!("Invalid {ENV_PREFIX}_TARGETS"))?;
        }
        if let Some(retries) = self.retries {
            config.max_retries = retries;
        }
        if let Some(bail) = self.bail {
            config.bail = bail;
        }
        if let Some(timeout) = self.spawn_timeout {
            config.spawn_timeout_ms = timeout;
        }
        if let Some(grep) = &self.grep {
            config.grep = Some(grep.clone());
        }
        if let Some(tags) = &self.tags {
            config.tags = Some(tags.clone());
        }
        if let Some(command) = &self.command {
            config.command.run = Some(command.clone());
        }
        if let Some(dir) = &self.results_dir {
            config.results_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {}_STRATEGY:      {:?}", ENV_PREFIX, self.strategy);
        println!("  {}_TARGETS:       {:?}", ENV_PREFIX, self.targets);
        println!("  {}_RETRIES:       {:?}", ENV_PREFIX, self.retries);
        println!("  {}_BAIL:          {:?}", ENV_PREFIX, self.bail);
        println!("  {}_SPAWN_TIMEOUT: {:?}", ENV_PREFIX, self.spawn_timeout);
        println!("  {}_GREP:          {:?}", ENV_PREFIX, self.grep);
        println!("  {}_TAGS:          {:?}", ENV_PREFIX, self.tags);
        println!("  {}_COMMAND:       {:?}", ENV_PREFIX, self.command);
        println!("  {}_RESULTS_DIR:   {:?}", ENV_PREFIX, self.results_dir);
        println!("  {}_CONFIG:        {:?}", ENV_PREFIX, self.config_file);
        println!("  {}_LOG:           {:?}", ENV_PREFIX, self.log);
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Builder for setting environment variables (useful for testing)
#[derive(Default)]
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

impl EnvBuilder {
    /// Create a new environment builder
    pub fn new() -> Self {
        Self::default()
    }

    fn var(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_{name}"), value.into()));
        self
    }

    pub fn strategy(self, strategy: impl Into<String>) -> Self {
        self.var("STRATEGY", strategy)
    }

    pub fn targets(self, targets: impl Into<String>) -> Self {
        self.var("TARGETS", targets)
    }

    pub fn retries(self, retries: u32) -> Self {
        self.var("RETRIES", retries.to_string())
    }

    pub fn bail(self, bail: bool) -> Self {
        self.var("BAIL", bail.to_string())
    }

    pub fn tags(self, tags: impl Into<String>) -> Self {
        self.var("TAGS", tags)
    }

    pub fn command(self, command: impl Into<String>) -> Self {
        self.var("COMMAND", command)
    }

    /// Apply environment variables
    pub fn apply(self) {
        for (key, value) in self.vars {
            env::set_var(key, value);
        }
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        self.apply();

        EnvGuard { previous }
    }
}

/// Guard that restores environment variables on drop
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

/// Print all GRID_RUNNER environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_STRATEGY       Distribution strategy (parallel, sequential, matrix)");
    println!("  {ENV_PREFIX}_TARGETS        Comma-separated targets, e.g. chromium:2,firefox");
    println!("  {ENV_PREFIX}_RETRIES        Retries for retryable failures");
    println!("  {ENV_PREFIX}_BAIL           Stop after the first failure (true/false)");
    println!("  {ENV_PREFIX}_SPAWN_TIMEOUT  Worker spawn timeout in milliseconds");
    println!("  {ENV_PREFIX}_GREP           Only run scenarios whose title contains this text");
    println!("  {ENV_PREFIX}_TAGS           Tag expression, e.g. '@smoke and not @slow'");
    println!("  {ENV_PREFIX}_COMMAND        Run command template");
    println!("  {ENV_PREFIX}_RESULTS_DIR    Directory for saved runs");
    println!("  {ENV_PREFIX}_CONFIG         Path to configuration file");
    println!("  {ENV_PREFIX}_LOG            Log level (trace, debug, info, warn, error)");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_TARGETS=chromium:2,firefox:2");
    println!("  export {ENV_PREFIX}_STRATEGY=matrix");
    println!("  grid-runner run --items scenarios.yaml");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::TargetSlots;

    #[test]
    fn test_env_config_default() {
        let config = EnvConfig::default();
        assert!(config.strategy.is_none());
        assert!(!config.has_any());
    }

    #[test]
    fn test_env_builder() {
        let _guard = EnvBuilder::new()
            .strategy("matrix")
            .targets("chromium:2, firefox")
            .retries(3)
            .apply_scoped();

        let config = EnvConfig::load();
        assert_eq!(config.strategy, Some("matrix".to_string()));
        assert_eq!(config.targets, Some("chromium:2, firefox".to_string()));
        assert_eq!(config.retries, Some(3));
    }

    #[test]
    fn test_env_bool_parsing() {
        let _guard = EnvBuilder::new().bail(true).apply_scoped();

        let config = EnvConfig::load();
        assert_eq!(config.bail, Some(true));
    }

    #[test]
    fn test_apply_to_overrides_only_set_fields() {
        let env = EnvConfig {
            strategy: Some("Sequential".to_string()),
            targets: Some("chromium:2,firefox".to_string()),
            tags: Some("@smoke".to_string()),
            command: Some("./run {id}".to_string()),
            ..Default::default()
        };

        let mut config = RunnerConfig {
            max_retries: 4,
            ..Default::default()
        };
        env.apply_to(&mut config).unwrap();

        assert_eq!(config.strategy, Strategy::Sequential);
        assert_eq!(
            config.targets,
            vec![TargetSlots::new("chromium", 2), TargetSlots::new("firefox", 1)]
        );
        assert_eq!(config.tags.as_deref(), Some("@smoke"));
        assert_eq!(config.command.run.as_deref(), Some("./run {id}"));
        assert_eq!(config.max_retries, 4);
    }

    #[test]
    fn test_apply_to_rejects_bad_strategy() {
        let env = EnvConfig {
            strategy: Some("random".to_string()),
            ..Default::default()
        };
        assert!(env.apply_to(&mut RunnerConfig::default()).is_err());
    }
}
