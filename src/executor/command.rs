//! Shell command executor
//!
//! Drives scenarios through user-supplied shell templates: an optional setup
//! and teardown per worker, and a run template per item attempt.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::process::Output;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

use super::worker::TeardownHandle;
use crate::models::{ItemError, ItemOutcome, WorkItem, WorkerInfo};
use crate::utils::Timer;

/// Exit code that marks an item as skipped
pub const DEFAULT_SKIP_EXIT_CODE: i32 = 77;

/// Command templates
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Run template; placeholders `{id}` `{title}` `{file}` `{line}` `{target}` `{worker}`
    pub run: Option<String>,

    /// Executed once per worker before it becomes idle
    pub setup: Option<String>,

    /// Executed once per worker on shutdown
    pub teardown: Option<String>,

    pub skip_exit_code: i32,

    /// Shell used as `<shell> -c <command>`
    pub shell: String,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            run: None,
            setup: None,
            teardown: None,
            skip_exit_code: DEFAULT_SKIP_EXIT_CODE,
            shell: "sh".to_string(),
        }
    }
}

impl CommandConfig {
    pub fn new(run: impl Into<String>) -> Self {
        Self {
            run: Some(run.into()),
            ..Default::default()
        }
    }

    pub fn with_setup(mut self, setup: impl Into<String>) -> Self {
        self.setup = Some(setup.into());
        self
    }

    pub fn with_teardown(mut self, teardown: impl Into<String>) -> Self {
        self.teardown = Some(teardown.into());
        self
    }
}

/// Spawner and executor callbacks backed by shell commands
#[derive(Clone, Debug)]
pub struct CommandRunner {
    config: Arc<CommandConfig>,
    run: String,
}

impl CommandRunner {
    pub fn new(config: CommandConfig) -> Result<Self> {
        let run = config
            .run
            .clone()
            .filter(|r| !r.trim().is_empty())
            .context("No run command configured (set command.run or pass --command)")?;

        Ok(Self {
            config: Arc::new(config),
            run,
        })
    }

    /// Run the setup command and hand back a teardown for this worker
    pub async fn spawn(&self, worker: WorkerInfo) -> Result<TeardownHandle> {
        if let Some(setup) = &self.config.setup {
            let output = self.shell(setup, &worker, None).await?;
            if !output.status.success() {
                anyhow::bail!(
                    "Setup command exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            debug!("Setup finished for worker {}", worker);
        }

        let Some(teardown) = self.config.teardown.clone() else {
            return Ok(TeardownHandle::noop());
        };

        let runner = self.clone();
        Ok(TeardownHandle::new(move || async move {
            let output = runner.shell(&teardown, &worker, None).await?;
            if !output.status.success() {
                anyhow::bail!(
                    "Teardown command exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            Ok(())
        }))
    }

    /// Run one attempt of an item
    pub async fn execute(&self, item: WorkItem, worker: WorkerInfo) -> Result<ItemOutcome> {
        let command = render_template(&self.run, &item, &worker);
        debug!("Executing {} on {}: {}", item.id, worker, command);

        let timer = Timer::start(&item.id);
        let output = self.shell(&command, &worker, Some(&item)).await?;
        let duration_ms = timer.elapsed_ms();

        Ok(self.outcome(&output, duration_ms))
    }

    fn outcome(&self, output: &Output, duration_ms: u64) -> ItemOutcome {
        match output.status.code() {
            Some(0) => ItemOutcome::passed(duration_ms),
            Some(code) if code == self.config.skip_exit_code => ItemOutcome::skipped(),
            code => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let fallback = match code {
                    Some(code) => format!("Command exited with code {code}"),
                    None => "Command terminated by signal".to_string(),
                };
                ItemOutcome::failed(duration_ms, parse_error(&stderr, &fallback))
            }
        }
    }

    async fn shell(
        &self,
        command: &str,
        worker: &WorkerInfo,
        item: Option<&WorkItem>,
    ) -> Result<Output> {
        let mut cmd = Command::new(&self.config.shell);
        cmd.arg("-c")
            .arg(command)
            .env("GRID_WORKER_ID", &worker.id)
            .env("GRID_TARGET", &worker.target)
            .env("GRID_WORKER_INDEX", worker.index.to_string())
            .kill_on_drop(true);
        if let Some(item) = item {
            cmd.env("GRID_ITEM_ID", &item.id);
        }

        cmd.output()
            .await
            .with_context(|| format!("Failed to run {} -c {}", self.config.shell, command))
    }
}

/// Substitute placeholders with single-quoted values
///
/// Single left-to-right pass; substituted values are never rescanned, and
/// unknown `{...}` sequences are kept as written.
pub fn render_template(template: &str, item: &WorkItem, worker: &WorkerInfo) -> String {
    let line = item.line.map(|l| l.to_string()).unwrap_or_default();
    let lookup = |name: &str| match name {
        "id" => Some(item.id.as_str()),
        "title" => Some(item.title.as_str()),
        "file" => Some(item.file.as_str()),
        "line" => Some(line.as_str()),
        "target" => Some(worker.target.as_str()),
        "worker" => Some(worker.id.as_str()),
        _ => None,
    };

    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let tail = &rest[open..];
        let placeholder = tail
            .find('}')
            .and_then(|close| lookup(&tail[1..close]).map(|value| (value, close)));

        match placeholder {
            Some((value, close)) => {
                rendered.push_str(&shell_quote(value));
                rest = &tail[close + 1..];
            }
            None => {
                rendered.push('{');
                rest = &tail[1..];
            }
        }
    }
    rendered.push_str(rest);
    rendered
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Error from the last stderr line shaped like `Name: message`
fn parse_error(stderr: &str, fallback: &str) -> ItemError {
    let Some(last) = stderr.lines().map(str::trim).rev().find(|l| !l.is_empty()) else {
        return ItemError::from_message(fallback);
    };

    let error = match last.split_once(": ") {
        Some((name, message))
            if !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') =>
        {
            ItemError::new(name, message)
        }
        _ => ItemError::from_message(last),
    };
    error.with_stack(stderr.trim_end())
}
