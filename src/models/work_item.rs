//! Work item model
//!
//! A work item is one schedulable scenario produced by an external discovery layer.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Immutable description of one schedulable scenario
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Opaque identifier, unique within a run
    pub id: String,

    /// Human readable scenario title
    pub title: String,

    /// Source file the scenario was discovered in
    pub file: String,

    /// Line number within the source file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,

    /// Tags attached to the scenario (e.g. `@smoke`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,

    /// Enclosing group names, outermost first
    #[serde(default)]
    pub suite_path: Vec<String>,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            file: file.into(),
            line: None,
            tags: None,
            suite_path: Vec::new(),
        }
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_suite_path<I, S>(mut self, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suite_path = path.into_iter().map(Into::into).collect();
        self
    }

    /// Title prefixed with the suite path, e.g. `Checkout > Payment > pays by card`
    pub fn full_title(&self) -> String {
        if self.suite_path.is_empty() {
            self.title.clone()
        } else {
            format!("{} > {}", self.suite_path.join(" > "), self.title)
        }
    }

    /// `file:line`, or just the file when no line is known
    pub fn location(&self) -> String {
        match self.line {
            Some(line) => format!("{}:{}", self.file, line),
            None => self.file.clone(),
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.full_title(), self.location())
    }
}

/// Load an ordered list of work items from a YAML or JSON file
pub fn load_work_items(path: impl AsRef<Path>) -> Result<Vec<WorkItem>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read work items: {}", path.display()))?;

    let is_yaml = path
        .extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false);

    let items: Vec<WorkItem> = if is_yaml {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML work items: {}", path.display()))?
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON work items: {}", path.display()))?
    };

    let mut seen = HashSet::new();
    for item in &items {
        if !seen.insert(item.id.as_str()) {
            anyhow::bail!("Duplicate work item id '{}' in {}", item.id, path.display());
        }
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_full_title_and_location() {
        let item = WorkItem::new("1", "pays by card", "checkout.feature")
            .with_line(12)
            .with_suite_path(["Checkout", "Payment"]);

        assert_eq!(item.full_title(), "Checkout > Payment > pays by card");
        assert_eq!(item.location(), "checkout.feature:12");
    }

    #[test]
    fn test_load_yaml_items() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("items.yaml");
        std::fs::write(
            &path,
            r#"
- id: login-1
  title: logs in
  file: login.feature
  line: 3
  tags: ["@smoke"]
- id: login-2
  title: rejects bad password
  file: login.feature
"#,
        )
        .unwrap();

        let items = load_work_items(&path).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].tags, Some(vec!["@smoke".to_string()]));
        assert_eq!(items[1].line, None);
        assert!(items[1].suite_path.is_empty());
    }

    #[test]
    fn test_load_rejects_duplicate_ids() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("items.json");
        std::fs::write(
            &path,
            r#"[{"id":"a","title":"one","file":"a.feature"},{"id":"a","title":"two","file":"a.feature"}]"#,
        )
        .unwrap();

        let err = load_work_items(&path).unwrap_err();
        assert!(err.to_string().contains("Duplicate work item id"));
    }
}
