//! Work item filtering

use super::tags::TagExpr;
use crate::models::WorkItem;

/// Item filter: title substring first, then tag expression
#[derive(Clone, Debug, Default)]
pub struct ItemFilter {
    grep: Option<String>,
    tags: Option<TagExpr>,
}

impl ItemFilter {
    pub fn new(grep: Option<String>, tags: Option<TagExpr>) -> Self {
        Self {
            grep: grep.filter(|g| !g.is_empty()),
            tags,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.grep.is_none() && self.tags.is_none()
    }

    pub fn matches(&self, item: &WorkItem) -> bool {
        if let Some(grep) = &self.grep {
            if !item.title.contains(grep.as_str()) {
                return false;
            }
        }
        match &self.tags {
            Some(expr) => expr.matches(item),
            None => true,
        }
    }

    /// Keep matching items, preserving order
    pub fn apply(&self, items: Vec<WorkItem>) -> Vec<WorkItem> {
        if self.is_empty() {
            return items;
        }
        items.into_iter().filter(|i| self.matches(i)).collect()
    }
}
