//! Failure classification
//!
//! Maps an item error to a category and decides whether a retry is worth it.
//! Deterministic faults (assertions, script errors) are never retried;
//! environment faults and anything unrecognised are.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::ItemError;

const ASSERTION_NAMES: &[&str] = &["AssertionError", "ExpectationError"];
const ASSERTION_MARKER: &str = "ERR_ASSERTION";
const EXPECTATION_VERBS: &[&str] = &[" to equal", " to be", " to have", " to match", " to contain"];
const RECEIVED_MARKERS: &[&str] = &["but got", "but received"];

const SCRIPT_NAMES: &[&str] = &["SyntaxError", "ReferenceError", "TypeError", "RangeError"];

const ELEMENT_NAMES: &[&str] = &["ElementNotFoundError", "StaleElementError"];
const ACTIONABILITY_NAMES: &[&str] = &[
    "ElementNotVisibleError",
    "ElementNotInteractableError",
    "ElementDisabledError",
    "NotActionableError",
];
const NETWORK_NAMES: &[&str] = &["NetworkError", "NavigationError"];
const TIMEOUT_NAMES: &[&str] = &["TimeoutError", "WaitTimeoutError"];

const TIMEOUT_KEYWORDS: &[&str] = &["timeout", "timed out"];
const NETWORK_KEYWORDS: &[&str] = &[
    "econnreset",
    "econnrefused",
    "enotfound",
    "fetch failed",
    "connection reset",
    "connection refused",
    "network",
];

/// Failure taxonomy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureCategory {
    Element,
    Actionability,
    Timeout,
    Network,
    Assertion,
    Script,
    Unknown,
}

impl FailureCategory {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureCategory::Assertion | FailureCategory::Script)
    }

    pub fn description(&self) -> &'static str {
        match self {
            FailureCategory::Element => "Element could not be found",
            FailureCategory::Actionability => "Element was not actionable",
            FailureCategory::Timeout => "Operation timed out",
            FailureCategory::Network => "Network or navigation failure",
            FailureCategory::Assertion => "Assertion failed",
            FailureCategory::Script => "Script error in scenario code",
            FailureCategory::Unknown => "Unclassified failure",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureCategory::Element => "element",
            FailureCategory::Actionability => "actionability",
            FailureCategory::Timeout => "timeout",
            FailureCategory::Network => "network",
            FailureCategory::Assertion => "assertion",
            FailureCategory::Script => "script",
            FailureCategory::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Classification of one failure
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureClassification {
    pub category: FailureCategory,
    pub retryable: bool,
    pub description: String,
}

impl FailureClassification {
    fn new(category: FailureCategory, error: Option<&ItemError>) -> Self {
        let description = match error {
            Some(err) => format!("{} ({})", category.description(), err.name),
            None => category.description().to_string(),
        };

        Self {
            category,
            retryable: category.is_retryable(),
            description,
        }
    }
}

/// Classify a failure; first matching rule wins
pub fn classify(error: Option<&ItemError>) -> FailureClassification {
    let Some(err) = error else {
        return FailureClassification::new(FailureCategory::Unknown, None);
    };

    let message = err.message.to_lowercase();
    let category = if is_assertion(err, &message) {
        FailureCategory::Assertion
    } else if SCRIPT_NAMES.contains(&err.name.as_str()) {
        FailureCategory::Script
    } else if let Some(category) = typed_category(&err.name) {
        category
    } else if contains_any(&message, TIMEOUT_KEYWORDS) {
        FailureCategory::Timeout
    } else if contains_any(&message, NETWORK_KEYWORDS) {
        FailureCategory::Network
    } else {
        FailureCategory::Unknown
    };

    FailureClassification::new(category, Some(err))
}

fn is_assertion(err: &ItemError, message: &str) -> bool {
    if ASSERTION_NAMES
        .iter()
        .any(|name| err.name == *name || err.name.starts_with(&format!("{name} ")))
        || err.name.contains(ASSERTION_MARKER)
    {
        return true;
    }

    if contains_any(message, RECEIVED_MARKERS) {
        return true;
    }

    // "expected <actual> to equal/be/have/match/contain <expected>"
    message
        .find("expected")
        .map(|idx| contains_any(&message[idx..], EXPECTATION_VERBS))
        .unwrap_or(false)
}

fn typed_category(name: &str) -> Option<FailureCategory> {
    if ELEMENT_NAMES.contains(&name) {
        Some(FailureCategory::Element)
    } else if ACTIONABILITY_NAMES.contains(&name) {
        Some(FailureCategory::Actionability)
    } else if NETWORK_NAMES.contains(&name) {
        Some(FailureCategory::Network)
    } else if TIMEOUT_NAMES.contains(&name) {
        Some(FailureCategory::Timeout)
    } else {
        None
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category_of(name: &str, message: &str) -> FailureCategory {
        classify(Some(&ItemError::new(name, message))).category
    }

    #[test]
    fn test_missing_error_is_unknown_and_retryable() {
        let c = classify(None);
        assert_eq!(c.category, FailureCategory::Unknown);
        assert!(c.retryable);
    }

    #[test]
    fn test_assertions_are_not_retryable() {
        let cases = [
            ("AssertionError", "values differ"),
            ("AssertionError [ERR_ASSERTION]", "1 == 2"),
            ("ExpectationError", "nope"),
            ("Error", "expected 'Cart (1)' to equal 'Cart (2)'"),
            ("Error", "Expected title to contain 'Welcome'"),
            ("Error", "wanted 3 items but got 2"),
            ("Error", "but received undefined"),
        ];

        for (name, message) in cases {
            let c = classify(Some(&ItemError::new(name, message)));
            assert_eq!(c.category, FailureCategory::Assertion, "{name}: {message}");
            assert!(!c.retryable);
        }
    }

    #[test]
    fn test_assertion_wins_over_timeout_keyword() {
        assert_eq!(
            category_of("Error", "expected request to be finished before timeout"),
            FailureCategory::Assertion
        );
    }

    #[test]
    fn test_script_errors_are_not_retryable() {
        for name in SCRIPT_NAMES {
            let c = classify(Some(&ItemError::new(*name, "x is not defined")));
            assert_eq!(c.category, FailureCategory::Script);
            assert!(!c.retryable);
        }
    }

    #[test]
    fn test_typed_collaborator_errors() {
        assert_eq!(category_of("ElementNotFoundError", "#login"), FailureCategory::Element);
        assert_eq!(
            category_of("ElementNotInteractableError", "covered"),
            FailureCategory::Actionability
        );
        assert_eq!(category_of("NavigationError", "aborted"), FailureCategory::Network);
        assert_eq!(category_of("TimeoutError", "30000ms"), FailureCategory::Timeout);
    }

    #[test]
    fn test_message_keywords() {
        assert_eq!(category_of("Error", "Navigation timed out"), FailureCategory::Timeout);
        assert_eq!(category_of("Error", "read ECONNRESET"), FailureCategory::Network);
        assert_eq!(category_of("Error", "TypeError: fetch failed"), FailureCategory::Network);
        assert_eq!(category_of("Error", "something odd"), FailureCategory::Unknown);
    }

    #[test]
    fn test_only_assertion_and_script_block_retries() {
        let all = [
            FailureCategory::Element,
            FailureCategory::Actionability,
            FailureCategory::Timeout,
            FailureCategory::Network,
            FailureCategory::Assertion,
            FailureCategory::Script,
            FailureCategory::Unknown,
        ];
        for category in all {
            let blocked = matches!(category, FailureCategory::Assertion | FailureCategory::Script);
            assert_eq!(category.is_retryable(), !blocked);
        }
    }

    #[test]
    fn test_description_names_error() {
        let c = classify(Some(&ItemError::new("TimeoutError", "slow")));
        assert_eq!(c.description, "Operation timed out (TimeoutError)");
    }
}
