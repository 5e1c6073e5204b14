// Validation outcome: fatal syntax errors kept apart from advisory warnings

use std::collections::BTreeSet;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// Result of validating one document.
///
/// Syntax errors are fatal and block acceptance; unknown filters and other
/// warnings are advisory. Errors deduplicate by message text and keep
/// discovery order; unknown filters deduplicate by name and iterate in
/// sorted order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub syntax_errors: IndexSet<String>,
    pub unknown_filters: BTreeSet<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        ValidationResult::default()
    }

    /// True if there are syntax errors that should fail validation.
    pub fn has_errors(&self) -> bool {
        !self.syntax_errors.is_empty()
    }

    /// True if there are warnings (like unknown filters).
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty() || !self.unknown_filters.is_empty()
    }

    /// Record a syntax error that should cause validation to fail.
    pub fn add_syntax_error(&mut self, error: impl Into<String>) {
        self.syntax_errors.insert(error.into());
    }

    /// Record an unknown filter name.
    pub fn add_unknown_filter(&mut self, filter_name: impl Into<String>) {
        self.unknown_filters.insert(filter_name.into());
    }

    /// Record a general warning.
    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Combined error message, or None if there are no errors.
    pub fn error_message(&self) -> Option<String> {
        if !self.has_errors() {
            return None;
        }
        Some(
            self.syntax_errors
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join("\n\n"),
        )
    }

    /// Combined warnings message, or None if there are no warnings.
    pub fn warnings_message(&self) -> Option<String> {
        if !self.has_warnings() {
            return None;
        }

        let mut parts = Vec::new();

        if !self.unknown_filters.is_empty() {
            let filter_list = self
                .unknown_filters
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            parts.push(format!("Unknown filters detected: {}", filter_list));
        }
        parts.extend(self.warnings.iter().cloned());

        Some(parts.join("\n\n"))
    }

    /// Serialize to a JSON string for the reporting boundary.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize to a pretty-printed JSON string.
    pub fn to_json_string_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
