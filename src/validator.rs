// Iterative resolution loop
// The evaluator reports one missing filter per attempt, so unknown filters
// are discovered a batch at a time: stub what was found, run again, stop
// when an attempt succeeds, fails for a non-filter reason, or the
// iteration cap is hit

use std::collections::BTreeSet;

use indexmap::IndexSet;
use tracing::debug;

use crate::evaluator::{Environment, RenderError};
use crate::filters::{is_known_filter, FilterTable};
use crate::normalize;
use crate::result::ValidationResult;

/// Safety bound against pathological non-convergence, not a tunable
/// correctness parameter.
pub const MAX_ITERATIONS: usize = 10;

/// Document validator.
///
/// Stateless across documents: each `validate` call owns its stub set and
/// builds a fresh environment per attempt, so one document's discovered
/// filters can never suppress another's warnings.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    extra_filters: Vec<String>,
    extra_known: Vec<String>,
    max_iterations: Option<usize>,
}

impl Validator {
    pub fn new() -> Self {
        Validator::default()
    }

    /// Register an additional filter name, resolved on the first pass like
    /// the built-in registry and exempt from warnings.
    pub fn with_filter(mut self, name: impl Into<String>) -> Self {
        self.extra_filters.push(name.into());
        self
    }

    /// Add a name to the known-filters allowlist without registering it.
    pub fn with_known_filter(mut self, name: impl Into<String>) -> Self {
        self.extra_known.push(name.into());
        self
    }

    /// Override the iteration cap.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    /// Validate one document's extracted text.
    pub fn validate(&self, source: &str) -> ValidationResult {
        let max_iterations = self.max_iterations.unwrap_or(MAX_ITERATIONS);
        let mut stubbed: BTreeSet<String> = BTreeSet::new();
        let mut syntax_errors: IndexSet<String> = IndexSet::new();
        let mut exhausted = true;

        for iteration in 0..max_iterations {
            let mut environment = Environment::with_filters(self.build_table(&stubbed));
            match environment.validate_source(source) {
                Ok(()) => {
                    debug!(iteration, stubbed = stubbed.len(), "validation converged");
                    exhausted = false;
                    break;
                }
                Err(RenderError::UnknownFilter(name)) => {
                    debug!(filter = %name, iteration, "discovered unknown filter");
                    if !stubbed.insert(name.clone()) {
                        // A filter that fails while stubbed is not
                        // retryable
                        syntax_errors.insert(RenderError::UnknownFilter(name).to_string());
                        exhausted = false;
                        break;
                    }
                }
                Err(error) => {
                    debug!(%error, iteration, "validation failed");
                    syntax_errors.insert(error.to_string());
                    exhausted = false;
                    break;
                }
            }
        }

        if exhausted {
            syntax_errors.insert(format!(
                "Filter discovery did not converge after {} attempts",
                max_iterations
            ));
        }

        // A terminal error can leave later expressions unevaluated, so
        // their filters never reach the loop; a lexical sweep of the raw
        // text still surfaces them as warning candidates
        let mut candidates = stubbed;
        candidates.extend(scan_filter_names(source));

        let mut result = ValidationResult::new();
        for error in syntax_errors {
            result.add_syntax_error(error);
        }
        for name in candidates {
            if self.is_reportable(&name) {
                result.add_unknown_filter(name);
            }
        }
        result
    }

    fn build_table(&self, stubbed: &BTreeSet<String>) -> FilterTable {
        let mut table = FilterTable::with_registered();
        for name in &self.extra_filters {
            table.insert_stub(name);
        }
        for name in stubbed {
            table.insert_stub(name);
        }
        table
    }

    /// A discovered name is worth a warning only when nothing knows it:
    /// not the static allowlist, not caller-supplied names.
    fn is_reportable(&self, name: &str) -> bool {
        !is_known_filter(name)
            && !self.extra_known.iter().any(|known| known == name)
            && !self.extra_filters.iter().any(|known| known == name)
    }
}

/// Validate one document with the default registry and allowlist.
pub fn validate(source: &str) -> ValidationResult {
    Validator::new().validate(source)
}

/// Compatibility helper mirroring the original reporting boundary: the
/// joined fatal errors only, ignoring warnings.
pub fn error_message(source: &str) -> Option<String> {
    validate(source).error_message()
}

/// Best-effort lexical scan for `| name` sequences inside expression
/// regions. Comments and raw blocks are dropped first (their contents are
/// never evaluated), and string literals are skipped so quoted pipes do
/// not produce candidates.
fn scan_filter_names(source: &str) -> BTreeSet<String> {
    let stripped = strip_unevaluated(source);
    let mut names = BTreeSet::new();

    for region in normalize::expression_regions(&stripped) {
        let chars: Vec<char> = region.chars().collect();
        let n = chars.len();
        let mut i = 0;
        while i < n {
            match chars[i] {
                quote @ ('"' | '\'' | '\u{201c}' | '\u{2018}') => {
                    let close = match quote {
                        '\u{201c}' => '\u{201d}',
                        '\u{2018}' => '\u{2019}',
                        other => other,
                    };
                    i += 1;
                    while i < n && chars[i] != close {
                        if chars[i] == '\\' {
                            i += 1;
                        }
                        i += 1;
                    }
                }
                '|' => {
                    i += 1;
                    while i < n && chars[i].is_whitespace() {
                        i += 1;
                    }
                    let start = i;
                    while i < n && (chars[i].is_alphanumeric() || chars[i] == '_') {
                        i += 1;
                    }
                    if i > start && !chars[start].is_ascii_digit() {
                        names.insert(chars[start..i].iter().collect());
                    }
                    continue;
                }
                _ => {}
            }
            i += 1;
        }
    }

    names
}

/// Remove `{# ... #}` comments and `{% raw %}...{% endraw %}` blocks.
/// Unterminated regions swallow the rest of the document, which is the
/// conservative answer for a best-effort sweep.
fn strip_unevaluated(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let n = chars.len();
    let mut output = String::with_capacity(source.len());
    let mut i = 0;

    while i < n {
        if chars[i] == '{' && i + 1 < n {
            if chars[i + 1] == '#' {
                let mut j = i + 2;
                while j + 1 < n && !(chars[j] == '#' && chars[j + 1] == '}') {
                    j += 1;
                }
                i = if j + 1 < n { j + 2 } else { n };
                continue;
            }
            if chars[i + 1] == '%' {
                if let Some(content_start) = crate::parser::match_block_tag(&chars, i + 2, "raw")
                {
                    let mut j = content_start;
                    let mut end = n;
                    while j + 1 < n {
                        if chars[j] == '{' && chars[j + 1] == '%' {
                            if let Some(past) =
                                crate::parser::match_block_tag(&chars, j + 2, "endraw")
                            {
                                end = past;
                                break;
                            }
                        }
                        j += 1;
                    }
                    i = end;
                    continue;
                }
            }
        }
        output.push(chars[i]);
        i += 1;
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_finds_piped_names() {
        let names = scan_filter_names("{{ a | foo }} {% if b | bar %}x{% endif %}");
        assert!(names.contains("foo"));
        assert!(names.contains("bar"));
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn test_scan_skips_prose_and_strings() {
        let names = scan_filter_names("prose | not_a_filter {{ '|quoted' ~ x | real }}");
        assert_eq!(names.len(), 1);
        assert!(names.contains("real"));
    }

    #[test]
    fn test_scan_skips_raw_blocks_and_comments() {
        let names = scan_filter_names(
            "{% raw %}{{ a | ignored }}{% endraw %} {# {{ b | hidden }} #} {{ c | seen }}",
        );
        assert_eq!(names.iter().collect::<Vec<_>>(), vec!["seen"]);
    }

    #[test]
    fn test_scan_handles_filter_arguments() {
        let names = scan_filter_names("{{ items | join(', ') | upper }}");
        assert!(names.contains("join"));
        assert!(names.contains("upper"));
    }

    #[test]
    fn test_clean_document() {
        let result = validate("Dear {{ client.name | title_case }},\nregards");
        assert!(!result.has_errors());
        assert!(!result.has_warnings());
    }

    #[test]
    fn test_document_without_expressions() {
        let result = validate("plain prose, no template syntax at all");
        assert!(!result.has_errors());
        assert!(!result.has_warnings());
    }

    #[test]
    fn test_unknown_filter_becomes_warning() {
        let result = validate("{{ person.name.full | unknown_filter }}");
        assert!(!result.has_errors());
        assert!(result.has_warnings());
        assert_eq!(
            result.unknown_filters.iter().collect::<Vec<_>>(),
            vec!["unknown_filter"]
        );
    }

    #[test]
    fn test_multiple_unknown_filters_all_discovered() {
        let result = validate("{{ a | aardvark }}{{ b | bumblebee }}{{ c | capybara_f }}");
        assert!(!result.has_errors());
        assert_eq!(result.unknown_filters.len(), 3);
        assert!(result.unknown_filters.contains("aardvark"));
        assert!(result.unknown_filters.contains("bumblebee"));
        assert!(result.unknown_filters.contains("capybara_f"));
    }

    #[test]
    fn test_grammar_error_is_fatal() {
        let result = validate("{{ if this is broken }}");
        assert!(result.has_errors());
        assert!(result.unknown_filters.is_empty());
        assert_eq!(result.syntax_errors.len(), 1);
    }

    #[test]
    fn test_error_does_not_mask_filters_elsewhere() {
        // The grammar error stops evaluation before the second region, but
        // the lexical sweep still reports its filter
        let result = validate("{{ broken ( }} and {{ x | zazzle }}");
        assert!(result.has_errors());
        assert!(result.unknown_filters.contains("zazzle"));
    }

    #[test]
    fn test_unknown_filter_then_grammar_error() {
        // The grammar error is fatal either way; the filter still
        // surfaces through the sweep
        let result = validate("{{ x | zazzle }} {{ broken ( }}");
        assert!(result.has_errors());
        assert!(result.unknown_filters.contains("zazzle"));
    }

    #[test]
    fn test_allowlisted_filters_not_reported() {
        // `showifdef` is allowlisted but not registered: it costs an
        // iteration, then is accepted silently
        let result = validate("{{ x | showifdef }}");
        assert!(!result.has_errors());
        assert!(!result.has_warnings());
    }

    #[test]
    fn test_iteration_cap_reported_as_error() {
        let source: String = (0..12)
            .map(|i| format!("{{{{ x | never_seen_{} }}}}", i))
            .collect();
        let result = Validator::new().with_max_iterations(5).validate(&source);
        assert!(result.has_errors());
        assert!(result
            .error_message()
            .unwrap()
            .contains("did not converge"));
        // The sweep still names every filter the loop never reached
        assert_eq!(result.unknown_filters.len(), 12);
    }

    #[test]
    fn test_convergence_within_n_plus_one_iterations() {
        let result = Validator::new()
            .with_max_iterations(4)
            .validate("{{ a | alpha_f }}{{ b | beta_f }}{{ c | gamma_f }}");
        assert!(!result.has_errors());
        assert_eq!(result.unknown_filters.len(), 3);
    }

    #[test]
    fn test_extra_filter_registration() {
        let validator = Validator::new().with_filter("house_style");
        let result = validator.validate("{{ x | house_style }}");
        assert!(!result.has_errors());
        assert!(!result.has_warnings());
    }

    #[test]
    fn test_extra_known_filter_suppresses_warning() {
        let validator = Validator::new().with_known_filter("legacy_filter");
        let result = validator.validate("{{ x | legacy_filter }}");
        assert!(!result.has_errors());
        assert!(!result.has_warnings());
    }

    #[test]
    fn test_state_does_not_leak_between_documents() {
        let validator = Validator::new();
        let first = validator.validate("{{ x | zazzle }}");
        assert!(first.unknown_filters.contains("zazzle"));

        // A document that never mentions zazzle must not inherit the stub
        let second = validator.validate("{{ y | upper }}");
        assert!(!second.has_warnings());
    }
}
