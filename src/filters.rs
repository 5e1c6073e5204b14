// Filter stub registry and the known-filter allowlist
// Every filter is a validation stub; real transforms live in the renderer

use indexmap::IndexMap;

use crate::value::TValue;

/// Signature shared by every registered filter: the piped value, positional
/// arguments, keyword arguments. Stubs ignore the arguments and pass the
/// piped value through.
pub type FilterFn = fn(TValue, &[TValue], &[(String, TValue)]) -> TValue;

/// The no-op stub every name in the registry maps to.
pub fn null_filter(value: TValue, _args: &[TValue], _kwargs: &[(String, TValue)]) -> TValue {
    value
}

/// Filter injected into every output block that carries no explicit filter
/// pipeline, matching what the production renderer applies to bare
/// expressions.
pub const DEFAULT_FILTER: &str = "ampersand_filter";

/// Standard filters of the template language. Registered so expressions
/// using them resolve on the first pass.
pub const STANDARD_FILTERS: &[&str] = &[
    "abs", "attr", "batch", "capitalize", "center", "default", "dictsort",
    "escape", "filesizeformat", "first", "float", "forceescape", "format",
    "groupby", "indent", "int", "join", "last", "length", "list", "lower",
    "map", "max", "min", "pprint", "random", "reject", "rejectattr", "replace",
    "reverse", "round", "safe", "select", "selectattr", "slice", "sort",
    "string", "striptags", "sum", "title", "tojson", "trim", "truncate",
    "unique", "upper", "urlencode", "urlize", "wordcount", "wordwrap", "xmlattr",
];

/// Domain filters the production renderer registers on top of the standard
/// set. `ampersand_filter` is also the default filter injected into bare
/// output blocks.
pub const DOMAIN_FILTERS: &[&str] = &[
    "ampersand_filter", "markdown", "add_separators", "inline_markdown",
    "paragraphs", "manual_line_breaks", "RichText", "nice_number", "ordinal",
    "ordinal_number", "currency", "comma_list", "comma_and_list", "salutation",
    "alpha", "roman", "word", "bold", "italic", "title_case", "single_paragraph",
    "phone_number_formatted", "phone_number_in_e164", "country_name",
    "fix_punctuation", "redact", "verbatim", "chain", "catchall_options",
    "catchall_label", "catchall_datatype", "catchall_question",
    "catchall_subquestion", "if_final", "any", "all",
];

/// Names that never warrant an unknown-filter warning, whether or not they
/// are registered. Superset of the registry: it also covers filters the
/// production environment picks up from elsewhere (host-language builtins,
/// date/time helpers, document helpers).
pub const KNOWN_FILTERS: &[&str] = &[
    // Standard template filters
    "abs", "attr", "batch", "capitalize", "center", "default", "dictsort",
    "escape", "filesizeformat", "first", "float", "forceescape", "format",
    "groupby", "indent", "int", "join", "last", "length", "list", "lower",
    "map", "max", "min", "pprint", "random", "reject", "rejectattr", "replace",
    "reverse", "round", "safe", "select", "selectattr", "slice", "sort",
    "string", "striptags", "sum", "title", "tojson", "trim", "truncate",
    "unique", "upper", "urlencode", "urlize", "wordcount", "wordwrap", "xmlattr",
    // Host-language builtins commonly used as filters
    "any", "all", "enumerate", "sorted", "len",
    // Domain filters
    "ampersand_filter", "markdown", "add_separators", "inline_markdown",
    "paragraphs", "manual_line_breaks", "RichText", "nice_number", "ordinal",
    "ordinal_number", "currency", "comma_list", "comma_and_list", "salutation",
    "alpha", "roman", "word", "bold", "italic", "title_case", "single_paragraph",
    "phone_number_formatted", "phone_number_in_e164", "country_name",
    "fix_punctuation", "redact", "verbatim", "chain", "if_final",
    // Additional domain filters
    "catchall_options", "catchall_label", "catchall_datatype",
    "catchall_question", "catchall_subquestion", "showifdef",
    "currency_symbol", "indefinite_article", "possessify",
    "verb_past", "verb_present", "noun_plural", "noun_singular",
    "some", "indefinite", "a_preposition_b", "preposition_b",
    "capitalize_function", "section_links", "url_action",
    "interview_url", "interview_email", "static_image",
    "qr_code", "overlay_pdf", "pdf_concatenate",
    // Date/time filters
    "strftime", "strptime", "today", "as_datetime", "format_date",
    "format_time", "current_datetime",
    // File/document filters
    "file_size", "mime_type", "extension", "filename",
    // Math/calculation filters
    "float_to_currency", "percentage", "thousands",
];

/// Test names the expression grammar accepts after `is`. Unknown tests are
/// fatal, unlike unknown filters.
pub const KNOWN_TESTS: &[&str] = &[
    "boolean", "callable", "defined", "divisibleby", "eq", "escaped", "even",
    "false", "filter", "float", "ge", "gt", "in", "integer", "iterable",
    "le", "lower", "lt", "mapping", "ne", "none", "number", "odd", "sameas",
    "sequence", "string", "test", "true", "undefined", "upper",
];

/// Whether a filter name is in the static allowlist.
pub fn is_known_filter(name: &str) -> bool {
    KNOWN_FILTERS.contains(&name)
}

/// Whether a test name is recognized.
pub fn is_known_test(name: &str) -> bool {
    KNOWN_TESTS.contains(&name)
}

/// Name → behavior mapping for one evaluation environment. Registration
/// order is preserved; later inserts of the same name are no-ops.
#[derive(Clone, Debug, Default)]
pub struct FilterTable {
    filters: IndexMap<String, FilterFn>,
}

impl FilterTable {
    pub fn new() -> Self {
        FilterTable {
            filters: IndexMap::new(),
        }
    }

    /// Table pre-seeded with the standard and domain filter names.
    pub fn with_registered() -> Self {
        let mut table = FilterTable::new();
        for name in STANDARD_FILTERS {
            table.insert_stub(name);
        }
        for name in DOMAIN_FILTERS {
            table.insert_stub(name);
        }
        table
    }

    /// Register a no-op stub under `name`.
    pub fn insert_stub(&mut self, name: &str) {
        self.filters
            .entry(name.to_string())
            .or_insert(null_filter as FilterFn);
    }

    pub fn get(&self, name: &str) -> Option<FilterFn> {
        self.filters.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_names_resolve() {
        let table = FilterTable::with_registered();
        assert!(table.contains("upper"));
        assert!(table.contains("markdown"));
        assert!(table.contains("ampersand_filter"));
        assert!(!table.contains("definitely_not_a_filter"));
    }

    #[test]
    fn test_registry_is_subset_of_allowlist() {
        // Registered filters must never surface as unknown-filter warnings
        let table = FilterTable::with_registered();
        for name in STANDARD_FILTERS.iter().chain(DOMAIN_FILTERS) {
            assert!(table.contains(name));
            assert!(is_known_filter(name), "{} missing from allowlist", name);
        }
    }

    #[test]
    fn test_stub_passes_value_through() {
        let value = TValue::string("hello");
        let result = null_filter(value.clone(), &[TValue::from(1i64)], &[]);
        assert_eq!(result, value);
    }

    #[test]
    fn test_insert_stub_is_idempotent() {
        let mut table = FilterTable::with_registered();
        let before = table.len();
        table.insert_stub("upper");
        assert_eq!(table.len(), before);
        table.insert_stub("brand_new");
        assert_eq!(table.len(), before + 1);
    }

    #[test]
    fn test_known_tests() {
        assert!(is_known_test("defined"));
        assert!(is_known_test("divisibleby"));
        assert!(!is_known_test("no_such_test"));
    }
}
