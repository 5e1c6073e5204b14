// Integration tests for the validation pipeline
//
// These exercise the full path (normalization, lexing, default-filter
// injection, parsing, tolerant evaluation, and the iterative resolution
// loop) through the public API.

use templint::{validate, ValidationResult, Validator};

#[test]
fn test_document_without_expressions() {
    let result = validate("An ordinary letter.\nNothing templated about it.");
    assert!(!result.has_errors());
    assert!(!result.has_warnings());
}

#[test]
fn test_well_formed_document_with_zero_data() {
    // Every name is unresolved, and that must be fine: the sentinel
    // absorbs attribute access, indexing, calls, comparison, arithmetic
    let source = "\
Dear {{ client.name.full | title_case }},

{% if client.age >= 65 %}You qualify for the senior rate.{% endif %}
{% for item in invoice.lines %}
  {{ item.description }}: {{ item.amount | currency }}
{% endfor %}
Total due: {{ invoice.total + invoice.tax | currency }}
";
    let result = validate(source);
    assert!(!result.has_errors(), "{:?}", result.error_message());
    assert!(!result.has_warnings(), "{:?}", result.warnings_message());
}

#[test]
fn test_unknown_filter_single_iteration_recovery() {
    // First attempt fails on the filter, second stubs it and succeeds
    let result = validate("{{ person.name.full | unknown_filter }}");
    assert!(!result.has_errors());
    assert!(result.has_warnings());
    assert_eq!(
        result.unknown_filters.iter().collect::<Vec<_>>(),
        vec!["unknown_filter"]
    );
}

#[test]
fn test_discovery_completeness() {
    // Three distinct unknown filters, none otherwise broken: the loop
    // converges and reports exactly those three
    let source = "{{ a | filter_one }} {{ b | filter_two }} {{ c | filter_three }}";
    let result = validate(source);
    assert!(!result.has_errors());
    assert_eq!(
        result.unknown_filters.iter().collect::<Vec<_>>(),
        vec!["filter_one", "filter_three", "filter_two"]
    );
}

#[test]
fn test_broken_grammar_is_fatal() {
    let result = validate("{{ if this is broken }}");
    assert!(result.has_errors());
    assert!(!result.has_warnings());
    assert_eq!(result.syntax_errors.len(), 1);
}

#[test]
fn test_grammar_error_not_masked_by_unknown_filters() {
    let source = "{% if %}half-open{% endif %} {{ x | zazzle }}";
    let result = validate(source);
    assert!(result.has_errors());
    // The filter the evaluator never reached still shows up as advisory
    assert!(result.unknown_filters.contains("zazzle"));
}

#[test]
fn test_curly_quotes_do_not_cause_spurious_errors() {
    let result = validate("{{ person.name.full(\u{201c}x\u{201d}) | fix_punctuation }}");
    assert!(!result.has_errors(), "{:?}", result.error_message());
}

#[test]
fn test_entity_encoded_ampersand_inside_expression() {
    let result = validate("{% if company.name == 'Smith &amp; Co' %}match{% endif %}");
    assert!(!result.has_errors(), "{:?}", result.error_message());
}

#[test]
fn test_prose_outside_expressions_untouched() {
    // Typographic quotes in prose are not expression text and must not
    // affect the outcome
    let result = validate("She said \u{201c}hello\u{201d} — {{ greeting | capitalize }}");
    assert!(!result.has_errors());
    assert!(!result.has_warnings());
}

#[test]
fn test_iteration_cap_terminates_with_error() {
    // More distinct unknown filters than the cap allows discovering, one
    // per attempt: the loop stops at the bound and reports it
    let source: String = (0..12)
        .map(|i| format!("{{{{ x | generated_filter_{} }}}}", i))
        .collect::<Vec<_>>()
        .join(" ");
    let result = Validator::new().with_max_iterations(5).validate(&source);
    assert!(result.has_errors());
    assert!(result.error_message().unwrap().contains("did not converge"));
}

#[test]
fn test_bare_output_validated_with_default_filter() {
    // A bare {{ expr }} is validated as if piped through the default
    // filter, matching production rendering behavior
    let result = validate("{{ client.name }}");
    assert!(!result.has_errors());
    assert!(!result.has_warnings());
}

#[test]
fn test_render_location_prefixes_accepted() {
    let source = "\
{%p if client.eligible %}
{%tr for row in table.rows %}
{{r row.value }}
{%tr endfor %}
{%p endif %}";
    let result = validate(source);
    assert!(!result.has_errors(), "{:?}", result.error_message());
    assert!(!result.has_warnings());
}

#[test]
fn test_raw_block_contents_not_validated() {
    let result = validate("{% raw %}{{ not | valid | anything }}{% endraw %}");
    assert!(!result.has_errors());
    assert!(!result.has_warnings());
}

#[test]
fn test_comments_ignored() {
    let result = validate("{# {{ broken ( }} inside a comment #}fine");
    assert!(!result.has_errors());
    assert!(!result.has_warnings());
}

#[test]
fn test_whitespace_control_markers_accepted() {
    let result = validate("{%- if x -%}{{- x | trim -}}{%- endif -%}");
    assert!(!result.has_errors(), "{:?}", result.error_message());
}

#[test]
fn test_filter_block_with_unknown_name() {
    let result = validate("{% filter zazzle %}body{% endfilter %}");
    assert!(!result.has_errors());
    assert!(result.unknown_filters.contains("zazzle"));
}

#[test]
fn test_unknown_tag_is_fatal() {
    let result = validate("{% motto %}");
    assert!(result.has_errors());
    assert!(result
        .error_message()
        .unwrap()
        .contains("unknown tag 'motto'"));
}

#[test]
fn test_unknown_test_is_fatal() {
    let result = validate("{% if x is zezzle %}a{% endif %}");
    assert!(result.has_errors());
    assert!(result.error_message().unwrap().contains("No test named"));
}

#[test]
fn test_filters_in_unexecuted_branches_discovered() {
    // The walk covers both branches, so the filter behind a false
    // condition is still stubbed and reported
    let result = validate("{% if false %}{{ x | zazzle }}{% endif %}");
    assert!(!result.has_errors());
    assert!(result.unknown_filters.contains("zazzle"));
}

#[test]
fn test_duplicate_unknown_filter_reported_once() {
    let result = validate("{{ a | zazzle }}{{ b | zazzle }}{{ c | zazzle }}");
    assert!(!result.has_errors());
    assert_eq!(result.unknown_filters.len(), 1);
}

#[test]
fn test_set_and_loop_bindings_resolve() {
    let source = "\
{% set label = 'Invoice' %}
{{ label | upper }}
{% for line, amount in rows %}{{ line }} {{ amount | nice_number }}{% endfor %}";
    let result = validate(source);
    assert!(!result.has_errors(), "{:?}", result.error_message());
    assert!(!result.has_warnings());
}

#[test]
fn test_kwargs_and_test_arguments() {
    let source =
        "{{ items | join(', ') }} {{ n | round(precision=2) }} {% if n is divisibleby 3 %}x{% endif %}";
    let result = validate(source);
    assert!(!result.has_errors(), "{:?}", result.error_message());
}

#[test]
fn test_messages_joined_for_reporting() {
    let result = validate("{{ a | zazzle }}{{ b | wibble }}");
    assert!(!result.has_errors());
    assert_eq!(
        result.warnings_message().unwrap(),
        "Unknown filters detected: wibble, zazzle"
    );

    let broken = validate("{% endfor %}");
    assert!(broken.has_errors());
    assert!(broken.error_message().is_some());
}

#[test]
fn test_json_output_for_reporting_boundary() {
    let result = validate("{{ a | zazzle }}");
    let json = result.to_json_string().unwrap();
    let parsed: ValidationResult = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.unknown_filters, result.unknown_filters);
    assert!(!parsed.has_errors());
}

#[test]
fn test_validator_configuration() {
    let validator = Validator::new()
        .with_filter("letterhead")
        .with_known_filter("archived_filter");

    let result = validator.validate("{{ x | letterhead }}{{ y | archived_filter }}");
    assert!(!result.has_errors(), "{:?}", result.error_message());
    assert!(!result.has_warnings(), "{:?}", result.warnings_message());
}

#[test]
fn test_realistic_document() {
    let source = "\
{#- standard engagement letter -#}
Dear {{ client.name.full | title_case }},

{% if matter.type == 'litigation' %}
We will represent you in {{ matter.caption | verbatim }}.
{% elif matter.type == 'transactional' %}
This letter confirms our engagement for {{ matter.description }}.
{% else %}
We confirm our engagement.
{% endif %}

{% for fee in agreement.fees %}
  - {{ fee.label }}: {{ fee.amount | currency }}
{% endfor %}

{% set signature = attorney.name.full %}
Sincerely,
{{ signature | bold }}
";
    let result = validate(source);
    assert!(!result.has_errors(), "{:?}", result.error_message());
    assert!(!result.has_warnings(), "{:?}", result.warnings_message());
}
