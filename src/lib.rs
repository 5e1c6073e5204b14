// templint - fail-soft validation for embedded template expressions
// Copyright (c) 2026 templint contributors
// Licensed under the MIT License

//! # templint
//!
//! Validation engine for template expressions embedded in document text.
//!
//! Given text extracted from a document that may contain template
//! expressions (`{{ ... }}` output blocks and `{% ... %}` statements),
//! templint decides whether those expressions are syntactically valid, and
//! separately flags references to unrecognized post-processing filters
//! without treating them as fatal. Expressions are evaluated against an
//! empty data context under fail-soft semantics: every unresolved name
//! becomes an absorbing sentinel, so only genuine grammar violations and
//! unresolvable filters can fail a document.
//!
//! The evaluator can only surface one missing filter per attempt, so the
//! validator runs an iterative fixed-point loop: stub what was discovered,
//! try again, and stop once an attempt succeeds, fails for a non-filter
//! reason, or the iteration cap is reached. Discovered names absent from
//! the known-filters allowlist are reported as warnings.
//!
//! ## Architecture
//!
//! - `normalize` - rewrites typographic quotes and entity-encoded
//!   ampersands inside expression regions before parsing
//! - `parser` - template lexer, default-filter injection, and parser
//! - `ast` - template and expression tree definitions
//! - `value` - value model with the absorbing `Undefined` sentinel
//! - `evaluator` - tolerant evaluation environment
//! - `filters` - filter stub registry and known-filter allowlist
//! - `validator` - the iterative resolution loop
//! - `result` - errors-vs-warnings outcome model
//!
//! ## Example
//!
//! ```
//! let result = templint::validate("Dear {{ client.name | title_case }},");
//! assert!(!result.has_errors());
//!
//! let result = templint::validate("{{ total | frobnicate }}");
//! assert!(!result.has_errors());
//! assert!(result.unknown_filters.contains("frobnicate"));
//! ```

pub mod ast;
pub mod evaluator;
pub mod filters;
pub mod normalize;
pub mod parser;
pub mod result;
pub mod validator;
pub mod value;

pub use evaluator::{Environment, RenderError};
pub use parser::ParseError;
pub use result::ValidationResult;
pub use validator::{error_message, validate, Validator};
pub use value::TValue;

#[cfg(test)]
mod tests {
    #[test]
    fn test_public_entry_points() {
        let result = crate::validate("{{ name }}");
        assert!(!result.has_errors());
        assert_eq!(crate::error_message("{{ name }}"), None);
    }
}
