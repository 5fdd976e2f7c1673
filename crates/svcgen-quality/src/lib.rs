//! Quality gate for generated service scripts.
//!
//! Validation runs the grammar parser and three semantic passes (naming,
//! termination, data flow). When the grammar is unavailable a regex
//! checker over the raw text takes over.
//!
//! # Example
//!
//! ```ignore
//! use svcgen_quality::{ScriptValidator, ValidatorConfig};
//!
//! let validator = ScriptValidator::new(&ValidatorConfig::from_env());
//! let result = validator.validate(script);
//! if !result.is_valid() {
//!     println!("{}", result.report());
//! }
//! ```

pub mod fallback;
pub mod semantic;
pub mod validator;

pub use semantic::{analyze, CheckKind, Finding, VARIABLE_NAME};
pub use validator::{ScriptValidator, ValidationEngine, ValidationResult, ValidatorConfig};

/// Validate with the default configuration.
pub fn validate(script: &str) -> ValidationResult {
    ScriptValidator::default().validate(script)
}

/// Check whether a script would be accepted as-is
pub fn is_valid(script: &str) -> bool {
    validate(script).is_valid()
}
