//! Script validator: grammar parse plus semantic passes, with the regex
//! checks as a fallback engine.

use crate::fallback;
use crate::semantic::{self, CheckKind, Finding};
use serde::{Deserialize, Serialize};
use service_script::{parse_script, ParseError, SMOKE_SCRIPT};
use tracing::{debug, warn};

/// Which checker produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationEngine {
    Grammar,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Use the compiled grammar when it passes its construction probe
    #[serde(default = "default_true")]
    pub grammar_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            grammar_enabled: true,
        }
    }
}

impl ValidatorConfig {
    /// `SVCGEN_GRAMMAR=off|false|0` disables the grammar engine.
    pub fn from_env() -> Self {
        let grammar_enabled = std::env::var("SVCGEN_GRAMMAR")
            .map(|v| !matches!(v.trim().to_lowercase().as_str(), "off" | "false" | "0"))
            .unwrap_or(true);
        Self { grammar_enabled }
    }
}

/// Outcome of validating one script. `is_valid()` holds exactly when
/// `errors()` is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    valid: bool,
    errors: Vec<String>,
    suggestions: Vec<String>,
    findings: Vec<Finding>,
    engine: ValidationEngine,
}

impl ValidationResult {
    pub fn from_findings(engine: ValidationEngine, findings: Vec<Finding>) -> Self {
        let errors: Vec<String> = findings.iter().map(|f| f.message.clone()).collect();
        let suggestions = findings
            .iter()
            .filter_map(|f| f.suggestion.clone())
            .collect();
        Self {
            valid: errors.is_empty(),
            errors,
            suggestions,
            findings,
            engine,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn suggestions(&self) -> &[String] {
        &self.suggestions
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn engine(&self) -> ValidationEngine {
        self.engine
    }

    /// Errors and suggestions as a bullet list.
    pub fn report(&self) -> String {
        let mut out = String::from("Syntax validation errors:\n");
        for error in &self.errors {
            out.push_str(&format!("- {}\n", error));
        }
        if !self.suggestions.is_empty() {
            out.push_str("\nSuggested fixes:\n");
            for suggestion in &self.suggestions {
                out.push_str(&format!("- {}\n", suggestion));
            }
        }
        out
    }
}

pub struct ScriptValidator {
    engine: ValidationEngine,
}

impl ScriptValidator {
    /// Pick the engine. The grammar is re-checked here on every
    /// construction by parsing [`SMOKE_SCRIPT`]; a failed probe degrades to
    /// the regex fallback instead of failing closed.
    pub fn new(config: &ValidatorConfig) -> Self {
        let engine = if !config.grammar_enabled {
            warn!("grammar disabled by configuration, using regex fallback");
            ValidationEngine::Fallback
        } else {
            match parse_script(SMOKE_SCRIPT) {
                Ok(_) => ValidationEngine::Grammar,
                Err(e) => {
                    warn!(error = %e, "grammar probe failed, using regex fallback");
                    ValidationEngine::Fallback
                }
            }
        };
        Self { engine }
    }

    pub fn with_engine(engine: ValidationEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> ValidationEngine {
        self.engine
    }

    pub fn validate(&self, script: &str) -> ValidationResult {
        let findings = match self.engine {
            ValidationEngine::Grammar => match parse_script(script) {
                Ok(tree) => semantic::analyze(&tree),
                Err(e) => vec![parse_failure(&e)],
            },
            ValidationEngine::Fallback => fallback::check(script),
        };
        let result = ValidationResult::from_findings(self.engine, findings);
        debug!(
            engine = ?self.engine,
            valid = result.is_valid(),
            errors = result.errors().len(),
            "script validated"
        );
        result
    }
}

impl Default for ScriptValidator {
    fn default() -> Self {
        Self::new(&ValidatorConfig::default())
    }
}

fn parse_failure(error: &ParseError) -> Finding {
    match error {
        ParseError::Syntax {
            line,
            column,
            message,
        } => Finding::new(
            CheckKind::Syntax,
            format!(
                "syntax error at line {}, column {}: {}",
                line, column, message
            ),
        )
        .suggest(format!("check the syntax near line {}", line))
        .at_line(*line),
        ParseError::Empty => Finding::new(CheckKind::Syntax, "script is empty")
            .suggest("emit a `service <name> { ... }` block"),
        other => Finding::new(CheckKind::Syntax, format!("syntax error: {}", other)),
    }
}
