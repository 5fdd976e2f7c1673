//! Regeneration directive handed to the generating stage after a failed
//! review or validation.
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegenerationKind {
    /// Review judged the script functionally wrong
    Functional,
    /// Validator rejected the script
    Syntax,
}

impl fmt::Display for RegenerationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Functional => f.write_str("functional"),
            Self::Syntax => f.write_str("syntax"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegenerationDirective {
    pub kind: RegenerationKind,
    /// Review text or validation report
    pub error: String,
    /// The rejected script
    pub previous_script: Option<String>,
}

impl RegenerationDirective {
    pub fn functional(review: impl Into<String>, previous_script: impl Into<String>) -> Self {
        Self {
            kind: RegenerationKind::Functional,
            error: review.into(),
            previous_script: Some(previous_script.into()),
        }
    }

    pub fn syntax(report: impl Into<String>, previous_script: impl Into<String>) -> Self {
        Self {
            kind: RegenerationKind::Syntax,
            error: report.into(),
            previous_script: Some(previous_script.into()),
        }
    }
}
