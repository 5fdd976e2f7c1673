//! Data Model: run input, stage records and the final output
use crate::error::PipelineError;
use crate::stage::{StageSlot, TokenUsage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunInput {
    /// Source code to convert
    pub code: String,
    /// Free-text hints, e.g. `service name: order-rpc`
    #[serde(default)]
    pub auxiliary_info: String,
}

impl RunInput {
    pub fn new(code: impl Into<String>, auxiliary_info: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            auxiliary_info: auxiliary_info.into(),
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.code.trim().is_empty() {
            return Err(PipelineError::InvalidInput(
                "source code must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// One stage execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub slot: StageSlot,
    pub round: u32,
    pub latency_ms: u64,
    pub usage: TokenUsage,
    pub output_hash: String,
}

impl StageRecord {
    pub fn new(slot: StageSlot, round: u32, latency_ms: u64, usage: TokenUsage, output: &str) -> Self {
        Self {
            slot,
            round,
            latency_ms,
            usage,
            output_hash: format!("blake3:{}", blake3::hash(output.as_bytes())),
        }
    }
}

/// How the final script was reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptOutcome {
    pub review_passed: bool,
    pub syntax_valid: bool,
    pub functional_attempts: u32,
    pub syntax_attempts: u32,
}

impl ScriptOutcome {
    /// True when either loop ran out of budget and the last candidate was kept.
    pub fn is_last_candidate(&self) -> bool {
        !(self.review_passed && self.syntax_valid)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub run_id: String,
    pub script: String,
    pub plugin_code: String,
    pub outcome: ScriptOutcome,
    /// Highest round reached
    pub rounds: u32,
    pub history: Vec<StageRecord>,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_code_rejected() {
        assert!(RunInput::new("  \n", "hint").validate().is_err());
        assert!(RunInput::new("fn main() {}", "").validate().is_ok());
    }

    #[test]
    fn test_record_fingerprint() {
        let a = StageRecord::new(StageSlot::Combine, 1, 5, TokenUsage::default(), "x");
        let b = StageRecord::new(StageSlot::Combine, 2, 9, TokenUsage::default(), "x");
        assert_eq!(a.output_hash, b.output_hash);
        assert!(a.output_hash.starts_with("blake3:"));
    }
}
