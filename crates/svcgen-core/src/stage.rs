//! Stage contract: one transformation step of the pipeline.
use crate::context::RunContext;
use crate::directive::RegenerationDirective;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The six positions a stage can occupy, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageSlot {
    Identify,
    Encapsulate,
    Package,
    Generate,
    Combine,
    Review,
}

impl StageSlot {
    pub const ALL: [StageSlot; 6] = [
        StageSlot::Identify,
        StageSlot::Encapsulate,
        StageSlot::Package,
        StageSlot::Generate,
        StageSlot::Combine,
        StageSlot::Review,
    ];

    /// Stable id, also used as the statistics column label.
    pub fn id(&self) -> &'static str {
        match self {
            Self::Identify => "identify",
            Self::Encapsulate => "encapsulate",
            Self::Package => "package",
            Self::Generate => "generate",
            Self::Combine => "combine",
            Self::Review => "review",
        }
    }
}

impl fmt::Display for StageSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Token accounting reported by a stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutput {
    pub text: String,
    pub usage: TokenUsage,
}

impl StageOutput {
    pub fn new(text: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            text: text.into(),
            usage,
        }
    }
}

/// Capability-level failure. Always fatal to the run.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("api returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("template error: {0}")]
    Template(String),

    #[error("missing input: {0} has not produced output yet")]
    MissingInput(StageSlot),

    #[error("configuration error: {0}")]
    Config(String),
}

/// A single transformation step.
///
/// A stage reads the original code and prior outputs from the context and
/// returns its own output. The orchestrator owns the context and writes the
/// output into the stage's slot.
#[async_trait]
pub trait Stage: Send + Sync {
    fn slot(&self) -> StageSlot;

    /// Display name for logs and progress events
    fn name(&self) -> &str {
        self.slot().id()
    }

    /// `directive` is only passed when a regeneration is pending and this
    /// stage is the one expected to act on it.
    async fn run(
        &self,
        ctx: &RunContext,
        directive: Option<&RegenerationDirective>,
    ) -> Result<StageOutput, StageError>;
}
