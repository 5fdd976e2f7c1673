//! Errors that reach the caller of a run
use crate::stage::{StageError, StageSlot};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("stage {slot} failed: {source}")]
    Stage {
        slot: StageSlot,
        #[source]
        source: StageError,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("statistics sink failed: {0}")]
    Stats(#[from] std::io::Error),
}

impl PipelineError {
    pub fn stage(slot: StageSlot, source: StageError) -> Self {
        Self::Stage { slot, source }
    }
}
