//! svcgen stages: the six chat-model stages of the generation pipeline.
//!
//! # Pipeline Flow
//!
//! ```text
//! code → identify → encapsulate → package (plugin)
//!                        ↓
//!                     generate → combine → review
//! ```
//!
//! Each stage is a [`PromptStage`] configured from a [`StageCatalog`] entry
//! and backed by an [`LlmClient`].

pub mod catalog;
pub mod client;
pub mod prompt;
mod prompt_stage;

pub use catalog::{ResolvedStage, StageCatalog, StageSpec};
pub use client::{
    retry_with_backoff, ChatRequest, ChatResponse, ClientConfig, HttpChatClient, LlmClient,
    Provider,
};
pub use prompt::{build_system_prompt, extract_service_name, render_feedback, Example, PromptRenderer};
pub use prompt_stage::PromptStage;

use std::sync::Arc;
use svcgen_core::{PipelineError, Stage, StageSet, StageSlot};

/// Build one [`PromptStage`] per slot from the catalog, sharing `client`.
pub fn build_stage_set(
    catalog: &StageCatalog,
    client: Arc<dyn LlmClient>,
) -> Result<StageSet, PipelineError> {
    let mut renderer = PromptRenderer::new();
    let mut resolved = Vec::new();
    for slot in StageSlot::ALL {
        let stage = catalog
            .resolve(slot)
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        renderer
            .register(slot, &stage.spec.template)
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        resolved.push(stage);
    }

    let renderer = Arc::new(renderer);
    let stages: Vec<Box<dyn Stage>> = resolved
        .into_iter()
        .map(|r| Box::new(PromptStage::new(r, renderer.clone(), client.clone())) as Box<dyn Stage>)
        .collect();
    StageSet::from_stages(stages)
}
