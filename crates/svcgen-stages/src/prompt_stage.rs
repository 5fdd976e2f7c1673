use crate::catalog::ResolvedStage;
use crate::client::{ChatRequest, LlmClient};
use crate::prompt::{build_system_prompt, extract_service_name, render_feedback, PromptRenderer};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use svcgen_core::{RegenerationDirective, RunContext, Stage, StageError, StageOutput, StageSlot};
use tracing::debug;

/// Stage backed by a chat model: renders its instruction template from the
/// run context and sends it with the slot's system prompt.
pub struct PromptStage {
    slot: StageSlot,
    name: String,
    model: String,
    system_prompt: String,
    uses_feedback: bool,
    renderer: Arc<PromptRenderer>,
    client: Arc<dyn LlmClient>,
}

impl PromptStage {
    /// `renderer` must already hold the template for `resolved.slot`.
    pub fn new(resolved: ResolvedStage, renderer: Arc<PromptRenderer>, client: Arc<dyn LlmClient>) -> Self {
        Self {
            slot: resolved.slot,
            system_prompt: build_system_prompt(&resolved.system_prompt, &resolved.examples),
            name: resolved.spec.name,
            model: resolved.spec.model,
            uses_feedback: resolved.spec.uses_feedback,
            renderer,
            client,
        }
    }

    /// Template data for this slot. Each stage reads the output of the stage
    /// before it.
    pub fn template_data(
        &self,
        ctx: &RunContext,
        directive: Option<&RegenerationDirective>,
    ) -> Result<Value, StageError> {
        let main = match self.slot {
            StageSlot::Identify => ctx.code.as_str(),
            StageSlot::Encapsulate => ctx.require(StageSlot::Identify)?,
            StageSlot::Package | StageSlot::Generate => ctx.require(StageSlot::Encapsulate)?,
            StageSlot::Combine => ctx.require(StageSlot::Generate)?,
            StageSlot::Review => ctx.require(StageSlot::Combine)?,
        };

        let mut data = Map::new();
        data.insert("main".into(), json!(main));
        data.insert("aux".into(), json!(ctx.auxiliary_info.trim()));
        data.insert("source".into(), json!(ctx.code));
        if self.slot == StageSlot::Combine {
            data.insert("service_name".into(), json!(extract_service_name(&ctx.auxiliary_info)));
        }
        if let Some(directive) = directive.filter(|_| self.uses_feedback) {
            data.insert("feedback".into(), json!(render_feedback(directive)));
        }
        Ok(Value::Object(data))
    }
}

#[async_trait]
impl Stage for PromptStage {
    fn slot(&self) -> StageSlot {
        self.slot
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        ctx: &RunContext,
        directive: Option<&RegenerationDirective>,
    ) -> Result<StageOutput, StageError> {
        let data = self.template_data(ctx, directive)?;
        let user_message = self.renderer.render(self.slot, &data)?;
        debug!(
            run_id = %ctx.run_id,
            stage = %self.name,
            model = %self.model,
            prompt_chars = user_message.len(),
            "prompt rendered"
        );

        let request = ChatRequest {
            model: self.model.clone(),
            system_prompt: self.system_prompt.clone(),
            user_message,
            label: self.name.clone(),
        };
        let response = self.client.complete(&request).await?;
        Ok(StageOutput::new(response.content, response.usage))
    }
}
