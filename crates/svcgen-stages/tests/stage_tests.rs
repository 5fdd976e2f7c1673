//! Prompt stages driven through the orchestrator with a recording client.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use svcgen_core::{
    PipelineConfig, PipelineError, PipelineOrchestrator, RunContext, RunInput, Stage, StageError,
    StageSlot, TokenUsage,
};
use svcgen_stages::{
    build_stage_set, ChatRequest, ChatResponse, LlmClient, PromptRenderer, PromptStage,
    StageCatalog,
};

const VALID: &str = "service order-rpc {\n    new order12345678 = gql query { getOrder };\n    output order-rpc.result = order12345678;\n    return order12345678;\n}";
const UNTERMINATED: &str = "service order-rpc {\n    new order12345678 = gql query { getOrder };\n    return order12345678\n}";

#[derive(Default)]
struct RecordingClient {
    replies: Mutex<HashMap<String, VecDeque<String>>>,
    requests: Mutex<Vec<ChatRequest>>,
    failing: Option<String>,
}

impl RecordingClient {
    fn reply(self, label: &str, replies: &[&str]) -> Self {
        self.replies.lock().unwrap().insert(
            label.to_string(),
            replies.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    fn requests_for(&self, label: &str) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.label == label)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl LlmClient for RecordingClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, StageError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.failing.as_deref() == Some(request.label.as_str()) {
            return Err(StageError::EmptyResponse);
        }
        let mut replies = self.replies.lock().unwrap();
        let content = match replies.get_mut(&request.label) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().cloned().unwrap_or_default(),
            None => format!("{} output", request.label),
        };
        Ok(ChatResponse {
            content,
            usage: TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 20,
                total_tokens: 120,
            },
        })
    }
}

fn orchestrator(client: Arc<RecordingClient>) -> PipelineOrchestrator {
    let catalog = StageCatalog::embedded().unwrap();
    let stages = build_stage_set(&catalog, client).unwrap();
    PipelineOrchestrator::new(stages, PipelineConfig::default())
}

fn input() -> RunInput {
    RunInput::new(
        "function getOrder(res) { res.result = db.orders.get(); return res.result; }",
        "service name: order-rpc",
    )
}

#[tokio::test]
async fn test_embedded_pipeline_end_to_end() {
    let client = Arc::new(
        RecordingClient::default()
            .reply("Script combiner", &[VALID])
            .reply("Functional reviewer", &["pass"]),
    );
    let output = orchestrator(client.clone()).run(input()).await.unwrap();

    assert_eq!(output.script, VALID);
    assert_eq!(output.plugin_code, "Plugin packer output");
    assert!(output.outcome.review_passed && output.outcome.syntax_valid);
    assert_eq!(client.requests.lock().unwrap().len(), 6);

    let combine = &client.requests_for("Script combiner")[0];
    assert!(combine.user_message.starts_with("Script generator output"));
    assert!(combine.user_message.ends_with("Current service name:\norder-rpc"));

    let review = &client.requests_for("Functional reviewer")[0];
    assert_eq!(review.model, "gemini-2.5-pro");
    assert!(review.system_prompt.contains("## Examples"));
    assert!(review.user_message.contains("Original source:\nfunction getOrder"));

    let identify = &client.requests_for("Code block identifier")[0];
    assert!(identify.user_message.starts_with("function getOrder"));
    assert!(identify.user_message.contains("Auxiliary info:\nservice name: order-rpc"));
}

#[tokio::test]
async fn test_generator_receives_syntax_feedback() {
    let client = Arc::new(
        RecordingClient::default()
            .reply("Script combiner", &[UNTERMINATED, VALID])
            .reply("Functional reviewer", &["通过"]),
    );
    let output = orchestrator(client.clone()).run(input()).await.unwrap();
    assert_eq!(output.script, VALID);

    let generate = client.requests_for("Script generator");
    assert_eq!(generate.len(), 2);
    assert!(!generate[0].user_message.contains("Regeneration feedback"));
    let retry = &generate[1].user_message;
    assert!(retry.contains("===== Syntax errors ====="));
    assert!(retry.contains("return order12345678"));
    assert!(retry.contains("===== Previous script ====="));
    assert!(retry.contains("Variable names are a name followed by exactly eight digits"));
    assert_eq!(client.requests_for("Functional reviewer").len(), 1);
}

#[tokio::test]
async fn test_generator_receives_review_feedback() {
    let client = Arc::new(
        RecordingClient::default()
            .reply("Script combiner", &[VALID])
            .reply("Functional reviewer", &["fail: no output mapping for order-rpc.total", "pass"]),
    );
    orchestrator(client.clone()).run(input()).await.unwrap();

    let retry = &client.requests_for("Script generator")[1].user_message;
    assert!(retry.contains("===== Functional review failed =====\nfail: no output mapping"));
    assert!(retry.contains("Inputs and outputs match the original service's structure"));
    assert_eq!(client.requests_for("Code block identifier").len(), 2);
    assert_eq!(client.requests_for("Plugin packer").len(), 1);
}

#[tokio::test]
async fn test_client_error_aborts_with_stage_identity() {
    let client = Arc::new(RecordingClient {
        failing: Some("Function encapsulator".into()),
        ..Default::default()
    });
    let err = orchestrator(client.clone()).run(input()).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Stage {
            slot: StageSlot::Encapsulate,
            source: StageError::EmptyResponse
        }
    ));
    assert!(client.requests_for("Script generator").is_empty());
}

#[tokio::test]
async fn test_stage_without_upstream_output_reports_missing_input() {
    let catalog = StageCatalog::embedded().unwrap();
    let resolved = catalog.resolve(StageSlot::Combine).unwrap();
    let mut renderer = PromptRenderer::new();
    renderer.register(StageSlot::Combine, &resolved.spec.template).unwrap();
    let stage = PromptStage::new(resolved, Arc::new(renderer), Arc::new(RecordingClient::default()));

    let ctx = RunContext::new(input());
    let err = stage.run(&ctx, None).await.unwrap_err();
    assert!(matches!(err, StageError::MissingInput(StageSlot::Generate)));
}

#[test]
fn test_catalog_loaded_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    let mut yaml = String::from("version: \"2\"\nstages:\n");
    for slot in StageSlot::ALL {
        yaml.push_str(&format!(
            "  {slot}:\n    name: {slot} stage\n    model: gpt-4o\n    system_prompt: shared.txt\n    template: \"{{{{main}}}}\"\n",
            slot = slot
        ));
    }
    std::fs::write(dir.path().join("catalog.yaml"), yaml).unwrap();
    std::fs::write(dir.path().join("shared.txt"), "Be precise.").unwrap();

    let catalog = StageCatalog::load(dir.path().join("catalog.yaml")).unwrap();
    assert_eq!(catalog.version, "2");
    let resolved = catalog.resolve(StageSlot::Review).unwrap();
    assert_eq!(resolved.system_prompt, "Be precise.");
    assert_eq!(resolved.spec.template, "{{main}}");
    assert!(resolved.examples.is_empty());

    std::fs::remove_file(dir.path().join("shared.txt")).unwrap();
    assert!(matches!(
        catalog.resolve(StageSlot::Identify),
        Err(StageError::Config(_))
    ));
}
