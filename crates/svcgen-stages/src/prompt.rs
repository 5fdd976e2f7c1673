//! Prompt assembly: few-shot system prompts, instruction templates and
//! regeneration feedback.

use handlebars::Handlebars;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use svcgen_core::{RegenerationDirective, RegenerationKind, StageError, StageSlot};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: String,
    pub content: String,
}

/// One few-shot example: a description and a short conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub conversations: Vec<Turn>,
}

/// System prompt followed by the rendered examples, if any.
pub fn build_system_prompt(system_prompt: &str, examples: &[Example]) -> String {
    let mut prompt = system_prompt.trim_end().to_string();
    if examples.is_empty() {
        return prompt;
    }

    prompt.push_str("\n\n## Examples\n\n");
    for (index, example) in examples.iter().enumerate() {
        if let Some(description) = &example.description {
            prompt.push_str(&format!("### Example {}: {}\n\n", index + 1, description));
        }
        for turn in &example.conversations {
            match turn.role.as_str() {
                "user" => prompt.push_str(&format!("**User input:**\n{}\n\n", turn.content)),
                "assistant" => prompt.push_str(&format!("**Output:**\n{}\n\n", turn.content)),
                _ => {}
            }
        }
        prompt.push_str("---\n\n");
    }
    prompt.push_str("Using the examples above, handle the following input:\n");
    prompt
}

/// Handlebars registry holding one instruction template per slot.
pub struct PromptRenderer {
    handlebars: Handlebars<'static>,
}

impl PromptRenderer {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        handlebars.register_escape_fn(handlebars::no_escape);
        Self { handlebars }
    }

    pub fn register(&mut self, slot: StageSlot, template: &str) -> Result<(), StageError> {
        self.handlebars
            .register_template_string(slot.id(), template)
            .map_err(|e| StageError::Template(format!("{}: {}", slot, e)))
    }

    pub fn render(&self, slot: StageSlot, data: &Value) -> Result<String, StageError> {
        self.handlebars
            .render(slot.id(), data)
            .map(|text| text.trim().to_string())
            .map_err(|e| StageError::Template(format!("{}: {}", slot, e)))
    }
}

impl Default for PromptRenderer {
    fn default() -> Self {
        Self::new()
    }
}

const SYNTAX_CHECKLIST: &[&str] = &[
    "Variable names are a name followed by exactly eight digits",
    "Every statement ends with a semicolon",
    "GraphQL blocks use `gql query { ... }` or `gql mutation { ... }`",
    "Output mappings use `<service>.<field>` on the left-hand side",
    "Plugin calls use `<plugin>.<extension>/<function>(<args>)`",
];

const FUNCTIONAL_CHECKLIST: &[&str] = &[
    "The script does what the original code does",
    "Data flows and variable transformations are correct",
    "Inputs and outputs match the original service's structure",
];

/// Feedback section for a regeneration: heading, error text, the rejected
/// script and a checklist for the kind of failure.
pub fn render_feedback(directive: &RegenerationDirective) -> String {
    let (heading, checklist) = match directive.kind {
        RegenerationKind::Syntax => ("Syntax errors", SYNTAX_CHECKLIST),
        RegenerationKind::Functional => ("Functional review failed", FUNCTIONAL_CHECKLIST),
    };

    let mut feedback = format!("===== {} =====\n{}\n\n", heading, directive.error.trim());
    if let Some(previous) = &directive.previous_script {
        feedback.push_str("===== Previous script =====\n");
        feedback.push_str(previous.trim());
        feedback.push_str("\n\n");
    }
    feedback.push_str("Fix the problems above. In particular check:\n");
    for (index, item) in checklist.iter().enumerate() {
        feedback.push_str(&format!("{}. {}\n", index + 1, item));
    }
    feedback
}

static SERVICE_NAME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(?:服务名|service\s+name|current\s+service)\s*[:：]\s*([a-zA-Z][a-zA-Z0-9-]*)",
        r"(?i)service\s*[:：]\s*([a-zA-Z][a-zA-Z0-9-]*)",
        r"当前服务\s*[:：]\s*([a-zA-Z][a-zA-Z0-9-]*)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static BARE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9-]*$").unwrap());

pub const UNKNOWN_SERVICE: &str = "unknown-service";

/// Service name from the auxiliary hints: a labelled name first, then the
/// first line that is a bare name.
pub fn extract_service_name(auxiliary_info: &str) -> String {
    for pattern in SERVICE_NAME_PATTERNS.iter() {
        if let Some(name) = pattern.captures(auxiliary_info).and_then(|c| c.get(1)) {
            return name.as_str().to_string();
        }
    }
    auxiliary_info
        .lines()
        .map(str::trim)
        .find(|line| BARE_NAME.is_match(line))
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN_SERVICE.to_string())
}
