//! Run Context: working state owned by one pipeline run
use crate::data_model::{RunInput, StageRecord};
use crate::stage::{StageError, StageSlot};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub code: String,
    pub auxiliary_info: String,
    outputs: BTreeMap<StageSlot, String>,
    /// Diagnostics keyed by name: usage reports, review feedback,
    /// validation errors.
    pub diagnostics: HashMap<String, Value>,
    history: Vec<StageRecord>,
    pub created_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(input: RunInput) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            code: input.code,
            auxiliary_info: input.auxiliary_info,
            outputs: BTreeMap::new(),
            diagnostics: HashMap::new(),
            history: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn output(&self, slot: StageSlot) -> Option<&str> {
        self.outputs.get(&slot).map(String::as_str)
    }

    /// Output of an upstream stage, or `MissingInput` if it has not run.
    pub fn require(&self, slot: StageSlot) -> Result<&str, StageError> {
        self.output(slot).ok_or(StageError::MissingInput(slot))
    }

    /// Overwrites whatever the slot held from a previous execution.
    pub fn set_output(&mut self, slot: StageSlot, text: String) {
        self.outputs.insert(slot, text);
    }

    pub fn record(&mut self, record: StageRecord) {
        self.diagnostics.insert(
            format!("usage.{}", record.slot),
            serde_json::to_value(record.usage).unwrap_or(Value::Null),
        );
        self.history.push(record);
    }

    pub fn history(&self) -> &[StageRecord] {
        &self.history
    }

    pub fn into_history(self) -> Vec<StageRecord> {
        self.history
    }
}
