//! svcgen core: stage contract, run context and the retrying orchestrator.
//!
//! A run turns source code into a service script through six stages. The
//! orchestrator drives two bounded feedback loops (functional review, then
//! syntax validation) and always returns the best candidate it has unless a
//! stage itself fails.

pub mod budget;
pub mod config;
pub mod context;
pub mod data_model;
pub mod directive;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod review;
pub mod stage;
pub mod stats;

pub use budget::RetryBudget;
pub use config::PipelineConfig;
pub use context::RunContext;
pub use data_model::{PipelineOutput, RunInput, ScriptOutcome, StageRecord};
pub use directive::{RegenerationDirective, RegenerationKind};
pub use error::PipelineError;
pub use events::{ProgressEvent, ProgressHandle};
pub use orchestrator::{PipelineOrchestrator, StageSet};
pub use review::{KeywordClassifier, ReviewClassifier, ReviewVerdict, TaggedClassifier};
pub use stage::{Stage, StageError, StageOutput, StageSlot, TokenUsage};
pub use stats::{CsvStatsSink, MemoryStatsSink, RoundStats, StatsSink};

/// Engine version
pub const SVCGEN_VERSION: &str = env!("CARGO_PKG_VERSION");
