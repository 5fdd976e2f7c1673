//! Pipeline Orchestrator: runs the six stages with the functional and
//! syntax feedback loops.
//!
//! ```text
//! identify -> encapsulate -> +-> package
//!                            +-> generate -> combine -> review --fail--> (identify, encapsulate, retry)
//!                                                          |
//!                                                         pass
//!                                                          v
//!                                                      validate --invalid--> (generate, combine, revalidate)
//! ```
//!
//! Review failures and invalid scripts are retried until their budget runs
//! out, after which the last candidate is kept. Stage errors abort the run.

use crate::budget::RetryBudget;
use crate::config::PipelineConfig;
use crate::context::RunContext;
use crate::data_model::{PipelineOutput, RunInput, ScriptOutcome, StageRecord};
use crate::directive::{RegenerationDirective, RegenerationKind};
use crate::error::PipelineError;
use crate::events::{ProgressEvent, ProgressHandle};
use crate::review::{KeywordClassifier, ReviewClassifier};
use crate::stage::{Stage, StageOutput, StageSlot};
use crate::stats::{RoundStats, StatsSink};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use svcgen_quality::ScriptValidator;
use tracing::{debug, info, warn};

/// One stage per slot.
pub struct StageSet {
    pub identify: Box<dyn Stage>,
    pub encapsulate: Box<dyn Stage>,
    pub package: Box<dyn Stage>,
    pub generate: Box<dyn Stage>,
    pub combine: Box<dyn Stage>,
    pub review: Box<dyn Stage>,
}

impl StageSet {
    /// Assemble from a list holding exactly one stage per slot, in any order.
    pub fn from_stages(stages: Vec<Box<dyn Stage>>) -> Result<Self, PipelineError> {
        let mut by_slot: HashMap<StageSlot, Box<dyn Stage>> = HashMap::new();
        for stage in stages {
            let slot = stage.slot();
            if by_slot.insert(slot, stage).is_some() {
                return Err(PipelineError::Config(format!("stage slot {} given twice", slot)));
            }
        }
        let mut take = |slot: StageSlot| {
            by_slot
                .remove(&slot)
                .ok_or_else(|| PipelineError::Config(format!("no stage for slot {}", slot)))
        };
        Ok(Self {
            identify: take(StageSlot::Identify)?,
            encapsulate: take(StageSlot::Encapsulate)?,
            package: take(StageSlot::Package)?,
            generate: take(StageSlot::Generate)?,
            combine: take(StageSlot::Combine)?,
            review: take(StageSlot::Review)?,
        })
    }

    pub fn get(&self, slot: StageSlot) -> &dyn Stage {
        match slot {
            StageSlot::Identify => self.identify.as_ref(),
            StageSlot::Encapsulate => self.encapsulate.as_ref(),
            StageSlot::Package => self.package.as_ref(),
            StageSlot::Generate => self.generate.as_ref(),
            StageSlot::Combine => self.combine.as_ref(),
            StageSlot::Review => self.review.as_ref(),
        }
    }
}

/// Buffered per-round statistics. While held, nothing is flushed before
/// the run ends.
#[derive(Default)]
struct RoundLedger {
    rounds: BTreeMap<u32, RoundStats>,
    held: bool,
}

impl RoundLedger {
    fn add(&mut self, record: &StageRecord) {
        self.rounds
            .entry(record.round)
            .or_insert_with(|| RoundStats::new(record.round))
            .add(record.slot, record.latency_ms, record.usage.total_tokens);
    }

    fn flush_before(&mut self, round: u32, sink: Option<&dyn StatsSink>) -> std::io::Result<()> {
        if self.held {
            return Ok(());
        }
        let pending = self.rounds.split_off(&round);
        let done = std::mem::replace(&mut self.rounds, pending);
        write_rounds(done, sink)
    }

    fn flush_all(&mut self, sink: Option<&dyn StatsSink>) -> std::io::Result<()> {
        write_rounds(std::mem::take(&mut self.rounds), sink)
    }
}

fn write_rounds(rounds: BTreeMap<u32, RoundStats>, sink: Option<&dyn StatsSink>) -> std::io::Result<()> {
    if let Some(sink) = sink {
        for stats in rounds.values() {
            sink.record_round(stats)?;
        }
    }
    Ok(())
}

/// Mutable loop state for one run.
struct RunState {
    round: u32,
    budget: RetryBudget,
    directive: Option<RegenerationDirective>,
    ledger: RoundLedger,
}

pub struct PipelineOrchestrator {
    stages: StageSet,
    config: PipelineConfig,
    classifier: Box<dyn ReviewClassifier>,
    validator: ScriptValidator,
    progress: ProgressHandle,
    stats: Option<Arc<dyn StatsSink>>,
}

impl PipelineOrchestrator {
    pub fn new(stages: StageSet, config: PipelineConfig) -> Self {
        Self {
            stages,
            config,
            classifier: Box::new(KeywordClassifier),
            validator: ScriptValidator::default(),
            progress: ProgressHandle::default(),
            stats: None,
        }
    }

    pub fn with_classifier(mut self, classifier: impl ReviewClassifier + 'static) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    pub fn with_validator(mut self, validator: ScriptValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_progress(mut self, progress: ProgressHandle) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_stats(mut self, sink: Arc<dyn StatsSink>) -> Self {
        self.stats = Some(sink);
        self
    }

    pub fn progress(&self) -> &ProgressHandle {
        &self.progress
    }

    /// Run the whole pipeline for one input.
    pub async fn run(&self, input: RunInput) -> Result<PipelineOutput, PipelineError> {
        input.validate()?;
        let mut ctx = RunContext::new(input);
        let mut state = RunState {
            round: 1,
            budget: self.config.budget(),
            directive: None,
            ledger: RoundLedger::default(),
        };

        info!(run_id = %ctx.run_id, concurrent_forks = self.config.concurrent_forks, "pipeline run started");
        self.progress.emit(ProgressEvent::RunStarted {
            run_id: ctx.run_id.clone(),
        });

        self.step(StageSlot::Identify, &mut ctx, &mut state).await?;
        self.step(StageSlot::Encapsulate, &mut ctx, &mut state).await?;

        let (script, outcome) = if self.config.concurrent_forks {
            let snapshot = ctx.clone();
            state.ledger.held = true;
            let package = self.execute(StageSlot::Package, &snapshot, None, state.round);
            let generation = self.generation_fork(&mut ctx, &mut state);
            let ((output, record), generated) = tokio::try_join!(package, generation)?;
            self.commit(&mut ctx, &mut state.ledger, output, record);
            state.ledger.held = false;
            generated
        } else {
            self.step(StageSlot::Package, &mut ctx, &mut state).await?;
            self.generation_fork(&mut ctx, &mut state).await?
        };

        state.ledger.flush_all(self.stats.as_deref())?;

        let plugin_code = ctx.output(StageSlot::Package).unwrap_or_default().to_string();
        info!(
            run_id = %ctx.run_id,
            rounds = state.round,
            review_passed = outcome.review_passed,
            syntax_valid = outcome.syntax_valid,
            "pipeline run finished"
        );
        self.progress.emit(ProgressEvent::RunFinished {
            run_id: ctx.run_id.clone(),
            rounds: state.round,
        });

        Ok(PipelineOutput {
            run_id: ctx.run_id.clone(),
            script,
            plugin_code,
            outcome,
            rounds: state.round,
            history: ctx.into_history(),
            finished_at: Utc::now(),
        })
    }

    /// Generation loop followed by the syntax loop.
    async fn generation_fork(
        &self,
        ctx: &mut RunContext,
        state: &mut RunState,
    ) -> Result<(String, ScriptOutcome), PipelineError> {
        let mut outcome = ScriptOutcome::default();

        let candidate = loop {
            outcome.functional_attempts = state.budget.record(RegenerationKind::Functional);
            self.step(StageSlot::Generate, ctx, state).await?;
            let script = self.step(StageSlot::Combine, ctx, state).await?;
            let review = self.step(StageSlot::Review, ctx, state).await?;

            let verdict = self.classifier.classify(&review);
            info!(run_id = %ctx.run_id, round = state.round, verdict = ?verdict, "review classified");
            self.progress.emit(ProgressEvent::ReviewVerdict {
                run_id: ctx.run_id.clone(),
                round: state.round,
                verdict,
            });
            ctx.diagnostics
                .insert("review.passed".into(), json!(verdict.passed()));

            if verdict.passed() {
                outcome.review_passed = true;
                break script;
            }
            ctx.diagnostics
                .insert("review.feedback".into(), Value::String(review.clone()));

            if state.budget.exhausted(RegenerationKind::Functional) {
                self.budget_exhausted(ctx, RegenerationKind::Functional, outcome.functional_attempts);
                break script;
            }

            state.directive = Some(RegenerationDirective::functional(review, script));
            self.advance_round(ctx, state, RegenerationKind::Functional)?;
            self.step(StageSlot::Identify, ctx, state).await?;
            self.step(StageSlot::Encapsulate, ctx, state).await?;
            if self.config.repackage_on_retry && !self.config.concurrent_forks {
                self.step(StageSlot::Package, ctx, state).await?;
            }
        };

        let (script, syntax_valid, attempts) = self.syntax_loop(ctx, state, candidate).await?;
        outcome.syntax_valid = syntax_valid;
        outcome.syntax_attempts = attempts;
        Ok((script, outcome))
    }

    /// Validate, regenerating through Generate and Combine only.
    async fn syntax_loop(
        &self,
        ctx: &mut RunContext,
        state: &mut RunState,
        candidate: String,
    ) -> Result<(String, bool, u32), PipelineError> {
        let mut script = candidate;
        loop {
            let attempt = state.budget.record(RegenerationKind::Syntax);
            let result = self.validator.validate(&script);
            self.progress.emit(ProgressEvent::SyntaxChecked {
                run_id: ctx.run_id.clone(),
                round: state.round,
                valid: result.is_valid(),
                errors: result.errors().to_vec(),
            });
            ctx.diagnostics
                .insert("validation.errors".into(), json!(result.errors()));

            if result.is_valid() {
                info!(run_id = %ctx.run_id, round = state.round, attempt, "script passed validation");
                return Ok((script, true, attempt));
            }
            info!(
                run_id = %ctx.run_id,
                round = state.round,
                attempt,
                errors = ?result.errors(),
                "script failed validation"
            );

            if state.budget.exhausted(RegenerationKind::Syntax) {
                self.budget_exhausted(ctx, RegenerationKind::Syntax, attempt);
                return Ok((script, false, attempt));
            }

            let report = format!("{}\nRejected script:\n{}", result.report(), script);
            state.directive = Some(RegenerationDirective::syntax(report, script));
            self.advance_round(ctx, state, RegenerationKind::Syntax)?;
            self.step(StageSlot::Generate, ctx, state).await?;
            script = self.step(StageSlot::Combine, ctx, state).await?;
        }
    }

    /// Run one stage and store its output. Generate is handed the pending
    /// directive and consumes it.
    async fn step(
        &self,
        slot: StageSlot,
        ctx: &mut RunContext,
        state: &mut RunState,
    ) -> Result<String, PipelineError> {
        let directive = match slot {
            StageSlot::Generate => state.directive.as_ref(),
            _ => None,
        };
        let (output, record) = self.execute(slot, ctx, directive, state.round).await?;
        if slot == StageSlot::Generate {
            state.directive = None;
        }
        Ok(self.commit(ctx, &mut state.ledger, output, record))
    }

    async fn execute(
        &self,
        slot: StageSlot,
        ctx: &RunContext,
        directive: Option<&RegenerationDirective>,
        round: u32,
    ) -> Result<(StageOutput, StageRecord), PipelineError> {
        let stage = self.stages.get(slot);
        debug!(run_id = %ctx.run_id, stage = stage.name(), round, regenerating = directive.is_some(), "stage started");
        self.progress.emit(ProgressEvent::StageStarted {
            run_id: ctx.run_id.clone(),
            slot,
            round,
        });

        let start = Instant::now();
        let output = stage
            .run(ctx, directive)
            .await
            .map_err(|e| PipelineError::stage(slot, e))?;
        let latency_ms = start.elapsed().as_millis() as u64;

        let record = StageRecord::new(slot, round, latency_ms, output.usage, &output.text);
        info!(
            run_id = %ctx.run_id,
            stage = stage.name(),
            round,
            latency_ms,
            tokens = output.usage.total_tokens,
            "stage finished"
        );
        self.progress.emit(ProgressEvent::StageFinished {
            run_id: ctx.run_id.clone(),
            slot,
            round,
            latency_ms,
            usage: output.usage,
        });
        Ok((output, record))
    }

    fn commit(
        &self,
        ctx: &mut RunContext,
        ledger: &mut RoundLedger,
        output: StageOutput,
        record: StageRecord,
    ) -> String {
        ledger.add(&record);
        ctx.set_output(record.slot, output.text.clone());
        ctx.record(record);
        output.text
    }

    fn advance_round(
        &self,
        ctx: &RunContext,
        state: &mut RunState,
        reason: RegenerationKind,
    ) -> Result<(), PipelineError> {
        state.round += 1;
        state.ledger.flush_before(state.round, self.stats.as_deref())?;
        info!(run_id = %ctx.run_id, round = state.round, reason = %reason, "regenerating");
        self.progress.emit(ProgressEvent::RoundAdvanced {
            run_id: ctx.run_id.clone(),
            round: state.round,
            reason,
        });
        Ok(())
    }

    fn budget_exhausted(&self, ctx: &RunContext, kind: RegenerationKind, attempts: u32) {
        warn!(run_id = %ctx.run_id, kind = %kind, attempts, "retry budget exhausted, keeping last candidate");
        self.progress.emit(ProgressEvent::BudgetExhausted {
            run_id: ctx.run_id.clone(),
            kind,
            attempts,
        });
    }
}
