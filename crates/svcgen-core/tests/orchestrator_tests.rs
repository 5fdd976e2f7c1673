//! Orchestrator loop behavior driven by scripted stages.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use svcgen_core::{
    MemoryStatsSink, PipelineConfig, PipelineError, PipelineOrchestrator, ProgressEvent,
    RegenerationKind, RunContext, RunInput, Stage, StageError, StageOutput, StageSet, StageSlot,
    TaggedClassifier, TokenUsage,
};
use svcgen_core::RegenerationDirective;

const VALID: &str = "service order-rpc { new order12345678 = gql query { getOrder }; new result12345678 = myorder.exe/processOrder(order12345678); output order-rpc.result = result12345678; return result12345678; }";
const UNTERMINATED: &str = "service order-rpc { new order12345678 = gql query { getOrder }; return order12345678 }";

#[derive(Debug, Clone)]
struct Call {
    slot: StageSlot,
    directive: Option<RegenerationDirective>,
}

type CallLog = Arc<Mutex<Vec<Call>>>;

struct ScriptedStage {
    slot: StageSlot,
    responses: Mutex<VecDeque<String>>,
    last: Mutex<String>,
    fail: bool,
    log: CallLog,
}

impl ScriptedStage {
    fn new(slot: StageSlot, responses: &[&str], log: &CallLog) -> Box<dyn Stage> {
        Box::new(Self {
            slot,
            responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
            last: Mutex::new(format!("{} output", slot)),
            fail: false,
            log: log.clone(),
        })
    }

    fn failing(slot: StageSlot, log: &CallLog) -> Box<dyn Stage> {
        Box::new(Self {
            slot,
            responses: Mutex::new(VecDeque::new()),
            last: Mutex::new(String::new()),
            fail: true,
            log: log.clone(),
        })
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn slot(&self) -> StageSlot {
        self.slot
    }

    async fn run(
        &self,
        _ctx: &RunContext,
        directive: Option<&RegenerationDirective>,
    ) -> Result<StageOutput, StageError> {
        self.log.lock().unwrap().push(Call {
            slot: self.slot,
            directive: directive.cloned(),
        });
        if self.fail {
            return Err(StageError::Timeout(90_000));
        }
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.responses.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(StageOutput::new(
            last.clone(),
            TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
        ))
    }
}

struct Harness {
    log: CallLog,
    scripts: Vec<&'static str>,
    reviews: Vec<&'static str>,
    failing: Option<StageSlot>,
    config: PipelineConfig,
}

impl Harness {
    fn new(scripts: &[&'static str], reviews: &[&'static str]) -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            scripts: scripts.to_vec(),
            reviews: reviews.to_vec(),
            failing: None,
            config: PipelineConfig::default(),
        }
    }

    fn build(&self) -> PipelineOrchestrator {
        let stages = StageSlot::ALL
            .iter()
            .map(|&slot| {
                if self.failing == Some(slot) {
                    return ScriptedStage::failing(slot, &self.log);
                }
                match slot {
                    StageSlot::Combine => ScriptedStage::new(slot, &self.scripts, &self.log),
                    StageSlot::Review => ScriptedStage::new(slot, &self.reviews, &self.log),
                    StageSlot::Package => ScriptedStage::new(slot, &["plugin bundle"], &self.log),
                    _ => ScriptedStage::new(slot, &[], &self.log),
                }
            })
            .collect();
        PipelineOrchestrator::new(StageSet::from_stages(stages).unwrap(), self.config.clone())
    }

    fn slots(&self) -> Vec<StageSlot> {
        self.log.lock().unwrap().iter().map(|c| c.slot).collect()
    }

    fn count(&self, slot: StageSlot) -> usize {
        self.slots().into_iter().filter(|s| *s == slot).count()
    }

    fn directives(&self) -> Vec<Option<RegenerationDirective>> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.slot == StageSlot::Generate)
            .map(|c| c.directive.clone())
            .collect()
    }
}

fn input() -> RunInput {
    RunInput::new("function processOrder(order) { return order; }", "service name: order-rpc")
}

use StageSlot::*;

#[tokio::test]
async fn test_clean_run_executes_each_stage_once() {
    let harness = Harness::new(&[VALID], &["通过"]);
    let output = harness.build().run(input()).await.unwrap();

    assert_eq!(
        harness.slots(),
        vec![Identify, Encapsulate, Package, Generate, Combine, Review]
    );
    assert_eq!(output.script, VALID);
    assert_eq!(output.plugin_code, "plugin bundle");
    assert_eq!(output.rounds, 1);
    assert!(output.outcome.review_passed);
    assert!(output.outcome.syntax_valid);
    assert!(!output.outcome.is_last_candidate());
    assert_eq!(output.history.len(), 6);
    assert!(harness.directives().iter().all(Option::is_none));
}

#[tokio::test]
async fn test_failed_review_regenerates_upstream_once() {
    let harness = Harness::new(&[VALID], &["不通过: missing output mapping", "通过"]);
    let output = harness.build().run(input()).await.unwrap();

    assert_eq!(
        harness.slots(),
        vec![
            Identify, Encapsulate, Package, Generate, Combine, Review,
            Identify, Encapsulate, Generate, Combine, Review,
        ]
    );
    assert_eq!(output.rounds, 2);
    assert_eq!(output.outcome.functional_attempts, 2);
    assert!(output.outcome.review_passed);

    let directives = harness.directives();
    assert!(directives[0].is_none());
    let retry = directives[1].as_ref().unwrap();
    assert_eq!(retry.kind, RegenerationKind::Functional);
    assert_eq!(retry.error, "不通过: missing output mapping");
    assert_eq!(retry.previous_script.as_deref(), Some(VALID));
}

#[tokio::test]
async fn test_single_attempt_budget_keeps_first_candidate() {
    let mut harness = Harness::new(&[VALID], &["不通过: missing output mapping"]);
    harness.config.functional_retries = 1;
    let orchestrator = harness.build();
    let mut events = orchestrator.progress().subscribe();

    let output = orchestrator.run(input()).await.unwrap();

    assert_eq!(harness.count(Generate), 1);
    assert_eq!(harness.count(Review), 1);
    assert_eq!(output.script, VALID);
    assert_eq!(output.rounds, 1);
    assert!(!output.outcome.review_passed);
    assert!(output.outcome.syntax_valid);
    assert!(output.outcome.is_last_candidate());

    let mut exhausted = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ProgressEvent::BudgetExhausted { kind, attempts, .. } = event {
            exhausted.push((kind, attempts));
        }
    }
    assert_eq!(exhausted, vec![(RegenerationKind::Functional, 1)]);
}

#[tokio::test]
async fn test_functional_loop_bounded_by_budget() {
    let harness = Harness::new(&["draft one", "draft two", VALID], &["fail"]);
    let output = harness.build().run(input()).await.unwrap();

    assert_eq!(harness.count(Review), 3);
    assert_eq!(harness.count(Identify), 3);
    assert_eq!(harness.count(Package), 1);
    assert_eq!(output.outcome.functional_attempts, 3);
    assert_eq!(output.script, VALID);
    assert_eq!(output.rounds, 3);
}

#[tokio::test]
async fn test_syntax_retry_regenerates_script_stages_only() {
    let harness = Harness::new(&[UNTERMINATED, UNTERMINATED, VALID], &["pass"]);
    let output = harness.build().run(input()).await.unwrap();

    assert_eq!(
        harness.slots(),
        vec![
            Identify, Encapsulate, Package, Generate, Combine, Review,
            Generate, Combine, Generate, Combine,
        ]
    );
    assert_eq!(output.rounds, 3);
    assert_eq!(output.outcome.syntax_attempts, 3);
    assert!(output.outcome.syntax_valid);
    assert_eq!(output.script, VALID);

    let retry = harness.directives()[1].clone().unwrap();
    assert_eq!(retry.kind, RegenerationKind::Syntax);
    assert!(retry.error.starts_with("Syntax validation errors:"));
    assert!(retry.error.contains("return order12345678"));
    assert!(retry.error.contains(UNTERMINATED));
    assert_eq!(retry.previous_script.as_deref(), Some(UNTERMINATED));
}

#[tokio::test]
async fn test_syntax_budget_exhaustion_keeps_last_script() {
    let mut harness = Harness::new(&[UNTERMINATED], &["通过"]);
    harness.config.syntax_retries = 2;
    let output = harness.build().run(input()).await.unwrap();

    assert_eq!(harness.count(Combine), 2);
    assert_eq!(output.outcome.syntax_attempts, 2);
    assert!(!output.outcome.syntax_valid);
    assert!(output.outcome.review_passed);
    assert_eq!(output.script, UNTERMINATED);
}

#[tokio::test]
async fn test_stage_error_aborts_run() {
    let mut harness = Harness::new(&[VALID], &["通过"]);
    harness.failing = Some(Encapsulate);
    let err = harness.build().run(input()).await.unwrap_err();

    match err {
        PipelineError::Stage { slot, source } => {
            assert_eq!(slot, Encapsulate);
            assert!(matches!(source, StageError::Timeout(90_000)));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(harness.slots(), vec![Identify, Encapsulate]);
}

#[tokio::test]
async fn test_review_stage_error_is_not_retried() {
    let mut harness = Harness::new(&[VALID], &[]);
    harness.failing = Some(Review);
    let err = harness.build().run(input()).await.unwrap_err();
    assert!(matches!(err, PipelineError::Stage { slot: Review, .. }));
    assert_eq!(harness.count(Review), 1);
}

#[tokio::test]
async fn test_blank_input_rejected_before_any_stage() {
    let harness = Harness::new(&[VALID], &["通过"]);
    let err = harness.build().run(RunInput::new("   ", "")).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(_)));
    assert!(harness.slots().is_empty());
}

#[tokio::test]
async fn test_round_counter_and_stats_rows() {
    let harness = Harness::new(&[VALID, UNTERMINATED, VALID], &["不通过", "通过"]);
    let sink = Arc::new(MemoryStatsSink::new());
    let orchestrator = harness.build().with_stats(sink.clone());
    let mut events = orchestrator.progress().subscribe();

    let output = orchestrator.run(input()).await.unwrap();
    assert_eq!(output.rounds, 3);

    let mut advanced = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ProgressEvent::RoundAdvanced { round, reason, .. } = event {
            advanced.push((round, reason));
        }
    }
    assert_eq!(
        advanced,
        vec![(2, RegenerationKind::Functional), (3, RegenerationKind::Syntax)]
    );

    let rounds = sink.rounds();
    let numbers: Vec<u32> = rounds.iter().map(|r| r.round).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(rounds[0].latency_ms.len(), 6);
    assert_eq!(rounds[1].tokens.len(), 5);
    assert_eq!(
        rounds[2].tokens.keys().copied().collect::<Vec<_>>(),
        vec![Generate, Combine]
    );
    assert_eq!(rounds[2].tokens[&Combine], 15);
}

#[tokio::test]
async fn test_concurrent_forks_join_package_output() {
    let mut harness = Harness::new(&[UNTERMINATED, VALID], &["不通过", "通过"]);
    harness.config.concurrent_forks = true;
    harness.config.repackage_on_retry = true;
    let sink = Arc::new(MemoryStatsSink::new());
    let output = harness.build().with_stats(sink.clone()).run(input()).await.unwrap();

    assert_eq!(output.plugin_code, "plugin bundle");
    assert_eq!(harness.count(Package), 1);
    assert!(output.history.iter().any(|r| r.slot == Package && r.round == 1));
    assert_eq!(sink.rounds().first().map(|r| r.latency_ms.contains_key(&Package)), Some(true));
}

#[tokio::test]
async fn test_concurrent_forks_propagate_stage_error() {
    let mut harness = Harness::new(&[VALID], &["通过"]);
    harness.config.concurrent_forks = true;
    harness.failing = Some(Package);
    let err = harness.build().run(input()).await.unwrap_err();
    assert!(matches!(err, PipelineError::Stage { slot: Package, .. }));
}

#[tokio::test]
async fn test_repackage_on_retry() {
    let mut harness = Harness::new(&[VALID], &["fail", "pass"]);
    harness.config.repackage_on_retry = true;
    harness.build().run(input()).await.unwrap();
    assert_eq!(harness.count(Package), 2);
}

#[tokio::test]
async fn test_tagged_classifier_swaps_in() {
    let harness = Harness::new(&[VALID], &["通过", "VERDICT: PASS"]);
    let output = harness
        .build()
        .with_classifier(TaggedClassifier)
        .run(input())
        .await
        .unwrap();
    assert_eq!(harness.count(Review), 2);
    assert!(output.outcome.review_passed);
}

#[test]
fn test_stage_set_requires_every_slot() {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let partial = vec![ScriptedStage::new(Identify, &[], &log)];
    assert!(matches!(
        StageSet::from_stages(partial),
        Err(PipelineError::Config(_))
    ));

    let doubled = vec![
        ScriptedStage::new(Identify, &[], &log),
        ScriptedStage::new(Identify, &[], &log),
    ];
    assert!(matches!(
        StageSet::from_stages(doubled),
        Err(PipelineError::Config(_))
    ));
}
