use anyhow::{bail, Context, Result};
use service_script::parse_script;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use svcgen_core::{
    CsvStatsSink, PipelineConfig, PipelineOrchestrator, PipelineOutput, ProgressEvent,
    ProgressHandle, RunInput, TaggedClassifier,
};
use svcgen_quality::{ScriptValidator, ValidatorConfig};
use svcgen_stages::{build_stage_set, ClientConfig, HttpChatClient, StageCatalog};
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tracing::{info, warn};

pub struct RunArgs {
    pub code: PathBuf,
    pub aux: Option<String>,
    pub aux_file: Option<PathBuf>,
    pub catalog: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub out_dir: PathBuf,
    pub stats: Option<PathBuf>,
    pub tagged_verdicts: bool,
}

pub async fn run(args: RunArgs) -> Result<()> {
    let code = read(&args.code)?;
    let aux = match (args.aux, args.aux_file) {
        (Some(text), _) => text,
        (None, Some(path)) => read(&path)?,
        (None, None) => String::new(),
    };

    let config = match &args.config {
        Some(path) => PipelineConfig::from_yaml(&read(path)?)?,
        None => PipelineConfig::from_env()?,
    };
    let catalog = match &args.catalog {
        Some(path) => StageCatalog::load(path)?,
        None => StageCatalog::embedded()?,
    };
    let client = Arc::new(HttpChatClient::new(ClientConfig::from_env())?);
    let stages = build_stage_set(&catalog, client)?;

    let progress = ProgressHandle::default();
    let mut orchestrator = PipelineOrchestrator::new(stages, config)
        .with_validator(ScriptValidator::new(&ValidatorConfig::from_env()))
        .with_progress(progress.clone());
    if args.tagged_verdicts {
        orchestrator = orchestrator.with_classifier(TaggedClassifier);
    }
    if let Some(path) = &args.stats {
        let sink = CsvStatsSink::append(path)
            .with_context(|| format!("failed to open stats file {}", path.display()))?;
        orchestrator = orchestrator.with_stats(Arc::new(sink));
    }

    let listener = tokio::spawn(log_progress(progress.subscribe()));
    let result = orchestrator.run(RunInput::new(code, aux)).await;
    // Closing every sender lets the listener drain and stop.
    drop(orchestrator);
    drop(progress);
    if let Err(e) = listener.await {
        warn!(error = %e, "progress listener stopped abnormally");
    }
    let output = result?;

    write_outputs(&args.out_dir, &output)?;
    println!(
        "run {} finished after {} round(s): review {}, syntax {}",
        output.run_id,
        output.rounds,
        if output.outcome.review_passed { "passed" } else { "not passed" },
        if output.outcome.syntax_valid { "valid" } else { "invalid" },
    );
    println!("outputs written to {}", args.out_dir.display());
    Ok(())
}

fn write_outputs(dir: &Path, output: &PipelineOutput) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    fs::write(dir.join("script.svc"), &output.script)?;
    fs::write(dir.join("plugin.txt"), &output.plugin_code)?;
    fs::write(dir.join("run.json"), serde_json::to_string_pretty(output)?)?;
    Ok(())
}

async fn log_progress(mut events: Receiver<ProgressEvent>) {
    loop {
        match events.recv().await {
            Ok(ProgressEvent::RoundAdvanced { round, reason, .. }) => {
                info!(round, reason = %reason, "starting new round")
            }
            Ok(ProgressEvent::BudgetExhausted { kind, attempts, .. }) => {
                warn!(kind = %kind, attempts, "keeping last candidate")
            }
            Ok(ProgressEvent::RunFinished { rounds, .. }) => {
                info!(rounds, "run finished");
                break;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "progress listener lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

pub fn check(path: &Path, tree: bool) -> Result<()> {
    let script = read(path)?;
    let validator = ScriptValidator::new(&ValidatorConfig::from_env());
    let (valid, report) = check_report(&script, tree, &validator)?;
    print!("{}", report);
    if !valid {
        bail!("{} is not a valid service script", path.display());
    }
    Ok(())
}

/// Validation report, optionally preceded by the parse tree.
pub fn check_report(script: &str, tree: bool, validator: &ScriptValidator) -> Result<(bool, String)> {
    let mut out = String::new();
    if tree {
        match parse_script(script) {
            Ok(parsed) => {
                out.push_str(&serde_json::to_string_pretty(&parsed)?);
                out.push('\n');
            }
            Err(e) => out.push_str(&format!("parse error: {}\n", e)),
        }
    }

    let result = validator.validate(script);
    if result.is_valid() {
        out.push_str(&format!("valid (engine: {:?})\n", result.engine()));
    } else {
        out.push_str(&result.report());
    }
    Ok((result.is_valid(), out))
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}
