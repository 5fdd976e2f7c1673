//! Pipeline configuration from YAML or the environment.
use crate::budget::RetryBudget;
use crate::error::PipelineError;
use serde::{Deserialize, Serialize};

const DEFAULT_RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Generate/Combine/Review attempts before the last candidate is kept
    pub functional_retries: u32,
    /// Validation attempts before the last candidate is kept
    pub syntax_retries: u32,
    /// Run the packaging fork alongside the generation fork
    pub concurrent_forks: bool,
    /// Re-run packaging after each upstream regeneration. Ignored when
    /// `concurrent_forks` is set.
    pub repackage_on_retry: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            functional_retries: DEFAULT_RETRIES,
            syntax_retries: DEFAULT_RETRIES,
            concurrent_forks: false,
            repackage_on_retry: false,
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, PipelineError> {
        serde_yaml::from_str(yaml).map_err(|e| PipelineError::Config(e.to_string()))
    }

    pub fn from_env() -> Result<Self, PipelineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. `SVCGEN_MAX_RETRIES` sets both budgets;
    /// the per-loop variables override it.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(n) = parse_u32(&lookup, "SVCGEN_MAX_RETRIES")? {
            config.functional_retries = n;
            config.syntax_retries = n;
        }
        if let Some(n) = parse_u32(&lookup, "SVCGEN_FUNCTIONAL_RETRIES")? {
            config.functional_retries = n;
        }
        if let Some(n) = parse_u32(&lookup, "SVCGEN_SYNTAX_RETRIES")? {
            config.syntax_retries = n;
        }
        if let Some(b) = parse_bool(&lookup, "SVCGEN_CONCURRENT_FORKS")? {
            config.concurrent_forks = b;
        }
        if let Some(b) = parse_bool(&lookup, "SVCGEN_REPACKAGE_ON_RETRY")? {
            config.repackage_on_retry = b;
        }
        Ok(config)
    }

    pub fn budget(&self) -> RetryBudget {
        RetryBudget::new(self.functional_retries, self.syntax_retries)
    }
}

fn parse_u32<F>(lookup: &F, key: &str) -> Result<Option<u32>, PipelineError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| {
            v.trim()
                .parse::<u32>()
                .map_err(|_| PipelineError::Config(format!("{} must be a non-negative integer, got '{}'", key, v)))
        })
        .transpose()
}

fn parse_bool<F>(lookup: &F, key: &str) -> Result<Option<bool>, PipelineError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(PipelineError::Config(format!("{} must be a boolean, got '{}'", key, v))),
        })
        .transpose()
}
