//! Stage catalog: per-slot model, prompts and instruction template.
//!
//! The built-in catalog and its prompt files are compiled into the binary.
//! A custom catalog is a YAML file whose prompt files sit next to it.

use crate::prompt::Example;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use svcgen_core::{StageError, StageSlot};

static DEFAULT_CATALOG: &str = include_str!("../catalog/default.yaml");

static EMBEDDED_PROMPTS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("identify.txt", include_str!("../prompts/identify.txt")),
        ("encapsulate.txt", include_str!("../prompts/encapsulate.txt")),
        ("package.txt", include_str!("../prompts/package.txt")),
        ("generate.txt", include_str!("../prompts/generate.txt")),
        ("combine.txt", include_str!("../prompts/combine.txt")),
        ("review.txt", include_str!("../prompts/review.txt")),
        ("generate-examples.json", include_str!("../prompts/generate-examples.json")),
        ("review-examples.json", include_str!("../prompts/review-examples.json")),
    ])
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    /// Display name
    pub name: String,
    pub model: String,
    /// System prompt file name
    pub system_prompt: String,
    /// Few-shot examples file name (JSON)
    #[serde(default)]
    pub examples: Option<String>,
    /// Handlebars instruction template
    pub template: String,
    /// Render a pending regeneration directive into the prompt
    #[serde(default)]
    pub uses_feedback: bool,
}

#[derive(Debug, Clone)]
enum PromptSource {
    Embedded,
    Dir(PathBuf),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogFile {
    version: String,
    stages: BTreeMap<StageSlot, StageSpec>,
}

/// Stage spec with its prompt files loaded.
#[derive(Debug, Clone)]
pub struct ResolvedStage {
    pub slot: StageSlot,
    pub spec: StageSpec,
    pub system_prompt: String,
    pub examples: Vec<Example>,
}

#[derive(Debug, Clone)]
pub struct StageCatalog {
    pub version: String,
    stages: BTreeMap<StageSlot, StageSpec>,
    source: PromptSource,
}

impl StageCatalog {
    /// The built-in catalog.
    pub fn embedded() -> Result<Self, StageError> {
        Self::parse(DEFAULT_CATALOG, PromptSource::Embedded)
    }

    /// Load a catalog file; prompt files resolve relative to its directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StageError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| StageError::Config(format!("failed to read catalog {}: {}", path.display(), e)))?;
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::parse(&content, PromptSource::Dir(dir))
    }

    fn parse(yaml: &str, source: PromptSource) -> Result<Self, StageError> {
        let file: CatalogFile = serde_yaml::from_str(yaml)
            .map_err(|e| StageError::Config(format!("invalid stage catalog: {}", e)))?;
        if let Some(slot) = StageSlot::ALL.iter().find(|s| !file.stages.contains_key(*s)) {
            return Err(StageError::Config(format!("stage catalog has no entry for {}", slot)));
        }
        Ok(Self {
            version: file.version,
            stages: file.stages,
            source,
        })
    }

    pub fn spec(&self, slot: StageSlot) -> Option<&StageSpec> {
        self.stages.get(&slot)
    }

    /// Load the prompt and examples for one slot.
    pub fn resolve(&self, slot: StageSlot) -> Result<ResolvedStage, StageError> {
        let spec = self
            .spec(slot)
            .ok_or_else(|| StageError::Config(format!("stage catalog has no entry for {}", slot)))?
            .clone();
        let system_prompt = self.read(&spec.system_prompt)?;
        let examples = match &spec.examples {
            Some(name) => serde_json::from_str(&self.read(name)?)
                .map_err(|e| StageError::Config(format!("invalid examples file {}: {}", name, e)))?,
            None => Vec::new(),
        };
        Ok(ResolvedStage {
            slot,
            spec,
            system_prompt,
            examples,
        })
    }

    fn read(&self, name: &str) -> Result<String, StageError> {
        match &self.source {
            PromptSource::Embedded => EMBEDDED_PROMPTS
                .get(name)
                .map(|s| s.to_string())
                .ok_or_else(|| StageError::Config(format!("no embedded prompt named {}", name))),
            PromptSource::Dir(dir) => {
                let path = dir.join(name);
                std::fs::read_to_string(&path)
                    .map_err(|e| StageError::Config(format!("failed to read {}: {}", path.display(), e)))
            }
        }
    }
}
