//! Fuzzer variant configuration: validation, the full-name rule, and the
//! on-disk configuration set consumed by the dispatcher.

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::debug;

use fuzzmark_core::filesystem;

use crate::source::SourceTree;

// Fuzzer names become path and container-environment components.
const FUZZER_NAME_PATTERN: &str = "^[a-z0-9_]+$";

pub const FUZZER_CONFIGS_DIR: &str = "fuzzer-configs";

/// One fuzzer variant to benchmark. `name` distinguishes variants of the
/// same base fuzzer; `env` carries environment overrides for its runners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FuzzerConfig {
    pub fuzzer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Map<String, Value>>,
}

impl FuzzerConfig {
    pub fn for_fuzzer(fuzzer: &str) -> Self {
        Self {
            fuzzer: fuzzer.to_string(),
            name: None,
            env: None,
        }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).context("invalid fuzzer configuration")
    }

    pub fn read(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read fuzzer configuration {}", path.display()))?;
        let yaml: serde_yaml::Value = serde_yaml::from_str(&raw)
            .with_context(|| format!("fuzzer configuration {} is not valid yaml", path.display()))?;
        Self::from_value(serde_json::to_value(yaml)?)
            .with_context(|| format!("fuzzer configuration {} is invalid", path.display()))
    }

    /// `<fuzzer>` alone, or `<fuzzer>_<variant>` when a variant name is
    /// set. Doubles as the configuration's on-disk identifier.
    pub fn full_name(&self) -> String {
        match &self.name {
            Some(name) => format!("{}_{}", self.fuzzer, name),
            None => self.fuzzer.clone(),
        }
    }
}

fn fuzzer_name_regex() -> Regex {
    Regex::new(FUZZER_NAME_PATTERN).expect("failed to compile fuzzer name regex")
}

pub fn validate_fuzzer(fuzzer: &str, tree: &SourceTree) -> Result<()> {
    if !fuzzer_name_regex().is_match(fuzzer) {
        return Err(anyhow!(
            "fuzzer \"{fuzzer}\" may only contain lowercase letters, numbers, or underscores"
        ));
    }
    if !tree.has_fuzzer(fuzzer) {
        return Err(anyhow!("fuzzer \"{fuzzer}\" does not exist"));
    }
    Ok(())
}

pub fn validate_fuzzer_config(config: &FuzzerConfig, tree: &SourceTree) -> Result<()> {
    if let Some(name) = &config.name {
        if !fuzzer_name_regex().is_match(name) {
            return Err(anyhow!(
                "variant name \"{name}\" may only contain lowercase letters, numbers, or underscores"
            ));
        }
    }
    validate_fuzzer(&config.fuzzer, tree)
}

/// Materializes one minimal config per plain fuzzer name. An empty name
/// list yields an empty config list; callers that need at least one fuzzer
/// fail at write time.
pub fn configs_from_names(fuzzers: &[String]) -> Vec<FuzzerConfig> {
    fuzzers
        .iter()
        .map(|fuzzer| FuzzerConfig::for_fuzzer(fuzzer))
        .collect()
}

/// Validates each entry and writes it to a freshly recreated
/// `<config_dir>/fuzzer-configs/`, one YAML file per full name. Two
/// entries resolving to the same full name abort the launch instead of
/// overwriting each other.
pub fn write_fuzzer_configs(
    fuzzer_configs: &[FuzzerConfig],
    config_dir: &Path,
    tree: &SourceTree,
) -> Result<()> {
    if fuzzer_configs.is_empty() {
        return Err(anyhow!(
            "need to provide either a list of fuzzers or a list of fuzzer configs"
        ));
    }
    let fuzzer_config_dir = config_dir.join(FUZZER_CONFIGS_DIR);
    filesystem::recreate_directory(&fuzzer_config_dir)?;

    let mut written = BTreeSet::new();
    for config in fuzzer_configs {
        validate_fuzzer_config(config, tree)?;
        let full_name = config.full_name();
        if !written.insert(full_name.clone()) {
            return Err(anyhow!(
                "two fuzzer configurations resolve to the full name \"{full_name}\""
            ));
        }
        let path = fuzzer_config_dir.join(&full_name);
        debug!(fuzzer = %full_name, "writing fuzzer config");
        let text = serde_yaml::to_string(config)?;
        fs::write(&path, text)
            .with_context(|| format!("failed to write fuzzer config {}", path.display()))?;
    }
    Ok(())
}
