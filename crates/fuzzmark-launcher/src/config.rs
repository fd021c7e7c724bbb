//! Experiment configuration: a key/value document read once from a
//! user-supplied YAML file, validated, stamped with derived fields, and
//! serialized to the experiment-scoped copy the dispatcher consumes.

use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::error;

const INT_PARAMS: &[&str] = &["trials", "max_total_time"];
const FILESTORE_PARAMS: &[&str] = &["experiment_filestore", "report_filestore"];
const CLOUD_PARAMS: &[&str] = &["cloud_compute_zone"];

// Old names of the filestore params. Configs still carrying them predate
// the rename and need updating, not silent acceptance.
const RENAMED_PARAMS: &[&str] = &["cloud_experiment_bucket", "cloud_web_bucket"];

/// All problems found in one validation pass, so a config can be fixed in
/// a single round-trip.
#[derive(Debug, Error)]
#[error("experiment config is invalid:\n{}", .problems.join("\n"))]
pub struct ValidationError {
    pub problems: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ExperimentConfig {
    doc: Map<String, Value>,
}

/// Reads |config_path|, finds as many problems as possible, and returns
/// the validated config.
pub fn read_and_validate(config_path: &Path) -> Result<ExperimentConfig> {
    let raw = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read experiment config {}", config_path.display()))?;
    let yaml: serde_yaml::Value = serde_yaml::from_str(&raw)
        .with_context(|| format!("experiment config {} is not valid yaml", config_path.display()))?;
    let config = ExperimentConfig::from_value(serde_json::to_value(yaml)?)
        .with_context(|| format!("experiment config {} is invalid", config_path.display()))?;
    validate(&config.doc)?;
    Ok(config)
}

fn validate(doc: &Map<String, Value>) -> Result<(), ValidationError> {
    let mut problems = Vec::new();
    let local_experiment = doc
        .get("local_experiment")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    for renamed in RENAMED_PARAMS {
        if doc.contains_key(*renamed) {
            problems.push(format!(
                "\"{renamed}\" is no longer valid; use \"experiment_filestore\" and \"report_filestore\""
            ));
        }
    }

    let mut required: Vec<&str> = Vec::new();
    required.extend(INT_PARAMS);
    required.extend(FILESTORE_PARAMS);
    if !local_experiment {
        required.extend(CLOUD_PARAMS);
    }

    for param in required {
        let Some(value) = doc.get(param) else {
            problems.push(format!("config does not contain \"{param}\""));
            continue;
        };

        if INT_PARAMS.contains(&param) {
            if !(value.is_i64() || value.is_u64()) {
                problems.push(format!(
                    "config parameter \"{param}\" is \"{value}\"; it must be an int"
                ));
            }
            continue;
        }

        let text = match value.as_str() {
            Some(s) if s == s.to_lowercase() => s,
            _ => {
                problems.push(format!(
                    "config parameter \"{param}\" is \"{value}\"; it must be a lowercase string"
                ));
                continue;
            }
        };

        if !FILESTORE_PARAMS.contains(&param) {
            continue;
        }
        if local_experiment && !text.starts_with('/') {
            problems.push(format!(
                "config parameter \"{param}\" is \"{text}\"; local experiments only support posix paths as filestores"
            ));
        } else if !local_experiment && !text.starts_with("gs://") {
            problems.push(format!(
                "config parameter \"{param}\" is \"{text}\"; it must start with gs:// when running on cloud"
            ));
        }
    }

    if problems.is_empty() {
        return Ok(());
    }
    for problem in &problems {
        error!("{problem}");
    }
    Err(ValidationError { problems })
}

impl ExperimentConfig {
    /// Wraps a raw document without validating it; `read_and_validate` is
    /// the gate for user input.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(doc) = value else {
            return Err(anyhow!("experiment config must be a key/value mapping"));
        };
        Ok(Self { doc })
    }

    pub fn local_experiment(&self) -> bool {
        self.doc
            .get("local_experiment")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    // String accessors below rely on validation; absent keys read as "".
    fn str_param(&self, key: &str) -> &str {
        self.doc.get(key).and_then(Value::as_str).unwrap_or("")
    }

    pub fn experiment(&self) -> &str {
        self.str_param("experiment")
    }

    pub fn experiment_filestore(&self) -> &str {
        self.str_param("experiment_filestore")
    }

    pub fn report_filestore(&self) -> &str {
        self.str_param("report_filestore")
    }

    pub fn cloud_compute_zone(&self) -> &str {
        self.str_param("cloud_compute_zone")
    }

    pub fn cloud_project(&self) -> &str {
        self.str_param("cloud_project")
    }

    pub fn cloud_sql_instance_connection_name(&self) -> &str {
        self.str_param("cloud_sql_instance_connection_name")
    }

    /// Injects the fields derived at launch time. Called exactly once,
    /// before the experiment-scoped copy is written.
    pub fn stamp(&mut self, benchmarks: &[String], experiment_name: &str, git_hash: &str) {
        self.doc
            .insert("benchmarks".to_string(), Value::String(benchmarks.join(",")));
        self.doc.insert(
            "experiment".to_string(),
            Value::String(experiment_name.to_string()),
        );
        self.doc
            .insert("git_hash".to_string(), Value::String(git_hash.to_string()));
    }

    pub fn write_yaml(&self, path: &Path) -> Result<()> {
        let text = serde_yaml::to_string(&Value::Object(self.doc.clone()))?;
        fs::write(path, text)
            .with_context(|| format!("failed to write experiment config {}", path.display()))?;
        Ok(())
    }
}
