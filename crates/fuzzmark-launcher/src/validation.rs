use anyhow::{anyhow, Result};
use regex::Regex;
use std::collections::BTreeSet;

// Experiment names become cloud resource-name components, so the charset
// and length are capped accordingly.
const EXPERIMENT_NAME_PATTERN: &str = "^[a-z0-9-]{0,30}$";

pub fn validate_experiment_name(experiment_name: &str) -> Result<()> {
    let pattern = Regex::new(EXPERIMENT_NAME_PATTERN).expect("failed to compile name regex");
    if !pattern.is_match(experiment_name) {
        return Err(anyhow!(
            "experiment name \"{experiment_name}\" is invalid; must match {EXPERIMENT_NAME_PATTERN}"
        ));
    }
    Ok(())
}

pub fn validate_benchmarks(benchmarks: &[String]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for benchmark in benchmarks {
        if !seen.insert(benchmark.as_str()) {
            return Err(anyhow!(
                "benchmark \"{benchmark}\" is included more than once"
            ));
        }
    }
    Ok(())
}
