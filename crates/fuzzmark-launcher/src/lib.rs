//! Launches a fuzzing-benchmark experiment: validates the experiment
//! configuration and fuzzer selection, stages configuration files, ships a
//! filtered source snapshot to the experiment filestore, and drives the
//! dispatcher lifecycle (create_async → bundle → start).

pub mod bundle;
pub mod config;
pub mod dispatcher;
pub mod fuzzer;
pub mod source;
pub mod stop;
pub mod validation;

use anyhow::{anyhow, Result};
use std::env;
use std::path::Path;
use tracing::info;

use fuzzmark_core::{filesystem, gcloud};

use config::ExperimentConfig;
use dispatcher::Dispatcher;
use fuzzer::FuzzerConfig;
use source::SourceTree;

pub const CONFIG_DIR: &str = "config";
pub const EXPERIMENT_CONFIG_FILE: &str = "experiment.yaml";

#[derive(Debug, Clone, Copy, Default)]
pub struct LaunchOptions {
    /// Skip automatic provisioning and start (resources still bundle);
    /// used when driving the dispatcher by hand for debugging.
    pub manual: bool,
}

/// Starts a fuzzer benchmarking experiment. Preconditions run in order and
/// abort the launch before any remote side effect: clean source tree,
/// valid experiment name, distinct benchmarks, valid config.
pub fn start_experiment(
    tree: &SourceTree,
    experiment_name: &str,
    config_path: &Path,
    benchmarks: &[String],
    fuzzer_configs: &[FuzzerConfig],
    options: LaunchOptions,
) -> Result<()> {
    tree.check_no_local_changes()?;
    validation::validate_experiment_name(experiment_name)?;
    validation::validate_benchmarks(benchmarks)?;

    let mut config = config::read_and_validate(config_path)?;
    config.stamp(benchmarks, experiment_name, &tree.git_hash()?);

    let config_dir = tree.root().join(CONFIG_DIR);
    filesystem::recreate_directory(&config_dir)?;
    config.write_yaml(&config_dir.join(EXPERIMENT_CONFIG_FILE))?;
    fuzzer::write_fuzzer_configs(fuzzer_configs, &config_dir, tree)?;

    if !config.local_experiment() {
        // Fail before provisioning if the dispatcher would be unable to
        // reach the database.
        if env::var_os("POSTGRES_PASSWORD").is_none() {
            return Err(anyhow!("POSTGRES_PASSWORD environment variable must be set"));
        }
        gcloud::set_default_project(config.cloud_project())?;
    }

    start_dispatcher(&config, &config_dir, tree, options)
}

// Resource bundling must not begin until the configuration files are fully
// written, and start() must not run until bundling has completed; the
// single controlling thread enforces both by sequencing.
fn start_dispatcher(
    config: &ExperimentConfig,
    config_dir: &Path,
    tree: &SourceTree,
    options: LaunchOptions,
) -> Result<()> {
    let mut dispatcher = Dispatcher::from_config(config);
    if !options.manual {
        dispatcher.create_async();
    }
    bundle::copy_resources_to_filestore(tree, config_dir, config)?;
    if options.manual {
        info!("manual experiment: resources staged, dispatcher not started");
        return Ok(());
    }
    dispatcher.start()
}
