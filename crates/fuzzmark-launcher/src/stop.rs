use anyhow::Result;
use std::path::Path;
use tracing::info;

use fuzzmark_core::gcloud;

use crate::config;
use crate::dispatcher::dispatcher_instance_name;

/// Issues the stop request for |experiment_name| once the dispatcher has
/// run: cloud experiments tear down their dispatcher instance; local
/// containers run with --rm and need no teardown.
pub fn stop_experiment(experiment_name: &str, config_path: &Path) -> Result<()> {
    let config = config::read_and_validate(config_path)?;
    if config.local_experiment() {
        return Ok(());
    }
    let instance_name = dispatcher_instance_name(experiment_name);
    info!(instance_name = %instance_name, "stopping experiment");
    gcloud::delete_instance(&instance_name, config.cloud_compute_zone())
}
