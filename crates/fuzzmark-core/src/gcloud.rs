//! Thin wrappers over the gcloud CLI used to provision and reach the
//! dispatcher instance.

use anyhow::{anyhow, Result};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use crate::process;

/// Machine class for dispatcher instances.
const DISPATCHER_MACHINE_TYPE: &str = "n1-highmem-96";
const DISPATCHER_BOOT_DISK_SIZE: &str = "4096GB";
const INSTANCE_IMAGE_FAMILY: &str = "cos-stable";
const INSTANCE_IMAGE_PROJECT: &str = "cos-cloud";

// Connectivity policy for freshly created instances. The instance exists
// well before sshd accepts connections.
const SSH_ATTEMPTS: u32 = 10;
const SSH_RETRY_DELAY: Duration = Duration::from_secs(30);

pub fn create_instance(instance_name: &str, zone: &str) -> Result<()> {
    info!(instance_name, zone, "creating dispatcher instance");
    process::execute(
        "gcloud",
        [
            "compute".to_string(),
            "instances".to_string(),
            "create".to_string(),
            instance_name.to_string(),
            format!("--image-family={INSTANCE_IMAGE_FAMILY}"),
            format!("--image-project={INSTANCE_IMAGE_PROJECT}"),
            format!("--zone={zone}"),
            format!("--machine-type={DISPATCHER_MACHINE_TYPE}"),
            format!("--boot-disk-size={DISPATCHER_BOOT_DISK_SIZE}"),
            "--scopes=cloud-platform".to_string(),
        ],
    )
}

pub fn delete_instance(instance_name: &str, zone: &str) -> Result<()> {
    info!(instance_name, zone, "deleting dispatcher instance");
    process::execute(
        "gcloud",
        [
            "compute".to_string(),
            "instances".to_string(),
            "delete".to_string(),
            instance_name.to_string(),
            format!("--zone={zone}"),
            "--quiet".to_string(),
        ],
    )
}

/// Runs |command| on |instance_name| over a gcloud ssh session.
pub fn ssh(instance_name: &str, zone: &str, command: &str) -> Result<()> {
    let zone_flag = format!("--zone={zone}");
    let command_flag = format!("--command={command}");
    process::execute(
        "gcloud",
        [
            "compute",
            "ssh",
            instance_name,
            zone_flag.as_str(),
            command_flag.as_str(),
        ],
    )
}

/// Retries a trivial remote command until the instance accepts an ssh
/// connection or the retries run out.
pub fn robust_begin_ssh(instance_name: &str, zone: &str) -> Result<()> {
    for attempt in 1..=SSH_ATTEMPTS {
        match ssh(instance_name, zone, "true") {
            Ok(()) => return Ok(()),
            Err(err) => {
                warn!(%err, attempt, "dispatcher instance not reachable over ssh yet");
                thread::sleep(SSH_RETRY_DELAY);
            }
        }
    }
    Err(anyhow!(
        "instance \"{instance_name}\" did not accept an ssh connection after {SSH_ATTEMPTS} attempts"
    ))
}

pub fn set_default_project(cloud_project: &str) -> Result<()> {
    process::execute("gcloud", ["config", "set", "project", cloud_project])
}
