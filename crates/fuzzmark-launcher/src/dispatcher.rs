//! The dispatcher owns the execution environment for the experiment
//! driver: a local docker container, or a cloud instance reached over ssh.
//! Lifecycle: construct, create_async (cloud provisioning runs on a
//! background worker), then start once resources are in the filestore.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::Path;
use std::thread::{self, JoinHandle};
use tracing::info;

use fuzzmark_core::{filesystem, gcloud, process};

use crate::config::ExperimentConfig;

pub const DISPATCHER_CONTAINER_NAME: &str = "dispatcher-container";

// Entry command for the local dispatcher container: pull the experiment
// input tree, unpack the source snapshot, and hand off to the driver
// startup script; drop into a shell on driver failure for debugging.
const LOCAL_DISPATCHER_COMMAND: &str = concat!(
    "rsync -r \"${EXPERIMENT_FILESTORE}/${EXPERIMENT}/input/\" \"${WORK}\" && ",
    "mkdir \"${WORK}/src\" && ",
    "tar -xzf \"${WORK}/src.tar.gz\" -C \"${WORK}/src\" && ",
    "\"${WORK}/src/dispatcher/startup.sh\" || ",
    "/bin/bash"
);

// The cloud image bakes the equivalent startup flow into the image itself.
const CLOUD_DISPATCHER_COMMAND: &str = "/work/startup-dispatcher.sh";

pub fn dispatcher_instance_name(experiment: &str) -> String {
    format!("d-{experiment}")
}

fn base_docker_tag(cloud_project: &str) -> String {
    format!("gcr.io/{cloud_project}")
}

fn dispatcher_image(cloud_project: &str) -> String {
    format!("{}/dispatcher-image", base_docker_tag(cloud_project))
}

pub enum Dispatcher<'a> {
    Local(LocalDispatcher<'a>),
    Cloud(CloudDispatcher<'a>),
}

impl<'a> Dispatcher<'a> {
    /// Dispatcher factory: `local_experiment` selects the backend.
    pub fn from_config(config: &'a ExperimentConfig) -> Self {
        if config.local_experiment() {
            Dispatcher::Local(LocalDispatcher::new(config))
        } else {
            Dispatcher::Cloud(CloudDispatcher::new(config))
        }
    }

    /// Begins provisioning without blocking the caller. A no-op for local
    /// experiments, where the container is created at start time.
    pub fn create_async(&mut self) {
        match self {
            Dispatcher::Local(_) => {}
            Dispatcher::Cloud(cloud) => cloud.create_async(),
        }
    }

    /// Blocks until the experiment driver has been launched inside the
    /// provisioned environment.
    pub fn start(&mut self) -> Result<()> {
        match self {
            Dispatcher::Local(local) => local.start(),
            Dispatcher::Cloud(cloud) => cloud.start(),
        }
    }

    pub fn instance_name(&self) -> &str {
        match self {
            Dispatcher::Local(local) => &local.instance_name,
            Dispatcher::Cloud(cloud) => &cloud.instance_name,
        }
    }
}

pub struct LocalDispatcher<'a> {
    config: &'a ExperimentConfig,
    instance_name: String,
}

impl<'a> LocalDispatcher<'a> {
    fn new(config: &'a ExperimentConfig) -> Self {
        let instance_name = dispatcher_instance_name(config.experiment());
        Self {
            config,
            instance_name,
        }
    }

    pub fn start(&self) -> Result<()> {
        let filestore = Path::new(self.config.experiment_filestore());
        filesystem::ensure_dir(filestore)?;
        let sql_database_url = format!("sqlite:///{}", filestore.join("local.db").display());
        info!(instance_name = %self.instance_name, "starting local dispatcher container");
        process::execute("docker", &self.container_args(&sql_database_url))
    }

    // The argument vector handed to docker; separate from start() so tests
    // can assert on the exact mounts and environment.
    fn container_args(&self, sql_database_url: &str) -> Vec<String> {
        let experiment_filestore = self.config.experiment_filestore();
        let report_filestore = self.config.report_filestore();
        vec![
            "run".to_string(),
            "-ti".to_string(),
            "--rm".to_string(),
            // The driver launches sibling containers through the host
            // docker daemon.
            "-v".to_string(),
            "/var/run/docker.sock:/var/run/docker.sock".to_string(),
            "-v".to_string(),
            format!("{experiment_filestore}:{experiment_filestore}"),
            "-v".to_string(),
            format!("{report_filestore}:{report_filestore}"),
            "-e".to_string(),
            format!("INSTANCE_NAME={}", self.instance_name),
            "-e".to_string(),
            format!("EXPERIMENT={}", self.config.experiment()),
            "-e".to_string(),
            format!("CLOUD_PROJECT={}", self.config.cloud_project()),
            "-e".to_string(),
            format!("SQL_DATABASE_URL={sql_database_url}"),
            "-e".to_string(),
            format!("EXPERIMENT_FILESTORE={experiment_filestore}"),
            "-e".to_string(),
            format!("REPORT_FILESTORE={report_filestore}"),
            "-e".to_string(),
            "LOCAL_EXPERIMENT=True".to_string(),
            "--cap-add=SYS_PTRACE".to_string(),
            "--cap-add=SYS_NICE".to_string(),
            format!("--name={DISPATCHER_CONTAINER_NAME}"),
            dispatcher_image(self.config.cloud_project()),
            "/bin/bash".to_string(),
            "-c".to_string(),
            LOCAL_DISPATCHER_COMMAND.to_string(),
        ]
    }
}

pub struct CloudDispatcher<'a> {
    config: &'a ExperimentConfig,
    instance_name: String,
    provisioning: Option<JoinHandle<Result<()>>>,
}

impl<'a> CloudDispatcher<'a> {
    fn new(config: &'a ExperimentConfig) -> Self {
        let instance_name = dispatcher_instance_name(config.experiment());
        Self {
            config,
            instance_name,
            provisioning: None,
        }
    }

    /// Starts instance provisioning on a background worker; the handle is
    /// joined at the top of start(). The worker owns nothing the main path
    /// reads in between.
    pub fn create_async(&mut self) {
        let instance_name = self.instance_name.clone();
        let zone = self.config.cloud_compute_zone().to_string();
        self.provisioning = Some(thread::spawn(move || {
            gcloud::create_instance(&instance_name, &zone)
        }));
    }

    pub fn start(&mut self) -> Result<()> {
        if let Some(worker) = self.provisioning.take() {
            worker
                .join()
                .map_err(|_| anyhow!("dispatcher provisioning worker panicked"))??;
        }
        let zone = self.config.cloud_compute_zone();
        gcloud::robust_begin_ssh(&self.instance_name, zone)?;

        let postgres_password = env::var("POSTGRES_PASSWORD")
            .context("POSTGRES_PASSWORD must be set for cloud experiments")?;
        // Yama ptrace scoping blocks the driver's process introspection;
        // everything after it is shell-quoted argv, so config values and
        // the database password cannot break out of their arguments.
        let command = format!(
            "echo 0 | sudo tee /proc/sys/kernel/yama/ptrace_scope && {}",
            process::shell_join(&self.container_args(&postgres_password))
        );
        info!(instance_name = %self.instance_name, "starting dispatcher on cloud instance");
        gcloud::ssh(&self.instance_name, zone, &command)
    }

    fn container_args(&self, postgres_password: &str) -> Vec<String> {
        vec![
            "docker".to_string(),
            "run".to_string(),
            "--rm".to_string(),
            "-e".to_string(),
            format!("INSTANCE_NAME={}", self.instance_name),
            "-e".to_string(),
            format!("EXPERIMENT={}", self.config.experiment()),
            "-e".to_string(),
            format!("CLOUD_PROJECT={}", self.config.cloud_project()),
            "-e".to_string(),
            format!("EXPERIMENT_FILESTORE={}", self.config.experiment_filestore()),
            "-e".to_string(),
            format!("POSTGRES_PASSWORD={postgres_password}"),
            "-e".to_string(),
            format!(
                "CLOUD_SQL_INSTANCE_CONNECTION_NAME={}",
                self.config.cloud_sql_instance_connection_name()
            ),
            "--cap-add=SYS_PTRACE".to_string(),
            "--cap-add=SYS_NICE".to_string(),
            "-v".to_string(),
            "/var/run/docker.sock:/var/run/docker.sock".to_string(),
            format!("--name={DISPATCHER_CONTAINER_NAME}"),
            dispatcher_image(self.config.cloud_project()),
            CLOUD_DISPATCHER_COMMAND.to_string(),
        ]
    }
}
