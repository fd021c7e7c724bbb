use anyhow::{anyhow, Result};
use clap::{ArgGroup, Parser};
use std::env;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use fuzzmark_launcher::fuzzer::{self, FuzzerConfig};
use fuzzmark_launcher::source::SourceTree;
use fuzzmark_launcher::{stop, LaunchOptions};

/// Begin an experiment that evaluates fuzzers on one or more benchmarks.
#[derive(Parser)]
#[command(name = "fuzzmark", version)]
#[command(group(
    ArgGroup::new("fuzzer-selection").args(["fuzzers", "fuzzer_configs", "changed_fuzzers"])
))]
struct Cli {
    /// Benchmark names; all known benchmarks by default.
    #[arg(short, long, num_args = 1..)]
    benchmarks: Vec<String>,

    /// Path to the experiment configuration yaml file.
    #[arg(short = 'c', long)]
    experiment_config: PathBuf,

    /// Experiment name.
    #[arg(short, long)]
    experiment_name: String,

    /// Fuzzers to use; all known fuzzers by default.
    #[arg(short, long, num_args = 1..)]
    fuzzers: Vec<String>,

    /// Paths to fuzzer configuration yaml files.
    #[arg(long, num_args = 1..)]
    fuzzer_configs: Vec<PathBuf>,

    /// Use fuzzers whose implementations changed since this commit.
    #[arg(long, value_name = "COMMIT")]
    changed_fuzzers: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let tree = SourceTree::new(env::current_dir()?);

    let benchmarks = resolve_benchmarks(&cli, &tree)?;
    let fuzzer_configs = resolve_fuzzer_configs(&cli, &tree)?;

    let options = LaunchOptions {
        manual: env::var_os("MANUAL_EXPERIMENT").is_some(),
    };
    fuzzmark_launcher::start_experiment(
        &tree,
        &cli.experiment_name,
        &cli.experiment_config,
        &benchmarks,
        &fuzzer_configs,
        options,
    )?;
    if !options.manual {
        stop::stop_experiment(&cli.experiment_name, &cli.experiment_config)?;
    }
    Ok(())
}

fn resolve_benchmarks(cli: &Cli, tree: &SourceTree) -> Result<Vec<String>> {
    let known = tree.benchmark_names()?;
    if cli.benchmarks.is_empty() {
        return Ok(known);
    }
    for benchmark in &cli.benchmarks {
        if !known.contains(benchmark) {
            return Err(anyhow!("unknown benchmark \"{benchmark}\""));
        }
    }
    Ok(cli.benchmarks.clone())
}

fn resolve_fuzzer_configs(cli: &Cli, tree: &SourceTree) -> Result<Vec<FuzzerConfig>> {
    if !cli.fuzzer_configs.is_empty() {
        return cli.fuzzer_configs.iter().map(|p| FuzzerConfig::read(p)).collect();
    }

    let fuzzers = if let Some(base_commit) = &cli.changed_fuzzers {
        let changed = tree.fuzzers_changed_since(base_commit)?;
        if changed.is_empty() {
            return Err(anyhow!("no fuzzers changed since {base_commit}"));
        }
        changed
    } else if !cli.fuzzers.is_empty() {
        let known = tree.fuzzer_names()?;
        for fuzzer in &cli.fuzzers {
            if !known.contains(fuzzer) {
                return Err(anyhow!("unknown fuzzer \"{fuzzer}\""));
            }
        }
        cli.fuzzers.clone()
    } else {
        tree.fuzzer_names()?
    };
    Ok(fuzzer::configs_from_names(&fuzzers))
}
