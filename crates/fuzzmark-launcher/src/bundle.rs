//! Packages the inputs the dispatcher needs: a filtered snapshot of the
//! source tree and the generated configuration directory, both placed
//! under `<experiment_filestore>/<experiment>/input`.

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use regex::RegexSet;
use std::env;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

use fuzzmark_core::filestore;

use crate::config::ExperimentConfig;
use crate::source::SourceTree;

pub const SOURCE_ARCHIVE_NAME: &str = "src.tar.gz";

// Paths never shipped to the dispatcher: version-control metadata, build
// and tool caches, bytecode, editor backups, test fixtures, a generated
// build file, and documentation. Directory entries match with a trailing
// '/'.
const EXCLUDED_SOURCE_PATTERNS: &[&str] = &[
    r"^\.git/",
    r"^\.venv/",
    r"^target/",
    r"^__pycache__/",
    r"\.pyc$",
    r"~$",
    r"#[^/]*#$",
    r"\.pytest_cache/",
    r"/test_data/",
    r"^third_party/oss-fuzz/build/",
    r"^docker/generated\.mk$",
    r"^docs/",
];

fn source_filter() -> RegexSet {
    RegexSet::new(EXCLUDED_SOURCE_PATTERNS).expect("failed to compile source filter patterns")
}

/// Name an entry carries inside the archive; directories get a trailing
/// '/' so directory patterns can anchor on it.
fn entry_name(rel: &Path, is_dir: bool) -> String {
    let mut name = rel.to_string_lossy().replace('\\', "/");
    if is_dir && !name.is_empty() {
        name.push('/');
    }
    name
}

// Removes the staged archive no matter how bundling exits, so repeated
// failed launches cannot fill the disk.
struct StagedArchive {
    path: PathBuf,
}

impl Drop for StagedArchive {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Uploads the filtered source snapshot and the configuration directory.
/// Must run only after all configuration files are fully written; any
/// upload failure propagates.
pub fn copy_resources_to_filestore(
    tree: &SourceTree,
    config_dir: &Path,
    config: &ExperimentConfig,
) -> Result<()> {
    let base_destination = format!(
        "{}/{}/input",
        config.experiment_filestore(),
        config.experiment()
    );

    let archive_path = env::temp_dir().join(format!(
        "fuzzmark-{}-{SOURCE_ARCHIVE_NAME}",
        std::process::id()
    ));
    let staged = StagedArchive {
        path: archive_path.clone(),
    };
    write_source_archive(tree.root(), &archive_path)?;
    info!(archive = %archive_path.display(), destination = %base_destination, "uploading source snapshot");
    filestore::cp(
        &archive_path.to_string_lossy(),
        &format!("{base_destination}/{SOURCE_ARCHIVE_NAME}"),
        true,
    )?;
    drop(staged);

    let config_destination = format!("{base_destination}/config");
    info!(destination = %config_destination, "syncing configuration directory");
    filestore::rsync(&config_dir.to_string_lossy(), &config_destination, true)
}

fn write_source_archive(root: &Path, archive_path: &Path) -> Result<()> {
    let filter = source_filter();
    let file = File::create(archive_path)
        .with_context(|| format!("failed to create archive {}", archive_path.display()))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut archive = tar::Builder::new(encoder);

    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if rel.as_os_str().is_empty() {
            return true;
        }
        !filter.is_match(&entry_name(rel, entry.file_type().is_dir()))
    });
    for entry in walker {
        let entry = entry?;
        let rel = entry.path().strip_prefix(root)?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        if entry.file_type().is_dir() {
            archive.append_dir(rel, entry.path())?;
        } else if entry.file_type().is_file() {
            archive.append_path_with_name(entry.path(), rel)?;
        }
    }
    archive.into_inner()?.finish()?;
    Ok(())
}
