//! Copy/sync primitives over the experiment filestore, which is either a
//! posix directory tree (local experiments) or a gs:// bucket. Bucket
//! traffic goes through gsutil; local traffic stays in-process.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::filesystem::ensure_dir;
use crate::process;

fn is_gcs_path(path: &str) -> bool {
    path.starts_with("gs://")
}

/// Copies the file |source| to |destination|. A trailing '/' on
/// |destination| means "into this directory", mirroring gsutil cp.
pub fn cp(source: &str, destination: &str, parallel: bool) -> Result<()> {
    if is_gcs_path(source) || is_gcs_path(destination) {
        let mut args: Vec<String> = Vec::new();
        if parallel {
            args.push("-m".to_string());
        }
        args.extend(["cp".to_string(), source.to_string(), destination.to_string()]);
        return process::execute("gsutil", &args);
    }

    let target = local_destination(source, destination)?;
    if let Some(parent) = target.parent() {
        ensure_dir(parent)?;
    }
    fs::copy(source, &target)
        .with_context(|| format!("failed to copy {} to {}", source, target.display()))?;
    Ok(())
}

/// Mirrors the directory |source| into |destination| recursively.
pub fn rsync(source: &str, destination: &str, parallel: bool) -> Result<()> {
    if is_gcs_path(source) || is_gcs_path(destination) {
        let mut args: Vec<String> = Vec::new();
        if parallel {
            args.push("-m".to_string());
        }
        args.extend([
            "rsync".to_string(),
            "-d".to_string(),
            "-r".to_string(),
            source.to_string(),
            destination.to_string(),
        ]);
        return process::execute("gsutil", &args);
    }
    copy_dir(Path::new(source), Path::new(destination))
}

fn local_destination(source: &str, destination: &str) -> Result<PathBuf> {
    if !destination.ends_with('/') {
        return Ok(PathBuf::from(destination));
    }
    let file_name = Path::new(source)
        .file_name()
        .ok_or_else(|| anyhow!("source \"{source}\" has no file name"))?;
    Ok(Path::new(destination).join(file_name))
}

fn copy_dir(source: &Path, destination: &Path) -> Result<()> {
    for entry in WalkDir::new(source) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(source)?;
        if rel.as_os_str().is_empty() {
            ensure_dir(destination)?;
            continue;
        }
        let target = destination.join(rel);
        if entry.file_type().is_dir() {
            ensure_dir(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                ensure_dir(parent)?;
            }
            fs::copy(entry.path(), &target).with_context(|| {
                format!("failed to copy {} to {}", entry.path().display(), target.display())
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "fuzzmark_store_{}_{}_{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        fs::create_dir_all(&dir).expect("test dir");
        dir
    }

    #[test]
    fn cp_into_directory_keeps_file_name() {
        let dir = test_dir("cp_dir");
        let src = dir.join("archive.tar.gz");
        fs::write(&src, "bytes").expect("write");
        let dst_dir = dir.join("input");

        cp(
            &src.to_string_lossy(),
            &format!("{}/", dst_dir.to_string_lossy()),
            true,
        )
        .expect("cp");
        assert_eq!(
            fs::read_to_string(dst_dir.join("archive.tar.gz")).expect("read"),
            "bytes"
        );
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn cp_to_explicit_path_renames() {
        let dir = test_dir("cp_path");
        let src = dir.join("a");
        fs::write(&src, "x").expect("write");
        let dst = dir.join("out").join("b");

        cp(&src.to_string_lossy(), &dst.to_string_lossy(), false).expect("cp");
        assert_eq!(fs::read_to_string(dst).expect("read"), "x");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn rsync_mirrors_directory_tree() {
        let dir = test_dir("rsync");
        let src = dir.join("config");
        fs::create_dir_all(src.join("fuzzer-configs")).expect("mkdir");
        fs::write(src.join("experiment.yaml"), "experiment: test").expect("write");
        fs::write(src.join("fuzzer-configs").join("afl"), "fuzzer: afl").expect("write");
        let dst = dir.join("remote").join("config");

        rsync(&src.to_string_lossy(), &dst.to_string_lossy(), true).expect("rsync");
        assert!(dst.join("experiment.yaml").exists());
        assert!(dst.join("fuzzer-configs").join("afl").exists());
        let _ = fs::remove_dir_all(dir);
    }
}
