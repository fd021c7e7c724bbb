//! Handle on the benchmark source tree: fuzzer/benchmark discovery and the
//! git state that pins a launch to a known commit.

use anyhow::{anyhow, Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use fuzzmark_core::process;

pub const FUZZERS_DIR: &str = "fuzzers";
pub const BENCHMARKS_DIR: &str = "benchmarks";

#[derive(Debug, Clone)]
pub struct SourceTree {
    root: PathBuf,
}

impl SourceTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn fuzzers_dir(&self) -> PathBuf {
        self.root.join(FUZZERS_DIR)
    }

    pub fn benchmarks_dir(&self) -> PathBuf {
        self.root.join(BENCHMARKS_DIR)
    }

    pub fn has_fuzzer(&self, fuzzer: &str) -> bool {
        self.fuzzers_dir().join(fuzzer).is_dir()
    }

    pub fn fuzzer_names(&self) -> Result<Vec<String>> {
        list_directories(&self.fuzzers_dir())
    }

    pub fn benchmark_names(&self) -> Result<Vec<String>> {
        list_directories(&self.benchmarks_dir())
    }

    /// The shipped archive must match a commit; refuse to launch from a
    /// dirty tree.
    pub fn check_no_local_changes(&self) -> Result<()> {
        let diff = process::check_output("git", ["diff"], Some(&self.root))?;
        if !diff.trim().is_empty() {
            return Err(anyhow!(
                "local uncommitted changes found; commit or stash them before launching"
            ));
        }
        Ok(())
    }

    pub fn git_hash(&self) -> Result<String> {
        let output = process::check_output("git", ["rev-parse", "HEAD"], Some(&self.root))?;
        Ok(output.trim().to_string())
    }

    /// Fuzzers whose implementation directories changed since
    /// |base_commit|.
    pub fn fuzzers_changed_since(&self, base_commit: &str) -> Result<Vec<String>> {
        let output = process::check_output(
            "git",
            ["diff", "--name-only", base_commit],
            Some(&self.root),
        )
        .with_context(|| format!("failed to diff against \"{base_commit}\""))?;
        Ok(fuzzer_names_from_paths(&output))
    }
}

fn fuzzer_names_from_paths(diff_output: &str) -> Vec<String> {
    let prefix = format!("{FUZZERS_DIR}/");
    let mut names = BTreeSet::new();
    for line in diff_output.lines() {
        let Some(rest) = line.trim().strip_prefix(&prefix) else {
            continue;
        };
        if let Some((name, _)) = rest.split_once('/') {
            names.insert(name.to_string());
        }
    }
    names.into_iter().collect()
}

fn list_directories(parent: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let entries = fs::read_dir(parent)
        .with_context(|| format!("failed to list {}", parent.display()))?;
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_tree(tag: &str) -> SourceTree {
        let root = std::env::temp_dir().join(format!(
            "fuzzmark_tree_{}_{}_{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        fs::create_dir_all(&root).expect("root");
        SourceTree::new(root)
    }

    #[test]
    fn fuzzer_discovery_lists_directories_only() {
        let tree = test_tree("fuzzers");
        fs::create_dir_all(tree.fuzzers_dir().join("afl")).expect("afl");
        fs::create_dir_all(tree.fuzzers_dir().join("libfuzzer")).expect("libfuzzer");
        fs::write(tree.fuzzers_dir().join("README.md"), "not a fuzzer").expect("file");

        assert_eq!(tree.fuzzer_names().expect("names"), vec!["afl", "libfuzzer"]);
        assert!(tree.has_fuzzer("afl"));
        assert!(!tree.has_fuzzer("readme"));
        let _ = fs::remove_dir_all(tree.root());
    }

    #[test]
    fn changed_fuzzers_are_extracted_from_diff_paths() {
        let diff = "\
fuzzers/afl/fuzzer.py
fuzzers/afl/builder.Dockerfile
fuzzers/honggfuzz/fuzzer.py
benchmarks/zlib/build.sh
docs/index.md
fuzzers/stray_file
";
        assert_eq!(fuzzer_names_from_paths(diff), vec!["afl", "honggfuzz"]);
    }

    #[test]
    fn changed_fuzzers_empty_for_unrelated_paths() {
        assert!(fuzzer_names_from_paths("docs/a.md\nsrc/main.rs\n").is_empty());
    }
}
