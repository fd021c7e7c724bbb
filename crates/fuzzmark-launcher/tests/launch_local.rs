//! End-to-end launch of a local experiment in manual mode: everything is
//! staged and bundled into the filestore, the dispatcher container is left
//! for the operator to start.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::Command;

use flate2::read::GzDecoder;

use fuzzmark_launcher::fuzzer::FuzzerConfig;
use fuzzmark_launcher::source::SourceTree;
use fuzzmark_launcher::{LaunchOptions, CONFIG_DIR, EXPERIMENT_CONFIG_FILE};

fn test_root(tag: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!(
        "fuzzmark_launch_{}_{}_{}",
        tag,
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    fs::create_dir_all(&root).expect("test root");
    root
}

fn git(root: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args([
            "-c",
            "user.name=fuzzmark-test",
            "-c",
            "user.email=fuzzmark-test@localhost",
        ])
        .args(args)
        .current_dir(root)
        .output()
        .expect("run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, contents).expect("write");
}

/// A committed source tree with one fuzzer, one benchmark, and a local
/// experiment config pointing at filestores inside the tree's sibling dir.
fn scratch_repo(tag: &str) -> (PathBuf, PathBuf) {
    let root = test_root(tag);
    write(&root, "fuzzers/afl/fuzzer.py", "def build(): pass\n");
    write(&root, "benchmarks/zlib/build.sh", "#!/bin/bash\n");
    write(&root, "docs/guide.md", "# guide\n");

    let filestore_root = root.join("filestores");
    let config_text = format!(
        concat!(
            "trials: 2\n",
            "max_total_time: 3600\n",
            "local_experiment: true\n",
            "experiment_filestore: {}/data\n",
            "report_filestore: {}/reports\n",
            "cloud_project: fuzzmark-local\n",
        ),
        filestore_root.display(),
        filestore_root.display()
    );
    write(&root, "experiment-config.yaml", &config_text);

    git(&root, &["init", "-q"]);
    git(&root, &["add", "."]);
    git(&root, &["commit", "-q", "-m", "seed"]);
    (root, filestore_root)
}

fn archive_entries(archive_path: &Path) -> Vec<String> {
    let file = File::open(archive_path).expect("open archive");
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive
        .entries()
        .expect("entries")
        .map(|entry| {
            entry
                .expect("entry")
                .path()
                .expect("path")
                .to_string_lossy()
                .into_owned()
        })
        .collect()
}

#[test]
fn manual_local_launch_stages_config_and_bundles_resources() {
    let (root, filestore_root) = scratch_repo("ok");
    let tree = SourceTree::new(&root);
    let expected_hash = git(&root, &["rev-parse", "HEAD"]).trim().to_string();

    fuzzmark_launcher::start_experiment(
        &tree,
        "test-exp",
        &root.join("experiment-config.yaml"),
        &["zlib".to_string()],
        &[FuzzerConfig::for_fuzzer("afl")],
        LaunchOptions { manual: true },
    )
    .expect("launch");

    // Experiment-scoped config carries the derived fields.
    let staged_config =
        fs::read_to_string(root.join(CONFIG_DIR).join(EXPERIMENT_CONFIG_FILE)).expect("config");
    assert!(staged_config.contains(&format!("git_hash: {expected_hash}")));
    assert!(staged_config.contains("experiment: test-exp"));
    assert!(staged_config.contains("benchmarks: zlib"));

    // Exactly one fuzzer config, named by full fuzzer name.
    let fuzzer_config_files: Vec<_> = fs::read_dir(root.join(CONFIG_DIR).join("fuzzer-configs"))
        .expect("fuzzer-configs")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(fuzzer_config_files, vec!["afl"]);

    // Filestore layout: <filestore>/<experiment>/input/{src.tar.gz,config/}.
    let input = filestore_root.join("data").join("test-exp").join("input");
    let entries = archive_entries(&input.join("src.tar.gz"));
    assert!(entries.contains(&"fuzzers/afl/fuzzer.py".to_string()));
    assert!(entries.contains(&"benchmarks/zlib/build.sh".to_string()));
    assert!(!entries.iter().any(|e| e.starts_with(".git")));
    assert!(!entries.iter().any(|e| e.starts_with("docs")));
    assert!(input.join("config").join(EXPERIMENT_CONFIG_FILE).exists());
    assert!(input.join("config").join("fuzzer-configs").join("afl").exists());

    let _ = fs::remove_dir_all(root);
}

#[test]
fn uncommitted_changes_abort_the_launch() {
    let (root, _) = scratch_repo("dirty");
    write(&root, "fuzzers/afl/fuzzer.py", "def build(): return 1\n");
    let tree = SourceTree::new(&root);

    let err = fuzzmark_launcher::start_experiment(
        &tree,
        "test-exp",
        &root.join("experiment-config.yaml"),
        &["zlib".to_string()],
        &[FuzzerConfig::for_fuzzer("afl")],
        LaunchOptions { manual: true },
    )
    .expect_err("dirty tree");
    assert!(err.to_string().contains("uncommitted"));
    assert!(!root.join(CONFIG_DIR).exists(), "no staging before preconditions pass");

    let _ = fs::remove_dir_all(root);
}

#[test]
fn invalid_experiment_name_aborts_before_any_staging() {
    let (root, _) = scratch_repo("name");
    let tree = SourceTree::new(&root);

    let err = fuzzmark_launcher::start_experiment(
        &tree,
        "Invalid_Name",
        &root.join("experiment-config.yaml"),
        &["zlib".to_string()],
        &[FuzzerConfig::for_fuzzer("afl")],
        LaunchOptions { manual: true },
    )
    .expect_err("bad name");
    assert!(err.to_string().contains("Invalid_Name"));
    assert!(!root.join(CONFIG_DIR).exists());

    let _ = fs::remove_dir_all(root);
}
