use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory {}", path.display()))?;
    Ok(())
}

/// Removes |path| if it exists and creates it empty.
pub fn recreate_directory(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)
            .with_context(|| format!("failed to remove directory {}", path.display()))?;
    }
    ensure_dir(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "fuzzmark_fs_{}_{}_{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ))
    }

    #[test]
    fn recreate_directory_empties_existing_contents() {
        let dir = test_dir("recreate");
        ensure_dir(&dir).expect("create");
        fs::write(dir.join("stale"), "x").expect("write");

        recreate_directory(&dir).expect("recreate");
        assert!(dir.exists());
        assert!(!dir.join("stale").exists());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn recreate_directory_creates_missing_directory() {
        let dir = test_dir("fresh");
        assert!(!dir.exists());
        recreate_directory(&dir).expect("recreate");
        assert!(dir.exists());
        let _ = fs::remove_dir_all(dir);
    }
}
