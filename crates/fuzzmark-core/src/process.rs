use anyhow::{anyhow, Context, Result};
use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Runs |program| with |args|, streaming output to the caller's terminal.
/// Fails if the process cannot be spawned or exits non-zero.
pub fn execute<I, S>(program: &str, args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
    debug!(program, ?args, "executing");
    let status = Command::new(program)
        .args(&args)
        .status()
        .with_context(|| format!("failed to spawn {program}"))?;
    if !status.success() {
        return Err(anyhow!("{program} exited with {status}"));
    }
    Ok(())
}

/// Runs |program| with |args| in |dir| and returns its captured stdout.
pub fn check_output<I, S>(program: &str, args: I, dir: Option<&Path>) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
    debug!(program, ?args, "capturing output");
    let mut command = Command::new(program);
    command.args(&args);
    if let Some(dir) = dir {
        command.current_dir(dir);
    }
    let output = command
        .output()
        .with_context(|| format!("failed to spawn {program}"))?;
    if !output.status.success() {
        return Err(anyhow!(
            "{program} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub fn shell_join(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| shell_quote(p))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:=".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}
