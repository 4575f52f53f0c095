//! Shell command helpers for readout sources

use anyhow::{bail, Context};
use std::time::Duration;
use tokio::process::Command;

/// Run a shell command and return its trimmed stdout.
///
/// The command is passed to `sh -c`, so pipelines and redirections work.
/// A non-zero exit status or a timeout is an error; the caller (usually a
/// readout source) decides what to do with it.
pub async fn sh(cmd: &str, timeout: Duration) -> anyhow::Result<String> {
    let (stdout, _) = sh_with_stderr(cmd, timeout).await?;
    Ok(stdout)
}

/// Like [`sh`], but also returns trimmed stderr.
pub async fn sh_with_stderr(cmd: &str, timeout: Duration) -> anyhow::Result<(String, String)> {
    let output = tokio::time::timeout(
        timeout,
        Command::new("sh").arg("-c").arg(cmd).output(),
    )
    .await
    .with_context(|| format!("command timed out after {timeout:?}: {cmd}"))?
    .with_context(|| format!("failed to spawn: {cmd}"))?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    if !output.status.success() {
        bail!("command failed with {}: {cmd}\n{stderr}", output.status);
    }
    Ok((stdout, stderr))
}
