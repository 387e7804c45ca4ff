use crate::error::{BotError, Result};
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error};

/// Checks that `ffmpeg` and `ffprobe` are on the PATH.
pub async fn check_installed() -> anyhow::Result<()> {
    for tool in ["ffmpeg", "ffprobe"] {
        let status = Command::new(tool)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| anyhow::anyhow!("{} is not available: {}", tool, e))?;
        if !status.success() {
            anyhow::bail!("{} -version exited with {}", tool, status);
        }
    }
    Ok(())
}

pub async fn run_ffmpeg<I, S>(args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-loglevel", "error", "-y"])
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| BotError::Encode(format!("cannot start ffmpeg: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("ffmpeg failed ({}): {}", output.status, stderr.trim());
        return Err(BotError::Encode(last_line(&stderr, "ffmpeg failed")));
    }
    Ok(())
}

pub async fn probe_duration(path: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args(["-v", "error", "-show_entries", "format=duration", "-of", "csv=p=0"])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| BotError::Encode(format!("cannot start ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BotError::Encode(last_line(&stderr, "ffprobe failed")));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let duration = parse_duration(&stdout).ok_or_else(|| {
        BotError::Encode(format!("no duration reported for {}", path.display()))
    })?;
    debug!("Probed {}: {:.2}s", path.display(), duration);
    Ok(duration)
}

fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .lines()
        .filter_map(|l| l.trim().parse::<f64>().ok())
        .find(|d| d.is_finite() && *d >= 0.0)
}

fn last_line(stderr: &str, fallback: &str) -> String {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or(fallback)
        .to_string()
}
