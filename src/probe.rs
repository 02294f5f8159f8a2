use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::EncoderConfig;

/// Outcome of the startup capability probe. Immutable for the process
/// lifetime; passed by reference to every job.
#[derive(Debug, Clone)]
pub struct EncoderCapability {
    pub available: bool,
    pub reason: String,
}

impl EncoderCapability {
    fn usable() -> Self {
        Self {
            available: true,
            reason: String::new(),
        }
    }

    fn unusable(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            reason: reason.into(),
        }
    }
}

/// Probe whether NVENC encoding is actually usable, not merely listed.
///
/// Two checks: the encoder listing must advertise h264_nvenc, and a tiny
/// synthetic encode must succeed, because a listed encoder can still fail
/// against an incompatible driver. Failure is encoded in the returned
/// capability, never as an error, so callers can pick a policy without
/// exception handling.
pub async fn probe(config: &EncoderConfig) -> EncoderCapability {
    let timeout = Duration::from_secs(config.probe_timeout_secs);

    let listing = match run_probe_command(
        &config.binary_path,
        &["-hide_banner", "-encoders"],
        timeout,
    )
    .await
    {
        Ok(output) => output,
        Err(reason) => {
            warn!("Encoder probe failed: {}", reason);
            return EncoderCapability::unusable(reason);
        }
    };

    if !listing.stdout.contains("h264_nvenc") {
        warn!("h264_nvenc not present in encoder listing");
        return EncoderCapability::unusable("h264_nvenc not present in encoder listing");
    }

    // Listing support does not guarantee a working driver; run a minimal
    // synthetic encode against the null muxer to find out.
    let test = run_probe_command(
        &config.binary_path,
        &[
            "-hide_banner",
            "-v",
            "error",
            "-f",
            "lavfi",
            "-i",
            "testsrc=size=64x64:rate=24",
            "-t",
            "0.1",
            "-c:v",
            "h264_nvenc",
            "-f",
            "null",
            "-",
        ],
        timeout,
    )
    .await;

    match test {
        Ok(output) if output.success => {
            info!("NVENC capability confirmed by test encode");
            EncoderCapability::usable()
        }
        Ok(output) => {
            let reason = classify_failure(&output.stderr);
            warn!("NVENC test encode failed: {}", reason);
            EncoderCapability::unusable(reason)
        }
        Err(reason) => {
            warn!("NVENC test encode could not run: {}", reason);
            EncoderCapability::unusable(reason)
        }
    }
}

struct ProbeOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

async fn run_probe_command(
    binary: &str,
    args: &[&str],
    timeout: Duration,
) -> std::result::Result<ProbeOutput, String> {
    let child = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();

    let output = tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| format!("{} probe timed out after {:?}", binary, timeout))?
        .map_err(|e| format!("Failed to execute {}: {}", binary, e))?;

    Ok(ProbeOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Map NVENC diagnostic text onto one of the known failure classes.
pub fn classify_failure(stderr: &str) -> String {
    let lower = stderr.to_lowercase();
    if lower.contains("minimum required nvidia driver")
        || lower.contains("driver does not support")
        || lower.contains("nvenc api version")
    {
        "nvidia driver/API version mismatch".to_string()
    } else if lower.contains("no capable devices")
        || lower.contains("no nvenc capable devices")
        || lower.contains("cannot load libcuda")
        || lower.contains("cuda_error_no_device")
    {
        "no NVENC-capable device found".to_string()
    } else {
        let tail: String = stderr.trim().lines().last().unwrap_or("").to_string();
        format!("NVENC test encode failed: {}", tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_driver_mismatch() {
        let stderr = "Driver does not support the required nvenc API version. \
                      Required: 12.0 Found: 11.1";
        assert_eq!(classify_failure(stderr), "nvidia driver/API version mismatch");

        let stderr = "The minimum required Nvidia driver for nvenc is 522.25 or newer";
        assert_eq!(classify_failure(stderr), "nvidia driver/API version mismatch");
    }

    #[test]
    fn test_classify_no_device() {
        assert_eq!(
            classify_failure("[h264_nvenc] No capable devices found"),
            "no NVENC-capable device found"
        );
        assert_eq!(
            classify_failure("Cannot load libcuda.so.1"),
            "no NVENC-capable device found"
        );
    }

    #[test]
    fn test_classify_unknown_keeps_tail() {
        let reason = classify_failure("line one\nsomething odd happened");
        assert!(reason.contains("something odd happened"));
    }
}
