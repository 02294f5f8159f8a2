use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{EmbercastError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub encoder: EncoderConfig,
    pub fetch: FetchConfig,
    pub render: RenderConfig,
    pub progress: ProgressConfig,
    pub overlays: OverlayConfig,
    pub storage: StorageConfig,
    pub status: StatusConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Path to ffmpeg binary
    pub binary_path: String,
    /// Path to ffprobe binary (duration probe)
    pub probe_path: String,
    /// Policy when the GPU encoder is unusable
    pub gpu_policy: GpuPolicy,
    /// NVENC preset (p1 = fastest .. p7 = best quality)
    pub nvenc_preset: String,
    /// Constant quality target; -cq for NVENC, -crf for libx264
    pub quality: u8,
    /// Timeout for the capability probe commands
    pub probe_timeout_secs: u64,
}

/// What to do when the capability probe reports the GPU encoder unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GpuPolicy {
    /// Render with libx264 instead; slower, but jobs still complete
    CpuFallback,
    /// Fail every job immediately with the recorded probe reason
    FailFast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Concurrent image download workers
    pub image_workers: usize,
    /// Per-image download timeout
    pub image_timeout_secs: u64,
    /// Audio download timeout (single larger file, fetched sequentially)
    pub audio_timeout_secs: u64,
    /// Cap on failed indices included in the error payload
    pub max_reported_failures: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Target frame width
    pub width: u32,
    /// Target frame height
    pub height: u32,
    /// Target frame rate
    pub fps: u32,
    /// AAC bitrate for the muxed audio track
    pub audio_bitrate: String,
    /// Hard wall-clock timeout per transcode pass
    pub pass_timeout_secs: u64,
}

/// Slices of the unified 0-100 job progress scale. Slices must stay
/// contiguous and non-overlapping: pass 1 spans (download_end, pass1_end],
/// pass 2 spans (pass1_end, render_end], and a single no-effects pass spans
/// (download_end, render_end].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Minimum interval between forwarded status updates
    pub report_interval_secs: u64,
    /// Quiet period after which the encoder is flagged as stalled
    pub stall_timeout_secs: u64,
    pub download_start: u8,
    pub download_end: u8,
    pub pass1_end: u8,
    pub render_end: u8,
    pub upload_end: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Looping smoke texture, tinted and multiplied over the base video
    pub smoke_path: PathBuf,
    /// Looping embers texture, black-keyed and overlaid on top
    pub embers_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Bucket for rendered videos
    pub bucket: String,
    /// Upload timeout for the final video
    pub upload_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Timeout for each status update call
    pub report_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            encoder: EncoderConfig {
                binary_path: "ffmpeg".to_string(),
                probe_path: "ffprobe".to_string(),
                gpu_policy: GpuPolicy::CpuFallback,
                nvenc_preset: "p2".to_string(),
                quality: 24,
                probe_timeout_secs: 10,
            },
            fetch: FetchConfig {
                image_workers: 16,
                image_timeout_secs: 60,
                audio_timeout_secs: 300,
                max_reported_failures: 5,
            },
            render: RenderConfig {
                width: 1920,
                height: 1080,
                fps: 24,
                audio_bitrate: "192k".to_string(),
                pass_timeout_secs: 3600,
            },
            progress: ProgressConfig {
                report_interval_secs: 2,
                stall_timeout_secs: 30,
                download_start: 5,
                download_end: 25,
                pass1_end: 50,
                render_end: 85,
                upload_end: 99,
            },
            overlays: OverlayConfig {
                smoke_path: PathBuf::from("/app/overlays/smoke_gray.mp4"),
                embers_path: PathBuf::from("/app/overlays/embers.mp4"),
            },
            storage: StorageConfig {
                bucket: "generated-assets".to_string(),
                upload_timeout_secs: 600,
            },
            status: StatusConfig {
                report_timeout_secs: 30,
            },
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EmbercastError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| EmbercastError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| EmbercastError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| EmbercastError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }
}

impl OverlayConfig {
    /// Log overlay presence at startup. Absence is not fatal here; jobs that
    /// request effects are rejected per job during validation.
    pub fn check(&self) -> bool {
        let smoke_ok = self.log_one("smoke", &self.smoke_path);
        let embers_ok = self.log_one("embers", &self.embers_path);
        smoke_ok && embers_ok
    }

    fn log_one(&self, name: &str, path: &Path) -> bool {
        match std::fs::metadata(path) {
            Ok(meta) => {
                info!(
                    "Overlay {} present: {} ({:.1} KB)",
                    name,
                    path.display(),
                    meta.len() as f64 / 1024.0
                );
                true
            }
            Err(_) => {
                warn!("Overlay {} missing: {}", name, path.display());
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.encoder.nvenc_preset, "p2");
        assert_eq!(parsed.encoder.quality, 24);
        assert_eq!(parsed.fetch.image_workers, 16);
        assert_eq!(parsed.progress.pass1_end, 50);
    }

    #[test]
    fn test_gpu_policy_serde() {
        #[derive(Deserialize)]
        struct Wrap {
            v: GpuPolicy,
        }

        let parsed: Wrap = toml::from_str("v = \"fail-fast\"").unwrap();
        assert_eq!(parsed.v, GpuPolicy::FailFast);

        let parsed: Wrap = toml::from_str("v = \"cpu-fallback\"").unwrap();
        assert_eq!(parsed.v, GpuPolicy::CpuFallback);
    }
}
