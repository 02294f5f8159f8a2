pub mod commands;
pub mod transcode;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::error::JobResult;
use crate::progress::ProgressTx;

pub use commands::MediaCommand;
pub use transcode::FfmpegTranscoder;

/// Transcode seam for the orchestrator. One implementation drives ffmpeg;
/// tests substitute their own.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranscoderTrait: Send + Sync {
    /// Duration of the audio track in seconds.
    async fn audio_duration(&self, path: &Path) -> JobResult<f64>;

    /// Render the timeline described by `concat` into `output`, muxing
    /// `audio` and optionally compositing the overlay effects. Progress
    /// events stream out through `tx` while passes run.
    async fn render(
        &self,
        concat: &Path,
        audio: &Path,
        output: &Path,
        apply_effects: bool,
        total_secs: f64,
        tx: ProgressTx,
    ) -> JobResult<()>;
}

pub fn create_transcoder(config: &Config, use_nvenc: bool) -> Arc<dyn TranscoderTrait> {
    Arc::new(FfmpegTranscoder::new(config.clone(), use_nvenc))
}
