use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::info;

use crate::config::Config;
use crate::error::{JobError, JobResult};
use crate::progress::{PassMonitor, PassWindow, ProgressTx};
use super::commands::MediaCommand;
use super::TranscoderTrait;

/// ffmpeg-backed transcode pipeline. Holds the encoder choice resolved at
/// startup from the capability probe and the configured GPU policy.
pub struct FfmpegTranscoder {
    config: Config,
    use_nvenc: bool,
}

impl FfmpegTranscoder {
    pub fn new(config: Config, use_nvenc: bool) -> Self {
        Self { config, use_nvenc }
    }

    fn encoder_name(&self) -> &'static str {
        if self.use_nvenc { "h264_nvenc (GPU)" } else { "libx264 (CPU)" }
    }

    fn encoder_args(&self) -> Vec<String> {
        let encoder = &self.config.encoder;
        if self.use_nvenc {
            vec![
                "-c:v".to_string(),
                "h264_nvenc".to_string(),
                "-preset".to_string(),
                encoder.nvenc_preset.clone(),
                "-cq".to_string(),
                encoder.quality.to_string(),
            ]
        } else {
            vec![
                "-c:v".to_string(),
                "libx264".to_string(),
                "-preset".to_string(),
                "fast".to_string(),
                "-crf".to_string(),
                encoder.quality.to_string(),
            ]
        }
    }

    /// Letterbox to the target resolution, preserving aspect ratio, at the
    /// fixed target frame rate.
    fn scale_filter(&self) -> String {
        let render = &self.config.render;
        format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,\
             pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:black,setsar=1,fps={fps}",
            w = render.width,
            h = render.height,
            fps = render.fps
        )
    }

    /// Smoke is tinted and multiplied over the base video; embers have their
    /// black background keyed out and are overlaid on top, trimmed to the
    /// shortest input so the looping overlays cannot run away.
    fn effects_filter(&self) -> String {
        "[1:v]colorchannelmixer=.3:.4:.3:0:.3:.4:.3:0:.3:.4:.3:0[smoke];\
         [0:v][smoke]blend=all_mode=multiply[with_smoke];\
         [2:v]colorkey=0x000000:0.2:0.2[embers];\
         [with_smoke][embers]overlay=shortest=1[out]"
            .to_string()
    }

    fn concat_render_command(&self, concat: &Path, output: &Path) -> MediaCommand {
        MediaCommand::new(&self.config.encoder.binary_path, "Base render pass")
            .overwrite()
            .hide_banner()
            .arg("-f")
            .arg("concat")
            .arg("-safe")
            .arg("0")
            .input(concat)
            .video_filter(self.scale_filter())
            .args(self.encoder_args())
            .pixel_format("yuv420p")
            .output(output)
    }

    fn single_pass_command(&self, concat: &Path, audio: &Path, output: &Path) -> MediaCommand {
        MediaCommand::new(&self.config.encoder.binary_path, "Render pass")
            .overwrite()
            .hide_banner()
            .arg("-f")
            .arg("concat")
            .arg("-safe")
            .arg("0")
            .input(concat)
            .input(audio)
            .video_filter(self.scale_filter())
            .args(self.encoder_args())
            .pixel_format("yuv420p")
            .audio_codec("aac")
            .audio_bitrate(self.config.render.audio_bitrate.clone())
            .shortest()
            .output(output)
    }

    fn effects_command(&self, base: &Path, audio: &Path, output: &Path) -> MediaCommand {
        let overlays = &self.config.overlays;
        MediaCommand::new(&self.config.encoder.binary_path, "Effects pass")
            .overwrite()
            .hide_banner()
            .input(base)
            .looping_input(&overlays.smoke_path)
            .looping_input(&overlays.embers_path)
            .input(audio)
            .filter_complex(self.effects_filter())
            .map("[out]")
            .map("3:a")
            .args(self.encoder_args())
            .pixel_format("yuv420p")
            .audio_codec("aac")
            .audio_bitrate(self.config.render.audio_bitrate.clone())
            .shortest()
            .output(output)
    }

    fn pass_timeout(&self) -> Duration {
        Duration::from_secs(self.config.render.pass_timeout_secs)
    }

    fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.config.progress.stall_timeout_secs)
    }

    async fn run_pass(
        &self,
        command: MediaCommand,
        window: PassWindow,
        total_secs: f64,
        tx: &ProgressTx,
    ) -> JobResult<()> {
        info!("{} ({})", command.description(), self.encoder_name());
        let monitor = PassMonitor::new(window, total_secs, tx.clone(), self.stall_timeout());
        command
            .execute_with_output(self.pass_timeout(), |line| monitor.observe_line(line))
            .await?;
        monitor.finish();
        Ok(())
    }
}

#[async_trait]
impl TranscoderTrait for FfmpegTranscoder {
    /// Total stream duration via a one-off ffprobe call; the denominator for
    /// every stage percentage of this job.
    async fn audio_duration(&self, path: &Path) -> JobResult<f64> {
        let output = Command::new(&self.config.encoder.probe_path)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| JobError::Transcode {
                stage: "Duration probe".to_string(),
                detail: format!("Failed to execute ffprobe: {}", e),
            })?;

        if !output.status.success() {
            return Err(JobError::Transcode {
                stage: "Duration probe".to_string(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let duration: f64 = String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .map_err(|_| JobError::Transcode {
                stage: "Duration probe".to_string(),
                detail: "Unparseable duration in ffprobe output".to_string(),
            })?;

        if duration <= 0.0 {
            return Err(JobError::Transcode {
                stage: "Duration probe".to_string(),
                detail: format!("Non-positive stream duration: {}", duration),
            });
        }
        Ok(duration)
    }

    async fn render(
        &self,
        concat: &Path,
        audio: &Path,
        output: &Path,
        apply_effects: bool,
        total_secs: f64,
        tx: ProgressTx,
    ) -> JobResult<()> {
        let plan = &self.config.progress;

        if apply_effects {
            // Two passes: a base render and an overlay composite. Bounds
            // peak filter-graph complexity at the cost of one intermediate
            // file, which stays owned by this invocation alone.
            let base = output.with_file_name("base_render.mp4");

            self.run_pass(
                self.concat_render_command(concat, &base),
                PassWindow {
                    start: plan.download_end,
                    end: plan.pass1_end,
                },
                total_secs,
                &tx,
            )
            .await?;

            let result = self
                .run_pass(
                    self.effects_command(&base, audio, output),
                    PassWindow {
                        start: plan.pass1_end,
                        end: plan.render_end,
                    },
                    total_secs,
                    &tx,
                )
                .await;

            // The intermediate goes away whether the composite succeeded or not
            let _ = tokio::fs::remove_file(&base).await;
            result?;
        } else {
            self.run_pass(
                self.single_pass_command(concat, audio, output),
                PassWindow {
                    start: plan.download_end,
                    end: plan.render_end,
                },
                total_secs,
                &tx,
            )
            .await?;
        }

        if let Ok(meta) = tokio::fs::metadata(output).await {
            info!(
                "Render complete: {} ({:.1} MB)",
                output.display(),
                meta.len() as f64 / 1024.0 / 1024.0
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn transcoder(use_nvenc: bool) -> FfmpegTranscoder {
        FfmpegTranscoder::new(Config::default(), use_nvenc)
    }

    #[test]
    fn test_encoder_args_nvenc() {
        let args = transcoder(true).encoder_args();
        assert_eq!(args, vec!["-c:v", "h264_nvenc", "-preset", "p2", "-cq", "24"]);
    }

    #[test]
    fn test_encoder_args_cpu_fallback() {
        let args = transcoder(false).encoder_args();
        assert_eq!(args, vec!["-c:v", "libx264", "-preset", "fast", "-crf", "24"]);
    }

    #[test]
    fn test_scale_filter_letterboxes_to_target() {
        let filter = transcoder(true).scale_filter();
        assert!(filter.contains("scale=1920:1080:force_original_aspect_ratio=decrease"));
        assert!(filter.contains("pad=1920:1080"));
        assert!(filter.contains("fps=24"));
    }

    #[test]
    fn test_single_pass_muxes_audio_and_trims() {
        let t = transcoder(false);
        let args = t
            .single_pass_command(
                &PathBuf::from("/w/timeline.txt"),
                &PathBuf::from("/w/audio.wav"),
                &PathBuf::from("/w/out.mp4"),
            )
            .build_args();
        assert!(args.contains(&"/w/audio.wav".to_string()));
        assert!(args.contains(&"aac".to_string()));
        assert!(args.contains(&"-shortest".to_string()));
        // No-effects renders must never reference overlay assets
        assert!(!args.iter().any(|a| a.contains("smoke") || a.contains("embers")));
        assert!(!args.contains(&"-stream_loop".to_string()));
    }

    #[test]
    fn test_base_pass_has_no_audio() {
        let t = transcoder(true);
        let args = t
            .concat_render_command(
                &PathBuf::from("/w/timeline.txt"),
                &PathBuf::from("/w/base_render.mp4"),
            )
            .build_args();
        assert!(!args.contains(&"aac".to_string()));
        assert!(!args.contains(&"-shortest".to_string()));
        assert!(args.contains(&"concat".to_string()));
    }

    #[tokio::test]
    async fn test_failing_first_pass_skips_composite() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let stub = dir.path().join("encoder_stub.sh");
        let calls = dir.path().join("calls.log");
        let script = format!(
            "#!/bin/sh\n\
             echo run >> \"{log}\"\n\
             i=0\n\
             while [ $i -lt 80 ]; do\n\
             \techo \"frame drop diagnostic padding line $i\" 1>&2\n\
             \ti=$((i+1))\n\
             done\n\
             exit 1\n",
            log = calls.display()
        );
        std::fs::write(&stub, script).unwrap();
        std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = Config::default();
        config.encoder.binary_path = stub.to_string_lossy().to_string();
        let t = FfmpegTranscoder::new(config, false);

        let concat = dir.path().join("timeline.txt");
        let audio = dir.path().join("audio.wav");
        let output = dir.path().join("output.mp4");
        std::fs::write(&concat, "file 'x.png'\n").unwrap();
        std::fs::write(&audio, b"riff").unwrap();

        let (tx, _rx) = crate::progress::channel();
        let err = t
            .render(&concat, &audio, &output, true, 10.0, tx)
            .await
            .unwrap_err();

        match err {
            JobError::Transcode { stage, detail } => {
                assert_eq!(stage, "Base render pass");
                assert!(!detail.is_empty());
                assert!(detail.chars().count() <= 500);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // The encoder ran exactly once: the composite pass never started
        assert_eq!(std::fs::read_to_string(&calls).unwrap().lines().count(), 1);
        assert!(!output.exists());
    }

    #[test]
    fn test_effects_pass_composites_overlays() {
        let t = transcoder(true);
        let args = t
            .effects_command(
                &PathBuf::from("/w/base_render.mp4"),
                &PathBuf::from("/w/audio.wav"),
                &PathBuf::from("/w/out.mp4"),
            )
            .build_args();
        assert!(args.contains(&"-stream_loop".to_string()));
        assert!(args.contains(&"[out]".to_string()));
        assert!(args.contains(&"3:a".to_string()));
        let graph = args
            .iter()
            .find(|a| a.contains("colorchannelmixer"))
            .expect("filter graph present");
        assert!(graph.contains("blend=all_mode=multiply"));
        assert!(graph.contains("colorkey=0x000000:0.2:0.2"));
        assert!(graph.contains("overlay=shortest=1"));
    }
}
