use indicatif::ProgressBar;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::{Config, GpuPolicy};
use crate::error::{JobError, JobResult};
use crate::fetch::AssetFetcher;
use crate::job::{JobOutput, JobSpec, JobStatus, RenderJob};
use crate::media::{TranscoderTrait, create_transcoder};
use crate::probe::EncoderCapability;
use crate::progress::{self, spawn_consumer};
use crate::report::{RestStatusSink, StatusSink, StatusUpdate};
use crate::timeline::TimelineScript;
use crate::upload::BlobUploader;

/// Drives one render job through its full lifecycle: validate, fetch,
/// transcode, upload. Owns the status transitions; every job ends in
/// exactly one of complete or failed.
pub struct Workflow {
    config: Config,
    capability: EncoderCapability,
    client: reqwest::Client,
    transcoder: Option<Arc<dyn TranscoderTrait>>,
}

impl Workflow {
    pub fn new(config: Config, capability: EncoderCapability) -> Self {
        Self {
            config,
            capability,
            client: reqwest::Client::new(),
            transcoder: None,
        }
    }

    #[cfg(test)]
    fn with_transcoder(mut self, transcoder: Arc<dyn TranscoderTrait>) -> Self {
        self.transcoder = Some(transcoder);
        self
    }

    /// Run one job to completion. Never returns an error: every failure is
    /// folded into the `{error}` output shape after a best-effort terminal
    /// status update.
    pub async fn run_job(&self, job: RenderJob, bar: Option<ProgressBar>) -> JobOutput {
        let started = Instant::now();

        // Rejected payloads produce no status update: without validated
        // storage credentials there is nowhere to report to.
        let spec = match job.validate(&self.config.overlays) {
            Ok(spec) => spec,
            Err(e) => {
                warn!("Job rejected: {}", e);
                return JobOutput::failure(e);
            }
        };

        // Correlation id for log lines; the external id when present, a
        // fresh one otherwise so concurrent invocations stay separable.
        let job_ref = spec
            .render_job_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        info!(
            "Starting render {}: project={} images={} effects={}",
            job_ref,
            spec.project_id,
            spec.image_urls.len(),
            spec.apply_effects
        );

        let sink: Arc<dyn StatusSink> = Arc::new(RestStatusSink::new(
            self.client.clone(),
            spec.storage_url.clone(),
            spec.storage_key.clone(),
            spec.render_job_id.clone(),
            &self.config.status,
        ));

        match self.execute(&spec, Arc::clone(&sink), bar).await {
            Ok(video_url) => {
                let elapsed = started.elapsed().as_secs_f64();
                info!("Render {} complete in {:.1}s: {}", job_ref, elapsed, video_url);
                sink.report(StatusUpdate::complete(
                    video_url.clone(),
                    format!("Render complete in {:.1}s", elapsed),
                ))
                .await;
                JobOutput::Success {
                    video_url,
                    render_time_seconds: elapsed,
                }
            }
            Err(e) => {
                error!("Render {} failed: {}", job_ref, e);
                sink.report(StatusUpdate::failed(e.to_string())).await;
                JobOutput::failure(e)
            }
        }
    }

    /// Pick the encoder for this job from the probe outcome and policy.
    /// Returns whether to use the GPU encoder.
    fn resolve_encoder(&self) -> JobResult<bool> {
        if self.capability.available {
            return Ok(true);
        }
        match self.config.encoder.gpu_policy {
            GpuPolicy::CpuFallback => {
                warn!(
                    "GPU encoder unusable ({}), falling back to libx264",
                    self.capability.reason
                );
                Ok(false)
            }
            GpuPolicy::FailFast => Err(JobError::Capability(self.capability.reason.clone())),
        }
    }

    async fn execute(
        &self,
        spec: &JobSpec,
        sink: Arc<dyn StatusSink>,
        bar: Option<ProgressBar>,
    ) -> JobResult<String> {
        let plan = &self.config.progress;
        let use_nvenc = self.resolve_encoder()?;

        // Per-job scratch space, removed on drop even when the job fails
        let work = tempfile::tempdir()
            .map_err(|e| JobError::Acquisition(format!("Failed to create workspace: {}", e)))?;

        sink.report(StatusUpdate::snapshot(
            JobStatus::Downloading,
            plan.download_start,
            "Downloading assets",
        ))
        .await;

        let fetcher = AssetFetcher::new(self.client.clone(), self.config.fetch.clone());
        let (paths, failed) = fetcher.fetch_images(&spec.image_urls, work.path()).await;
        if !failed.is_empty() {
            return Err(fetcher.acquisition_error(&failed));
        }
        let images: Vec<PathBuf> = paths.into_iter().flatten().collect();
        let audio = fetcher.fetch_audio(&spec.audio_url, work.path()).await?;

        let concat = work.path().join("timeline.txt");
        TimelineScript::build(&images, &spec.timings)
            .write_to(&concat)
            .await
            .map_err(|e| JobError::Acquisition(format!("Failed to write timeline: {}", e)))?;

        let transcoder = match &self.transcoder {
            Some(transcoder) => Arc::clone(transcoder),
            None => create_transcoder(&self.config, use_nvenc),
        };
        let total_secs = transcoder.audio_duration(&audio).await?;
        info!("Audio duration: {:.1}s", total_secs);

        sink.report(StatusUpdate::snapshot(
            JobStatus::Rendering,
            plan.download_end,
            "Rendering video",
        ))
        .await;

        let (tx, rx) = progress::channel();
        let consumer = spawn_consumer(
            rx,
            Arc::clone(&sink),
            Duration::from_secs(plan.report_interval_secs),
            bar,
        );

        let output = work.path().join("output.mp4");
        let rendered = transcoder
            .render(&concat, &audio, &output, spec.apply_effects, total_secs, tx)
            .await;

        // All senders are gone once render returns; drain the consumer
        // before deciding the verdict so late samples are not lost.
        let _ = consumer.await;
        rendered?;

        sink.report(StatusUpdate::snapshot(
            JobStatus::Uploading,
            plan.render_end,
            "Uploading video",
        ))
        .await;

        let uploader = BlobUploader::new(
            self.client.clone(),
            spec.storage_url.clone(),
            spec.storage_key.clone(),
            &self.config.storage,
        );
        let storage_path = format!("{}/video.mp4", spec.project_id);
        let video_url = uploader.upload_video(&output, &storage_path).await?;

        sink.report(StatusUpdate::snapshot(
            JobStatus::Uploading,
            plan.upload_end,
            "Finalizing",
        ))
        .await;

        Ok(video_url)
    }
}
