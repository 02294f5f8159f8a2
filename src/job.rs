use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::OverlayConfig;
use crate::error::{JobError, JobResult};

/// Raw job payload as delivered by the invocation harness. All fields are
/// caller-supplied and untrusted until `validate` has run.
#[derive(Debug, Clone, Deserialize)]
pub struct RenderJob {
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub timings: Vec<ImageTiming>,
    pub audio_url: Option<String>,
    pub project_id: Option<String>,
    #[serde(default = "default_apply_effects")]
    pub apply_effects: bool,
    pub storage_url: Option<String>,
    pub storage_key: Option<String>,
    /// Correlation id for external status updates; absence disables
    /// reporting, it is not an error.
    pub render_job_id: Option<String>,
}

fn default_apply_effects() -> bool {
    true
}

/// Visible time span for one image on the output timeline.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ImageTiming {
    #[serde(rename = "startSeconds")]
    pub start_seconds: f64,
    #[serde(rename = "endSeconds")]
    pub end_seconds: f64,
}

impl ImageTiming {
    pub fn duration(&self) -> f64 {
        self.end_seconds - self.start_seconds
    }
}

/// Validated job with required fields resolved. Produced only by
/// `RenderJob::validate`.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub image_urls: Vec<String>,
    pub timings: Vec<ImageTiming>,
    pub audio_url: String,
    pub project_id: String,
    pub apply_effects: bool,
    pub storage_url: String,
    pub storage_key: String,
    pub render_job_id: Option<String>,
}

impl RenderJob {
    /// Validation gate. Runs before any network or subprocess cost is
    /// incurred; every rejection here is a `JobError::Validation`.
    pub fn validate(self, overlays: &OverlayConfig) -> JobResult<JobSpec> {
        if self.image_urls.is_empty() {
            return Err(JobError::Validation("No image URLs provided".to_string()));
        }
        let audio_url = self
            .audio_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| JobError::Validation("No audio URL provided".to_string()))?;
        let project_id = self
            .project_id
            .filter(|p| !p.is_empty())
            .ok_or_else(|| JobError::Validation("No project ID provided".to_string()))?;
        let (storage_url, storage_key) = match (self.storage_url, self.storage_key) {
            (Some(url), Some(key)) if !url.is_empty() && !key.is_empty() => (url, key),
            _ => {
                return Err(JobError::Validation(
                    "Storage credentials required".to_string(),
                ));
            }
        };
        if self.image_urls.len() != self.timings.len() {
            return Err(JobError::Validation(
                "Image URLs and timings count mismatch".to_string(),
            ));
        }
        for (i, timing) in self.timings.iter().enumerate() {
            if timing.duration() <= 0.0 {
                return Err(JobError::Validation(format!(
                    "Timing {} has non-positive duration ({} -> {})",
                    i, timing.start_seconds, timing.end_seconds
                )));
            }
        }
        if self.apply_effects
            && (!overlays.smoke_path.exists() || !overlays.embers_path.exists())
        {
            return Err(JobError::Validation(
                "Overlay files missing - cannot apply effects".to_string(),
            ));
        }

        Ok(JobSpec {
            image_urls: self.image_urls,
            timings: self.timings,
            audio_url,
            project_id,
            apply_effects: self.apply_effects,
            storage_url,
            storage_key,
            render_job_id: self.render_job_id,
        })
    }
}

/// Job lifecycle states. Owned exclusively by the orchestrator; transitions
/// are one-directional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Downloading,
    Rendering,
    Uploading,
    Complete,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Downloading => "downloading",
            JobStatus::Rendering => "rendering",
            JobStatus::Uploading => "uploading",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Handler result: exactly one of the two shapes, never both.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JobOutput {
    Success {
        video_url: String,
        render_time_seconds: f64,
    },
    Failure {
        error: String,
    },
}

impl JobOutput {
    pub fn failure(error: impl fmt::Display) -> Self {
        JobOutput::Failure {
            error: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutput::Success { .. })
    }
}
