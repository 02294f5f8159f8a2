use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::StatusConfig;
use crate::job::JobStatus;

/// One full status snapshot. Updates are fire-and-forget and at-most-once;
/// the external store tolerates duplicates because each update replaces the
/// whole row, never a delta.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub video_url: Option<String>,
    pub error: Option<String>,
}

impl StatusUpdate {
    pub fn snapshot(status: JobStatus, progress: u8, message: impl Into<String>) -> Self {
        Self {
            status,
            progress,
            message: message.into(),
            video_url: None,
            error: None,
        }
    }

    pub fn complete(video_url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Complete,
            progress: 100,
            message: message.into(),
            video_url: Some(video_url.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            progress: 0,
            message: "Render failed".to_string(),
            video_url: None,
            error: Some(error.into()),
        }
    }

    fn to_body(&self) -> serde_json::Value {
        let mut body = json!({
            "status": self.status,
            "progress": self.progress,
            "message": self.message,
            "updated_at": Utc::now().to_rfc3339(),
        });
        if let Some(url) = &self.video_url {
            body["video_url"] = json!(url);
        }
        if let Some(error) = &self.error {
            body["error"] = json!(error);
        }
        body
    }
}

/// Sink for job lifecycle updates. Implementations must never raise: a lost
/// update is logged and swallowed, because losing a progress report must
/// never abort the render itself.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Push one snapshot. Returns whether the update was accepted.
    async fn report(&self, update: StatusUpdate) -> bool;
}

/// REST implementation: partial-update call keyed by job id against the
/// external tracking store.
pub struct RestStatusSink {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    job_id: Option<String>,
    timeout: Duration,
}

impl RestStatusSink {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        job_id: Option<String>,
        config: &StatusConfig,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            job_id,
            timeout: Duration::from_secs(config.report_timeout_secs),
        }
    }
}

#[async_trait]
impl StatusSink for RestStatusSink {
    async fn report(&self, update: StatusUpdate) -> bool {
        let Some(job_id) = &self.job_id else {
            debug!("No render job id provided, skipping status update");
            return false;
        };

        info!(
            "Updating render job {}: {} ({}%)",
            job_id, update.status, update.progress
        );

        let url = format!("{}/rest/v1/render_jobs?id=eq.{}", self.base_url, job_id);
        let result = self
            .client
            .patch(&url)
            .timeout(self.timeout)
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
            .header("Prefer", "return=minimal")
            .json(&update.to_body())
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(
                    "Failed to update job status: HTTP {} for job {}",
                    response.status(),
                    job_id
                );
                false
            }
            Err(e) => {
                warn!("Error updating job status for {}: {}", job_id, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_includes_optionals_only_when_set() {
        let update = StatusUpdate::snapshot(JobStatus::Rendering, 42, "Rendering video");
        let body = update.to_body();
        assert_eq!(body["status"], "rendering");
        assert_eq!(body["progress"], 42);
        assert!(body.get("video_url").is_none());
        assert!(body.get("error").is_none());
        assert!(body.get("updated_at").is_some());

        let body = StatusUpdate::complete("http://v/x.mp4", "done").to_body();
        assert_eq!(body["status"], "complete");
        assert_eq!(body["progress"], 100);
        assert_eq!(body["video_url"], "http://v/x.mp4");

        let body = StatusUpdate::failed("boom").to_body();
        assert_eq!(body["status"], "failed");
        assert_eq!(body["progress"], 0);
        assert_eq!(body["error"], "boom");
    }

    #[tokio::test]
    async fn test_missing_job_id_short_circuits() {
        let sink = RestStatusSink::new(
            reqwest::Client::new(),
            "http://localhost:9",
            "key",
            None,
            &StatusConfig {
                report_timeout_secs: 1,
            },
        );
        // Must be a no-op: no request is attempted without a job id
        assert!(!sink.report(StatusUpdate::failed("x")).await);
    }

    #[tokio::test]
    async fn test_unreachable_store_is_swallowed() {
        let sink = RestStatusSink::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1",
            "key",
            Some("job-1".to_string()),
            &StatusConfig {
                report_timeout_secs: 1,
            },
        );
        assert!(!sink.report(StatusUpdate::failed("x")).await);
    }
}
