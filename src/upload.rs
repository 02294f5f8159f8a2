use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::config::StorageConfig;
use crate::error::{JobError, JobResult};

/// Streams the final video to blob storage. A failed upload after a
/// successful render is the most wasteful failure class, so it gets its own
/// error variant for monitoring.
pub struct BlobUploader {
    client: Client,
    base_url: String,
    api_key: String,
    bucket: String,
    timeout: Duration,
}

impl BlobUploader {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        config: &StorageConfig,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            bucket: config.bucket.clone(),
            timeout: Duration::from_secs(config.upload_timeout_secs),
        }
    }

    /// Streamed upload of the video file; returns the public retrieval URL,
    /// derived deterministically from bucket + path.
    pub async fn upload_video(&self, path: &Path, storage_path: &str) -> JobResult<String> {
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|e| JobError::Upload(format!("Cannot stat {}: {}", path.display(), e)))?
            .len();

        info!(
            "Uploading {} ({:.1} MB)",
            storage_path,
            size as f64 / 1024.0 / 1024.0
        );

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| JobError::Upload(format!("Cannot open {}: {}", path.display(), e)))?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let url = format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, self.bucket, storage_path
        );
        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "video/mp4")
            .header("x-upsert", "true")
            .header("Content-Length", size)
            .body(body)
            .send()
            .await
            .map_err(|e| JobError::Upload(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(JobError::Upload(format!("HTTP {}: {}", status, detail)));
        }

        let public_url = self.public_url(storage_path);
        info!("Uploaded: {}", public_url);
        Ok(public_url)
    }

    pub fn public_url(&self, storage_path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, storage_path
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uploader() -> BlobUploader {
        BlobUploader::new(
            Client::new(),
            "https://store.example",
            "key",
            &StorageConfig {
                bucket: "generated-assets".to_string(),
                upload_timeout_secs: 1,
            },
        )
    }

    #[test]
    fn test_public_url_derivation() {
        assert_eq!(
            uploader().public_url("proj-1/video.mp4"),
            "https://store.example/storage/v1/object/public/generated-assets/proj-1/video.mp4"
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_upload_error() {
        let err = uploader()
            .upload_video(Path::new("/nonexistent/out.mp4"), "p/video.mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Upload(_)));
    }
}
