use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::FetchConfig;
use crate::error::{JobError, JobResult};

/// Downloads remote assets into a job's workspace. Images run through a
/// bounded worker pool; audio is fetched sequentially afterwards with a
/// longer timeout.
pub struct AssetFetcher {
    client: Client,
    config: FetchConfig,
}

impl AssetFetcher {
    pub fn new(client: Client, config: FetchConfig) -> Self {
        Self { client, config }
    }

    /// Download all image references concurrently. A failed download records
    /// its index without cancelling in-flight siblings; the caller decides
    /// the verdict. Result slots are position-indexed: `paths[i]` is Some
    /// exactly when index i downloaded successfully.
    pub async fn fetch_images(
        &self,
        urls: &[String],
        work_dir: &Path,
    ) -> (Vec<Option<PathBuf>>, Vec<usize>) {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.config.image_workers.max(1)));
        let timeout = Duration::from_secs(self.config.image_timeout_secs);
        let mut tasks = JoinSet::new();

        for (i, url) in urls.iter().enumerate() {
            let client = self.client.clone();
            let semaphore = Arc::clone(&semaphore);
            let url = url.clone();
            let dest = work_dir.join(format!("image_{:03}{}", i, ext_for_url(&url)));

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                match download_file(&client, &url, &dest, timeout).await {
                    Ok(bytes) => {
                        debug!("Downloaded {} ({} bytes)", dest.display(), bytes);
                        (i, Some(dest))
                    }
                    Err(e) => {
                        warn!("Download failed: {} - {}", url, e);
                        (i, None)
                    }
                }
            });
        }

        let mut paths: Vec<Option<PathBuf>> = vec![None; urls.len()];
        let mut failed = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((i, Some(path))) => paths[i] = Some(path),
                Ok((i, None)) => failed.push(i),
                Err(e) => {
                    // A panicked download task counts as a failure we cannot
                    // attribute to an index; surface it loudly.
                    warn!("Image download task failed to join: {}", e);
                }
            }
        }
        failed.sort_unstable();

        info!(
            "Downloaded {}/{} images in {:.1}s",
            urls.len() - failed.len(),
            urls.len(),
            started.elapsed().as_secs_f64()
        );
        (paths, failed)
    }

    /// Fetch the audio track sequentially. One larger file: concurrency
    /// offers no benefit, and a dedicated longer timeout is clearer.
    pub async fn fetch_audio(&self, url: &str, work_dir: &Path) -> JobResult<PathBuf> {
        let dest = work_dir.join("audio.wav");
        let timeout = Duration::from_secs(self.config.audio_timeout_secs);
        let bytes = download_file(&self.client, url, &dest, timeout)
            .await
            .map_err(|e| JobError::Acquisition(format!("Failed to download audio: {}", e)))?;
        info!("Downloaded audio ({} bytes)", bytes);
        Ok(dest)
    }

    /// Bounded error payload: at most the first N failed indices; the full
    /// list has already been logged.
    pub fn acquisition_error(&self, failed: &[usize]) -> JobError {
        let truncated: Vec<usize> = failed
            .iter()
            .copied()
            .take(self.config.max_reported_failures)
            .collect();
        JobError::Acquisition(format!("Failed to download images: {:?}", truncated))
    }
}

/// Stream a remote file to disk chunk by chunk, never buffering the whole
/// payload. Overwrites any existing file at dest.
async fn download_file(
    client: &Client,
    url: &str,
    dest: &Path,
    timeout: Duration,
) -> std::result::Result<u64, String> {
    debug!("Downloading: {}", url);
    let mut response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| e.to_string())?
        .error_for_status()
        .map_err(|e| e.to_string())?;

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| format!("Failed to create {}: {}", dest.display(), e))?;

    let mut written: u64 = 0;
    while let Some(chunk) = response.chunk().await.map_err(|e| e.to_string())? {
        file.write_all(&chunk)
            .await
            .map_err(|e| format!("Failed to write {}: {}", dest.display(), e))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| format!("Failed to flush {}: {}", dest.display(), e))?;

    Ok(written)
}

fn ext_for_url(url: &str) -> &'static str {
    if url.to_lowercase().contains(".png") {
        ".png"
    } else {
        ".jpg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn fetcher() -> AssetFetcher {
        AssetFetcher::new(
            Client::new(),
            FetchConfig {
                image_workers: 4,
                image_timeout_secs: 5,
                audio_timeout_secs: 5,
                max_reported_failures: 5,
            },
        )
    }

    /// Minimal asset host: 404 for paths containing "missing", a small
    /// fixed body for everything else.
    async fn serve_assets(listener: TcpListener) {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1024];
                let n = sock.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                let response = if request.contains("missing") {
                    "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                        .to_string()
                } else {
                    let body = "image-bytes";
                    format!(
                        "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    )
                };
                let _ = sock.write_all(response.as_bytes()).await;
            });
        }
    }

    #[test]
    fn test_ext_for_url() {
        assert_eq!(ext_for_url("http://x/frame.PNG?sig=abc"), ".png");
        assert_eq!(ext_for_url("http://x/frame.jpeg"), ".jpg");
        assert_eq!(ext_for_url("http://x/frame"), ".jpg");
    }

    #[test]
    fn test_acquisition_error_is_bounded() {
        let fetcher = AssetFetcher::new(
            Client::new(),
            FetchConfig {
                image_workers: 4,
                image_timeout_secs: 1,
                audio_timeout_secs: 1,
                max_reported_failures: 5,
            },
        );
        let failed: Vec<usize> = (0..20).collect();
        let err = fetcher.acquisition_error(&failed).to_string();
        assert!(err.contains("[0, 1, 2, 3, 4]"));
        assert!(!err.contains("19"));
    }

    #[tokio::test]
    async fn test_partial_failure_completes_siblings() {
        // One 404 in the middle of five downloads: the other four must
        // still land on disk, and only the failed index is reported.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_assets(listener));

        let dir = tempfile::tempdir().unwrap();
        let urls = vec![
            format!("http://{addr}/a.png"),
            format!("http://{addr}/b.png"),
            format!("http://{addr}/missing.png"),
            format!("http://{addr}/d.jpg"),
            format!("http://{addr}/e.png"),
        ];
        let (paths, failed) = fetcher().fetch_images(&urls, dir.path()).await;

        assert_eq!(failed, vec![2]);
        assert!(paths[2].is_none());
        for i in [0usize, 1, 3, 4] {
            let path = paths[i].as_ref().unwrap();
            assert_eq!(std::fs::read(path).unwrap(), b"image-bytes");
        }
    }

    #[tokio::test]
    async fn test_failed_sibling_does_not_cancel_others() {
        // All URLs point at an unreachable host; the fetcher must still
        // report every index individually rather than aborting early.
        let fetcher = AssetFetcher::new(
            Client::new(),
            FetchConfig {
                image_workers: 4,
                image_timeout_secs: 1,
                audio_timeout_secs: 1,
                max_reported_failures: 5,
            },
        );
        let dir = tempfile::tempdir().unwrap();
        let urls: Vec<String> = (0..3)
            .map(|i| format!("http://127.0.0.1:1/img{}.png", i))
            .collect();
        let (paths, failed) = fetcher.fetch_images(&urls, dir.path()).await;
        assert_eq!(paths.len(), 3);
        assert!(paths.iter().all(|p| p.is_none()));
        assert_eq!(failed, vec![0, 1, 2]);
    }
}
