use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::error::{JobError, JobResult};

/// Characters of encoder diagnostic output carried in a failure; enough to
/// diagnose, bounded to keep error payloads small.
pub const DIAGNOSTIC_TAIL_CHARS: usize = 500;

/// Rolling stderr buffer cap while a pass is running.
const STDERR_BUFFER_BYTES: usize = 4096;

/// One external transcoder invocation, assembled with a builder.
#[derive(Debug, Clone)]
pub struct MediaCommand {
    binary_path: String,
    args: Vec<String>,
    description: String,
}

impl MediaCommand {
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Add an input that loops indefinitely (overlay textures)
    pub fn looping_input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-stream_loop").arg("-1").input(path)
    }

    /// Add output file
    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    pub fn hide_banner(self) -> Self {
        self.arg("-hide_banner")
    }

    /// Add video filter
    pub fn video_filter<S: Into<String>>(self, filter: S) -> Self {
        self.arg("-vf").arg(filter)
    }

    /// Add filter graph
    pub fn filter_complex<S: Into<String>>(self, filter: S) -> Self {
        self.arg("-filter_complex").arg(filter)
    }

    /// Select an output stream
    pub fn map<S: Into<String>>(self, stream: S) -> Self {
        self.arg("-map").arg(stream)
    }

    /// Set audio codec
    pub fn audio_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:a").arg(codec)
    }

    /// Set audio bitrate
    pub fn audio_bitrate<S: Into<String>>(self, bitrate: S) -> Self {
        self.arg("-b:a").arg(bitrate)
    }

    /// Set pixel format
    pub fn pixel_format<S: Into<String>>(self, format: S) -> Self {
        self.arg("-pix_fmt").arg(format)
    }

    /// Trim output to the shortest input stream
    pub fn shortest(self) -> Self {
        self.arg("-shortest")
    }

    pub fn build_args(&self) -> Vec<String> {
        self.args.clone()
    }

    /// Execute with a hard wall-clock timeout, feeding every stderr line to
    /// `on_line` as it arrives. The reader loop never blocks exit detection:
    /// the deadline covers both streaming and the final wait.
    pub async fn execute_with_output<F>(&self, timeout: Duration, mut on_line: F) -> JobResult<()>
    where
        F: FnMut(&str),
    {
        debug!(
            "Executing media command ({}): {} {:?}",
            self.description, self.binary_path, self.args
        );

        let mut child = Command::new(&self.binary_path)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.failure(format!("Failed to execute {}: {}", self.binary_path, e)))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| self.failure("stderr not captured".to_string()))?;
        let mut lines = BufReader::new(stderr).lines();

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let mut tail = String::new();
        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        push_bounded(&mut tail, &line, STDERR_BUFFER_BYTES);
                        on_line(&line);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!("stderr read error: {}", e);
                        break;
                    }
                },
                _ = &mut deadline => {
                    let _ = child.kill().await;
                    return Err(self.failure(format!(
                        "Timed out after {} seconds",
                        timeout.as_secs()
                    )));
                }
            }
        }

        let status = tokio::select! {
            status = child.wait() => status
                .map_err(|e| self.failure(format!("Failed to wait for process: {}", e)))?,
            _ = &mut deadline => {
                let _ = child.kill().await;
                return Err(self.failure(format!(
                    "Timed out after {} seconds",
                    timeout.as_secs()
                )));
            }
        };

        if status.success() {
            Ok(())
        } else {
            Err(self.failure(diagnostic_tail(&tail, DIAGNOSTIC_TAIL_CHARS)))
        }
    }

    pub async fn execute(&self, timeout: Duration) -> JobResult<()> {
        self.execute_with_output(timeout, |_| {}).await
    }

    fn failure(&self, detail: String) -> JobError {
        JobError::Transcode {
            stage: self.description.clone(),
            detail,
        }
    }
}

/// Append a line to a rolling buffer, dropping oldest text past `max` bytes.
fn push_bounded(buffer: &mut String, line: &str, max: usize) {
    if !buffer.is_empty() {
        buffer.push('\n');
    }
    buffer.push_str(line);
    if buffer.len() > max {
        let mut cut = buffer.len() - max;
        while !buffer.is_char_boundary(cut) {
            cut += 1;
        }
        buffer.drain(..cut);
    }
}

/// Last `max_chars` characters of a diagnostic string.
pub fn diagnostic_tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}
