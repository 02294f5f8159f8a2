use indicatif::ProgressBar;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::job::JobStatus;
use crate::report::{StatusSink, StatusUpdate};

/// Events flowing from the transcode passes to the single progress consumer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressEvent {
    /// Overall job percentage, already mapped from a pass-local stage value
    Stage { percent: u8 },
    /// Liveness signal: the encoder produced no time-bearing output for the
    /// quiet period, but the process has not exited
    Stalled { quiet_secs: u64 },
}

pub type ProgressTx = mpsc::Sender<ProgressEvent>;

/// Capacity of the progress channel. Events are lossy by contract, so a
/// full channel drops samples rather than blocking the stderr reader.
const CHANNEL_CAPACITY: usize = 64;

pub fn channel() -> (ProgressTx, mpsc::Receiver<ProgressEvent>) {
    mpsc::channel(CHANNEL_CAPACITY)
}

/// A contiguous slice of the overall job progress scale that one pass's
/// 0-100 stage output is affine-mapped into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassWindow {
    pub start: u8,
    pub end: u8,
}

impl PassWindow {
    pub fn map(&self, stage_percent: f64) -> u8 {
        let p = stage_percent.clamp(0.0, 100.0);
        let span = self.end.saturating_sub(self.start) as f64;
        (self.start as f64 + span * p / 100.0).round() as u8
    }
}

/// Extract an elapsed-seconds marker from one encoder stderr line.
///
/// Only lines carrying `time=HH:MM:SS.frac` are informative; everything
/// else returns None and is skipped.
pub fn parse_time_marker(line: &str) -> Option<f64> {
    let idx = line.find("time=")?;
    let token = line[idx + 5..].split_whitespace().next()?;
    // ffmpeg emits a large negative time before the first timestamped frame
    if token.starts_with('-') {
        return None;
    }
    let mut parts = token.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Pass-local percentage from elapsed output time against the audio
/// track's total duration.
pub fn stage_percent(elapsed_secs: f64, total_secs: f64) -> f64 {
    if total_secs <= 0.0 {
        return 0.0;
    }
    (elapsed_secs / total_secs * 100.0).clamp(0.0, 100.0)
}

/// Monitors one transcode pass: parses stage percentages out of the live
/// stderr stream and runs a watchdog that flags a stalled encoder. The
/// watchdog tracks last-activity time on its own timer, independent of
/// whether any individual line parses.
pub struct PassMonitor {
    window: PassWindow,
    total_secs: f64,
    tx: ProgressTx,
    last_mark: Arc<Mutex<Instant>>,
    watchdog: JoinHandle<()>,
}

impl PassMonitor {
    pub fn new(window: PassWindow, total_secs: f64, tx: ProgressTx, stall_timeout: Duration) -> Self {
        let last_mark = Arc::new(Mutex::new(Instant::now()));
        let watchdog = tokio::spawn(watchdog_loop(
            Arc::clone(&last_mark),
            tx.clone(),
            stall_timeout,
        ));
        Self {
            window,
            total_secs,
            tx,
            last_mark,
            watchdog,
        }
    }

    /// Inspect one stderr line. Every qualifying line is parsed; forwarding
    /// is throttled downstream by the consumer, not here.
    pub fn observe_line(&self, line: &str) {
        if let Some(elapsed) = parse_time_marker(line) {
            if let Ok(mut mark) = self.last_mark.lock() {
                *mark = Instant::now();
            }
            let percent = self.window.map(stage_percent(elapsed, self.total_secs));
            let _ = self.tx.try_send(ProgressEvent::Stage { percent });
        }
    }

    /// Mark the pass complete, snapping progress to the window's end.
    pub fn finish(self) {
        let _ = self.tx.try_send(ProgressEvent::Stage {
            percent: self.window.end,
        });
    }
}

impl Drop for PassMonitor {
    fn drop(&mut self) {
        self.watchdog.abort();
    }
}

async fn watchdog_loop(last_mark: Arc<Mutex<Instant>>, tx: ProgressTx, stall_timeout: Duration) {
    let mut interval = tokio::time::interval(stall_timeout.max(Duration::from_secs(1)));
    interval.tick().await;
    loop {
        interval.tick().await;
        let quiet = last_mark
            .lock()
            .map(|mark| mark.elapsed())
            .unwrap_or_default();
        if quiet >= stall_timeout {
            let _ = tx
                .send(ProgressEvent::Stalled {
                    quiet_secs: quiet.as_secs(),
                })
                .await;
            // Rearm so a long stall is flagged once per quiet period
            if let Ok(mut mark) = last_mark.lock() {
                *mark = Instant::now();
            }
        }
    }
}

/// Single subscriber for the progress channel: keeps a high-water mark,
/// drives the optional CLI bar, and forwards throttled, monotonically
/// non-decreasing snapshots to the status sink. Returns the final
/// high-water mark when the channel closes.
pub fn spawn_consumer(
    mut rx: mpsc::Receiver<ProgressEvent>,
    sink: Arc<dyn StatusSink>,
    interval: Duration,
    bar: Option<ProgressBar>,
) -> JoinHandle<u8> {
    tokio::spawn(async move {
        let mut high: u8 = 0;
        let mut last_sent: u8 = 0;
        // tokio's clock, so tests can drive the throttle deterministically
        let mut last_forward: Option<tokio::time::Instant> = None;

        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::Stage { percent } => {
                    if percent > high {
                        high = percent;
                        if let Some(bar) = &bar {
                            bar.set_position(high as u64);
                        }
                    }
                    let due = last_forward.map(|t| t.elapsed() >= interval).unwrap_or(true);
                    if due && high > last_sent {
                        sink.report(StatusUpdate::snapshot(
                            JobStatus::Rendering,
                            high,
                            "Rendering video",
                        ))
                        .await;
                        last_sent = high;
                        last_forward = Some(tokio::time::Instant::now());
                    }
                }
                ProgressEvent::Stalled { quiet_secs } => {
                    warn!(
                        "No encoder progress for {}s (process still running)",
                        quiet_secs
                    );
                }
            }
        }
        high
    })
}
