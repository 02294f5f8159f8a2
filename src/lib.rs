//! Embercast - Stateless Video Render Worker
//!
//! Turns a timed sequence of still images plus an audio track into an H.264
//! video using ffmpeg, with optional smoke/embers overlay compositing,
//! GPU-accelerated encoding when NVENC is usable, and live progress
//! reporting to an external tracking store.

pub mod cli;
pub mod config;
pub mod error;
pub mod fetch;
pub mod job;
pub mod media;
pub mod probe;
pub mod progress;
pub mod report;
pub mod timeline;
pub mod upload;
pub mod workflow;
