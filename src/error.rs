use thiserror::Error;

/// Process-scoped faults. These indicate a broken environment or a bug in
/// the gating logic, never a bad job payload.
#[derive(Error, Debug)]
pub enum EmbercastError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Media processing error: {0}")]
    Media(String),
}

pub type Result<T> = std::result::Result<T, EmbercastError>;

/// Job-scoped failures. Every variant is caught at the orchestrator
/// boundary, converted into a terminal status update and a structured
/// `{error}` payload for the caller.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("GPU encoding unavailable: {0}")]
    Capability(String),

    #[error("Asset acquisition failed: {0}")]
    Acquisition(String),

    #[error("{stage} failed: {detail}")]
    Transcode { stage: String, detail: String },

    #[error("Upload failed: {0}")]
    Upload(String),
}

pub type JobResult<T> = std::result::Result<T, JobError>;
