use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Print job failed: {0}")]
    PrintJob(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Where an error originated, for logging and response decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing or invalid printer address / server settings
    Configuration,
    /// Anything that went wrong talking to (or rendering for) the device
    Device,
    /// Malformed request payload
    Input,
    /// Queue unavailable or an unexpected internal fault
    Internal,
}

impl DaemonError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            DaemonError::Config(_) => ErrorCategory::Configuration,
            DaemonError::Network(_)
            | DaemonError::Timeout(_)
            | DaemonError::PrintJob(_)
            | DaemonError::Image(_)
            | DaemonError::Io(_) => ErrorCategory::Device,
            DaemonError::InvalidInput(_) | DaemonError::Base64(_) | DaemonError::Json(_) => {
                ErrorCategory::Input
            }
            DaemonError::Queue(_) | DaemonError::Other(_) => ErrorCategory::Internal,
        }
    }

    /// Message sent back to HTTP clients: the bare detail, without the
    /// category prefix `Display` adds for logs.
    pub fn client_message(&self) -> String {
        match self {
            DaemonError::Config(msg)
            | DaemonError::InvalidInput(msg)
            | DaemonError::Network(msg)
            | DaemonError::Timeout(msg)
            | DaemonError::Queue(msg)
            | DaemonError::PrintJob(msg) => msg.clone(),
            DaemonError::Image(e) => e.to_string(),
            DaemonError::Base64(e) => e.to_string(),
            DaemonError::Io(e) => e.to_string(),
            DaemonError::Json(e) => e.to_string(),
            DaemonError::Other(e) => e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;
