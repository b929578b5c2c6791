//! Error types for Soundtrack
//!
//! Centralized error handling using thiserror. Each pipeline stage has its own
//! enum; `RadioError` wraps them for callers that only want one type.

use thiserror::Error;

/// Errors raised while opening or reading an ICY stream
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("{}", friendly_network_error(.0))]
    Network(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    #[error("Unexpected content type {actual:?} (expected {expected})")]
    MimeMismatch {
        expected: String,
        actual: Option<String>,
    },

    #[error("Malformed header {name}: {value:?}")]
    MalformedHeader { name: &'static str, value: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to spawn stream thread: {0}")]
    Spawn(String),
}

/// Errors raised by the ADTS framer or the packet converter.
///
/// Any of these is terminal for the decode session that produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid ADTS header: {0}")]
    InvalidHeader(String),

    #[error("Unsupported stream: {0}")]
    Unsupported(String),

    #[error("Stream format changed mid-stream: {0}")]
    FormatChanged(String),

    #[error("No ADTS sync found in the first {0} bytes")]
    NoSync(usize),

    #[error("Failed to create converter: {0}")]
    Converter(String),

    #[error("Conversion failed: {0}")]
    Conversion(String),

    #[error("Converter wrote {written} frames into a buffer of {capacity}")]
    Overflow { written: usize, capacity: usize },
}

/// Errors reported by an audio session capability
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Audio session activation failed: {0}")]
    Activation(String),

    #[error("Audio session deactivation failed: {0}")]
    Deactivation(String),
}

/// Errors reported by an audio output sink
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OutputError {
    #[error("Failed to open audio output: {0}")]
    Open(String),

    #[error("Failed to start audio output: {0}")]
    Start(String),
}

/// Main error type for Soundtrack
#[derive(Error, Debug)]
pub enum RadioError {
    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error("Engine error: {0}")]
    Engine(String),
}

/// Result type alias for Soundtrack
pub type Result<T> = std::result::Result<T, RadioError>;

fn friendly_network_error(e: &reqwest::Error) -> String {
    if e.is_builder() {
        if let Some(url) = e.url() {
            return format!("Invalid URL: {url}");
        }
        return "Invalid URL".to_string();
    }
    if e.is_connect() {
        if let Some(url) = e.url() {
            return format!("Could not connect to {}", url.host_str().unwrap_or("server"));
        }
        return "Could not connect to server".to_string();
    }
    if e.is_timeout() {
        return "Connection timed out".to_string();
    }
    format!("Network error: {e}")
}
