//! Configuration for the soundtrack engine
//!
//! Compile-time defaults live in the constant modules; `EngineConfig` carries
//! the per-engine values callers may override.

use std::time::Duration;

/// Network-related configuration
pub mod network {
    /// User agent for HTTP requests
    pub const USER_AGENT: &str = concat!("Soundtrack/", env!("CARGO_PKG_VERSION"));

    /// Connection timeout in seconds
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;

    /// Per-read timeout in seconds; a stalled read ends the stream
    pub const READ_TIMEOUT_SECS: u64 = 30;

    /// Size of each read from the response body (bytes)
    pub const READ_CHUNK_SIZE: usize = 8 * 1024;

    /// Request header asking the server to interleave ICY metadata
    pub const ICY_METADATA_HEADER: (&str, &str) = ("Icy-MetaData", "1");
}

/// Decoder-related configuration
pub mod decoder {
    /// Bytes the framer may hold while searching for the first ADTS frame
    pub const MAX_DISCOVERY_BYTES: usize = 64 * 1024;

    /// Sinc interpolation length for the resampler
    pub const RESAMPLER_SINC_LEN: usize = 256;

    /// Resampler cutoff, relative to the Nyquist frequency
    pub const RESAMPLER_CUTOFF: f32 = 0.95;

    /// Resampler oversampling factor
    pub const RESAMPLER_OVERSAMPLING: usize = 256;

    /// Highest ADTS rate that is commonly an HE-AAC core rate
    pub const SBR_CORE_RATE_MAX: u32 = 24_000;
}

/// Playback-related configuration
pub mod playback {
    /// Delay before resuming after an interruption ends (milliseconds)
    pub const RESUME_DELAY_MS: u64 = 400;

    /// MIME type expected from the stream when none is given
    pub const DEFAULT_MIME_TYPE: &str = "audio/aac";

    /// Sample rate of the default output format
    pub const OUTPUT_SAMPLE_RATE: u32 = 44_100;

    /// Channel count of the default output format
    pub const OUTPUT_CHANNELS: u16 = 2;
}

/// Per-engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Stream URL
    pub url: String,
    /// Expected `Content-Type` essence of the stream
    pub mime_type: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Delay between an interruption ending and playback resuming
    pub resume_delay: Duration,
}

impl EngineConfig {
    /// Configuration for `url` with every other value at its default
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn with_resume_delay(mut self, delay: Duration) -> Self {
        self.resume_delay = delay;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            mime_type: playback::DEFAULT_MIME_TYPE.to_string(),
            connect_timeout: Duration::from_secs(network::CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(network::READ_TIMEOUT_SECS),
            resume_delay: Duration::from_millis(playback::RESUME_DELAY_MS),
        }
    }
}
