//! Soundtrack — Internet Radio Streaming Core
//!
//! ICY stream demuxing, ADTS/AAC decoding, and a playback engine that ties
//! them to an audio output.
//!
//! ## Quick start
//!
//! ```no_run
//! use soundtrack::audio::{rodio_output_factory, DesktopSession, PcmFormat, PlaybackEngine};
//! use soundtrack::config::EngineConfig;
//!
//! let config = EngineConfig::new("http://example.com/stream.aac");
//! let builder = PlaybackEngine::builder(
//!     config,
//!     DesktopSession::new(),
//!     rodio_output_factory(PcmFormat::default()),
//! );
//! let events = builder.subscribe();
//! let engine = builder.spawn()?;
//! engine.play();
//! for event in events {
//!     println!("{event:?}");
//! }
//! # Ok::<(), soundtrack::error::RadioError>(())
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod stream;
