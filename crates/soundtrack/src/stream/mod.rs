//! Stream handling
//!
//! Opens ICY (Icecast/Shoutcast) streams, separates interleaved song-title
//! metadata from the audio bytes and reports both as ordered signals.

pub mod connection;
pub mod icy;
pub mod metadata;
pub mod source;

pub use connection::{IcyConnection, StreamSignal};
pub use icy::{IcyDemuxer, IcyEvent, IcyHeaders};
pub use metadata::SongTitle;
pub use source::{ByteSource, FileSource, HttpSource, MemorySource, StreamRequest, StreamResponse};
