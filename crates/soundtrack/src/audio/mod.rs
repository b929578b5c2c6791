//! Audio subsystem
//!
//! ADTS framing and decoding, the output and session seams, and the
//! playback engine that drives them.

pub mod adts;
pub mod converter;
pub mod decoder;
pub mod engine;
pub mod events;
pub mod output;
pub mod session;
pub mod types;

pub use adts::{AdtsFramer, AdtsHeader, FramerEvent, StreamFormat};
pub use converter::{symphonia_converter_factory, ConverterFactory, PacketConverter, PacketGroup};
pub use decoder::AdtsDecoder;
pub use engine::{EngineBuilder, PlaybackEngine, SessionNotifier};
pub use events::{spawn_delegate, EventBus, PlaybackDelegate};
pub use output::{open_default_output, rodio_output_factory, AudioOutput, OutputFactory};
pub use session::{AudioSession, DesktopSession, RouteChangeReason, SessionEvent};
pub use types::{PcmBuffer, PcmFormat, PlaybackEvent, PlaybackState, SampleFormat};
