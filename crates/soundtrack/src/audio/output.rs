//! Audio output sinks
//!
//! `AudioOutput` is what the engine schedules decoded buffers on. The rodio
//! implementation plays through the default output device.

use std::num::NonZero;

use rodio::buffer::SamplesBuffer;
use rodio::{DeviceSinkBuilder, Player};
use tracing::debug;

use crate::error::OutputError;

use super::types::{PcmBuffer, PcmFormat};

/// Sink for decoded PCM, owned by a single engine.
///
/// Outputs may hold platform handles that must stay on the thread that
/// created them, so they are not required to be `Send`.
pub trait AudioOutput {
    /// Format the decoder must produce for this output
    fn format(&self) -> PcmFormat;
    fn start(&mut self) -> Result<(), OutputError>;
    /// Queue a buffer after everything already scheduled
    fn schedule(&mut self, buffer: PcmBuffer);
    /// Stop and drop everything scheduled
    fn stop(&mut self);
    fn is_playing(&self) -> bool;
}

/// Builds the output on the engine thread
pub type OutputFactory = Box<dyn FnMut() -> Result<Box<dyn AudioOutput>, OutputError> + Send>;

/// Factory opening the default device with `format`
pub fn rodio_output_factory(format: PcmFormat) -> OutputFactory {
    Box::new(move || open_default_output(format))
}

/// Open the default output device
pub fn open_default_output(format: PcmFormat) -> Result<Box<dyn AudioOutput>, OutputError> {
    let channels = NonZero::new(format.channels)
        .ok_or_else(|| OutputError::Open("zero channels".to_string()))?;
    let sample_rate = NonZero::new(format.sample_rate)
        .ok_or_else(|| OutputError::Open("zero sample rate".to_string()))?;

    let mut stream =
        DeviceSinkBuilder::open_default_sink().map_err(|e| OutputError::Open(e.to_string()))?;
    stream.log_on_drop(false);
    let player = Player::connect_new(stream.mixer());
    player.pause();
    debug!(%format, "Opened default audio output");

    Ok(Box::new(RodioOutput {
        player,
        _stream: stream,
        format,
        channels,
        sample_rate,
        started: false,
    }))
}

/// rodio-backed output. `player` is declared before `_stream` so it is
/// dropped first.
struct RodioOutput<S> {
    player: Player,
    _stream: S,
    format: PcmFormat,
    channels: NonZero<u16>,
    sample_rate: NonZero<u32>,
    started: bool,
}

impl<S> AudioOutput for RodioOutput<S> {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn start(&mut self) -> Result<(), OutputError> {
        self.player.play();
        self.started = true;
        Ok(())
    }

    fn schedule(&mut self, buffer: PcmBuffer) {
        let samples = buffer.to_interleaved_f32();
        if samples.is_empty() {
            return;
        }
        self.player
            .append(SamplesBuffer::new(self.channels, self.sample_rate, samples));
    }

    fn stop(&mut self) {
        self.player.stop();
        self.started = false;
    }

    fn is_playing(&self) -> bool {
        self.started && !self.player.is_paused()
    }
}
