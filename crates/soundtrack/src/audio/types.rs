//! Shared audio types
//!
//! Pure data types used across the audio subsystem.

use std::fmt;

use crate::config::playback::{OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE};

/// Playback state as owned by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// No output pipeline has been built yet
    #[default]
    Unprepared,
    /// The media services were lost; waiting for a reset
    Unavailable,
    Ready,
    /// Play requested, waiting for the first rendered buffer. No event is
    /// emitted for this state.
    Starting,
    Playing,
}

impl PlaybackState {
    /// Whether playback is starting or running
    pub fn is_active(self) -> bool {
        matches!(self, PlaybackState::Starting | PlaybackState::Playing)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackState::Unprepared => write!(f, "Unprepared"),
            PlaybackState::Unavailable => write!(f, "Unavailable"),
            PlaybackState::Ready => write!(f, "Ready"),
            PlaybackState::Starting => write!(f, "Starting"),
            PlaybackState::Playing => write!(f, "Playing"),
        }
    }
}

/// Events delivered to the engine's delegate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    BecameAvailable,
    BecameUnavailable,
    Played,
    Paused,
    SongChanged(String),
}

/// PCM sample representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    F32,
    I16,
}

impl SampleFormat {
    pub fn bits(self) -> u32 {
        match self {
            SampleFormat::F32 => 32,
            SampleFormat::I16 => 16,
        }
    }
}

/// Fixed PCM format produced by the decoder and consumed by the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
    /// Interleaved (`LRLR…`) rather than one plane per channel
    pub interleaved: bool,
}

impl PcmFormat {
    /// Interleaved 32-bit float at the given rate and channel count
    pub fn float_interleaved(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            sample_format: SampleFormat::F32,
            interleaved: true,
        }
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self::float_interleaved(OUTPUT_SAMPLE_RATE, OUTPUT_CHANNELS)
    }
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz · {} ch · {}-bit {}",
            self.sample_rate,
            self.channels,
            self.sample_format.bits(),
            if self.interleaved { "interleaved" } else { "planar" }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Samples {
    F32(Vec<f32>),
    I16(Vec<i16>),
}

/// Block of PCM frames in a fixed format.
///
/// Storage is allocated for `frame_capacity` frames up front. Only the first
/// `frame_length` frames are valid, and the length must be set explicitly by
/// whoever fills the buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    format: PcmFormat,
    frame_capacity: usize,
    frame_length: usize,
    samples: Samples,
}

impl PcmBuffer {
    /// Zeroed buffer with room for `frame_capacity` frames and a valid length of 0
    pub fn new(format: PcmFormat, frame_capacity: usize) -> Self {
        let len = frame_capacity * format.channels as usize;
        let samples = match format.sample_format {
            SampleFormat::F32 => Samples::F32(vec![0.0; len]),
            SampleFormat::I16 => Samples::I16(vec![0; len]),
        };
        Self {
            format,
            frame_capacity,
            frame_length: 0,
            samples,
        }
    }

    pub fn format(&self) -> &PcmFormat {
        &self.format
    }

    pub fn frame_capacity(&self) -> usize {
        self.frame_capacity
    }

    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    /// Set the number of valid frames. Returns false, leaving the length
    /// unchanged, if `frames` exceeds the capacity.
    pub fn set_frame_length(&mut self, frames: usize) -> bool {
        if frames > self.frame_capacity {
            return false;
        }
        self.frame_length = frames;
        true
    }

    fn index(&self, frame: usize, channel: usize) -> usize {
        if self.format.interleaved {
            frame * self.format.channels as usize + channel
        } else {
            channel * self.frame_capacity + frame
        }
    }

    /// Write one sample, converting from float. Out-of-range positions are
    /// ignored.
    pub fn write(&mut self, frame: usize, channel: usize, value: f32) {
        if frame >= self.frame_capacity || channel >= self.format.channels as usize {
            return;
        }
        let idx = self.index(frame, channel);
        match &mut self.samples {
            Samples::F32(s) => s[idx] = value,
            Samples::I16(s) => s[idx] = (value.clamp(-1.0, 1.0) * i16::MAX as f32) as i16,
        }
    }

    /// Read one sample as float, or 0.0 outside the capacity
    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        if frame >= self.frame_capacity || channel >= self.format.channels as usize {
            return 0.0;
        }
        let idx = self.index(frame, channel);
        match &self.samples {
            Samples::F32(s) => s[idx],
            Samples::I16(s) => s[idx] as f32 / i16::MAX as f32,
        }
    }

    /// Valid frames as interleaved float samples
    pub fn to_interleaved_f32(&self) -> Vec<f32> {
        let channels = self.format.channels as usize;
        let mut out = Vec::with_capacity(self.frame_length * channels);
        for frame in 0..self.frame_length {
            for channel in 0..channels {
                out.push(self.sample(frame, channel));
            }
        }
        out
    }
}
