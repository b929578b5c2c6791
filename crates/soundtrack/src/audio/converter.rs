//! Packet conversion
//!
//! A `PacketConverter` turns a group of raw AAC packets into frames of the
//! target PCM format. `SymphoniaConverter` decodes with symphonia's AAC
//! decoder, maps channels and resamples with rubato when the rates differ.

use std::sync::Arc;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_AAC};
use symphonia::core::formats::Packet;
use tracing::{debug, warn};

use crate::config::decoder::{RESAMPLER_CUTOFF, RESAMPLER_OVERSAMPLING, RESAMPLER_SINC_LEN};
use crate::error::DecodeError;

use super::adts::StreamFormat;
use super::types::{PcmBuffer, PcmFormat};

/// Position of one packet inside a `PacketGroup`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketDescription {
    pub offset: usize,
    pub length: usize,
    pub frames: u32,
}

/// Contiguous packet payloads plus their descriptions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketGroup {
    data: Vec<u8>,
    descriptions: Vec<PacketDescription>,
}

impl PacketGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, payload: &[u8], frames: u32) {
        self.descriptions.push(PacketDescription {
            offset: self.data.len(),
            length: payload.len(),
            frames,
        });
        self.data.extend_from_slice(payload);
    }

    /// Number of packets
    pub fn len(&self) -> usize {
        self.descriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptions.is_empty()
    }

    /// PCM frames the packets decode to at the source rate
    pub fn total_frames(&self) -> usize {
        self.descriptions.iter().map(|d| d.frames as usize).sum()
    }

    pub fn descriptions(&self) -> &[PacketDescription] {
        &self.descriptions
    }

    /// Iterate packets with their payload bytes
    pub fn packets(&self) -> impl Iterator<Item = (&PacketDescription, &[u8])> {
        self.descriptions
            .iter()
            .map(|d| (d, &self.data[d.offset..d.offset + d.length]))
    }
}

/// Converts packet groups into PCM of a fixed target format.
///
/// A converter is stateful (decoder and resampler history) and serves one
/// stream. Any error it returns is terminal for that stream.
pub trait PacketConverter: Send {
    /// Frames `fill` may write for `group`; the caller sizes the buffer with it
    fn frame_capacity(&self, group: &PacketGroup) -> usize;

    /// Convert `group` into `out` starting at frame 0, returning the frames
    /// written. The caller sets the buffer's frame length.
    fn fill(&mut self, group: &PacketGroup, out: &mut PcmBuffer) -> Result<usize, DecodeError>;
}

/// Builds a converter once the stream format is known
pub type ConverterFactory = Arc<
    dyn Fn(&StreamFormat, &PcmFormat) -> Result<Box<dyn PacketConverter>, DecodeError>
        + Send
        + Sync,
>;

/// Factory producing `SymphoniaConverter`s
pub fn symphonia_converter_factory() -> ConverterFactory {
    Arc::new(|source, target| {
        let converter = SymphoniaConverter::new(source, target)?;
        Ok(Box::new(converter) as Box<dyn PacketConverter>)
    })
}

/// AAC → PCM converter backed by symphonia and rubato
pub struct SymphoniaConverter {
    decoder: Box<dyn Decoder>,
    target: PcmFormat,
    sample_buf: Option<SampleBuffer<f32>>,
    resampler: Option<SincFixedIn<f32>>,
    ratio: f64,
    /// Channel-mapped frames not yet consumed by the resampler
    planes: Vec<Vec<f32>>,
    timestamp: u64,
}

impl SymphoniaConverter {
    pub fn new(source: &StreamFormat, target: &PcmFormat) -> Result<Self, DecodeError> {
        if target.channels == 0 || target.sample_rate == 0 {
            return Err(DecodeError::Converter(format!("invalid target format {target}")));
        }

        // symphonia's AAC decoder has no SBR; HE-AAC plays back core band only
        if source.likely_sbr_core() {
            warn!(
                core_rate = source.sample_rate,
                "Stream may be HE-AAC; decoding the AAC core without SBR"
            );
        }

        let mut params = CodecParameters::new();
        params
            .for_codec(CODEC_TYPE_AAC)
            .with_sample_rate(source.sample_rate)
            .with_max_frames_per_packet(source.frames_per_packet as u64)
            .with_extra_data(source.audio_specific_config().to_vec().into_boxed_slice());

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Converter(e.to_string()))?;

        let ratio = target.sample_rate as f64 / source.sample_rate as f64;
        let resampler = if source.sample_rate == target.sample_rate {
            None
        } else {
            let params = SincInterpolationParameters {
                sinc_len: RESAMPLER_SINC_LEN,
                f_cutoff: RESAMPLER_CUTOFF,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: RESAMPLER_OVERSAMPLING,
                window: WindowFunction::BlackmanHarris2,
            };
            let resampler = SincFixedIn::<f32>::new(
                ratio,
                1.0,
                params,
                source.frames_per_packet as usize,
                target.channels as usize,
            )
            .map_err(|e| DecodeError::Converter(e.to_string()))?;
            Some(resampler)
        };

        debug!(
            from_rate = source.sample_rate,
            from_channels = source.channels,
            to = %target,
            resampling = resampler.is_some(),
            "Created AAC converter"
        );

        Ok(Self {
            decoder,
            target: *target,
            sample_buf: None,
            resampler,
            ratio,
            planes: vec![Vec::new(); target.channels as usize],
            timestamp: 0,
        })
    }

    /// Decode one packet and append its channel-mapped frames to `planes`
    fn decode_packet(
        &mut self,
        desc: &PacketDescription,
        payload: &[u8],
    ) -> Result<(), DecodeError> {
        let packet = Packet::new_from_slice(0, self.timestamp, desc.frames as u64, payload);
        self.timestamp += desc.frames as u64;

        let decoded = self
            .decoder
            .decode(&packet)
            .map_err(|e| DecodeError::Conversion(e.to_string()))?;
        let spec = *decoded.spec();
        let capacity = decoded.capacity() as u64;
        let src_channels = spec.channels.count();
        if decoded.frames() == 0 || src_channels == 0 {
            return Ok(());
        }

        let needed = capacity as usize * src_channels;
        if self
            .sample_buf
            .as_ref()
            .map_or(true, |buf| buf.capacity() < needed)
        {
            self.sample_buf = Some(SampleBuffer::new(capacity, spec));
        }
        let Some(sample_buf) = self.sample_buf.as_mut() else {
            return Ok(());
        };
        sample_buf.copy_interleaved_ref(decoded);

        for frame in sample_buf.samples().chunks_exact(src_channels) {
            for (channel, plane) in self.planes.iter_mut().enumerate() {
                plane.push(map_channel(frame, channel, self.target.channels as usize));
            }
        }
        Ok(())
    }

    /// Move converted frames from `planes` into `out`, returning frames written
    fn drain_planes(&mut self, out: &mut PcmBuffer, start: usize) -> Result<usize, DecodeError> {
        let Some(resampler) = self.resampler.as_mut() else {
            let frames = self.planes.first().map_or(0, Vec::len);
            write_planes(out, start, &self.planes, frames);
            self.planes.iter_mut().for_each(Vec::clear);
            return Ok(frames);
        };

        let mut written = 0;
        loop {
            let needed = resampler.input_frames_next();
            if self.planes.first().map_or(0, Vec::len) < needed {
                return Ok(written);
            }
            let chunk: Vec<Vec<f32>> = self
                .planes
                .iter_mut()
                .map(|plane| plane.drain(..needed).collect())
                .collect();
            let resampled = resampler
                .process(&chunk, None)
                .map_err(|e| DecodeError::Conversion(e.to_string()))?;
            let frames = resampled.first().map_or(0, Vec::len);
            write_planes(out, start + written, &resampled, frames);
            written += frames;
        }
    }
}

impl PacketConverter for SymphoniaConverter {
    fn frame_capacity(&self, group: &PacketGroup) -> usize {
        let frames = group.total_frames();
        match &self.resampler {
            None => frames,
            Some(resampler) => {
                let held = self.planes.first().map_or(0, Vec::len);
                ((frames + held) as f64 * self.ratio).ceil() as usize
                    + resampler.output_frames_max()
            }
        }
    }

    fn fill(&mut self, group: &PacketGroup, out: &mut PcmBuffer) -> Result<usize, DecodeError> {
        let mut written = 0;
        for (desc, payload) in group.packets() {
            self.decode_packet(desc, payload)?;
            written += self.drain_planes(out, written)?;
        }
        Ok(written)
    }
}

/// Pick the source value for output channel `dst`.
///
/// Equal layouts copy, mono output averages, mono input is duplicated and
/// other mismatches take the nearest lower source channel.
fn map_channel(frame: &[f32], dst: usize, dst_channels: usize) -> f32 {
    let src_channels = frame.len();
    if src_channels == dst_channels {
        frame[dst]
    } else if dst_channels == 1 {
        frame.iter().sum::<f32>() / src_channels as f32
    } else {
        frame[dst.min(src_channels - 1)]
    }
}

fn write_planes(out: &mut PcmBuffer, start: usize, planes: &[Vec<f32>], frames: usize) {
    for (channel, plane) in planes.iter().enumerate() {
        for (i, &value) in plane.iter().take(frames).enumerate() {
            out.write(start + i, channel, value);
        }
    }
}
