//! ADTS/AAC decode session
//!
//! `AdtsDecoder` accepts arbitrary byte ranges of an ADTS stream and turns
//! each call's complete packets into one PCM buffer in the target format.
//! The converter is created once, when the framer discovers the stream
//! format. The first error ends the session.

use tracing::{debug, trace, warn};

use crate::error::DecodeError;

use super::adts::{AdtsFramer, FramerEvent, StreamFormat};
use super::converter::{
    symphonia_converter_factory, ConverterFactory, PacketConverter, PacketGroup,
};
use super::types::{PcmBuffer, PcmFormat};

/// One ADTS → PCM decoding context.
///
/// Not reusable after an error: discard it and create a new one.
pub struct AdtsDecoder {
    target: PcmFormat,
    framer: AdtsFramer,
    factory: ConverterFactory,
    converter: Option<Box<dyn PacketConverter>>,
    format: Option<StreamFormat>,
    failed: bool,
    buffers_emitted: u64,
}

impl AdtsDecoder {
    /// Decoder producing `target` PCM through symphonia
    pub fn new(target: PcmFormat) -> Self {
        Self::with_converter_factory(target, symphonia_converter_factory())
    }

    pub fn with_converter_factory(target: PcmFormat, factory: ConverterFactory) -> Self {
        Self {
            target,
            framer: AdtsFramer::new(),
            factory,
            converter: None,
            format: None,
            failed: false,
            buffers_emitted: 0,
        }
    }

    pub fn target_format(&self) -> &PcmFormat {
        &self.target
    }

    /// Stream format, once discovered
    pub fn stream_format(&self) -> Option<StreamFormat> {
        self.format
    }

    /// Whether the session hit a terminal error
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn buffers_emitted(&self) -> u64 {
        self.buffers_emitted
    }

    /// Decode `data`, passing at most one PCM buffer to `emit`.
    ///
    /// The first error is returned once and marks the session failed; later
    /// calls do nothing and return `Ok(0)`. Packets completed in the same call
    /// before a framing error are still converted and emitted. Returns the
    /// number of buffers emitted.
    pub fn decode<F>(&mut self, data: &[u8], mut emit: F) -> Result<usize, DecodeError>
    where
        F: FnMut(PcmBuffer),
    {
        if self.failed {
            trace!(bytes = data.len(), "Ignoring data after decode failure");
            return Ok(0);
        }
        match self.decode_inner(data, &mut emit) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.failed = true;
                self.converter = None;
                warn!("Decode session failed: {}", e);
                Err(e)
            }
        }
    }

    fn decode_inner(
        &mut self,
        data: &[u8],
        emit: &mut dyn FnMut(PcmBuffer),
    ) -> Result<usize, DecodeError> {
        let mut events = Vec::new();
        let framing = self.framer.push(data, &mut events);

        let mut group = PacketGroup::new();
        for event in events {
            match event {
                FramerEvent::FormatDiscovered(format) => self.on_format(format)?,
                FramerEvent::Packet { payload, frames } => group.push(&payload, frames),
            }
        }

        let emitted = if group.is_empty() {
            0
        } else {
            emit(self.convert(&group)?);
            self.buffers_emitted += 1;
            1
        };

        framing.map(|()| emitted)
    }

    fn on_format(&mut self, format: StreamFormat) -> Result<(), DecodeError> {
        if self.converter.is_some() {
            return Err(DecodeError::FormatChanged(
                "second format announcement".to_string(),
            ));
        }
        let converter = (self.factory)(&format, &self.target)?;
        debug!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            target = %self.target,
            "Decoder ready"
        );
        self.converter = Some(converter);
        self.format = Some(format);
        Ok(())
    }

    fn convert(&mut self, group: &PacketGroup) -> Result<PcmBuffer, DecodeError> {
        let converter = self.converter.as_mut().ok_or_else(|| {
            DecodeError::Conversion("packets arrived before the stream format".to_string())
        })?;

        let capacity = converter.frame_capacity(group);
        let mut buffer = PcmBuffer::new(self.target, capacity);
        let written = converter.fill(group, &mut buffer)?;
        if !buffer.set_frame_length(written) {
            return Err(DecodeError::Overflow { written, capacity });
        }
        trace!(packets = group.len(), frames = written, "Converted packet group");
        Ok(buffer)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::adts::adts_frame;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Converter writing one frame per source frame, each sample set to the
    /// packet's first payload byte
    pub(crate) struct FakeConverter {
        channels: usize,
    }

    impl PacketConverter for FakeConverter {
        fn frame_capacity(&self, group: &PacketGroup) -> usize {
            group.total_frames()
        }

        fn fill(&mut self, group: &PacketGroup, out: &mut PcmBuffer) -> Result<usize, DecodeError> {
            let mut frame = 0;
            for (desc, payload) in group.packets() {
                let value = payload.first().copied().unwrap_or(0) as f32 / 255.0;
                for _ in 0..desc.frames {
                    for channel in 0..self.channels {
                        out.write(frame, channel, value);
                    }
                    frame += 1;
                }
            }
            Ok(frame)
        }
    }

    pub(crate) fn fake_factory(created: Arc<AtomicUsize>) -> ConverterFactory {
        Arc::new(move |_, target| {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeConverter {
                channels: target.channels as usize,
            }) as Box<dyn PacketConverter>)
        })
    }

    fn frames(count: usize) -> Vec<u8> {
        (0..count)
            .flat_map(|i| adts_frame(4, 2, &[i as u8 + 1; 12]))
            .collect()
    }

    fn decoder(created: &Arc<AtomicUsize>) -> AdtsDecoder {
        AdtsDecoder::with_converter_factory(PcmFormat::default(), fake_factory(created.clone()))
    }

    #[test]
    fn one_buffer_per_call_sized_by_packet_count() {
        let created = Arc::new(AtomicUsize::new(0));
        let mut decoder = decoder(&created);
        let mut buffers = Vec::new();

        let n = decoder.decode(&frames(3), |b| buffers.push(b)).unwrap();

        assert_eq!(n, 1);
        assert_eq!(buffers.len(), 1);
        assert_eq!(buffers[0].frame_capacity(), 3 * 1024);
        assert_eq!(buffers[0].frame_length(), 3 * 1024);
        assert_eq!(decoder.stream_format().map(|f| f.sample_rate), Some(44_100));
    }

    #[test]
    fn converter_created_exactly_once() {
        let created = Arc::new(AtomicUsize::new(0));
        let mut decoder = decoder(&created);
        let data = frames(6);
        for chunk in data.chunks(5) {
            decoder.decode(chunk, |_| {}).unwrap();
        }
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn chunked_input_yields_all_frames() {
        let created = Arc::new(AtomicUsize::new(0));
        let mut decoder = decoder(&created);
        let data = frames(4);
        let mut total = 0;
        for chunk in data.chunks(7) {
            decoder
                .decode(chunk, |b| total += b.frame_length())
                .unwrap();
        }
        assert_eq!(total, 4 * 1024);
    }

    #[test]
    fn incomplete_frame_emits_nothing() {
        let created = Arc::new(AtomicUsize::new(0));
        let mut decoder = decoder(&created);
        let data = frames(1);
        let n = decoder.decode(&data[..10], |_| panic!("no buffer expected")).unwrap();
        assert_eq!(n, 0);
        assert_eq!(created.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn corrupt_header_fails_once_then_goes_quiet() {
        let created = Arc::new(AtomicUsize::new(0));
        let mut decoder = decoder(&created);

        decoder.decode(&frames(3), |_| {}).unwrap();

        let mut corrupt = adts_frame(4, 2, &[9; 12]);
        corrupt[0] = 0x00;
        let mut buffers = Vec::new();
        let err = decoder.decode(&corrupt, |b| buffers.push(b)).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidHeader(_)));
        assert!(decoder.is_failed());

        for _ in 0..3 {
            assert_eq!(decoder.decode(&frames(2), |b| buffers.push(b)), Ok(0));
        }
        assert!(buffers.is_empty());
        assert_eq!(decoder.buffers_emitted(), 1);
    }

    #[test]
    fn good_packets_before_a_bad_header_are_still_emitted() {
        let created = Arc::new(AtomicUsize::new(0));
        let mut decoder = decoder(&created);
        let mut data = frames(2);
        data.extend([0x12; 16]);

        let mut buffers = Vec::new();
        assert!(decoder.decode(&data, |b| buffers.push(b)).is_err());
        assert_eq!(buffers.len(), 1);
        assert_eq!(buffers[0].frame_length(), 2 * 1024);
    }

    #[test]
    fn converter_construction_failure_is_terminal() {
        let factory: ConverterFactory =
            Arc::new(|_, _| Err(DecodeError::Converter("no decoder".to_string())));
        let mut decoder = AdtsDecoder::with_converter_factory(PcmFormat::default(), factory);

        let err = decoder.decode(&frames(2), |_| {}).unwrap_err();
        assert_eq!(err, DecodeError::Converter("no decoder".to_string()));
        assert_eq!(decoder.decode(&frames(2), |_| {}), Ok(0));
    }

    #[test]
    fn overflowing_converter_is_rejected() {
        struct Greedy;
        impl PacketConverter for Greedy {
            fn frame_capacity(&self, _: &PacketGroup) -> usize {
                1
            }
            fn fill(&mut self, _: &PacketGroup, _: &mut PcmBuffer) -> Result<usize, DecodeError> {
                Ok(2)
            }
        }
        let factory: ConverterFactory =
            Arc::new(|_, _| Ok(Box::new(Greedy) as Box<dyn PacketConverter>));
        let mut decoder = AdtsDecoder::with_converter_factory(PcmFormat::default(), factory);

        let err = decoder.decode(&frames(2), |_| {}).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Overflow {
                written: 2,
                capacity: 1
            }
        );
    }
}
