//! ADTS framing
//!
//! Parses ADTS headers and splits an arbitrarily chunked AAC elementary
//! stream into raw packets. The stream format is discovered from the first
//! confirmed frame header and must stay constant afterwards.

use tracing::{debug, warn};

use crate::config::decoder::{MAX_DISCOVERY_BYTES, SBR_CORE_RATE_MAX};
use crate::error::DecodeError;

/// Header length without CRC
pub const ADTS_HEADER_LEN: usize = 7;

/// Extra header bytes when a CRC is present
pub const ADTS_CRC_LEN: usize = 2;

/// PCM frames carried by one AAC packet
pub const AAC_FRAMES_PER_PACKET: u32 = 1024;

const SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

/// Stream format announced by ADTS headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    /// MPEG-4 audio object type (2 = AAC LC)
    pub object_type: u8,
    pub sample_rate_index: u8,
    pub channel_config: u8,
    pub sample_rate: u32,
    pub channels: u16,
    pub frames_per_packet: u32,
}

impl StreamFormat {
    /// Two-byte MPEG-4 AudioSpecificConfig describing this format
    pub fn audio_specific_config(&self) -> [u8; 2] {
        [
            (self.object_type << 3) | (self.sample_rate_index >> 1),
            ((self.sample_rate_index & 1) << 7) | (self.channel_config << 3),
        ]
    }

    /// Whether the header rate looks like the core of an HE-AAC (SBR)
    /// stream. ADTS only carries the core rate, so this is a guess.
    pub fn likely_sbr_core(&self) -> bool {
        self.sample_rate <= SBR_CORE_RATE_MAX
    }
}

/// Parsed fixed and variable ADTS header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    /// ID bit: MPEG-2 rather than MPEG-4
    pub mpeg2: bool,
    pub protection_absent: bool,
    pub object_type: u8,
    pub sample_rate_index: u8,
    pub channel_config: u8,
    /// Whole frame length in bytes, header included
    pub frame_length: usize,
    /// Raw data blocks in the frame, minus one
    pub raw_data_blocks: u8,
}

impl AdtsHeader {
    /// Parse the header at the start of `buf`, which must hold at least
    /// `ADTS_HEADER_LEN` bytes.
    pub fn parse(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < ADTS_HEADER_LEN {
            return Err(DecodeError::InvalidHeader(format!(
                "need {ADTS_HEADER_LEN} bytes, have {}",
                buf.len()
            )));
        }
        if buf[0] != 0xFF || buf[1] & 0xF0 != 0xF0 {
            return Err(DecodeError::InvalidHeader("missing sync word".to_string()));
        }
        let layer = (buf[1] >> 1) & 0x03;
        if layer != 0 {
            return Err(DecodeError::InvalidHeader(format!("layer {layer}")));
        }

        let header = Self {
            mpeg2: buf[1] & 0x08 != 0,
            protection_absent: buf[1] & 0x01 != 0,
            object_type: ((buf[2] >> 6) & 0x03) + 1,
            sample_rate_index: (buf[2] >> 2) & 0x0F,
            channel_config: ((buf[2] & 0x01) << 2) | (buf[3] >> 6),
            frame_length: ((buf[3] as usize & 0x03) << 11)
                | ((buf[4] as usize) << 3)
                | (buf[5] as usize >> 5),
            raw_data_blocks: buf[6] & 0x03,
        };

        if header.sample_rate_index as usize >= SAMPLE_RATES.len() {
            return Err(DecodeError::InvalidHeader(format!(
                "sampling frequency index {}",
                header.sample_rate_index
            )));
        }
        if header.frame_length < header.header_len() {
            return Err(DecodeError::InvalidHeader(format!(
                "frame length {}",
                header.frame_length
            )));
        }
        if header.channel_config == 0 {
            return Err(DecodeError::Unsupported(
                "in-band channel configuration".to_string(),
            ));
        }
        if header.raw_data_blocks != 0 {
            return Err(DecodeError::Unsupported(format!(
                "{} raw data blocks per frame",
                header.raw_data_blocks + 1
            )));
        }
        Ok(header)
    }

    pub fn header_len(&self) -> usize {
        if self.protection_absent {
            ADTS_HEADER_LEN
        } else {
            ADTS_HEADER_LEN + ADTS_CRC_LEN
        }
    }

    pub fn payload_len(&self) -> usize {
        self.frame_length - self.header_len()
    }

    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATES[self.sample_rate_index as usize]
    }

    pub fn channels(&self) -> u16 {
        match self.channel_config {
            7 => 8,
            n => n as u16,
        }
    }

    pub fn stream_format(&self) -> StreamFormat {
        StreamFormat {
            object_type: self.object_type,
            sample_rate_index: self.sample_rate_index,
            channel_config: self.channel_config,
            sample_rate: self.sample_rate(),
            channels: self.channels(),
            frames_per_packet: AAC_FRAMES_PER_PACKET,
        }
    }
}

/// Output of the framer, in stream order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramerEvent {
    /// Emitted once, before the first packet
    FormatDiscovered(StreamFormat),
    /// One raw AAC packet with its ADTS header removed
    Packet { payload: Vec<u8>, frames: u32 },
}

enum Discovery {
    Found { offset: usize, format: StreamFormat },
    /// Not found yet; bytes before `keep_from` can be dropped
    NeedMore { keep_from: usize },
}

/// Splits ADTS bytes into packets.
///
/// Until the format is known the framer searches for a sync word and only
/// accepts a candidate frame when the header that follows it agrees on the
/// format. Bytes held during that search are bounded. Once the format is
/// known, frames must follow each other exactly.
#[derive(Debug)]
pub struct AdtsFramer {
    pending: Vec<u8>,
    format: Option<StreamFormat>,
    skipped: usize,
    max_discovery_bytes: usize,
}

impl Default for AdtsFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl AdtsFramer {
    pub fn new() -> Self {
        Self::with_discovery_limit(MAX_DISCOVERY_BYTES)
    }

    pub fn with_discovery_limit(max_discovery_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            format: None,
            skipped: 0,
            max_discovery_bytes,
        }
    }

    /// Format discovered so far
    pub fn format(&self) -> Option<StreamFormat> {
        self.format
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Append `data` and emit every complete packet.
    ///
    /// On error, events pushed before the failure are left in `events`.
    pub fn push(&mut self, data: &[u8], events: &mut Vec<FramerEvent>) -> Result<(), DecodeError> {
        self.pending.extend_from_slice(data);
        let mut pos = 0;
        let result = self.scan(&mut pos, events);
        self.pending.drain(..pos);
        result
    }

    fn scan(&mut self, pos: &mut usize, events: &mut Vec<FramerEvent>) -> Result<(), DecodeError> {
        loop {
            let Some(format) = self.format else {
                match self.discover(*pos) {
                    Discovery::Found { offset, format } => {
                        self.skipped += offset - *pos;
                        *pos = offset;
                        if self.skipped > 0 {
                            warn!(skipped = self.skipped, "Skipped bytes before first ADTS frame");
                        }
                        debug!(
                            sample_rate = format.sample_rate,
                            channels = format.channels,
                            object_type = format.object_type,
                            "ADTS format discovered"
                        );
                        self.format = Some(format);
                        events.push(FramerEvent::FormatDiscovered(format));
                        continue;
                    }
                    Discovery::NeedMore { keep_from } => {
                        self.skipped += keep_from - *pos;
                        *pos = keep_from;
                        let held = self.skipped + (self.pending.len() - keep_from);
                        if held > self.max_discovery_bytes {
                            return Err(DecodeError::NoSync(self.max_discovery_bytes));
                        }
                        return Ok(());
                    }
                }
            };

            let rest = &self.pending[*pos..];
            if rest.len() < ADTS_HEADER_LEN {
                return Ok(());
            }
            let header = AdtsHeader::parse(rest)?;
            if header.stream_format() != format {
                return Err(DecodeError::FormatChanged(format!(
                    "{} Hz / {} ch became {} Hz / {} ch",
                    format.sample_rate,
                    format.channels,
                    header.sample_rate(),
                    header.channels()
                )));
            }
            if rest.len() < header.frame_length {
                return Ok(());
            }
            events.push(FramerEvent::Packet {
                payload: rest[header.header_len()..header.frame_length].to_vec(),
                frames: format.frames_per_packet,
            });
            *pos += header.frame_length;
        }
    }

    /// Find the first frame whose successor confirms its format.
    ///
    /// A candidate that cannot be confirmed yet does not stop the search: a
    /// later confirmed frame wins over it. If nothing is confirmed, bytes are
    /// kept from the earliest unresolved candidate.
    fn discover(&self, start: usize) -> Discovery {
        let buf = &self.pending;
        let mut unresolved: Option<usize> = None;
        let mut i = start;
        while i + 1 < buf.len() {
            if buf[i] != 0xFF || buf[i + 1] & 0xF6 != 0xF0 {
                i += 1;
                continue;
            }
            if buf.len() - i < ADTS_HEADER_LEN {
                unresolved.get_or_insert(i);
                i += 1;
                continue;
            }
            let Ok(header) = AdtsHeader::parse(&buf[i..]) else {
                i += 1;
                continue;
            };
            let next = i + header.frame_length;
            if buf.len() < next + ADTS_HEADER_LEN {
                unresolved.get_or_insert(i);
                i += 1;
                continue;
            }
            match AdtsHeader::parse(&buf[next..]) {
                Ok(following) if following.stream_format() == header.stream_format() => {
                    return Discovery::Found {
                        offset: i,
                        format: header.stream_format(),
                    };
                }
                _ => i += 1,
            }
        }
        // A trailing 0xFF may be the first half of a sync word
        if i < buf.len() && buf[i] != 0xFF {
            i += 1;
        }
        Discovery::NeedMore {
            keep_from: unresolved.unwrap_or(i),
        }
    }
}

/// Build an ADTS frame around `payload` (AAC LC, no CRC)
#[cfg(test)]
pub(crate) fn adts_frame(sample_rate_index: u8, channel_config: u8, payload: &[u8]) -> Vec<u8> {
    let len = ADTS_HEADER_LEN + payload.len();
    let profile = 1u8; // LC
    let mut frame = vec![
        0xFF,
        0xF1,
        (profile << 6) | (sample_rate_index << 2) | (channel_config >> 2),
        ((channel_config & 0x03) << 6) | ((len >> 11) as u8 & 0x03),
        (len >> 3) as u8,
        ((len as u8 & 0x07) << 5) | 0x1F,
        0xFC,
    ];
    frame.extend_from_slice(payload);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_all(framer: &mut AdtsFramer, data: &[u8], chunk: usize) -> Vec<FramerEvent> {
        let mut events = Vec::new();
        for piece in data.chunks(chunk) {
            framer.push(piece, &mut events).unwrap();
        }
        events
    }

    fn packets(events: &[FramerEvent]) -> Vec<Vec<u8>> {
        events
            .iter()
            .filter_map(|e| match e {
                FramerEvent::Packet { payload, .. } => Some(payload.clone()),
                FramerEvent::FormatDiscovered(_) => None,
            })
            .collect()
    }

    // --- AdtsHeader ---

    #[test]
    fn parse_lc_stereo_44100() {
        let frame = adts_frame(4, 2, &[0u8; 100]);
        let header = AdtsHeader::parse(&frame).unwrap();
        assert!(header.protection_absent);
        assert_eq!(header.object_type, 2);
        assert_eq!(header.sample_rate(), 44_100);
        assert_eq!(header.channels(), 2);
        assert_eq!(header.frame_length, 107);
        assert_eq!(header.payload_len(), 100);
    }

    #[test]
    fn header_with_crc_is_nine_bytes() {
        let mut frame = adts_frame(3, 1, &[0u8; 20]);
        frame[1] &= 0xFE;
        let header = AdtsHeader::parse(&frame).unwrap();
        assert_eq!(header.header_len(), 9);
        assert_eq!(header.payload_len(), 18);
    }

    #[test]
    fn audio_specific_config_for_lc_44100_stereo() {
        let frame = adts_frame(4, 2, &[]);
        let format = AdtsHeader::parse(&frame).unwrap().stream_format();
        assert_eq!(format.audio_specific_config(), [0x12, 0x10]);
    }

    #[test]
    fn low_core_rates_are_flagged_as_likely_sbr() {
        let format = |sri| AdtsHeader::parse(&adts_frame(sri, 2, &[])).unwrap().stream_format();
        assert!(format(6).likely_sbr_core()); // 24 kHz
        assert!(format(7).likely_sbr_core()); // 22.05 kHz
        assert!(!format(4).likely_sbr_core()); // 44.1 kHz
        assert!(!format(3).likely_sbr_core()); // 48 kHz
    }

    #[test]
    fn channel_config_seven_is_eight_channels() {
        let frame = adts_frame(3, 7, &[]);
        assert_eq!(AdtsHeader::parse(&frame).unwrap().channels(), 8);
    }

    #[test]
    fn rejects_bad_sync_layer_and_index() {
        let good = adts_frame(4, 2, &[0u8; 8]);

        let mut bad = good.clone();
        bad[0] = 0x00;
        assert!(matches!(AdtsHeader::parse(&bad), Err(DecodeError::InvalidHeader(_))));

        let mut bad = good.clone();
        bad[1] |= 0x02;
        assert!(matches!(AdtsHeader::parse(&bad), Err(DecodeError::InvalidHeader(_))));

        let mut bad = good.clone();
        bad[2] |= 0x3C;
        assert!(matches!(AdtsHeader::parse(&bad), Err(DecodeError::InvalidHeader(_))));

        assert!(AdtsHeader::parse(&good[..5]).is_err());
    }

    #[test]
    fn rejects_unsupported_layouts() {
        let frame = adts_frame(4, 0, &[0u8; 8]);
        assert!(matches!(AdtsHeader::parse(&frame), Err(DecodeError::Unsupported(_))));

        let mut frame = adts_frame(4, 2, &[0u8; 8]);
        frame[6] |= 0x01;
        assert!(matches!(AdtsHeader::parse(&frame), Err(DecodeError::Unsupported(_))));
    }

    // --- AdtsFramer ---

    #[test]
    fn splits_frames_and_announces_format_first() {
        let mut stream = adts_frame(4, 2, &[1; 10]);
        stream.extend(adts_frame(4, 2, &[2; 20]));
        stream.extend(adts_frame(4, 2, &[3; 30]));

        let mut framer = AdtsFramer::new();
        let events = push_all(&mut framer, &stream, stream.len());

        assert!(matches!(events[0], FramerEvent::FormatDiscovered(f) if f.sample_rate == 44_100));
        // The last frame has no successor yet but the format is already known
        assert_eq!(packets(&events), vec![vec![1; 10], vec![2; 20], vec![3; 30]]);
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn byte_at_a_time_gives_same_packets() {
        let mut stream = Vec::new();
        for i in 0..5u8 {
            stream.extend(adts_frame(3, 1, &vec![i; 5 + i as usize]));
        }
        let bulk = push_all(&mut AdtsFramer::new(), &stream, stream.len());
        let single = push_all(&mut AdtsFramer::new(), &stream, 1);
        assert_eq!(bulk, single);
        assert_eq!(packets(&bulk).len(), 5);
    }

    #[test]
    fn skips_garbage_and_false_sync_before_first_frame() {
        let mut stream = vec![0x00, 0x12, 0xFF, 0xF1, 0x50, 0xFF];
        stream.extend(adts_frame(4, 2, &[7; 12]));
        stream.extend(adts_frame(4, 2, &[8; 12]));

        let events = push_all(&mut AdtsFramer::new(), &stream, 4);
        assert_eq!(packets(&events), vec![vec![7; 12], vec![8; 12]]);
    }

    #[test]
    fn discovery_gives_up_after_limit() {
        let mut framer = AdtsFramer::with_discovery_limit(64);
        let mut events = Vec::new();
        assert!(framer.push(&[0u8; 32], &mut events).is_ok());
        let err = framer.push(&[0u8; 64], &mut events).unwrap_err();
        assert_eq!(err, DecodeError::NoSync(64));
        assert!(events.is_empty());
    }

    #[test]
    fn corrupt_header_after_discovery_is_fatal() {
        let mut stream = adts_frame(4, 2, &[1; 10]);
        stream.extend(adts_frame(4, 2, &[2; 10]));
        stream.extend([0x12; 16]);

        let mut events = Vec::new();
        let err = AdtsFramer::new().push(&stream, &mut events).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidHeader(_)));
        assert_eq!(packets(&events).len(), 2);
    }

    #[test]
    fn format_change_is_fatal() {
        let mut stream = adts_frame(4, 2, &[1; 10]);
        stream.extend(adts_frame(4, 2, &[2; 10]));
        stream.extend(adts_frame(3, 2, &[3; 10]));

        let mut events = Vec::new();
        let err = AdtsFramer::new().push(&stream, &mut events).unwrap_err();
        assert!(matches!(err, DecodeError::FormatChanged(_)));
        assert_eq!(packets(&events).len(), 2);
    }
}
