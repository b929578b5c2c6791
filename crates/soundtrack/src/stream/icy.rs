//! ICY protocol demuxing
//!
//! Separates interleaved `StreamTitle` metadata from audio bytes in an
//! Icecast/Shoutcast response body. The demuxer is a pure state machine: it
//! performs no I/O and produces the same events whatever the chunking of its
//! input.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::error::StreamError;
use crate::stream::metadata::extract_icy_title;

/// Headers parsed from an ICY stream response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcyHeaders {
    /// Audio bytes between metadata blocks; `None` when the stream has none
    pub metaint: Option<usize>,
    pub content_type: String,
    pub station_name: Option<String>,
    pub genre: Option<String>,
    pub bitrate: Option<u32>,
}

impl IcyHeaders {
    /// Validate a response head and parse its ICY headers.
    ///
    /// The status must be 200 and the `Content-Type` essence must equal
    /// `expected_mime` (ASCII case-insensitive). `headers` must use lowercase
    /// names. `icy-metaint: 0` is treated as no metadata; a value that is not
    /// a number is rejected.
    pub fn from_response(
        status: u16,
        headers: &HashMap<String, String>,
        expected_mime: &str,
    ) -> Result<Self, StreamError> {
        if status != 200 {
            return Err(StreamError::Status(status));
        }

        let content_type = headers.get("content-type").map(|v| mime_essence(v));
        let expected = mime_essence(expected_mime);
        let content_type = match content_type {
            Some(actual) if actual == expected => actual,
            actual => {
                return Err(StreamError::MimeMismatch {
                    expected,
                    actual,
                })
            }
        };

        let metaint = match headers.get("icy-metaint") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(0) => None,
                Ok(n) => Some(n),
                Err(_) => {
                    return Err(StreamError::MalformedHeader {
                        name: "icy-metaint",
                        value: raw.clone(),
                    })
                }
            },
            None => None,
        };

        let text = |name: &str| {
            headers
                .get(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Ok(Self {
            metaint,
            content_type,
            station_name: text("icy-name"),
            genre: text("icy-genre"),
            bitrate: headers.get("icy-br").and_then(|v| v.trim().parse().ok()),
        })
    }
}

/// Lowercased media type with parameters removed: `Audio/AAC; x=1` → `audio/aac`
fn mime_essence(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// One unit of demuxed output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IcyEvent {
    Audio(Vec<u8>),
    Title(String),
}

/// Where the demuxer is within the metadata interval
#[derive(Debug, Clone, PartialEq, Eq)]
enum ParserState {
    AwaitingAudio { remaining: usize },
    AwaitingLengthByte,
    AwaitingMetadataBody { remaining: usize, partial: Vec<u8> },
}

/// Stateful ICY demuxer for one connection.
///
/// Metadata blocks may straddle reads; the partial block is kept until it is
/// complete. Titles are only reported when they differ from the previous one.
#[derive(Debug)]
pub struct IcyDemuxer {
    metaint: Option<usize>,
    state: ParserState,
    last_title: Option<String>,
}

impl IcyDemuxer {
    /// Create a demuxer for a stream with the given metadata interval.
    /// `None` or `Some(0)` means the whole body is audio.
    pub fn new(metaint: Option<usize>) -> Self {
        let metaint = metaint.filter(|&n| n > 0);
        Self {
            metaint,
            state: ParserState::AwaitingAudio {
                remaining: metaint.unwrap_or(0),
            },
            last_title: None,
        }
    }

    pub fn metaint(&self) -> Option<usize> {
        self.metaint
    }

    /// Last title reported, if any
    pub fn last_title(&self) -> Option<&str> {
        self.last_title.as_deref()
    }

    /// Demux one chunk, appending events to `out`.
    ///
    /// Adjacent audio produced by the same call is coalesced into a single
    /// `Audio` event.
    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<IcyEvent>) {
        let first_new = out.len();

        let Some(interval) = self.metaint else {
            push_audio(out, first_new, chunk);
            return;
        };

        let mut pos = 0;
        while pos < chunk.len() {
            match &mut self.state {
                ParserState::AwaitingAudio { remaining } => {
                    let n = (*remaining).min(chunk.len() - pos);
                    push_audio(out, first_new, &chunk[pos..pos + n]);
                    *remaining -= n;
                    pos += n;
                    if *remaining == 0 {
                        self.state = ParserState::AwaitingLengthByte;
                    }
                }
                ParserState::AwaitingLengthByte => {
                    let len = chunk[pos] as usize * 16;
                    pos += 1;
                    self.state = if len == 0 {
                        ParserState::AwaitingAudio {
                            remaining: interval,
                        }
                    } else {
                        trace!(len, "ICY metadata block");
                        ParserState::AwaitingMetadataBody {
                            remaining: len,
                            partial: Vec::with_capacity(len),
                        }
                    };
                }
                ParserState::AwaitingMetadataBody { remaining, partial } => {
                    let n = (*remaining).min(chunk.len() - pos);
                    partial.extend_from_slice(&chunk[pos..pos + n]);
                    *remaining -= n;
                    pos += n;
                    if *remaining == 0 {
                        let block = std::mem::take(partial);
                        self.state = ParserState::AwaitingAudio {
                            remaining: interval,
                        };
                        self.on_metadata(&block, out);
                    }
                }
            }
        }
    }

    fn on_metadata(&mut self, block: &[u8], out: &mut Vec<IcyEvent>) {
        let Some(title) = extract_icy_title(block) else {
            return;
        };
        if self.last_title.as_deref() == Some(title.as_str()) {
            trace!(%title, "ICY title unchanged");
            return;
        }
        debug!(%title, "ICY title");
        self.last_title = Some(title.clone());
        out.push(IcyEvent::Title(title));
    }
}

fn push_audio(out: &mut Vec<IcyEvent>, first_new: usize, bytes: &[u8]) {
    if bytes.is_empty() {
        return;
    }
    if out.len() > first_new {
        if let Some(IcyEvent::Audio(prev)) = out.last_mut() {
            prev.extend_from_slice(bytes);
            return;
        }
    }
    out.push(IcyEvent::Audio(bytes.to_vec()));
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build an ICY body: each segment is `metaint` audio bytes followed by a
    /// metadata block (`None` → zero length byte).
    fn icy_body(metaint: usize, segments: &[(u8, Option<&str>)]) -> Vec<u8> {
        let mut body = Vec::new();
        for (fill, title) in segments {
            body.extend(std::iter::repeat(*fill).take(metaint));
            match title {
                Some(title) => body.extend(metadata_block(title)),
                None => body.push(0),
            }
        }
        body
    }

    fn metadata_block(title: &str) -> Vec<u8> {
        let mut text = format!("StreamTitle='{title}';").into_bytes();
        let blocks = text.len().div_ceil(16);
        text.resize(blocks * 16, 0);
        let mut out = vec![blocks as u8];
        out.extend(text);
        out
    }

    fn feed_in_chunks(demuxer: &mut IcyDemuxer, data: &[u8], size: usize) -> Vec<IcyEvent> {
        let mut out = Vec::new();
        for chunk in data.chunks(size) {
            demuxer.feed(chunk, &mut out);
        }
        out
    }

    /// Concatenate adjacent audio events so different chunkings compare equal
    fn normalize(events: Vec<IcyEvent>) -> Vec<IcyEvent> {
        let mut merged: Vec<IcyEvent> = Vec::new();
        for event in events {
            match (merged.last_mut(), event) {
                (Some(IcyEvent::Audio(prev)), IcyEvent::Audio(bytes)) => prev.extend(bytes),
                (_, event) => merged.push(event),
            }
        }
        merged
    }

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // --- Demuxing ---

    #[test]
    fn round_trip_audio_title_audio() {
        let metaint = 8;
        let mut body = icy_body(metaint, &[(0xAA, Some("A - B"))]);
        body.extend(std::iter::repeat(0xBB).take(metaint));

        let mut demuxer = IcyDemuxer::new(Some(metaint));
        let events = normalize(feed_in_chunks(&mut demuxer, &body, body.len()));

        assert_eq!(
            events,
            vec![
                IcyEvent::Audio(vec![0xAA; metaint]),
                IcyEvent::Title("A - B".to_string()),
                IcyEvent::Audio(vec![0xBB; metaint]),
            ]
        );
    }

    #[test]
    fn chunk_boundaries_do_not_change_output() {
        for metaint in [1, 2, 7, 16, 100] {
            let body = icy_body(
                metaint,
                &[
                    (1, Some("First")),
                    (2, None),
                    (3, Some("First")),
                    (4, Some("Second - Song")),
                    (5, None),
                ],
            );

            let bulk = normalize(feed_in_chunks(
                &mut IcyDemuxer::new(Some(metaint)),
                &body,
                body.len(),
            ));
            for size in [1, 2, 3, 5, 17, 64] {
                let chunked =
                    normalize(feed_in_chunks(&mut IcyDemuxer::new(Some(metaint)), &body, size));
                assert_eq!(chunked, bulk, "metaint {metaint}, chunk size {size}");
            }
        }
    }

    #[test]
    fn byte_at_a_time_matches_bulk_round_trip() {
        let metaint = 8;
        let mut body = icy_body(metaint, &[(0xAA, Some("A - B"))]);
        body.extend(std::iter::repeat(0xBB).take(metaint));

        let mut demuxer = IcyDemuxer::new(Some(metaint));
        let events = normalize(feed_in_chunks(&mut demuxer, &body, 1));
        assert_eq!(
            events,
            vec![
                IcyEvent::Audio(vec![0xAA; metaint]),
                IcyEvent::Title("A - B".to_string()),
                IcyEvent::Audio(vec![0xBB; metaint]),
            ]
        );
    }

    #[test]
    fn repeated_title_is_reported_once() {
        let metaint = 4;
        let body = icy_body(metaint, &[(1, Some("Same")), (2, Some("Same")), (3, Some("Same"))]);
        let mut demuxer = IcyDemuxer::new(Some(metaint));
        let titles: Vec<_> = feed_in_chunks(&mut demuxer, &body, 3)
            .into_iter()
            .filter(|e| matches!(e, IcyEvent::Title(_)))
            .collect();
        assert_eq!(titles, vec![IcyEvent::Title("Same".to_string())]);
        assert_eq!(demuxer.last_title(), Some("Same"));
    }

    #[test]
    fn title_reported_again_after_a_different_one() {
        let metaint = 4;
        let body = icy_body(metaint, &[(1, Some("X")), (2, Some("Y")), (3, Some("X"))]);
        let titles: Vec<_> = feed_in_chunks(&mut IcyDemuxer::new(Some(metaint)), &body, 64)
            .into_iter()
            .filter_map(|e| match e {
                IcyEvent::Title(t) => Some(t),
                IcyEvent::Audio(_) => None,
            })
            .collect();
        assert_eq!(titles, vec!["X", "Y", "X"]);
    }

    #[test]
    fn without_metaint_everything_is_audio() {
        let body = icy_body(4, &[(1, Some("Not Metadata"))]);
        for metaint in [None, Some(0)] {
            let mut demuxer = IcyDemuxer::new(metaint);
            assert_eq!(demuxer.metaint(), None);
            let events = normalize(feed_in_chunks(&mut demuxer, &body, 5));
            assert_eq!(events, vec![IcyEvent::Audio(body.clone())]);
        }
    }

    #[test]
    fn metadata_split_across_reads_is_reassembled() {
        let metaint = 4;
        let body = icy_body(metaint, &[(9, Some("A fairly long title that spans blocks"))]);
        let mut demuxer = IcyDemuxer::new(Some(metaint));
        let mut out = Vec::new();
        let (head, tail) = body.split_at(metaint + 10);
        demuxer.feed(head, &mut out);
        assert_eq!(out, vec![IcyEvent::Audio(vec![9; metaint])]);
        demuxer.feed(tail, &mut out);
        assert_eq!(
            out.last(),
            Some(&IcyEvent::Title("A fairly long title that spans blocks".to_string()))
        );
    }

    #[test]
    fn audio_around_empty_block_is_coalesced_within_one_feed() {
        let metaint = 3;
        let body = icy_body(metaint, &[(1, None), (2, None)]);
        let mut out = Vec::new();
        IcyDemuxer::new(Some(metaint)).feed(&body, &mut out);
        assert_eq!(out, vec![IcyEvent::Audio(vec![1, 1, 1, 2, 2, 2])]);
    }

    #[test]
    fn blank_title_is_not_reported() {
        let metaint = 2;
        let body = icy_body(metaint, &[(1, Some(""))]);
        let events = feed_in_chunks(&mut IcyDemuxer::new(Some(metaint)), &body, 64);
        assert!(events.iter().all(|e| matches!(e, IcyEvent::Audio(_))));
    }

    // --- Response validation ---

    #[test]
    fn accepts_matching_response() {
        let h = headers(&[
            ("content-type", "Audio/AAC; charset=binary"),
            ("icy-metaint", "16000"),
            ("icy-name", "Test FM"),
            ("icy-br", "64"),
        ]);
        let icy = IcyHeaders::from_response(200, &h, "audio/aac").unwrap();
        assert_eq!(icy.metaint, Some(16000));
        assert_eq!(icy.content_type, "audio/aac");
        assert_eq!(icy.station_name.as_deref(), Some("Test FM"));
        assert_eq!(icy.bitrate, Some(64));
        assert_eq!(icy.genre, None);
    }

    #[test]
    fn rejects_non_200_status() {
        let h = headers(&[("content-type", "audio/aac")]);
        let err = IcyHeaders::from_response(404, &h, "audio/aac").unwrap_err();
        assert!(matches!(err, StreamError::Status(404)));
    }

    #[test]
    fn rejects_mime_mismatch_and_missing_content_type() {
        let h = headers(&[("content-type", "audio/mpeg")]);
        let err = IcyHeaders::from_response(200, &h, "audio/aac").unwrap_err();
        assert!(matches!(
            err,
            StreamError::MimeMismatch { actual: Some(ref a), .. } if a == "audio/mpeg"
        ));

        let err = IcyHeaders::from_response(200, &HashMap::new(), "audio/aac").unwrap_err();
        assert!(matches!(err, StreamError::MimeMismatch { actual: None, .. }));
    }

    #[test]
    fn rejects_non_numeric_metaint() {
        let h = headers(&[("content-type", "audio/aac"), ("icy-metaint", "lots")]);
        let err = IcyHeaders::from_response(200, &h, "audio/aac").unwrap_err();
        assert!(matches!(
            err,
            StreamError::MalformedHeader { name: "icy-metaint", .. }
        ));
    }

    #[test]
    fn zero_metaint_means_no_metadata() {
        let h = headers(&[("content-type", "audio/aac"), ("icy-metaint", "0")]);
        let icy = IcyHeaders::from_response(200, &h, "audio/aac").unwrap();
        assert_eq!(icy.metaint, None);
    }
}
