//! Byte sources
//!
//! A `ByteSource` opens a stream and hands back the response head plus a
//! blocking body reader. `HttpSource` talks to real servers; `MemorySource`
//! and `FileSource` stand in for them in tests and local playback.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::config::network::{ICY_METADATA_HEADER, USER_AGENT};
use crate::error::StreamError;

/// What to open and what to expect back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub url: String,
    /// Expected `Content-Type` essence, e.g. `audio/aac`
    pub mime_type: String,
}

impl StreamRequest {
    pub fn new(url: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// Response head and body of an opened stream
pub struct StreamResponse {
    pub status: u16,
    /// Header values keyed by lowercase name
    pub headers: HashMap<String, String>,
    pub body: Box<dyn Read + Send>,
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Something that can open a long-lived audio byte stream.
///
/// `open` blocks until the response head is available.
pub trait ByteSource: Send + Sync {
    fn open(&self, request: &StreamRequest) -> Result<StreamResponse, StreamError>;
}

/// HTTP source that asks for interleaved ICY metadata
pub struct HttpSource {
    client: reqwest::blocking::Client,
}

impl HttpSource {
    /// Build the HTTP client. `read_timeout` bounds each body read, so a
    /// stalled server ends the stream instead of hanging it.
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self, StreamError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl ByteSource for HttpSource {
    fn open(&self, request: &StreamRequest) -> Result<StreamResponse, StreamError> {
        let (name, value) = ICY_METADATA_HEADER;
        let response = self.client.get(&request.url).header(name, value).send()?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                let value = value.to_str().ok()?;
                Some((name.as_str().to_ascii_lowercase(), value.to_string()))
            })
            .collect();
        debug!(url = %request.url, status, "HTTP response");

        Ok(StreamResponse {
            status,
            headers,
            body: Box::new(response),
        })
    }
}

/// In-memory source replaying a fixed response.
///
/// Reads return at most `chunk_size` bytes each, which makes chunk-boundary
/// behaviour reproducible.
#[derive(Debug, Clone)]
pub struct MemorySource {
    status: u16,
    headers: HashMap<String, String>,
    body: Vec<u8>,
    chunk_size: usize,
}

impl MemorySource {
    /// A 200 response with the given content type and body
    pub fn new(content_type: &str, body: Vec<u8>) -> Self {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), content_type.to_string());
        Self {
            status: 200,
            headers,
            body,
            chunk_size: usize::MAX,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Add a header; the name is lowercased
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

impl ByteSource for MemorySource {
    fn open(&self, _request: &StreamRequest) -> Result<StreamResponse, StreamError> {
        Ok(StreamResponse {
            status: self.status,
            headers: self.headers.clone(),
            body: Box::new(ChunkedReader {
                inner: io::Cursor::new(self.body.clone()),
                chunk_size: self.chunk_size,
            }),
        })
    }
}

/// Reader that caps the size of every read
struct ChunkedReader<R> {
    inner: R,
    chunk_size: usize,
}

impl<R: Read> Read for ChunkedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.chunk_size);
        self.inner.read(&mut buf[..n])
    }
}

/// Local ADTS file presented as a metadata-free 200 response
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    content_type: String,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>, content_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content_type: content_type.into(),
        }
    }
}

impl ByteSource for FileSource {
    fn open(&self, _request: &StreamRequest) -> Result<StreamResponse, StreamError> {
        let file = File::open(&self.path)?;
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), self.content_type.clone());
        debug!(path = %self.path.display(), "Opened file source");
        Ok(StreamResponse {
            status: 200,
            headers,
            body: Box::new(io::BufReader::new(file)),
        })
    }
}
