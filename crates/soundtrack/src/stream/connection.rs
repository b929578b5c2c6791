//! ICY connection
//!
//! Opens a `ByteSource` on a background thread, validates the response and
//! feeds the body through an `IcyDemuxer`, reporting everything as
//! `StreamSignal`s through a caller-supplied callback.

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::config::network::READ_CHUNK_SIZE;
use crate::error::StreamError;

use super::icy::{IcyDemuxer, IcyEvent, IcyHeaders};
use super::source::{ByteSource, StreamRequest};

/// Signals delivered by an `IcyConnection`, in order.
///
/// `Connected` comes at most once and before any data. `Disconnected` is
/// terminal: nothing follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSignal {
    Connected(IcyHeaders),
    Audio(Vec<u8>),
    Title(String),
    /// `unsolicited` is false only when the owner called `cancel`
    Disconnected { unsolicited: bool },
}

type SignalSink = Box<dyn Fn(StreamSignal) + Send + Sync>;

/// Serializes signal delivery and enforces the single terminal signal.
///
/// The lock is held while the sink runs, so once `cancel` has delivered its
/// disconnect no reader-thread signal can still be in flight.
struct SignalGate {
    terminated: Mutex<bool>,
    sink: SignalSink,
}

impl SignalGate {
    /// Deliver `signal` unless the connection already terminated.
    /// Returns false when the signal was dropped.
    fn deliver(&self, signal: StreamSignal) -> bool {
        let mut terminated = self
            .terminated
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *terminated {
            return false;
        }
        if matches!(signal, StreamSignal::Disconnected { .. }) {
            *terminated = true;
        }
        (self.sink)(signal);
        true
    }

    fn is_terminated(&self) -> bool {
        *self
            .terminated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// One ICY connection attempt. Never reused: open a new one to reconnect.
///
/// The reader thread is detached. A read already blocked when `cancel` is
/// called is not interrupted: the thread drops the body and exits as soon as
/// that read returns, which `HttpSource` bounds by its read timeout. Nothing
/// it reads after the cancel is delivered.
pub struct IcyConnection {
    gate: Arc<SignalGate>,
    stop_flag: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl IcyConnection {
    /// Start connecting in the background.
    ///
    /// Returns immediately; the outcome arrives through `on_signal`, which is
    /// called from the reader thread (or from `cancel`'s caller).
    pub fn open<F>(
        source: Arc<dyn ByteSource>,
        request: StreamRequest,
        on_signal: F,
    ) -> Result<Self, StreamError>
    where
        F: Fn(StreamSignal) + Send + Sync + 'static,
    {
        let gate = Arc::new(SignalGate {
            terminated: Mutex::new(false),
            sink: Box::new(on_signal),
        });
        let stop_flag = Arc::new(AtomicBool::new(false));

        let gate_thread = gate.clone();
        let stop_thread = stop_flag.clone();
        let handle = thread::Builder::new()
            .name("icy-reader".to_string())
            .spawn(move || read_stream(source.as_ref(), &request, &gate_thread, &stop_thread))
            .map_err(|e| StreamError::Spawn(e.to_string()))?;

        Ok(Self {
            gate,
            stop_flag,
            reader: handle,
        })
    }

    /// Stop the connection.
    ///
    /// Delivers `Disconnected { unsolicited: false }` unless the connection
    /// already terminated. No audio or title signal follows once this returns.
    pub fn cancel(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if self
            .gate
            .deliver(StreamSignal::Disconnected { unsolicited: false })
        {
            debug!("ICY connection cancelled");
        }
    }

    /// Whether the terminal signal has been delivered
    pub fn is_finished(&self) -> bool {
        self.gate.is_terminated()
    }

    /// Whether the reader thread still holds the body
    pub fn reader_running(&self) -> bool {
        !self.reader.is_finished()
    }
}

impl Drop for IcyConnection {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Reader thread body. Every exit path delivers a terminal signal unless the
/// owner cancelled first.
fn read_stream(
    source: &dyn ByteSource,
    request: &StreamRequest,
    gate: &SignalGate,
    stop_flag: &AtomicBool,
) {
    let fail = |reason: &dyn std::fmt::Display| {
        if gate.deliver(StreamSignal::Disconnected { unsolicited: true }) {
            warn!(url = %request.url, "ICY stream failed: {}", reason);
        }
    };

    let response = match source.open(request) {
        Ok(response) => response,
        Err(e) => return fail(&e),
    };
    if stop_flag.load(Ordering::SeqCst) {
        return;
    }

    let headers =
        match IcyHeaders::from_response(response.status, &response.headers, &request.mime_type) {
            Ok(headers) => headers,
            Err(e) => return fail(&e),
        };
    info!(
        url = %request.url,
        station = headers.station_name.as_deref().unwrap_or("-"),
        metaint = ?headers.metaint,
        bitrate = ?headers.bitrate,
        "ICY stream connected"
    );

    let mut demuxer = IcyDemuxer::new(headers.metaint);
    if !gate.deliver(StreamSignal::Connected(headers)) {
        return;
    }

    let mut body = response.body;
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    let mut events = Vec::new();

    loop {
        if stop_flag.load(Ordering::SeqCst) {
            return;
        }
        match body.read(&mut chunk) {
            Ok(0) => {
                if gate.deliver(StreamSignal::Disconnected { unsolicited: true }) {
                    info!(url = %request.url, "ICY stream ended by server");
                }
                return;
            }
            Ok(n) => {
                demuxer.feed(&chunk[..n], &mut events);
                for event in events.drain(..) {
                    let signal = match event {
                        IcyEvent::Audio(bytes) => StreamSignal::Audio(bytes),
                        IcyEvent::Title(title) => StreamSignal::Title(title),
                    };
                    if !gate.deliver(signal) {
                        return;
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return fail(&e),
        }
    }
}
