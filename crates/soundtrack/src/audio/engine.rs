//! Playback engine
//!
//! Runs playback orchestration on a dedicated thread. Control calls, stream
//! signals and session notifications all travel through one channel, so the
//! engine sees them in a single order and owns its state without locking.
//! Effects are reported only through `PlaybackEvent`s.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, trace, warn};

use crate::config::EngineConfig;
use crate::error::{RadioError, Result};
use crate::stream::{ByteSource, HttpSource, IcyConnection, StreamRequest, StreamSignal};

use super::converter::{symphonia_converter_factory, ConverterFactory};
use super::decoder::AdtsDecoder;
use super::events::EventBus;
use super::output::{AudioOutput, OutputFactory};
use super::session::{AudioSession, RouteChangeReason, SessionEvent};
use super::types::{PlaybackEvent, PlaybackState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Play,
    Pause,
    Toggle,
    PauseIfPlaying,
}

enum EngineMessage {
    Control(Control),
    Session(SessionEvent),
    /// Signal from the connection with the given id
    Stream { id: u64, signal: StreamSignal },
    Shutdown,
}

/// Forwards platform session notifications to an engine.
///
/// Cheap to clone; may be used from any thread.
#[derive(Clone)]
pub struct SessionNotifier {
    tx: Sender<EngineMessage>,
}

impl SessionNotifier {
    pub fn notify(&self, event: SessionEvent) {
        let _ = self.tx.send(EngineMessage::Session(event));
    }
}

/// Collects an engine's collaborators before spawning it
pub struct EngineBuilder {
    config: EngineConfig,
    session: Box<dyn AudioSession>,
    output: OutputFactory,
    source: Option<Arc<dyn ByteSource>>,
    converter: ConverterFactory,
    events: Arc<EventBus>,
}

impl EngineBuilder {
    /// Stream source and converter default to HTTP and symphonia
    pub fn new<S>(config: EngineConfig, session: S, output: OutputFactory) -> Self
    where
        S: AudioSession + 'static,
    {
        Self {
            config,
            session: Box::new(session),
            output,
            source: None,
            converter: symphonia_converter_factory(),
            events: Arc::new(EventBus::new()),
        }
    }

    pub fn source(mut self, source: Arc<dyn ByteSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn converter_factory(mut self, factory: ConverterFactory) -> Self {
        self.converter = factory;
        self
    }

    /// Subscribe before the engine starts, so the initial
    /// `BecameAvailable` is not missed
    pub fn subscribe(&self) -> Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    /// Spawn the engine thread. The output is built on that thread.
    pub fn spawn(self) -> Result<PlaybackEngine> {
        let source = match self.source {
            Some(source) => source,
            None => Arc::new(HttpSource::new(
                self.config.connect_timeout,
                self.config.read_timeout,
            )?),
        };

        // Unbounded: the reader thread sends while holding its signal gate,
        // which the engine thread also takes when cancelling.
        let (tx, rx) = unbounded::<EngineMessage>();
        let state = Arc::new(Mutex::new(PlaybackState::Unprepared));

        // The output is not `Send`, so the worker is assembled on its thread
        let config = self.config;
        let session = self.session;
        let make_output = self.output;
        let converter = self.converter;
        let events = self.events.clone();
        let worker_tx = tx.clone();
        let shared_state = state.clone();
        let thread = thread::Builder::new()
            .name("playback-engine".to_string())
            .spawn(move || {
                let worker = Worker {
                    config,
                    session,
                    make_output,
                    source,
                    converter,
                    tx: worker_tx,
                    events,
                    shared_state,
                    state: PlaybackState::Unprepared,
                    output: None,
                    active: None,
                    wants_play: false,
                    resume_after_interruption: false,
                    resume_at: None,
                    next_stream_id: 0,
                };
                worker.run(rx)
            })
            .map_err(|e| RadioError::Engine(format!("Failed to spawn engine thread: {e}")))?;

        Ok(PlaybackEngine {
            tx,
            state,
            events: self.events,
            thread: Some(thread),
        })
    }
}

/// Handle to a running playback engine
pub struct PlaybackEngine {
    tx: Sender<EngineMessage>,
    state: Arc<Mutex<PlaybackState>>,
    events: Arc<EventBus>,
    thread: Option<JoinHandle<Box<dyn AudioSession>>>,
}

impl PlaybackEngine {
    pub fn builder<S>(config: EngineConfig, session: S, output: OutputFactory) -> EngineBuilder
    where
        S: AudioSession + 'static,
    {
        EngineBuilder::new(config, session, output)
    }

    pub fn play(&self) {
        self.send(EngineMessage::Control(Control::Play));
    }

    pub fn pause(&self) {
        self.send(EngineMessage::Control(Control::Pause));
    }

    pub fn toggle_play_pause(&self) {
        self.send(EngineMessage::Control(Control::Toggle));
    }

    /// Pause only if playing or starting; otherwise do nothing
    pub fn pause_if_playing(&self) {
        self.send(EngineMessage::Control(Control::PauseIfPlaying));
    }

    pub fn session_notifier(&self) -> SessionNotifier {
        SessionNotifier {
            tx: self.tx.clone(),
        }
    }

    /// Subscribe to future events
    pub fn subscribe(&self) -> Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    /// Last state published by the engine thread
    pub fn state(&self) -> PlaybackState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop playback, join the engine thread and take the session back
    pub fn shutdown(mut self) -> Option<Box<dyn AudioSession>> {
        self.shutdown_inner()
    }

    fn send(&self, message: EngineMessage) {
        let _ = self.tx.send(message);
    }

    fn shutdown_inner(&mut self) -> Option<Box<dyn AudioSession>> {
        let _ = self.tx.send(EngineMessage::Shutdown);
        self.thread.take().and_then(|thread| thread.join().ok())
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

/// One playback attempt: connection plus decode session
struct ActiveStream {
    id: u64,
    connection: IcyConnection,
    decoder: AdtsDecoder,
    /// Pause requested before the first buffer rendered
    pending_stop: bool,
}

/// Engine state, owned by the engine thread
struct Worker {
    config: EngineConfig,
    session: Box<dyn AudioSession>,
    make_output: OutputFactory,
    source: Arc<dyn ByteSource>,
    converter: ConverterFactory,
    tx: Sender<EngineMessage>,
    events: Arc<EventBus>,
    shared_state: Arc<Mutex<PlaybackState>>,
    state: PlaybackState,
    output: Option<Box<dyn AudioOutput>>,
    active: Option<ActiveStream>,
    /// Our own idea of whether the user wants audio
    wants_play: bool,
    resume_after_interruption: bool,
    resume_at: Option<Instant>,
    next_stream_id: u64,
}

impl Worker {
    fn run(mut self, rx: Receiver<EngineMessage>) -> Box<dyn AudioSession> {
        self.prepare();

        loop {
            let message = match self.resume_at {
                Some(deadline) => match rx.recv_deadline(deadline) {
                    Ok(message) => message,
                    Err(RecvTimeoutError::Timeout) => {
                        self.resume_at = None;
                        info!("Resuming after interruption");
                        self.play();
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match rx.recv() {
                    Ok(message) => message,
                    Err(_) => break,
                },
            };

            match message {
                EngineMessage::Control(control) => self.on_control(control),
                EngineMessage::Session(event) => self.on_session_event(event),
                EngineMessage::Stream { id, signal } => self.on_stream_signal(id, signal),
                EngineMessage::Shutdown => break,
            }
        }

        if self.state.is_active() {
            self.stop_playback(true, "engine shutdown");
        }
        self.output = None;
        debug!("Playback engine stopped");
        self.session
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "Playback state");
        }
        self.state = state;
        *self
            .shared_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Build the output pipeline and become Ready
    fn prepare(&mut self) {
        match (self.make_output)() {
            Ok(output) => {
                info!(format = %output.format(), "Audio output ready");
                self.output = Some(output);
                self.set_state(PlaybackState::Ready);
                self.events.emit(PlaybackEvent::BecameAvailable);
            }
            Err(e) => warn!("Could not prepare audio output: {}", e),
        }
    }

    fn on_control(&mut self, control: Control) {
        trace!(?control, state = %self.state, "Control");
        match control {
            Control::Play => self.play(),
            Control::Pause => self.pause(),
            Control::Toggle => self.toggle(),
            Control::PauseIfPlaying => {
                if self.state.is_active() && self.wants_play {
                    self.pause();
                }
            }
        }
    }

    fn play(&mut self) {
        self.resume_at = None;
        match self.state {
            PlaybackState::Unprepared | PlaybackState::Unavailable => {
                warn!(state = %self.state, "Play ignored: no audio output");
                return;
            }
            PlaybackState::Starting => {
                match self.active.as_mut() {
                    Some(active) if active.pending_stop => {
                        active.pending_stop = false;
                        self.wants_play = true;
                        debug!("Pending pause withdrawn");
                    }
                    _ => warn!("Play ignored: already starting"),
                }
                return;
            }
            PlaybackState::Playing => {
                warn!("Play ignored: already playing");
                return;
            }
            PlaybackState::Ready => {}
        }

        let Some(format) = self.output.as_ref().map(|output| output.format()) else {
            return;
        };

        if let Err(e) = self.session.activate() {
            warn!("Play abandoned: {}", e);
            return;
        }

        if let Some(Err(e)) = self.output.as_mut().map(|output| output.start()) {
            warn!("Play abandoned: {}", e);
            self.deactivate_session();
            return;
        }

        let id = self.next_stream_id;
        self.next_stream_id += 1;
        let tx = self.tx.clone();
        let request = StreamRequest::new(self.config.url.clone(), self.config.mime_type.clone());
        let connection = match IcyConnection::open(self.source.clone(), request, move |signal| {
            let _ = tx.send(EngineMessage::Stream { id, signal });
        }) {
            Ok(connection) => connection,
            Err(e) => {
                warn!("Play abandoned: {}", e);
                if let Some(output) = self.output.as_mut() {
                    output.stop();
                }
                self.deactivate_session();
                return;
            }
        };

        self.active = Some(ActiveStream {
            id,
            connection,
            decoder: AdtsDecoder::with_converter_factory(format, self.converter.clone()),
            pending_stop: false,
        });
        self.wants_play = true;
        self.resume_after_interruption = false;
        self.set_state(PlaybackState::Starting);
        info!(url = %self.config.url, stream = id, "Starting playback");
    }

    fn pause(&mut self) {
        self.resume_at = None;
        match self.state {
            PlaybackState::Starting => {
                if let Some(active) = self.active.as_mut() {
                    active.pending_stop = true;
                }
                self.wants_play = false;
                debug!("Pause deferred until playback starts");
            }
            PlaybackState::Playing => self.stop_playback(true, "paused"),
            _ => warn!(state = %self.state, "Pause ignored: not playing"),
        }
    }

    fn toggle(&mut self) {
        let Some(output) = self.output.as_ref() else {
            warn!(state = %self.state, "Toggle ignored: no audio output");
            return;
        };
        let output_playing = output.is_playing();
        if output_playing != self.wants_play {
            warn!(
                engine = self.wants_play,
                output = output_playing,
                "Playback state mismatch"
            );
        }
        if self.wants_play {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Tear down the active stream and return to Ready.
    ///
    /// Explicit pause, decode failure and unsolicited disconnect all end here.
    fn stop_playback(&mut self, deactivate: bool, reason: &str) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.connection.cancel();
        drop(active);

        if let Some(output) = self.output.as_mut() {
            output.stop();
        }
        if deactivate {
            self.deactivate_session();
        }
        self.wants_play = false;
        self.set_state(PlaybackState::Ready);
        info!(reason, "Playback stopped");
        self.events.emit(PlaybackEvent::Paused);
    }

    fn deactivate_session(&mut self) {
        if let Err(e) = self.session.deactivate() {
            warn!("{}", e);
        }
    }

    fn on_stream_signal(&mut self, id: u64, signal: StreamSignal) {
        if self.active.as_ref().map(|active| active.id) != Some(id) {
            trace!(stream = id, "Ignoring signal from a finished stream");
            return;
        }

        match signal {
            StreamSignal::Connected(headers) => {
                debug!(
                    stream = id,
                    station = headers.station_name.as_deref().unwrap_or("-"),
                    "Stream connected"
                );
            }
            StreamSignal::Audio(bytes) => self.on_audio(&bytes),
            StreamSignal::Title(title) => {
                info!(%title, "Now playing");
                self.events.emit(PlaybackEvent::SongChanged(title));
            }
            StreamSignal::Disconnected { unsolicited } => {
                if unsolicited {
                    self.stop_playback(true, "stream ended");
                }
            }
        }
    }

    fn on_audio(&mut self, bytes: &[u8]) {
        let (Some(active), Some(output)) = (self.active.as_mut(), self.output.as_mut()) else {
            return;
        };
        // A call can schedule a buffer and still fail on a later frame
        let mut scheduled = 0;
        let result = active.decoder.decode(bytes, |buffer| {
            scheduled += 1;
            output.schedule(buffer);
        });

        if scheduled > 0 && self.state == PlaybackState::Starting {
            self.set_state(PlaybackState::Playing);
            info!("Playback started");
            self.events.emit(PlaybackEvent::Played);
        }

        if result.is_err() {
            self.stop_playback(true, "decode error");
            return;
        }
        let pending_stop = self.active.as_ref().is_some_and(|a| a.pending_stop);
        if pending_stop && self.state == PlaybackState::Playing {
            self.stop_playback(true, "paused while starting");
        }
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        debug!(?event, state = %self.state, "Session event");
        match event {
            SessionEvent::InterruptionBegan => {
                // A resume scheduled by an earlier interruption must not fire
                self.resume_at = None;
                if self.state.is_active() {
                    let was_wanted = self.wants_play;
                    self.stop_playback(false, "interrupted");
                    self.resume_after_interruption = was_wanted;
                }
            }
            SessionEvent::InterruptionEnded { should_resume } => {
                if should_resume
                    && self.resume_after_interruption
                    && self.state == PlaybackState::Ready
                {
                    self.resume_at = Some(Instant::now() + self.config.resume_delay);
                    info!(
                        delay_ms = self.config.resume_delay.as_millis() as u64,
                        "Resume scheduled"
                    );
                }
                self.resume_after_interruption = false;
            }
            SessionEvent::RouteChanged(RouteChangeReason::OldDeviceUnavailable) => {
                if self.state.is_active() {
                    info!("Output device went away");
                    self.pause();
                }
            }
            SessionEvent::RouteChanged(_) => {}
            SessionEvent::MediaServicesLost => self.on_services_lost(),
            SessionEvent::MediaServicesReset => match self.state {
                PlaybackState::Unavailable | PlaybackState::Unprepared => self.prepare(),
                _ => warn!(state = %self.state, "Media services reset ignored"),
            },
        }
    }

    /// Discard the whole pipeline without touching the session
    fn on_services_lost(&mut self) {
        self.resume_at = None;
        self.resume_after_interruption = false;
        if self.state == PlaybackState::Unavailable {
            return;
        }

        if let Some(active) = self.active.take() {
            active.connection.cancel();
        }
        if let Some(mut output) = self.output.take() {
            output.stop();
        }
        self.wants_play = false;
        self.set_state(PlaybackState::Unavailable);
        warn!("Media services lost");
        self.events.emit(PlaybackEvent::BecameUnavailable);
    }
}
