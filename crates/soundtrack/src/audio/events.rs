//! Playback event delivery
//!
//! `EventBus` broadcasts `PlaybackEvent`s to every subscriber. Callers either
//! drain a subscription on their own thread or hand a `PlaybackDelegate` to
//! `spawn_delegate`.

use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};

use super::types::PlaybackEvent;

/// Fan-out of engine events.
///
/// Each listener gets its own unbounded channel, so a slow reader never
/// holds up the engine thread. Listeners whose receiver was dropped are
/// forgotten on the next emit.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<Sender<PlaybackEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receiver for every event emitted from now on
    pub fn subscribe(&self) -> Receiver<PlaybackEvent> {
        let (tx, rx) = unbounded();
        self.listeners().push(tx);
        rx
    }

    pub fn emit(&self, event: PlaybackEvent) {
        self.listeners().retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Listeners still registered; dropped receivers count until the next emit
    pub fn subscriber_count(&self) -> usize {
        self.listeners().len()
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<Sender<PlaybackEvent>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Receives engine events. Every method defaults to doing nothing.
pub trait PlaybackDelegate: Send {
    fn did_become_available(&mut self) {}
    fn did_become_unavailable(&mut self) {}
    fn did_play(&mut self) {}
    fn did_pause(&mut self) {}
    fn did_change_song(&mut self, _title: &str) {}
}

/// Call the delegate method matching `event`
pub fn dispatch(delegate: &mut dyn PlaybackDelegate, event: &PlaybackEvent) {
    match event {
        PlaybackEvent::BecameAvailable => delegate.did_become_available(),
        PlaybackEvent::BecameUnavailable => delegate.did_become_unavailable(),
        PlaybackEvent::Played => delegate.did_play(),
        PlaybackEvent::Paused => delegate.did_pause(),
        PlaybackEvent::SongChanged(title) => delegate.did_change_song(title),
    }
}

/// Run `delegate` on its own thread until `events` disconnects, then hand it
/// back through the join handle.
pub fn spawn_delegate<D>(
    events: Receiver<PlaybackEvent>,
    mut delegate: D,
) -> io::Result<JoinHandle<D>>
where
    D: PlaybackDelegate + 'static,
{
    thread::Builder::new()
        .name("playback-delegate".to_string())
        .spawn(move || {
            for event in events {
                dispatch(&mut delegate, &event);
            }
            delegate
        })
}
