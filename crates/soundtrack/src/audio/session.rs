//! Audio session capability
//!
//! The platform audio session is outside this crate. The engine only needs to
//! activate and deactivate it, and to hear about interruptions, route changes
//! and media-service loss/reset, which callers forward as `SessionEvent`s
//! through the engine's `SessionNotifier`.
//!
//! A session is handed to exactly one engine by value and returned by
//! `PlaybackEngine::shutdown`, so two engines can never drive the same
//! session.

use tracing::debug;

use crate::error::SessionError;

/// Activate/deactivate capability of a platform audio session
pub trait AudioSession: Send {
    fn activate(&mut self) -> Result<(), SessionError>;
    fn deactivate(&mut self) -> Result<(), SessionError>;
}

/// Why the audio route changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteChangeReason {
    NewDeviceAvailable,
    /// The device in use went away (e.g. headphones unplugged)
    OldDeviceUnavailable,
    CategoryChange,
    Override,
    Other,
}

/// Lifecycle notifications from the platform audio session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    InterruptionBegan,
    /// `should_resume` is the platform's hint that playback may continue
    InterruptionEnded { should_resume: bool },
    RouteChanged(RouteChangeReason),
    MediaServicesLost,
    MediaServicesReset,
}

/// Session for desktop platforms, where there is nothing to negotiate
#[derive(Debug, Default)]
pub struct DesktopSession {
    active: bool,
}

impl DesktopSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl AudioSession for DesktopSession {
    fn activate(&mut self) -> Result<(), SessionError> {
        self.active = true;
        debug!("Desktop audio session activated");
        Ok(())
    }

    fn deactivate(&mut self) -> Result<(), SessionError> {
        self.active = false;
        debug!("Desktop audio session deactivated");
        Ok(())
    }
}
