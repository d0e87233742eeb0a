//! Engine thread communication types
//!
//! This module provides commands and events for the engine thread architecture:
//! - `AudioCommand` - Commands sent to the engine thread
//! - `AudioEvent` - Events sent from the engine thread to the host
//! - `SharedPlaybackState` - Thread-safe state for non-blocking host reads
//!
//! ## Architecture
//! ```text
//! Host (AudioHandle) --[AudioCommand]--> Engine Thread (PlaybackController)
//! Host               <--[AudioEvent]---- Engine Thread
//! Host               <--[SharedState]--- Engine Thread (non-blocking reads)
//! MediaSource        --[AudioCommand::Media]--> Engine Thread
//! Ticker             --[AudioCommand::Tick]---> Engine Thread
//! ```
//!
//! Everything that can change playback state goes through the one command
//! queue, so transitions are applied in arrival order.

use std::sync::Arc;

use parking_lot::RwLock;

use super::error::ErrorInfo;
use super::source::MediaEvent;
use super::state::{Phase, PlaybackState, Track};

// ============ Commands (Host -> Engine Thread) ============

/// Commands processed by the engine thread
///
/// The host sends and returns immediately. Results are communicated back via
/// `AudioEvent` and `SharedPlaybackState`.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioCommand {
    /// Load a track, replacing whatever is loaded
    Open { track: Track },
    /// Open a track and start playing as soon as it is ready
    OpenAndPlay { track: Track },
    Play,
    Pause,
    TogglePlay,
    /// Seek to an absolute position in seconds
    SeekTo { secs: f64 },
    SkipForward,
    SkipBackward,
    /// Set volume (0.0 - 1.0)
    SetVolume { volume: f32 },
    SetMuted { muted: bool },
    ToggleMute,
    ToggleRepeat,
    ToggleShuffle,
    /// Ask the host for the next track
    RequestNext,
    /// Reload the current track after an error
    Retry,
    /// Release the track and return to idle
    Close,
    /// Periodic tick for position reports and load timeouts
    Tick,
    /// Report from a media source
    Media {
        generation: u64,
        seek_epoch: u64,
        event: MediaEvent,
    },
    /// Stop the engine thread
    Shutdown,
}

impl AudioCommand {
    /// Short name used in logs and rejections
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::OpenAndPlay { .. } => "open and play",
            Self::Play => "play",
            Self::Pause => "pause",
            Self::TogglePlay => "toggle play",
            Self::SeekTo { .. } => "seek",
            Self::SkipForward => "skip forward",
            Self::SkipBackward => "skip backward",
            Self::SetVolume { .. } => "set volume",
            Self::SetMuted { .. } => "set muted",
            Self::ToggleMute => "toggle mute",
            Self::ToggleRepeat => "toggle repeat",
            Self::ToggleShuffle => "toggle shuffle",
            Self::RequestNext => "request next",
            Self::Retry => "retry",
            Self::Close => "close",
            Self::Tick => "tick",
            Self::Media { .. } => "media event",
            Self::Shutdown => "shutdown",
        }
    }
}

// ============ Events (Engine Thread -> Host) ============

/// Events sent from the engine thread to the host
#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    /// Playback state changed
    StateChanged(PlaybackState),
    /// Playback failed, the state is now `Phase::Error`
    Error(ErrorInfo),
    /// The current track finished (or the user asked to skip)
    RequestNext { shuffle: bool },
    /// A command was not valid in the current phase and was ignored
    CommandRejected {
        command: &'static str,
        reason: String,
    },
}

// ============ Shared State ============

/// Thread-safe playback state for non-blocking reads
///
/// Written only by the engine thread, read by any number of handles.
#[derive(Clone, Default)]
pub struct SharedPlaybackState {
    inner: Arc<RwLock<SharedStateInner>>,
}

#[derive(Default)]
struct SharedStateInner {
    state: PlaybackState,
    track: Option<Track>,
}

impl std::fmt::Debug for SharedPlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("SharedPlaybackState")
            .field("phase", &inner.state.phase)
            .field("position_secs", &inner.state.position_secs)
            .field("duration_secs", &inner.state.duration_secs)
            .finish_non_exhaustive()
    }
}

impl SharedPlaybackState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> PlaybackState {
        self.inner.read().state.clone()
    }

    /// Currently loaded track
    pub fn track(&self) -> Option<Track> {
        self.inner.read().track.clone()
    }

    pub fn phase(&self) -> Phase {
        self.inner.read().state.phase
    }

    pub fn position_secs(&self) -> f64 {
        self.inner.read().state.position_secs
    }

    pub fn is_playing(&self) -> bool {
        self.phase() == Phase::Playing
    }

    // ---- Update methods (called by engine thread) ----

    pub(crate) fn store(&self, state: &PlaybackState, track: Option<&Track>) {
        let mut inner = self.inner.write();
        inner.state = state.clone();
        if inner.track.as_ref() != track {
            inner.track = track.cloned();
        }
    }
}

// ============ Channel Types ============

/// Sender for audio commands (held by AudioHandle, media sources and the ticker)
pub type AudioCommandSender = tokio::sync::mpsc::UnboundedSender<AudioCommand>;

/// Receiver for audio commands (held by engine thread)
pub type AudioCommandReceiver = tokio::sync::mpsc::UnboundedReceiver<AudioCommand>;

/// Sender for audio events (held by engine thread)
pub type AudioEventSender = tokio::sync::mpsc::UnboundedSender<AudioEvent>;

/// Receiver for audio events (held by the host)
pub type AudioEventReceiver = tokio::sync::mpsc::UnboundedReceiver<AudioEvent>;

/// Create a new audio command channel
pub fn audio_command_channel() -> (AudioCommandSender, AudioCommandReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// Create a new audio event channel
pub fn audio_event_channel() -> (AudioEventSender, AudioEventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}
