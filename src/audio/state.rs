//! Playback state model
//!
//! Plain data shared between the engine thread and its observers:
//! - `Phase` - the playback state machine and its legal edges
//! - `Track` - metadata for the loaded media
//! - `PlaybackState` - the snapshot published on every change

use serde::{Deserialize, Serialize};

use super::error::ErrorInfo;

/// Artist shown when the host does not provide one
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// Playback phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Nothing loaded
    #[default]
    Idle,
    /// Media is being opened and probed
    Loading,
    /// Media is prepared, playback has not started
    Ready,
    Playing,
    Paused,
    /// Playback reached the end of the media
    Ended,
    /// Unrecoverable failure, see `PlaybackState::last_error`
    Error,
}

impl Phase {
    /// Whether the state machine may move from `self` to `next`
    ///
    /// Staying in the same phase is always allowed.
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;

        if self == next {
            return true;
        }

        match (self, next) {
            // open / retry and close are accepted from everywhere
            (_, Loading) | (_, Idle) => true,
            (Loading, Ready) => true,
            (Ready | Paused | Ended, Playing) => true,
            (Playing | Ended, Paused) => true,
            (Ready | Playing | Paused, Ended) => true,
            (Loading | Ready | Playing | Paused | Ended, Error) => true,
            _ => false,
        }
    }

    /// Whether a prepared media source exists in this phase
    pub fn has_media(self) -> bool {
        matches!(
            self,
            Phase::Ready | Phase::Playing | Phase::Paused | Phase::Ended
        )
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Loading => "loading",
            Phase::Ready => "ready",
            Phase::Playing => "playing",
            Phase::Paused => "paused",
            Phase::Ended => "ended",
            Phase::Error => "error",
        };
        f.write_str(name)
    }
}

/// Media to be played, as described by the host
///
/// Immutable once opened. Opening another track replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Where the media lives (a local path or `file://` URL)
    pub locator: String,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub cover_locator: Option<String>,
    /// Duration reported by the host before the media is probed
    pub duration_hint: Option<f64>,
}

impl Track {
    /// Create a track with the default artist
    pub fn new(locator: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            title: title.into(),
            artist: UNKNOWN_ARTIST.to_string(),
            album: None,
            cover_locator: None,
            duration_hint: None,
        }
    }

    /// Set the artist, falling back to `UNKNOWN_ARTIST` for blank names
    pub fn with_artist(mut self, artist: Option<&str>) -> Self {
        self.artist = match artist.map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => UNKNOWN_ARTIST.to_string(),
        };
        self
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    pub fn with_cover(mut self, cover_locator: impl Into<String>) -> Self {
        self.cover_locator = Some(cover_locator.into());
        self
    }

    /// Set the duration hint. Non-finite or negative values are ignored.
    pub fn with_duration_hint(mut self, secs: f64) -> Self {
        self.duration_hint = (secs.is_finite() && secs > 0.0).then_some(secs);
        self
    }
}

/// Snapshot of the playback state
///
/// Owned by the controller. Everyone else sees copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub phase: Phase,
    /// Seconds from the start of the media
    pub position_secs: f64,
    /// Seconds, 0.0 until known
    pub duration_secs: f64,
    /// Linear volume (0.0 to 1.0), kept while muted
    pub volume: f32,
    pub muted: bool,
    pub repeat: bool,
    pub shuffle: bool,
    pub last_error: Option<ErrorInfo>,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            position_secs: 0.0,
            duration_secs: 0.0,
            volume: 1.0,
            muted: false,
            repeat: false,
            shuffle: false,
            last_error: None,
        }
    }
}

impl PlaybackState {
    /// Gain actually applied to the output
    pub fn output_gain(&self) -> f32 {
        output_gain(self.volume, self.muted)
    }

    /// Whether the duration has been determined
    pub fn duration_known(&self) -> bool {
        self.duration_secs > 0.0
    }

    /// Progress through the media (0.0 to 1.0), 0.0 while the duration is unknown
    pub fn progress(&self) -> f32 {
        if self.duration_known() {
            (self.position_secs / self.duration_secs).clamp(0.0, 1.0) as f32
        } else {
            0.0
        }
    }

    /// Clamp a requested position into the playable range
    ///
    /// NaN maps to 0. With an unknown duration only the lower bound applies.
    pub fn clamp_position(&self, secs: f64) -> f64 {
        let secs = if secs.is_nan() { 0.0 } else { secs.max(0.0) };
        if self.duration_known() {
            secs.min(self.duration_secs)
        } else if secs.is_finite() {
            secs
        } else {
            0.0
        }
    }
}

/// Mute is multiplicative over volume
pub fn output_gain(volume: f32, muted: bool) -> f32 {
    if muted { 0.0 } else { volume.clamp(0.0, 1.0) }
}
