//! Audio handle for non-blocking playback control from the host
//!
//! `AudioHandle` provides a non-blocking interface to control playback.
//! All methods send commands to the engine thread and return immediately.
//! State is read from `SharedPlaybackState` without blocking.

use super::events::{AudioCommand, AudioCommandSender, SharedPlaybackState};
use super::state::{PlaybackState, Track};

/// Handle for controlling playback from the host
///
/// All methods are non-blocking - they send commands to the engine thread
/// and return immediately. Results are communicated via `AudioEvent`.
///
/// State queries (snapshot, is_playing, etc.) read from shared state
/// without blocking, even if the engine thread is busy.
#[derive(Clone)]
pub struct AudioHandle {
    command_tx: AudioCommandSender,
    state: SharedPlaybackState,
}

impl std::fmt::Debug for AudioHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioHandle")
            .field("state", &self.state)
            .finish()
    }
}

impl AudioHandle {
    /// Create a new audio handle
    pub fn new(command_tx: AudioCommandSender, state: SharedPlaybackState) -> Self {
        Self { command_tx, state }
    }

    fn send(&self, command: AudioCommand) {
        if self.command_tx.send(command).is_err() {
            tracing::warn!("Engine thread is gone, command dropped");
        }
    }

    // ============ Track ============

    /// Open a track, replacing the current one
    ///
    /// Listen for `AudioEvent::StateChanged` with `Phase::Ready` to know
    /// when it can play.
    pub fn open_track(&self, track: Track) {
        self.send(AudioCommand::Open { track });
    }

    /// Open a track and play it once it has loaded
    pub fn open_and_play(&self, track: Track) {
        self.send(AudioCommand::OpenAndPlay { track });
    }

    /// Reload the current track after an error
    pub fn retry(&self) {
        self.send(AudioCommand::Retry);
    }

    /// Release the current track
    pub fn close(&self) {
        self.send(AudioCommand::Close);
    }

    // ============ Playback Control ============

    pub fn play(&self) {
        self.send(AudioCommand::Play);
    }

    pub fn pause(&self) {
        self.send(AudioCommand::Pause);
    }

    pub fn toggle_play(&self) {
        self.send(AudioCommand::TogglePlay);
    }

    /// Seek to position in seconds
    pub fn seek_to(&self, secs: f64) {
        self.send(AudioCommand::SeekTo { secs });
    }

    pub fn skip_forward(&self) {
        self.send(AudioCommand::SkipForward);
    }

    pub fn skip_backward(&self) {
        self.send(AudioCommand::SkipBackward);
    }

    /// Ask the host for the next track
    pub fn request_next(&self) {
        self.send(AudioCommand::RequestNext);
    }

    // ============ Volume / Flags ============

    /// Set volume (0.0 - 1.0)
    pub fn set_volume(&self, volume: f32) {
        self.send(AudioCommand::SetVolume { volume });
    }

    pub fn set_muted(&self, muted: bool) {
        self.send(AudioCommand::SetMuted { muted });
    }

    pub fn toggle_mute(&self) {
        self.send(AudioCommand::ToggleMute);
    }

    pub fn toggle_repeat(&self) {
        self.send(AudioCommand::ToggleRepeat);
    }

    pub fn toggle_shuffle(&self) {
        self.send(AudioCommand::ToggleShuffle);
    }

    // ============ State Queries (non-blocking) ============

    /// Copy of the latest published state
    pub fn snapshot(&self) -> PlaybackState {
        self.state.snapshot()
    }

    pub fn track(&self) -> Option<Track> {
        self.state.track()
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    /// Get shared state reference
    pub fn shared_state(&self) -> &SharedPlaybackState {
        &self.state
    }

    // ============ Lifecycle ============

    /// Stop the engine thread
    pub(crate) fn shutdown(&self) {
        let _ = self.command_tx.send(AudioCommand::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::events::audio_command_channel;

    #[test]
    fn test_handle_sends_commands() {
        let (tx, mut rx) = audio_command_channel();
        let handle = AudioHandle::new(tx, SharedPlaybackState::new());

        handle.open_track(Track::new("/music/a.mp3", "A"));
        handle.seek_to(42.0);
        handle.toggle_mute();
        handle.close();
        handle.open_and_play(Track::new("/music/b.mp3", "B"));

        assert!(matches!(rx.try_recv(), Ok(AudioCommand::Open { .. })));
        assert_eq!(rx.try_recv(), Ok(AudioCommand::SeekTo { secs: 42.0 }));
        assert_eq!(rx.try_recv(), Ok(AudioCommand::ToggleMute));
        assert_eq!(rx.try_recv(), Ok(AudioCommand::Close));
        assert!(matches!(
            rx.try_recv(),
            Ok(AudioCommand::OpenAndPlay { track }) if track.title == "B"
        ));
    }

    #[test]
    fn test_send_after_engine_gone() {
        let (tx, rx) = audio_command_channel();
        let handle = AudioHandle::new(tx, SharedPlaybackState::new());
        drop(rx);
        handle.play();
        assert!(!handle.is_playing());
    }
}
