//! Transport controls adapter
//!
//! Bridges the host's transport widgets to the engine: gestures become
//! `AudioHandle` commands, and `TransportView` is the display model derived
//! from the latest state snapshot.

use crate::audio::{AudioHandle, Phase, PlaybackState, Track};

/// User gestures on the transport controls
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportGesture {
    PlayPauseClicked,
    /// Seek bar is being dragged (fraction 0.0 - 1.0), preview only
    SeekDragged(f32),
    /// Seek bar released at a fraction (0.0 - 1.0)
    SeekReleased(f32),
    SkipBackClicked,
    SkipForwardClicked,
    /// Volume slider moved (0.0 - 1.0)
    VolumeChanged(f32),
    MuteClicked,
    RepeatClicked,
    ShuffleClicked,
    NextClicked,
    RetryClicked,
    CloseClicked,
}

/// Icon shown on the play/pause button
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayIcon {
    Play,
    Pause,
}

/// Everything the transport controls display
#[derive(Debug, Clone, PartialEq)]
pub struct TransportView {
    pub play_icon: PlayIcon,
    /// Seek bar fill (0.0 - 1.0)
    pub progress: f32,
    pub elapsed_label: String,
    pub total_label: String,
    pub title: String,
    pub artist: String,
    pub volume: f32,
    pub muted: bool,
    pub repeat: bool,
    pub shuffle: bool,
    /// Spinner while a track is loading
    pub busy: bool,
    /// Whether the seek bar and skip buttons react
    pub seekable: bool,
    pub error_message: Option<String>,
    pub can_retry: bool,
}

impl TransportView {
    /// Derive the view from a state snapshot
    ///
    /// `drag` is the seek bar position while the user is dragging it; it
    /// overrides the reported position so the bar doesn't jump back under
    /// the cursor on the next position tick.
    pub fn from_state(state: &PlaybackState, track: Option<&Track>, drag: Option<f32>) -> Self {
        let duration = effective_duration(state, track);

        let (progress, elapsed) = match drag {
            Some(fraction) => {
                let fraction = sanitize_fraction(fraction);
                (fraction, fraction as f64 * duration)
            }
            None => {
                let progress = if duration > 0.0 {
                    (state.position_secs / duration).clamp(0.0, 1.0) as f32
                } else {
                    0.0
                };
                (progress, state.position_secs)
            }
        };

        let (title, artist) = track
            .map(|t| (t.title.clone(), t.artist.clone()))
            .unwrap_or_default();

        let play_icon = if state.phase == Phase::Playing {
            PlayIcon::Pause
        } else {
            PlayIcon::Play
        };

        let (error_message, can_retry) = if state.phase == Phase::Error {
            (
                state.last_error.as_ref().map(|e| e.message.clone()),
                track.is_some(),
            )
        } else {
            (None, false)
        };

        Self {
            play_icon,
            progress,
            elapsed_label: format_time(elapsed),
            total_label: format_time(duration),
            title,
            artist,
            volume: state.volume,
            muted: state.muted,
            repeat: state.repeat,
            shuffle: state.shuffle,
            busy: state.phase == Phase::Loading,
            seekable: state.phase.has_media(),
            error_message,
            can_retry,
        }
    }
}

/// Transport controls bound to an engine
pub struct Transport {
    handle: AudioHandle,
    drag_fraction: Option<f32>,
}

impl Transport {
    pub fn new(handle: AudioHandle) -> Self {
        Self {
            handle,
            drag_fraction: None,
        }
    }

    pub fn handle(&self) -> &AudioHandle {
        &self.handle
    }

    /// Seek bar position while a drag is in progress
    pub fn drag_fraction(&self) -> Option<f32> {
        self.drag_fraction
    }

    /// Translate a gesture into engine commands
    pub fn apply(&mut self, gesture: TransportGesture) {
        match gesture {
            TransportGesture::PlayPauseClicked => self.handle.toggle_play(),
            TransportGesture::SeekDragged(fraction) => {
                self.drag_fraction = Some(sanitize_fraction(fraction));
            }
            TransportGesture::SeekReleased(fraction) => {
                self.drag_fraction = None;
                self.seek_to_fraction(sanitize_fraction(fraction));
            }
            TransportGesture::SkipBackClicked => self.handle.skip_backward(),
            TransportGesture::SkipForwardClicked => self.handle.skip_forward(),
            TransportGesture::VolumeChanged(volume) => {
                if volume.is_finite() {
                    self.handle.set_volume(volume.clamp(0.0, 1.0));
                }
            }
            TransportGesture::MuteClicked => self.handle.toggle_mute(),
            TransportGesture::RepeatClicked => self.handle.toggle_repeat(),
            TransportGesture::ShuffleClicked => self.handle.toggle_shuffle(),
            TransportGesture::NextClicked => self.handle.request_next(),
            TransportGesture::RetryClicked => self.handle.retry(),
            TransportGesture::CloseClicked => {
                self.drag_fraction = None;
                self.handle.close();
            }
        }
    }

    /// Current view of the controls
    pub fn view(&self) -> TransportView {
        let state = self.handle.snapshot();
        let track = self.handle.track();
        TransportView::from_state(&state, track.as_ref(), self.drag_fraction)
    }

    fn seek_to_fraction(&self, fraction: f32) {
        let state = self.handle.snapshot();
        let track = self.handle.track();
        let duration = effective_duration(&state, track.as_ref());
        if duration > 0.0 {
            self.handle.seek_to(fraction as f64 * duration);
        } else {
            tracing::debug!("Seek release ignored, duration unknown");
        }
    }
}

/// Measured duration, falling back to the track's hint until it is known
fn effective_duration(state: &PlaybackState, track: Option<&Track>) -> f64 {
    if state.duration_known() {
        state.duration_secs
    } else {
        track
            .and_then(|t| t.duration_hint)
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(0.0)
    }
}

fn sanitize_fraction(fraction: f32) -> f32 {
    if fraction.is_nan() {
        0.0
    } else {
        fraction.clamp(0.0, 1.0)
    }
}

/// Format seconds as m:ss, or h:mm:ss from one hour up
pub fn format_time(secs: f64) -> String {
    let total = if secs.is_finite() && secs > 0.0 {
        secs.floor() as u64
    } else {
        0
    };
    let hours = total / 3600;
    let mins = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{}:{:02}", mins, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::events::{AudioCommand, AudioCommandReceiver, SharedPlaybackState};
    use crate::audio::{ErrorInfo, ErrorKind, audio_command_channel};

    fn transport() -> (Transport, AudioCommandReceiver, SharedPlaybackState) {
        let (tx, rx) = audio_command_channel();
        let shared = SharedPlaybackState::new();
        let transport = Transport::new(AudioHandle::new(tx, shared.clone()));
        (transport, rx, shared)
    }

    fn playing_state(position: f64, duration: f64) -> PlaybackState {
        PlaybackState {
            phase: Phase::Playing,
            position_secs: position,
            duration_secs: duration,
            ..PlaybackState::default()
        }
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.0), "0:00");
        assert_eq!(format_time(59.9), "0:59");
        assert_eq!(format_time(61.0), "1:01");
        assert_eq!(format_time(3599.0), "59:59");
        assert_eq!(format_time(3661.0), "1:01:01");
        assert_eq!(format_time(-5.0), "0:00");
        assert_eq!(format_time(f64::NAN), "0:00");
        assert_eq!(format_time(f64::INFINITY), "0:00");
    }

    #[test]
    fn test_drag_previews_without_seeking() {
        let (mut transport, mut rx, shared) = transport();
        let track = Track::new("/music/a.ogg", "A");
        shared.store(&playing_state(30.0, 120.0), Some(&track));

        transport.apply(TransportGesture::SeekDragged(0.5));
        assert!(rx.try_recv().is_err());

        let view = transport.view();
        assert_eq!(view.progress, 0.5);
        assert_eq!(view.elapsed_label, "1:00");
        assert_eq!(view.total_label, "2:00");

        transport.apply(TransportGesture::SeekReleased(0.75));
        assert_eq!(rx.try_recv(), Ok(AudioCommand::SeekTo { secs: 90.0 }));
        assert_eq!(transport.drag_fraction(), None);
        assert_eq!(transport.view().progress, 0.25);
    }

    #[test]
    fn test_release_with_unknown_duration_uses_hint() {
        let (mut transport, mut rx, shared) = transport();
        let track = Track::new("/music/a.ogg", "A").with_duration_hint(200.0);
        shared.store(&playing_state(0.0, 0.0), Some(&track));

        transport.apply(TransportGesture::SeekReleased(0.5));
        assert_eq!(rx.try_recv(), Ok(AudioCommand::SeekTo { secs: 100.0 }));

        shared.store(&playing_state(0.0, 0.0), None);
        transport.apply(TransportGesture::SeekReleased(0.5));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_gestures_map_to_commands() {
        let (mut transport, mut rx, _shared) = transport();

        transport.apply(TransportGesture::PlayPauseClicked);
        transport.apply(TransportGesture::SkipBackClicked);
        transport.apply(TransportGesture::SkipForwardClicked);
        transport.apply(TransportGesture::VolumeChanged(1.5));
        transport.apply(TransportGesture::VolumeChanged(f32::NAN));
        transport.apply(TransportGesture::MuteClicked);
        transport.apply(TransportGesture::RepeatClicked);
        transport.apply(TransportGesture::ShuffleClicked);
        transport.apply(TransportGesture::NextClicked);
        transport.apply(TransportGesture::RetryClicked);
        transport.apply(TransportGesture::CloseClicked);

        let expected = [
            AudioCommand::TogglePlay,
            AudioCommand::SkipBackward,
            AudioCommand::SkipForward,
            AudioCommand::SetVolume { volume: 1.0 },
            AudioCommand::ToggleMute,
            AudioCommand::ToggleRepeat,
            AudioCommand::ToggleShuffle,
            AudioCommand::RequestNext,
            AudioCommand::Retry,
            AudioCommand::Close,
        ];
        for command in expected {
            assert_eq!(rx.try_recv(), Ok(command));
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_view_icons_and_busy() {
        let track = Track::new("/music/a.ogg", "Song").with_artist(Some("Band"));

        let view = TransportView::from_state(&playing_state(5.0, 10.0), Some(&track), None);
        assert_eq!(view.play_icon, PlayIcon::Pause);
        assert_eq!(view.title, "Song");
        assert_eq!(view.artist, "Band");
        assert!(view.seekable);
        assert!(!view.busy);

        let loading = PlaybackState {
            phase: Phase::Loading,
            ..PlaybackState::default()
        };
        let view = TransportView::from_state(&loading, Some(&track), None);
        assert_eq!(view.play_icon, PlayIcon::Play);
        assert!(view.busy);
        assert!(!view.seekable);
        assert_eq!(view.progress, 0.0);
    }

    #[test]
    fn test_view_error_offers_retry() {
        let track = Track::new("/music/missing.ogg", "Gone");
        let state = PlaybackState {
            phase: Phase::Error,
            last_error: Some(ErrorInfo {
                kind: ErrorKind::Load,
                message: "file not found".to_string(),
            }),
            ..PlaybackState::default()
        };

        let view = TransportView::from_state(&state, Some(&track), None);
        assert_eq!(view.error_message.as_deref(), Some("file not found"));
        assert!(view.can_retry);

        let idle = TransportView::from_state(&PlaybackState::default(), None, None);
        assert_eq!(idle.error_message, None);
        assert!(!idle.can_retry);
        assert_eq!(idle.title, "");
    }
}
