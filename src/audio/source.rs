//! Media source abstraction
//!
//! A `MediaSource` wraps whatever actually decodes and plays the media. The
//! controller only talks to this trait, so the rodio backend can be swapped
//! for a fake in tests.
//!
//! Sources never call back into the controller directly. They report through
//! a `MediaEventSink`, which posts onto the engine's command queue tagged with
//! the generation the source was created for. Reports from a source that has
//! since been replaced are dropped by the controller.
//!
//! Position and end-of-media reports also carry the sink's seek epoch, which
//! the controller advances on every seek. A report taken before a seek but
//! handled after it no longer describes the playhead and is dropped too.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::analyzer::SpectrumAnalyzer;
use super::error::{ErrorKind, PlaybackError};
use super::events::{AudioCommand, AudioCommandSender};
use super::state::Track;

/// Events reported by a media source
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// The media is prepared, with its duration when the container knows it
    MetadataReady { duration: Option<f64> },
    /// The media could not be opened or decoded
    LoadFailed { reason: String },
    /// Current playback position, reported at the tick cadence
    Position { secs: f64 },
    /// Playback reached the end of the media
    Ended,
    /// Unrecoverable failure after loading
    Failed { kind: ErrorKind, reason: String },
}

/// Generation-tagged channel back to the engine thread
#[derive(Clone)]
pub struct MediaEventSink {
    generation: u64,
    seek_epoch: Arc<AtomicU64>,
    command_tx: AudioCommandSender,
}

impl std::fmt::Debug for MediaEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaEventSink")
            .field("generation", &self.generation)
            .field("seek_epoch", &self.seek_epoch())
            .finish_non_exhaustive()
    }
}

impl MediaEventSink {
    pub fn new(generation: u64, command_tx: AudioCommandSender) -> Self {
        Self {
            generation,
            seek_epoch: Arc::new(AtomicU64::new(0)),
            command_tx,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of seeks issued to this source so far
    pub fn seek_epoch(&self) -> u64 {
        self.seek_epoch.load(Ordering::Acquire)
    }

    /// Start a new seek epoch, shared by every clone of this sink
    pub(crate) fn advance_seek_epoch(&self) -> u64 {
        self.seek_epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Post an event. Silently dropped once the engine is gone.
    pub fn emit(&self, event: MediaEvent) {
        let _ = self.command_tx.send(AudioCommand::Media {
            generation: self.generation,
            seek_epoch: self.seek_epoch(),
            event,
        });
    }
}

/// Platform playback primitive for a single track
pub trait MediaSource {
    /// Start preparing the track. Completion arrives as `MetadataReady` or
    /// `LoadFailed`. A second call abandons the first load.
    fn load(&mut self, track: &Track);

    /// Start or resume output. Fails with `NotReady` until the media is prepared.
    fn play(&mut self) -> Result<(), PlaybackError>;

    /// Pause output. Safe in any state.
    fn pause(&mut self);

    /// Move to `secs`, clamped to the media. Seeking to the end reports `Ended`.
    fn seek(&mut self, secs: f64);

    fn set_volume(&mut self, volume: f32);

    fn set_muted(&mut self, muted: bool);

    /// Called on every engine tick to report position, completion and device faults
    fn poll(&mut self) {}

    /// Feed decoded samples to `analyzer`
    fn attach_analyzer(&mut self, analyzer: SpectrumAnalyzer) -> Result<(), PlaybackError> {
        let _ = analyzer;
        Err(PlaybackError::AnalyzerUnsupported)
    }
}

/// Creates one `MediaSource` per opened track
pub trait MediaSourceFactory {
    type Source: MediaSource;

    fn create(&mut self, events: MediaEventSink) -> Result<Self::Source, PlaybackError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::events::audio_command_channel;

    struct Silent;

    impl MediaSource for Silent {
        fn load(&mut self, _track: &Track) {}
        fn play(&mut self) -> Result<(), PlaybackError> {
            Err(PlaybackError::NotReady)
        }
        fn pause(&mut self) {}
        fn seek(&mut self, _secs: f64) {}
        fn set_volume(&mut self, _volume: f32) {}
        fn set_muted(&mut self, _muted: bool) {}
    }

    #[test]
    fn test_sink_tags_generation() {
        let (tx, mut rx) = audio_command_channel();
        let sink = MediaEventSink::new(7, tx);
        sink.emit(MediaEvent::Ended);

        match rx.try_recv() {
            Ok(AudioCommand::Media {
                generation,
                seek_epoch,
                event,
            }) => {
                assert_eq!(generation, 7);
                assert_eq!(seek_epoch, 0);
                assert_eq!(event, MediaEvent::Ended);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_seek_epoch_shared_by_clones() {
        let (tx, mut rx) = audio_command_channel();
        let sink = MediaEventSink::new(2, tx);
        let source_side = sink.clone();

        source_side.emit(MediaEvent::Position { secs: 1.0 });
        assert_eq!(sink.advance_seek_epoch(), 1);
        source_side.emit(MediaEvent::Position { secs: 9.0 });

        let epochs: Vec<u64> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|command| match command {
                AudioCommand::Media { seek_epoch, .. } => seek_epoch,
                other => panic!("unexpected command: {:?}", other),
            })
            .collect();
        assert_eq!(epochs, vec![0, 1]);
        assert_eq!(source_side.seek_epoch(), 1);
    }

    #[test]
    fn test_sink_after_engine_gone() {
        let (tx, rx) = audio_command_channel();
        drop(rx);
        MediaEventSink::new(1, tx).emit(MediaEvent::Position { secs: 1.0 });
    }

    #[test]
    fn test_analyzer_unsupported_by_default() {
        let analyzer = SpectrumAnalyzer::new(Default::default());
        assert_eq!(
            Silent.attach_analyzer(analyzer),
            Err(PlaybackError::AnalyzerUnsupported)
        );
    }
}
