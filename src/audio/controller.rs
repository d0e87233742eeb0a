//! Playback state machine
//!
//! `PlaybackController` is the single owner of `PlaybackState`. It runs on the
//! engine thread and applies commands, media source reports and ticks one at
//! a time, in queue order.
//!
//! ```text
//! Idle -> Loading -> Ready <-> Playing <-> Paused
//!                              Playing/Paused -> Ended   (natural end, no repeat)
//!                              Ready -> Ended             (seek to the end)
//!                              any loaded phase -> Error
//!                              Error -> Loading           (retry / open)
//!                              any -> Idle                (close)
//! ```
//!
//! Every open, retry, close and failure starts a new generation. Media source
//! reports carry the generation they were created for and anything older is
//! dropped, so a slow load can never overwrite a newer track. Seeks advance
//! the source's seek epoch the same way for position and end reports.

use std::time::{Duration, Instant};

use super::analyzer::{SpectrumAnalyzer, SpectrumConfig};
use super::error::PlaybackError;
use super::events::{AudioCommand, AudioCommandSender, AudioEvent, AudioEventSender, SharedPlaybackState};
use super::source::{MediaEvent, MediaEventSink, MediaSource, MediaSourceFactory};
use super::state::{Phase, PlaybackState, Track};
use super::visualizer::RenderLoop;


/// Controller tuning
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Distance covered by skip forward / backward, in seconds
    pub skip_seconds: f64,
    /// How long a load may take before it is treated as failed
    pub load_timeout: Duration,
    /// Settings for the per-track spectrum analyzer
    pub spectrum: SpectrumConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            skip_seconds: 10.0,
            load_timeout: Duration::from_secs(15),
            spectrum: SpectrumConfig::default(),
        }
    }
}

/// Playback state machine driving one media source at a time
pub struct PlaybackController<F: MediaSourceFactory> {
    factory: F,
    renderer: Box<dyn RenderLoop>,
    config: ControllerConfig,
    /// Handed to media sources so their reports join the command queue
    command_tx: AudioCommandSender,
    event_tx: AudioEventSender,
    shared: SharedPlaybackState,

    state: PlaybackState,
    track: Option<Track>,
    source: Option<F::Source>,
    /// Controller's copy of the current source's report channel
    events: Option<MediaEventSink>,
    analyzer: Option<SpectrumAnalyzer>,
    generation: u64,
    load_deadline: Option<Instant>,
    /// Start playback when the pending load completes
    play_when_ready: bool,
}

impl<F: MediaSourceFactory> PlaybackController<F> {
    pub fn new(
        factory: F,
        renderer: Box<dyn RenderLoop>,
        config: ControllerConfig,
        command_tx: AudioCommandSender,
        event_tx: AudioEventSender,
        shared: SharedPlaybackState,
    ) -> Self {
        let controller = Self {
            factory,
            renderer,
            config,
            command_tx,
            event_tx,
            shared,
            state: PlaybackState::default(),
            track: None,
            source: None,
            events: None,
            analyzer: None,
            generation: 0,
            load_deadline: None,
            play_when_ready: false,
        };
        controller.shared.store(&controller.state, None);
        controller
    }

    /// Restore user preferences saved from an earlier session
    pub fn restore_preferences(&mut self, volume: f32, muted: bool, repeat: bool, shuffle: bool) {
        self.state.volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.state.muted = muted;
        self.state.repeat = repeat;
        self.state.shuffle = shuffle;
        self.shared.store(&self.state, self.track.as_ref());
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn track(&self) -> Option<&Track> {
        self.track.as_ref()
    }

    /// Current generation token
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Apply one command
    ///
    /// Commands that are not valid in the current phase are rejected with
    /// `PlaybackError::InvalidCommand`, leave the state untouched and are
    /// reported as `AudioEvent::CommandRejected`.
    pub fn handle(&mut self, command: AudioCommand) -> Result<(), PlaybackError> {
        let name = command.name();
        match command {
            AudioCommand::Open { track } => self.open(track),
            AudioCommand::OpenAndPlay { track } => {
                self.open(track)?;
                self.play_when_ready = true;
                Ok(())
            }
            AudioCommand::Retry => self.retry(name),
            AudioCommand::Play => self.play(name),
            AudioCommand::Pause => {
                self.pause();
                Ok(())
            }
            AudioCommand::TogglePlay => {
                if self.state.phase == Phase::Playing {
                    self.pause();
                    Ok(())
                } else {
                    self.play(name)
                }
            }
            AudioCommand::SeekTo { secs } => self.seek(name, secs),
            AudioCommand::SkipForward => {
                let target = self.state.position_secs + self.config.skip_seconds;
                self.seek(name, target)
            }
            AudioCommand::SkipBackward => {
                let target = self.state.position_secs - self.config.skip_seconds;
                self.seek(name, target)
            }
            AudioCommand::SetVolume { volume } => self.set_volume(name, volume),
            AudioCommand::SetMuted { muted } => {
                self.set_muted(muted);
                Ok(())
            }
            AudioCommand::ToggleMute => {
                self.set_muted(!self.state.muted);
                Ok(())
            }
            AudioCommand::ToggleRepeat => {
                self.state.repeat = !self.state.repeat;
                self.publish();
                Ok(())
            }
            AudioCommand::ToggleShuffle => {
                self.state.shuffle = !self.state.shuffle;
                self.publish();
                Ok(())
            }
            AudioCommand::RequestNext => {
                self.emit(AudioEvent::RequestNext {
                    shuffle: self.state.shuffle,
                });
                Ok(())
            }
            AudioCommand::Close => {
                self.close();
                Ok(())
            }
            AudioCommand::Tick => {
                self.tick();
                Ok(())
            }
            AudioCommand::Media {
                generation,
                seek_epoch,
                event,
            } => {
                self.on_media_event(generation, seek_epoch, event);
                Ok(())
            }
            AudioCommand::Shutdown => {
                self.release();
                Ok(())
            }
        }
    }

    // ============ Commands ============

    fn open(&mut self, track: Track) -> Result<(), PlaybackError> {
        tracing::info!("Opening track: {} ({})", track.title, track.locator);

        self.release();
        self.generation += 1;
        self.state.phase = Phase::Loading;
        self.state.position_secs = 0.0;
        self.state.duration_secs = track
            .duration_hint
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(0.0);
        self.state.last_error = None;
        self.track = Some(track);
        self.publish();

        let events = MediaEventSink::new(self.generation, self.command_tx.clone());
        self.events = Some(events.clone());
        let mut source = match self.factory.create(events) {
            Ok(source) => source,
            Err(e) => {
                self.fail(e.clone());
                return Err(e);
            }
        };

        let analyzer = SpectrumAnalyzer::new(self.config.spectrum.clone());
        self.analyzer = match source.attach_analyzer(analyzer.clone()) {
            Ok(()) => Some(analyzer),
            Err(e) => {
                tracing::debug!("Visualization disabled: {}", e);
                None
            }
        };

        source.set_volume(self.state.volume);
        source.set_muted(self.state.muted);
        if let Some(track) = &self.track {
            source.load(track);
        }

        self.source = Some(source);
        self.load_deadline = Some(Instant::now() + self.config.load_timeout);
        Ok(())
    }

    fn retry(&mut self, command: &'static str) -> Result<(), PlaybackError> {
        if self.state.phase != Phase::Error {
            return self.reject(command, format!("player is {}", self.state.phase));
        }
        match self.track.clone() {
            Some(track) => {
                tracing::info!("Retrying track: {}", track.locator);
                self.open(track)
            }
            None => self.reject(command, "no track was opened"),
        }
    }

    fn play(&mut self, command: &'static str) -> Result<(), PlaybackError> {
        let phase = self.state.phase;
        match phase {
            Phase::Playing => Ok(()),
            Phase::Ready | Phase::Paused | Phase::Ended => {
                // Ended restarts from the top
                let restart = phase == Phase::Ended;
                if restart {
                    self.advance_seek_epoch();
                }
                let Some(source) = self.source.as_mut() else {
                    return self.reject(command, "no media is loaded");
                };
                if restart {
                    source.seek(0.0);
                }

                match source.play() {
                    Ok(()) => {}
                    Err(PlaybackError::NotReady) => {
                        return self.reject(command, "media is not prepared");
                    }
                    Err(e) => {
                        self.fail(e.clone());
                        return Err(e);
                    }
                }

                if restart {
                    self.state.position_secs = 0.0;
                }
                self.state.phase = Phase::Playing;
                self.start_renderer();
                self.publish();
                Ok(())
            }
            Phase::Idle | Phase::Loading | Phase::Error => {
                self.reject(command, format!("player is {}", phase))
            }
        }
    }

    fn pause(&mut self) {
        if let Some(source) = self.source.as_mut() {
            source.pause();
        }
        if self.state.phase == Phase::Playing {
            self.state.phase = Phase::Paused;
            self.renderer.stop();
            self.publish();
        }
    }

    fn seek(&mut self, command: &'static str, secs: f64) -> Result<(), PlaybackError> {
        let phase = self.state.phase;
        if !phase.has_media() {
            return self.reject(command, format!("player is {}", phase));
        }

        let target = self.state.clamp_position(secs);
        if phase == Phase::Ended {
            if self.state.duration_known() && target >= self.state.duration_secs {
                return Ok(());
            }
            // Seeking back into an ended track leaves it paused there
            self.state.phase = Phase::Paused;
        }

        tracing::debug!("Seek to {:.2}s", target);
        self.state.position_secs = target;
        self.advance_seek_epoch();
        if let Some(source) = self.source.as_mut() {
            source.seek(target);
        }

        // A prepared track sought to its end is finished without playing
        if phase == Phase::Ready
            && self.state.duration_known()
            && target >= self.state.duration_secs
        {
            self.finish();
            return Ok(());
        }
        self.publish();
        Ok(())
    }

    fn set_volume(&mut self, command: &'static str, volume: f32) -> Result<(), PlaybackError> {
        if !volume.is_finite() {
            return self.reject(command, "volume is not a finite number");
        }
        self.state.volume = volume.clamp(0.0, 1.0);
        if let Some(source) = self.source.as_mut() {
            source.set_volume(self.state.volume);
        }
        self.publish();
        Ok(())
    }

    fn set_muted(&mut self, muted: bool) {
        self.state.muted = muted;
        if let Some(source) = self.source.as_mut() {
            source.set_muted(muted);
        }
        self.publish();
    }

    fn close(&mut self) {
        tracing::info!("Closing track");
        self.release();
        self.generation += 1;
        self.track = None;
        self.state = PlaybackState {
            volume: self.state.volume,
            muted: self.state.muted,
            repeat: self.state.repeat,
            shuffle: self.state.shuffle,
            ..PlaybackState::default()
        };
        self.publish();
    }

    fn tick(&mut self) {
        if let Some(source) = self.source.as_mut() {
            source.poll();
        }

        if self.state.phase != Phase::Loading {
            return;
        }
        if let Some(deadline) = self.load_deadline
            && Instant::now() >= deadline
        {
            let timeout = self.config.load_timeout;
            tracing::warn!("Load timed out after {:?}", timeout);
            self.fail(PlaybackError::Load(format!(
                "timed out after {} ms",
                timeout.as_millis()
            )));
        }
    }

    // ============ Media Source Reports ============

    fn on_media_event(&mut self, generation: u64, seek_epoch: u64, event: MediaEvent) {
        if generation != self.generation {
            tracing::debug!(
                "Discarding stale media event (generation {} != {}): {:?}",
                generation,
                self.generation,
                event
            );
            return;
        }

        // Position and end reports from before the latest seek are stale
        let current_epoch = self.current_seek_epoch();
        if matches!(event, MediaEvent::Position { .. } | MediaEvent::Ended)
            && seek_epoch != current_epoch
        {
            tracing::debug!(
                "Discarding media event from before seek (epoch {} != {}): {:?}",
                seek_epoch,
                current_epoch,
                event
            );
            return;
        }

        let phase = self.state.phase;
        match event {
            MediaEvent::MetadataReady { duration } => {
                if phase != Phase::Loading {
                    tracing::debug!("Ignoring metadata while {}", phase);
                    return;
                }
                self.load_deadline = None;
                if let Some(duration) = duration.filter(|d| d.is_finite() && *d > 0.0) {
                    self.state.duration_secs = duration;
                }
                self.state.position_secs = self.state.clamp_position(self.state.position_secs);
                self.state.phase = Phase::Ready;
                tracing::info!("Track ready, duration: {:.1}s", self.state.duration_secs);
                self.publish();

                if std::mem::take(&mut self.play_when_ready)
                    && let Err(e) = self.play("play")
                {
                    tracing::debug!("Autoplay failed: {}", e);
                }
            }
            MediaEvent::LoadFailed { reason } => {
                if phase == Phase::Loading {
                    self.fail(PlaybackError::Load(reason));
                }
            }
            MediaEvent::Position { secs } => {
                if matches!(phase, Phase::Ready | Phase::Playing | Phase::Paused) {
                    let position = self.state.clamp_position(secs);
                    if (position - self.state.position_secs).abs() > f64::EPSILON {
                        self.state.position_secs = position;
                        self.publish();
                    }
                }
            }
            MediaEvent::Ended => self.on_ended(),
            MediaEvent::Failed { kind, reason } => {
                if !matches!(phase, Phase::Idle | Phase::Error) {
                    self.fail(PlaybackError::from_kind(kind, reason));
                }
            }
        }
    }

    fn on_ended(&mut self) {
        let phase = self.state.phase;
        if !matches!(phase, Phase::Playing | Phase::Paused) {
            tracing::debug!("Ignoring end of media while {}", phase);
            return;
        }

        if self.state.repeat {
            tracing::debug!("Repeating track");
            self.state.position_secs = 0.0;
            self.advance_seek_epoch();
            if let Some(source) = self.source.as_mut() {
                source.seek(0.0);
                if phase == Phase::Playing
                    && let Err(e) = source.play()
                {
                    self.fail(e);
                    return;
                }
            }
            self.publish();
            return;
        }

        self.finish();
    }

    /// Move to `Phase::Ended` and ask the host for what comes next
    fn finish(&mut self) {
        tracing::info!("Track finished");
        self.state.phase = Phase::Ended;
        if self.state.duration_known() {
            self.state.position_secs = self.state.duration_secs;
        }
        self.renderer.stop();
        self.publish();
        self.emit(AudioEvent::RequestNext {
            shuffle: self.state.shuffle,
        });
    }

    // ============ Helpers ============

    /// Move to `Phase::Error`, releasing the media source
    fn fail(&mut self, error: PlaybackError) {
        tracing::error!("Playback error: {}", error);
        self.release();
        self.generation += 1;

        let info = error.info();
        self.state.phase = Phase::Error;
        self.state.last_error = Some(info.clone());
        self.publish();
        self.emit(AudioEvent::Error(info));
    }

    fn reject(
        &self,
        command: &'static str,
        reason: impl Into<String>,
    ) -> Result<(), PlaybackError> {
        let reason = reason.into();
        tracing::debug!("Rejected {}: {}", command, reason);
        self.emit(AudioEvent::CommandRejected {
            command,
            reason: reason.clone(),
        });
        Err(PlaybackError::InvalidCommand { command, reason })
    }

    /// Stop the renderer and drop the media source and analyzer
    fn release(&mut self) {
        self.renderer.stop();
        self.source = None;
        self.events = None;
        self.analyzer = None;
        self.load_deadline = None;
        self.play_when_ready = false;
    }

    /// Drop position and end reports taken before this point
    fn advance_seek_epoch(&self) {
        if let Some(events) = &self.events {
            events.advance_seek_epoch();
        }
    }

    fn current_seek_epoch(&self) -> u64 {
        self.events.as_ref().map_or(0, MediaEventSink::seek_epoch)
    }

    fn start_renderer(&mut self) {
        let reader = self.analyzer.as_ref().map(SpectrumAnalyzer::reader);
        self.renderer.start(reader);
    }

    fn publish(&self) {
        self.shared.store(&self.state, self.track.as_ref());
        self.emit(AudioEvent::StateChanged(self.state.clone()));
    }

    fn emit(&self, event: AudioEvent) {
        let _ = self.event_tx.send(event);
    }
}
