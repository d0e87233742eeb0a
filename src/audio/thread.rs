//! Engine thread implementation
//!
//! This module runs the `PlaybackController` in a dedicated thread,
//! processing commands from the host and sending events back. A second,
//! tiny thread posts `Tick` commands at the position cadence.
//!
//! The media source factory is built inside the engine thread because the
//! rodio output stream cannot move between threads.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::controller::PlaybackController;
use super::events::{
    AudioCommand, AudioCommandReceiver, AudioEventReceiver, SharedPlaybackState,
    audio_command_channel, audio_event_channel,
};
use super::handle::AudioHandle;
use super::source::MediaSourceFactory;
use super::visualizer::RenderLoop;
use crate::settings::Settings;

/// How long `Drop` waits for the engine threads
const DROP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct AudioThreadHandle {
    pub handle: AudioHandle,
    pub event_rx: Option<AudioEventReceiver>,
    engine: Option<JoinHandle<()>>,
    ticker: Option<JoinHandle<()>>,
}

impl AudioThreadHandle {
    pub fn take_event_rx(&mut self) -> Option<AudioEventReceiver> {
        self.event_rx.take()
    }

    /// Shut the engine down and wait for its threads to exit
    pub fn join(mut self, timeout: Duration) -> Result<(), String> {
        self.shutdown_and_wait(timeout)
    }

    fn shutdown_and_wait(&mut self, timeout: Duration) -> Result<(), String> {
        self.handle.shutdown();
        let deadline = Instant::now() + timeout;

        for (name, worker) in [("engine", self.engine.take()), ("ticker", self.ticker.take())] {
            let Some(worker) = worker else {
                continue;
            };
            loop {
                if worker.is_finished() {
                    if worker.join().is_err() {
                        return Err(format!("{} thread panicked", name));
                    }
                    break;
                }
                if Instant::now() > deadline {
                    return Err(format!("{} thread did not exit in time", name));
                }
                thread::sleep(Duration::from_millis(5));
            }
        }
        Ok(())
    }
}

impl Drop for AudioThreadHandle {
    fn drop(&mut self) {
        if self.engine.is_none() && self.ticker.is_none() {
            return;
        }
        if let Err(e) = self.shutdown_and_wait(DROP_JOIN_TIMEOUT) {
            tracing::warn!("Engine shutdown on drop: {}", e);
        }
    }
}

/// Spawn the engine thread
///
/// # Arguments
/// * `settings` - Preferences and tuning applied to the controller
/// * `make_factory` - Builds the media source factory inside the engine thread
/// * `renderer` - Render loop started while playing
///
/// # Returns
/// * `AudioThreadHandle` containing the handle and event receiver
pub fn spawn_audio_thread<F, M>(
    settings: &Settings,
    make_factory: M,
    renderer: Box<dyn RenderLoop>,
) -> std::io::Result<AudioThreadHandle>
where
    F: MediaSourceFactory + 'static,
    M: FnOnce() -> F + Send + 'static,
{
    // Create channels
    let (command_tx, command_rx) = audio_command_channel();
    let (event_tx, event_rx) = audio_event_channel();

    // Create shared state
    let state = SharedPlaybackState::new();
    let state_clone = state.clone();

    let command_tx_for_sources = command_tx.clone();
    let tick_tx = command_tx.clone();
    let handle = AudioHandle::new(command_tx, state);

    let config = settings.controller_config();
    let (volume, muted, repeat, shuffle) = (
        settings.volume,
        settings.muted,
        settings.repeat,
        settings.shuffle,
    );

    let engine = thread::Builder::new()
        .name("tonearm-engine".to_string())
        .spawn(move || {
            let factory = make_factory();
            let mut controller = PlaybackController::new(
                factory,
                renderer,
                config,
                command_tx_for_sources,
                event_tx,
                state_clone,
            );
            controller.restore_preferences(volume, muted, repeat, shuffle);
            engine_thread_main(controller, command_rx);
        })?;

    let tick_interval = settings.tick_interval();
    let spawned = thread::Builder::new()
        .name("tonearm-ticker".to_string())
        .spawn(move || {
            loop {
                thread::sleep(tick_interval);
                // Receiver is gone once the engine exits
                if tick_tx.send(AudioCommand::Tick).is_err() {
                    break;
                }
            }
        });
    let ticker = match spawned {
        Ok(ticker) => ticker,
        Err(e) => {
            handle.shutdown();
            return Err(e);
        }
    };

    Ok(AudioThreadHandle {
        handle,
        event_rx: Some(event_rx),
        engine: Some(engine),
        ticker: Some(ticker),
    })
}

/// Main loop for the engine thread
///
/// Blocks on `command_rx.blocking_recv()` and applies one command at a time.
fn engine_thread_main<F: MediaSourceFactory>(
    mut controller: PlaybackController<F>,
    mut command_rx: AudioCommandReceiver,
) {
    tracing::info!("Engine thread started");

    while let Some(command) = command_rx.blocking_recv() {
        if matches!(command, AudioCommand::Shutdown) {
            let _ = controller.handle(AudioCommand::Shutdown);
            break;
        }
        if let Err(e) = controller.handle(command) {
            tracing::debug!("Command failed: {}", e);
        }
    }

    tracing::info!("Engine thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use crate::audio::analyzer::SpectrumReader;
    use crate::audio::error::PlaybackError;
    use crate::audio::events::AudioEvent;
    use crate::audio::source::{MediaEvent, MediaEventSink, MediaSource};
    use crate::audio::state::{Phase, Track};

    /// Source that finishes loading on a helper thread after `load_delay`
    struct FakeSource {
        events: MediaEventSink,
        load_delay: Duration,
        polls: Arc<AtomicUsize>,
        released: Arc<AtomicBool>,
    }

    impl MediaSource for FakeSource {
        fn load(&mut self, _track: &Track) {
            let events = self.events.clone();
            let delay = self.load_delay;
            thread::spawn(move || {
                thread::sleep(delay);
                events.emit(MediaEvent::MetadataReady {
                    duration: Some(30.0),
                });
            });
        }
        fn play(&mut self) -> Result<(), PlaybackError> {
            Ok(())
        }
        fn pause(&mut self) {}
        fn seek(&mut self, _secs: f64) {}
        fn set_volume(&mut self, _volume: f32) {}
        fn set_muted(&mut self, _muted: bool) {}
        fn poll(&mut self) {
            self.polls.fetch_add(1, Ordering::Relaxed);
        }
    }

    impl Drop for FakeSource {
        fn drop(&mut self) {
            self.released.store(true, Ordering::Release);
        }
    }

    #[derive(Clone, Default)]
    struct FakeFactory {
        load_delay: Duration,
        polls: Arc<AtomicUsize>,
        released: Arc<AtomicBool>,
    }

    impl MediaSourceFactory for FakeFactory {
        type Source = FakeSource;

        fn create(&mut self, events: MediaEventSink) -> Result<FakeSource, PlaybackError> {
            Ok(FakeSource {
                events,
                load_delay: self.load_delay,
                polls: self.polls.clone(),
                released: self.released.clone(),
            })
        }
    }

    struct NoRender;

    impl RenderLoop for NoRender {
        fn start(&mut self, _reader: Option<SpectrumReader>) {}
        fn stop(&mut self) {}
        fn is_running(&self) -> bool {
            false
        }
    }

    fn spawn_with(factory: FakeFactory, settings: &Settings) -> AudioThreadHandle {
        spawn_audio_thread(settings, move || factory, Box::new(NoRender)).unwrap()
    }

    fn wait_for_phase(rx: &mut AudioEventReceiver, phase: Phase) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            match rx.try_recv() {
                Ok(AudioEvent::StateChanged(state)) if state.phase == phase => return true,
                Ok(_) => {}
                Err(_) => thread::sleep(Duration::from_millis(2)),
            }
        }
        false
    }

    #[test]
    fn test_engine_round_trip() {
        let factory = FakeFactory::default();
        let polls = factory.polls.clone();

        let mut settings = Settings::default();
        settings.volume = 0.25;
        settings.playback.position_tick_ms = 5;

        let mut engine = spawn_with(factory, &settings);
        let mut events = engine.take_event_rx().unwrap();
        assert!(engine.take_event_rx().is_none());

        engine.handle.open_track(Track::new("/music/a.ogg", "A"));
        assert!(wait_for_phase(&mut events, Phase::Ready));

        engine.handle.play();
        assert!(wait_for_phase(&mut events, Phase::Playing));
        assert!(engine.handle.is_playing());
        assert_eq!(engine.handle.snapshot().volume, 0.25);

        thread::sleep(Duration::from_millis(50));
        assert!(polls.load(Ordering::Relaxed) > 0);

        engine.join(Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn test_open_and_play_waits_for_slow_load() {
        let factory = FakeFactory {
            load_delay: Duration::from_millis(20),
            ..FakeFactory::default()
        };
        let mut engine = spawn_with(factory, &Settings::default());
        let mut events = engine.take_event_rx().unwrap();

        engine.handle.open_and_play(Track::new("/music/slow.ogg", "Slow"));
        assert!(wait_for_phase(&mut events, Phase::Playing));

        let mut rejected = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let AudioEvent::CommandRejected { command, .. } = event {
                rejected.push(command);
            }
        }
        assert!(rejected.is_empty(), "rejected: {:?}", rejected);
        assert!(engine.handle.is_playing());
    }

    #[test]
    fn test_drop_releases_source_before_returning() {
        let factory = FakeFactory::default();
        let released = factory.released.clone();
        let mut engine = spawn_with(factory, &Settings::default());
        let mut events = engine.take_event_rx().unwrap();

        engine.handle.open_track(Track::new("/music/a.ogg", "A"));
        assert!(wait_for_phase(&mut events, Phase::Ready));
        assert!(!released.load(Ordering::Acquire));

        drop(engine);
        assert!(released.load(Ordering::Acquire));
    }
}
