//! Rodio-backed media source
//!
//! `RodioSourceFactory` owns the output stream (opened lazily on the engine
//! thread, since `OutputStream` is not `Send`) and hands out one
//! `RodioSource` per track. Each source decodes on a loader thread, parks a
//! paused `Sink` on the mixer and reports back through its `MediaEventSink`.
//!
//! Device errors raised by the output stream's callback are stored in a
//! shared slot. The live source reports them on its next poll and the factory
//! reopens the stream for the next track.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink, Source, mixer::Mixer};

use super::analyzer::{AnalyzingSource, SpectrumAnalyzer};
use super::error::{ErrorKind, PlaybackError};
use super::source::{MediaEvent, MediaEventSink, MediaSource, MediaSourceFactory};
use super::state::{Track, output_gain};

/// Last error reported by the output stream callback
type FaultSlot = Arc<Mutex<Option<String>>>;

// ============ Factory ============

/// Creates rodio sources sharing one output stream
pub struct RodioSourceFactory {
    device_name: Option<String>,
    stream: Option<OutputStream>,
    fault: FaultSlot,
}

impl RodioSourceFactory {
    /// Create a factory for the named output device (None = default)
    ///
    /// The stream is opened on first use.
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            stream: None,
            fault: FaultSlot::default(),
        }
    }

    /// Mixer of the current stream, reopening it after a device fault
    fn mixer(&mut self) -> Result<Mixer, PlaybackError> {
        if self.fault.lock().take().is_some() {
            tracing::warn!("Reopening audio output after device error");
            self.stream = None;
        }

        if let Some(stream) = &self.stream {
            return Ok(stream.mixer().clone());
        }

        let stream = self.open_stream()?;
        let mixer = stream.mixer().clone();
        self.stream = Some(stream);
        Ok(mixer)
    }

    fn open_stream(&self) -> Result<OutputStream, PlaybackError> {
        let fault = self.fault.clone();
        let on_error = move |e: rodio::cpal::StreamError| {
            tracing::error!("Audio output error: {}", e);
            *fault.lock() = Some(e.to_string());
        };

        let mut stream = match &self.device_name {
            Some(name) => {
                let device = find_output_device(name)?;

                // Get default config for the device
                let config = device.default_output_config().map_err(|e| {
                    PlaybackError::PlaybackDevice(format!("Failed to get device config: {}", e))
                })?;

                OutputStreamBuilder::from_device(device)
                    .map_err(|e| {
                        PlaybackError::PlaybackDevice(format!(
                            "Failed to create stream builder: {}",
                            e
                        ))
                    })?
                    .with_sample_rate(config.sample_rate().0)
                    .with_error_callback(on_error)
                    .open_stream()
                    .map_err(|e| {
                        PlaybackError::PlaybackDevice(format!("Failed to open stream: {}", e))
                    })?
            }
            None => OutputStreamBuilder::from_default_device()
                .map_err(|e| {
                    PlaybackError::PlaybackDevice(format!("Failed to create audio output: {}", e))
                })?
                .with_error_callback(on_error)
                .open_stream_or_fallback()
                .map_err(|e| {
                    PlaybackError::PlaybackDevice(format!("Failed to open stream: {}", e))
                })?,
        };
        stream.log_on_drop(false);

        tracing::info!(
            "Audio output opened: {}",
            self.device_name.as_deref().unwrap_or("default")
        );
        Ok(stream)
    }
}

impl MediaSourceFactory for RodioSourceFactory {
    type Source = RodioSource;

    fn create(&mut self, events: MediaEventSink) -> Result<RodioSource, PlaybackError> {
        let mixer = self.mixer()?;
        Ok(RodioSource::new(mixer, events, self.fault.clone()))
    }
}

// ============ Source ============

/// Sink decoded by the loader thread, waiting to be picked up
struct Prepared {
    sink: Sink,
    duration: Option<Duration>,
}

type PreparedSlot = Arc<Mutex<Option<Prepared>>>;

/// One track played through a rodio `Sink`
pub struct RodioSource {
    mixer: Mixer,
    events: MediaEventSink,
    fault: FaultSlot,
    fault_reported: bool,
    analyzer: Option<SpectrumAnalyzer>,
    path: Option<PathBuf>,
    /// Filled by the loader thread of the current load
    prepared: PreparedSlot,
    /// Set when the current load is abandoned
    cancel: Arc<AtomicBool>,
    sink: Option<Sink>,
    duration: Option<Duration>,
    volume: f32,
    muted: bool,
    playing: bool,
    ended: bool,
}

impl RodioSource {
    pub(crate) fn new(mixer: Mixer, events: MediaEventSink, fault: FaultSlot) -> Self {
        Self {
            mixer,
            events,
            fault,
            fault_reported: false,
            analyzer: None,
            path: None,
            prepared: PreparedSlot::default(),
            cancel: Arc::new(AtomicBool::new(false)),
            sink: None,
            duration: None,
            volume: 1.0,
            muted: false,
            playing: false,
            ended: false,
        }
    }

    fn gain(&self) -> f32 {
        output_gain(self.volume, self.muted)
    }

    /// Take over the sink prepared by the loader thread, if any
    fn adopt_prepared(&mut self) {
        let Some(prepared) = self.prepared.lock().take() else {
            return;
        };
        if let Some(old) = self.sink.replace(prepared.sink) {
            old.stop();
        }
        self.duration = prepared.duration;
        if let Some(sink) = &self.sink {
            sink.set_volume(self.gain());
        }
    }

    /// Rebuild the decoder pipeline and position it at `position`
    ///
    /// Used when the sink ran dry or the decoder cannot seek in place.
    fn rebuild(&mut self, position: Duration) -> Result<(), PlaybackError> {
        let path = self.path.clone().ok_or(PlaybackError::NotReady)?;

        tracing::info!("Reloading {} to seek to {:?}", path.display(), position);
        if let Some(old) = self.sink.take() {
            old.stop();
        }

        let (sink, duration) = open_sink(&self.mixer, &path, self.analyzer.as_ref(), self.gain())?;
        if !position.is_zero()
            && let Err(e) = sink.try_seek(position)
        {
            tracing::warn!("Seek after reload also failed: {:?}", e);
        }
        if self.playing {
            sink.play();
        }

        self.duration = duration.or(self.duration);
        self.sink = Some(sink);
        Ok(())
    }

    fn report_end(&mut self) {
        if !self.ended {
            self.ended = true;
            self.playing = false;
            self.events.emit(MediaEvent::Ended);
        }
    }
}

impl MediaSource for RodioSource {
    fn load(&mut self, track: &Track) {
        // Abandon any load still in flight
        self.cancel.store(true, Ordering::Release);
        self.cancel = Arc::new(AtomicBool::new(false));
        self.prepared = PreparedSlot::default();
        if let Some(old) = self.sink.take() {
            old.stop();
        }
        self.playing = false;
        self.ended = false;
        self.duration = None;

        let path = match locator_path(&track.locator) {
            Ok(path) => path,
            Err(e) => {
                self.events.emit(MediaEvent::LoadFailed {
                    reason: e.to_string(),
                });
                return;
            }
        };
        self.path = Some(path.clone());

        let mixer = self.mixer.clone();
        let analyzer = self.analyzer.clone();
        let gain = self.gain();
        let prepared = self.prepared.clone();
        let cancel = self.cancel.clone();
        let events = self.events.clone();

        let spawned = thread::Builder::new()
            .name("tonearm-loader".to_string())
            .spawn(move || match open_sink(&mixer, &path, analyzer.as_ref(), gain) {
                Ok((sink, duration)) => {
                    if cancel.load(Ordering::Acquire) {
                        sink.stop();
                        return;
                    }
                    *prepared.lock() = Some(Prepared { sink, duration });
                    events.emit(MediaEvent::MetadataReady {
                        duration: duration.map(|d| d.as_secs_f64()),
                    });
                }
                Err(e) => {
                    if !cancel.load(Ordering::Acquire) {
                        tracing::warn!("Failed to load {}: {}", path.display(), e);
                        events.emit(MediaEvent::LoadFailed {
                            reason: e.to_string(),
                        });
                    }
                }
            });

        if let Err(e) = spawned {
            self.events.emit(MediaEvent::LoadFailed {
                reason: format!("Failed to spawn loader thread: {}", e),
            });
        }
    }

    fn play(&mut self) -> Result<(), PlaybackError> {
        self.adopt_prepared();
        if self.sink.is_none() {
            return Err(PlaybackError::NotReady);
        }

        self.playing = true;
        self.ended = false;
        if self.sink.as_ref().is_some_and(Sink::empty) {
            self.rebuild(Duration::ZERO)?;
        }
        if let Some(sink) = &self.sink {
            sink.play();
        }
        Ok(())
    }

    fn pause(&mut self) {
        self.adopt_prepared();
        if let Some(sink) = &self.sink {
            sink.pause();
        }
        self.playing = false;
    }

    fn seek(&mut self, secs: f64) {
        self.adopt_prepared();
        let Some(sink) = &self.sink else {
            return;
        };

        let secs = if secs.is_finite() { secs.max(0.0) } else { 0.0 };
        let target = Duration::from_secs_f64(secs);

        if self.duration.is_some_and(|duration| target >= duration) {
            sink.pause();
            self.report_end();
            return;
        }
        self.ended = false;

        let needs_reload = if sink.empty() {
            true
        } else {
            match sink.try_seek(target) {
                Ok(()) => {
                    tracing::debug!("Seek to {:?} successful", target);
                    false
                }
                Err(e) => {
                    tracing::debug!("Direct seek failed: {:?}, will try reload", e);
                    true
                }
            }
        };

        if needs_reload && let Err(e) = self.rebuild(target) {
            self.events.emit(MediaEvent::Failed {
                kind: e.kind(),
                reason: e.to_string(),
            });
        }
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        if let Some(sink) = &self.sink {
            sink.set_volume(self.gain());
        }
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        if let Some(sink) = &self.sink {
            sink.set_volume(self.gain());
        }
    }

    fn poll(&mut self) {
        if !self.fault_reported {
            let fault = self.fault.lock().clone();
            if let Some(reason) = fault {
                self.fault_reported = true;
                self.playing = false;
                self.events.emit(MediaEvent::Failed {
                    kind: ErrorKind::PlaybackDevice,
                    reason,
                });
                return;
            }
        }

        if !self.playing {
            return;
        }
        self.adopt_prepared();
        let Some(sink) = &self.sink else {
            return;
        };

        if sink.empty() {
            self.report_end();
            return;
        }
        self.events.emit(MediaEvent::Position {
            secs: sink.get_pos().as_secs_f64(),
        });
    }

    fn attach_analyzer(&mut self, analyzer: SpectrumAnalyzer) -> Result<(), PlaybackError> {
        self.analyzer = Some(analyzer);
        Ok(())
    }
}

impl Drop for RodioSource {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Release);
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
        if let Some(prepared) = self.prepared.lock().take() {
            prepared.sink.stop();
        }
    }
}

// ============ Helpers ============

/// Resolve a track locator to a local path
fn locator_path(locator: &str) -> Result<PathBuf, PlaybackError> {
    if let Some(path) = locator.strip_prefix("file://") {
        return Ok(PathBuf::from(path));
    }
    if let Some((scheme, _)) = locator.split_once("://") {
        return Err(PlaybackError::Load(format!(
            "Unsupported locator scheme: {}",
            scheme
        )));
    }
    if locator.trim().is_empty() {
        return Err(PlaybackError::Load("Empty locator".to_string()));
    }
    Ok(PathBuf::from(locator))
}

/// Decode `path` into a paused sink on `mixer`
fn open_sink(
    mixer: &Mixer,
    path: &Path,
    analyzer: Option<&SpectrumAnalyzer>,
    gain: f32,
) -> Result<(Sink, Option<Duration>), PlaybackError> {
    let file =
        File::open(path).map_err(|e| PlaybackError::Load(format!("Failed to open file: {}", e)))?;
    let reader = BufReader::new(file);
    let source = Decoder::new(reader)
        .map_err(|e| PlaybackError::Load(format!("Failed to decode audio: {}", e)))?;
    let duration = source.total_duration();

    let sink = Sink::connect_new(mixer);
    sink.pause();
    sink.set_volume(gain);
    match analyzer {
        // Tap sits before the sink, so volume and mute never reach the analyzer
        Some(analyzer) => sink.append(AnalyzingSource::new(source, analyzer.clone())),
        None => sink.append(source),
    }

    Ok((sink, duration))
}

fn find_output_device(device_name: &str) -> Result<rodio::cpal::Device, PlaybackError> {
    let host = rodio::cpal::default_host();
    host.output_devices()
        .map_err(|e| PlaybackError::PlaybackDevice(format!("Failed to enumerate devices: {}", e)))?
        .find(|d| d.name().map(|n| n == device_name).unwrap_or(false))
        .ok_or_else(|| PlaybackError::PlaybackDevice(format!("Device not found: {}", device_name)))
}

/// Audio output device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDevice {
    /// Name used to select the device in settings
    pub name: String,
    pub is_default: bool,
}

/// List output devices that can actually be opened
pub fn output_devices() -> Vec<OutputDevice> {
    let host = rodio::cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let mut devices = Vec::new();

    match host.output_devices() {
        Ok(output_devices) => {
            for device in output_devices {
                let Ok(name) = device.name() else {
                    continue;
                };
                // Skip devices without a usable output config
                if device.default_output_config().is_err() {
                    continue;
                }
                devices.push(OutputDevice {
                    is_default: default_name.as_deref() == Some(name.as_str()),
                    name,
                });
            }
        }
        Err(e) => {
            tracing::warn!("Failed to enumerate output devices: {}", e);
        }
    }

    devices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::events::{AudioCommand, AudioCommandReceiver, audio_command_channel};
    use std::io::Write;
    use std::time::Instant;

    /// Mono 16-bit PCM WAV of a 440 Hz tone
    fn write_wav(seconds: f32, sample_rate: u32) -> tempfile::NamedTempFile {
        let frames = (seconds * sample_rate as f32) as u32;
        let data_len = frames * 2;

        let mut bytes = Vec::with_capacity(44 + data_len as usize);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
        bytes.extend_from_slice(&1u16.to_le_bytes()); // mono
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * 2).to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            let value = (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5;
            bytes.extend_from_slice(&((value * i16::MAX as f32) as i16).to_le_bytes());
        }

        let mut file = tempfile::Builder::new()
            .suffix(".wav")
            .tempfile()
            .expect("temp file");
        file.write_all(&bytes).expect("write wav");
        file.flush().expect("flush wav");
        file
    }

    fn source_with_channel() -> (RodioSource, AudioCommandReceiver) {
        let (command_tx, command_rx) = audio_command_channel();
        let (mixer, _output) = rodio::mixer::mixer(2, 44100);
        let source = RodioSource::new(
            mixer,
            MediaEventSink::new(1, command_tx),
            FaultSlot::default(),
        );
        (source, command_rx)
    }

    fn next_event(rx: &mut AudioCommandReceiver) -> Option<MediaEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            match rx.try_recv() {
                Ok(AudioCommand::Media { event, .. }) => return Some(event),
                Ok(_) => {}
                Err(_) => thread::sleep(Duration::from_millis(5)),
            }
        }
        None
    }

    #[test]
    fn test_locator_path() {
        assert_eq!(
            locator_path("file:///music/a.flac").unwrap(),
            PathBuf::from("/music/a.flac")
        );
        assert_eq!(
            locator_path("/music/a.flac").unwrap(),
            PathBuf::from("/music/a.flac")
        );
        assert!(matches!(
            locator_path("https://example.com/a.mp3"),
            Err(PlaybackError::Load(_))
        ));
        assert!(locator_path("  ").is_err());
    }

    #[test]
    fn test_play_before_load_not_ready() {
        let (mut source, _rx) = source_with_channel();
        assert_eq!(source.play(), Err(PlaybackError::NotReady));
        source.pause();
        source.seek(3.0);
    }

    #[test]
    fn test_missing_file_reports_load_failure() {
        let (mut source, mut rx) = source_with_channel();
        source.load(&Track::new("/definitely/not/here.wav", "Nothing"));

        match next_event(&mut rx) {
            Some(MediaEvent::LoadFailed { reason }) => {
                assert!(reason.contains("Failed to open file"), "{}", reason)
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_locator_fails_immediately() {
        let (mut source, mut rx) = source_with_channel();
        source.load(&Track::new("rtsp://camera/stream", "Cam"));
        assert!(matches!(
            next_event(&mut rx),
            Some(MediaEvent::LoadFailed { .. })
        ));
    }

    #[test]
    fn test_wav_loads_and_seek_past_end_reports_ended() {
        let wav = write_wav(1.0, 8000);
        let (mut source, mut rx) = source_with_channel();
        source
            .attach_analyzer(SpectrumAnalyzer::new(Default::default()))
            .unwrap();
        source.load(&Track::new(wav.path().to_string_lossy(), "Tone"));

        match next_event(&mut rx) {
            Some(MediaEvent::MetadataReady {
                duration: Some(duration),
            }) => assert!((duration - 1.0).abs() < 0.05, "duration {}", duration),
            other => panic!("unexpected event: {:?}", other),
        }

        assert_eq!(source.play(), Ok(()));
        source.seek(5.0);
        assert_eq!(next_event(&mut rx), Some(MediaEvent::Ended));
    }

    #[test]
    fn test_device_fault_reported_once() {
        let (command_tx, mut rx) = audio_command_channel();
        let (mixer, _output) = rodio::mixer::mixer(2, 44100);
        let fault = FaultSlot::default();
        let mut source = RodioSource::new(mixer, MediaEventSink::new(3, command_tx), fault.clone());

        *fault.lock() = Some("device unplugged".to_string());
        source.poll();
        source.poll();

        assert_eq!(
            next_event(&mut rx),
            Some(MediaEvent::Failed {
                kind: ErrorKind::PlaybackDevice,
                reason: "device unplugged".to_string(),
            })
        );
        assert!(rx.try_recv().is_err());
    }
}
