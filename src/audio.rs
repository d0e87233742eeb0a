//! Audio playback module
//!
//! This module provides track playback with a live spectrum visualizer:
//! - `PlaybackController`: Playback state machine, single owner of `PlaybackState`
//! - `MediaSource`: Per-track decoder/output seam, `RodioSource` on real devices
//! - `SpectrumAnalyzer`: FFT tap on the playing samples
//! - `FrameLoop` / `BarRenderer`: Bar visualization of the latest spectrum
//! - `thread` / `handle`: Engine thread and the non-blocking host handle
//! - `events`: Commands in, events out, shared state snapshots

pub mod analyzer;
pub mod controller;
pub mod error;
pub mod events;
pub mod handle;
pub mod player;
pub mod source;
pub mod state;
pub mod thread;
pub mod visualizer;

pub use analyzer::{SpectrumAnalyzer, SpectrumConfig, SpectrumFrame, SpectrumReader};
pub use controller::{ControllerConfig, PlaybackController};
pub use error::{ErrorInfo, ErrorKind, PlaybackError};
pub use events::{
    AudioCommand, AudioEvent, AudioEventReceiver, SharedPlaybackState, audio_command_channel,
    audio_event_channel,
};
pub use handle::AudioHandle;
pub use player::{OutputDevice, RodioSourceFactory, output_devices};
pub use source::{MediaEvent, MediaEventSink, MediaSource, MediaSourceFactory};
pub use state::{Phase, PlaybackState, Track};
pub use thread::{AudioThreadHandle, spawn_audio_thread};
pub use visualizer::{BarRenderer, BarSurface, FrameLoop, RenderLoop, VisualizerConfig};
