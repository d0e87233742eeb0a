//! Spectrum bar visualization
//!
//! `BarRenderer` turns the latest `SpectrumFrame` into bar heights and draws
//! them on a `BarSurface`. It is cooperative: each `render()` call reads
//! whatever frame is current and never waits for the analyzer.
//!
//! `FrameLoop` drives a renderer from its own thread at a fixed refresh
//! interval. The controller owns it through the `RenderLoop` trait and only
//! keeps it running while playback is in progress.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use super::analyzer::SpectrumReader;

/// Exponent of the bar gain curve, lifts quiet bins less than loud ones
const GAIN_CURVE_EXPONENT: f32 = 1.6;

/// Something bars can be drawn on
pub trait BarSurface {
    /// Draw one frame of bars, each height in 0.0..=1.0
    fn draw_bars(&mut self, heights: &[f32]);

    /// Draw the placeholder shown when no spectrum is available
    fn draw_idle(&mut self);
}

impl<S: BarSurface> BarSurface for Arc<Mutex<S>> {
    fn draw_bars(&mut self, heights: &[f32]) {
        self.lock().draw_bars(heights);
    }

    fn draw_idle(&mut self) {
        self.lock().draw_idle();
    }
}

/// Visualizer tuning
#[derive(Debug, Clone, PartialEq)]
pub struct VisualizerConfig {
    pub bar_count: usize,
    /// Multiplier applied after the gain curve
    pub gain: f32,
    /// Time between frames of the render loop
    pub frame_interval: Duration,
}

impl Default for VisualizerConfig {
    fn default() -> Self {
        Self {
            bar_count: 64,
            gain: 1.0,
            frame_interval: Duration::from_millis(16),
        }
    }
}

/// Group spectrum bins into `bar_count` bars and apply the gain curve
///
/// Each bar takes the loudest bin of its group.
pub fn bar_heights(levels: &[f32], bar_count: usize, gain: f32) -> Vec<f32> {
    if levels.is_empty() {
        return vec![0.0; bar_count];
    }

    let bins = levels.len();
    (0..bar_count)
        .map(|bar| {
            let start = bar * bins / bar_count;
            let end = ((bar + 1) * bins / bar_count).clamp(start + 1, bins);
            let level = levels[start..end].iter().copied().fold(0.0_f32, f32::max);
            shape(level, gain)
        })
        .collect()
}

fn shape(level: f32, gain: f32) -> f32 {
    let level = if level.is_finite() { level.clamp(0.0, 1.0) } else { 0.0 };
    (level.powf(GAIN_CURVE_EXPONENT) * gain).clamp(0.0, 1.0)
}

/// Draws spectrum frames on a surface
pub struct BarRenderer<S: BarSurface> {
    surface: S,
    reader: Option<SpectrumReader>,
    config: VisualizerConfig,
    last_sequence: Option<u64>,
    heights: Vec<f32>,
}

impl<S: BarSurface> BarRenderer<S> {
    /// Create a renderer. Without a reader it only draws the idle placeholder.
    pub fn new(surface: S, reader: Option<SpectrumReader>, config: VisualizerConfig) -> Self {
        let heights = vec![0.0; config.bar_count];
        Self {
            surface,
            reader,
            config,
            last_sequence: None,
            heights,
        }
    }

    /// Draw one frame
    ///
    /// Returns true when a new spectrum frame was picked up. An unchanged
    /// frame redraws the cached bars.
    pub fn render(&mut self) -> bool {
        let Some(reader) = &self.reader else {
            self.surface.draw_idle();
            return false;
        };

        let frame = reader.latest();
        let fresh = self.last_sequence != Some(frame.sequence);
        if fresh {
            self.heights = bar_heights(&frame.levels, self.config.bar_count, self.config.gain);
            self.last_sequence = Some(frame.sequence);
        }

        self.surface.draw_bars(&self.heights);
        fresh
    }

    pub fn heights(&self) -> &[f32] {
        &self.heights
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn into_surface(self) -> S {
        self.surface
    }
}

/// Lifecycle of a render loop, as seen by the controller
pub trait RenderLoop: Send {
    /// Start drawing frames from `reader`, or the idle placeholder when `None`
    fn start(&mut self, reader: Option<SpectrumReader>);

    /// Stop drawing. Returns once no further frame will be drawn.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

struct Worker {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Render loop running a `BarRenderer` on a dedicated thread
pub struct FrameLoop<S: BarSurface + Send + 'static> {
    surface: Arc<Mutex<S>>,
    config: VisualizerConfig,
    worker: Option<Worker>,
}

impl<S: BarSurface + Send + 'static> FrameLoop<S> {
    pub fn new(surface: S, config: VisualizerConfig) -> Self {
        Self {
            surface: Arc::new(Mutex::new(surface)),
            config,
            worker: None,
        }
    }

    /// Shared access to the surface (e.g. to inspect what was drawn)
    pub fn surface(&self) -> Arc<Mutex<S>> {
        self.surface.clone()
    }
}

impl<S: BarSurface + Send + 'static> RenderLoop for FrameLoop<S> {
    fn start(&mut self, reader: Option<SpectrumReader>) {
        if self.worker.is_some() {
            self.stop();
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let mut renderer = BarRenderer::new(self.surface.clone(), reader, self.config.clone());
        let interval = self.config.frame_interval;

        let spawned = thread::Builder::new()
            .name("tonearm-visualizer".to_string())
            .spawn(move || {
                while !stop_flag.load(Ordering::Acquire) {
                    renderer.render();
                    thread::park_timeout(interval);
                }
            });

        match spawned {
            Ok(thread) => {
                tracing::debug!("Visualizer started");
                self.worker = Some(Worker { stop, thread });
            }
            Err(e) => {
                tracing::warn!("Failed to spawn visualizer thread: {}", e);
            }
        }
    }

    fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        worker.stop.store(true, Ordering::Release);
        worker.thread.thread().unpark();
        if worker.thread.join().is_err() {
            tracing::warn!("Visualizer thread panicked");
        }

        self.surface.lock().draw_idle();
        tracing::debug!("Visualizer stopped");
    }

    fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}

impl<S: BarSurface + Send + 'static> Drop for FrameLoop<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
