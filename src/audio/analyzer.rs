//! Real-time audio spectrum analyzer
//!
//! Taps the decoded signal before volume and mute are applied and publishes
//! fixed-size magnitude frames for the visualizer:
//! - Mono mix of all channels
//! - Hann-windowed FFT (power-of-two size, 256 by default) with 50% overlap
//! - dB scale normalized into 0.0..=1.0 with attack/decay smoothing
//!
//! Frames are immutable. The analyzer swaps in a fresh `Arc<SpectrumFrame>`
//! and readers clone the latest one, so the audio callback never waits on a
//! renderer.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rodio::Source;
use spectrum_analyzer::scaling::divide_by_N_sqrt;
use spectrum_analyzer::windows::hann_window;
use spectrum_analyzer::{FrequencyLimit, samples_fft_to_spectrum};

/// Default FFT size, giving 128 magnitude bins
pub const DEFAULT_FFT_SIZE: usize = 256;

/// Smallest supported FFT size
pub const MIN_FFT_SIZE: usize = 64;

/// Largest FFT size supported by the FFT backend
pub const MAX_FFT_SIZE: usize = 16384;

/// Analyzer tuning
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumConfig {
    /// FFT window length in samples, must be a power of two
    pub fft_size: usize,
    /// Decay factor (0.0 = instant, 0.99 = very slow)
    pub decay: f32,
    /// Level mapped to 0.0
    pub min_db: f32,
    /// Level mapped to 1.0
    pub max_db: f32,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            fft_size: DEFAULT_FFT_SIZE,
            decay: 0.85,
            min_db: -60.0,
            max_db: 12.0,
        }
    }
}

impl SpectrumConfig {
    /// Bring out-of-range values back to something the FFT can run with
    fn sanitized(mut self) -> Self {
        self.fft_size = self
            .fft_size
            .clamp(MIN_FFT_SIZE, MAX_FFT_SIZE)
            .next_power_of_two()
            .min(MAX_FFT_SIZE);
        self.decay = self.decay.clamp(0.0, 0.99);
        if !(self.max_db > self.min_db) {
            let defaults = Self::default();
            self.min_db = defaults.min_db;
            self.max_db = defaults.max_db;
        }
        self
    }
}

/// One published set of magnitudes
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumFrame {
    /// Normalized magnitude per bin (0.0 to 1.0), `fft_size / 2` entries
    pub levels: Vec<f32>,
    /// Increments with every publish, starting at 0 for the initial silent frame
    pub sequence: u64,
}

impl SpectrumFrame {
    fn silent(bins: usize, sequence: u64) -> Self {
        Self {
            levels: vec![0.0; bins],
            sequence,
        }
    }

    /// Whether every bin is at the floor
    pub fn is_silent(&self) -> bool {
        self.levels.iter().all(|level| *level <= 0.0)
    }
}

/// Writer side of the spectrum data
///
/// Cheap to clone. One analyzer exists per loaded track.
#[derive(Clone)]
pub struct SpectrumAnalyzer {
    config: SpectrumConfig,
    latest: Arc<RwLock<Arc<SpectrumFrame>>>,
}

impl std::fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("config", &self.config)
            .field("sequence", &self.latest.read().sequence)
            .finish()
    }
}

impl SpectrumAnalyzer {
    pub fn new(config: SpectrumConfig) -> Self {
        let config = config.sanitized();
        let bins = config.fft_size / 2;
        Self {
            config,
            latest: Arc::new(RwLock::new(Arc::new(SpectrumFrame::silent(bins, 0)))),
        }
    }

    pub fn config(&self) -> &SpectrumConfig {
        &self.config
    }

    /// Number of magnitude bins per frame
    pub fn bins(&self) -> usize {
        self.config.fft_size / 2
    }

    /// Most recently published frame
    pub fn latest(&self) -> Arc<SpectrumFrame> {
        self.latest.read().clone()
    }

    /// Read-only handle for renderers
    pub fn reader(&self) -> SpectrumReader {
        SpectrumReader {
            latest: self.latest.clone(),
        }
    }

    /// Create the per-stream processing state for a source
    pub fn tap(&self, sample_rate: u32, channels: u16) -> SpectrumTap {
        SpectrumTap::new(self.clone(), sample_rate, channels)
    }

    /// Publish a silent frame
    pub fn reset(&self) {
        self.publish(vec![0.0; self.bins()]);
    }

    fn publish(&self, levels: Vec<f32>) {
        let mut slot = self.latest.write();
        let sequence = slot.sequence + 1;
        *slot = Arc::new(SpectrumFrame { levels, sequence });
    }
}

/// Read side of the spectrum data
#[derive(Clone)]
pub struct SpectrumReader {
    latest: Arc<RwLock<Arc<SpectrumFrame>>>,
}

impl std::fmt::Debug for SpectrumReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumReader")
            .field("sequence", &self.latest.read().sequence)
            .finish()
    }
}

impl SpectrumReader {
    /// Most recently published frame, never blocks on analysis
    pub fn latest(&self) -> Arc<SpectrumFrame> {
        self.latest.read().clone()
    }
}

/// Sample accumulator feeding one analyzer
pub struct SpectrumTap {
    analyzer: SpectrumAnalyzer,
    sample_rate: u32,
    channels: usize,
    /// Channel index of the next interleaved sample
    current_channel: usize,
    /// Sum of the current frame's channels
    frame_sum: f32,
    /// Mono samples waiting for analysis
    mono: Vec<f32>,
    /// Smoothed levels per bin
    levels: Vec<f32>,
}

impl SpectrumTap {
    fn new(analyzer: SpectrumAnalyzer, sample_rate: u32, channels: u16) -> Self {
        let fft_size = analyzer.config.fft_size;
        let bins = analyzer.bins();
        Self {
            analyzer,
            sample_rate,
            channels: channels.max(1) as usize,
            current_channel: 0,
            frame_sum: 0.0,
            mono: Vec::with_capacity(fft_size),
            levels: vec![0.0; bins],
        }
    }

    /// Feed one interleaved sample
    pub fn push_sample(&mut self, sample: f32) {
        self.frame_sum += if sample.is_finite() { sample } else { 0.0 };
        self.current_channel += 1;

        if self.current_channel < self.channels {
            return;
        }

        self.mono.push(self.frame_sum / self.channels as f32);
        self.frame_sum = 0.0;
        self.current_channel = 0;

        if self.mono.len() >= self.analyzer.config.fft_size {
            self.analyze();
        }
    }

    /// Drop accumulated samples and publish silence (seek, new stream)
    pub fn reset(&mut self) {
        self.mono.clear();
        self.frame_sum = 0.0;
        self.current_channel = 0;
        self.levels.fill(0.0);
        self.analyzer.reset();
    }

    fn analyze(&mut self) {
        let fft_size = self.analyzer.config.fft_size;
        let SpectrumConfig {
            decay,
            min_db,
            max_db,
            ..
        } = self.analyzer.config;

        if self.sample_rate > 0 {
            let windowed = hann_window(&self.mono[..fft_size]);

            match samples_fft_to_spectrum(
                &windowed,
                self.sample_rate,
                FrequencyLimit::All,
                Some(&divide_by_N_sqrt),
            ) {
                Ok(spectrum) => {
                    // Skip the DC bin, keep fft_size / 2 bins up to Nyquist
                    for (bin, (_, magnitude)) in
                        spectrum.data().iter().skip(1).take(self.levels.len()).enumerate()
                    {
                        let level = normalize_db(magnitude.val(), min_db, max_db);
                        let current = self.levels[bin];
                        self.levels[bin] = if level > current {
                            // Attack: fast rise
                            current * 0.3 + level * 0.7
                        } else {
                            // Decay: smooth fall
                            current * decay + level * (1.0 - decay)
                        };
                    }
                    self.analyzer.publish(self.levels.clone());
                }
                Err(e) => {
                    tracing::debug!("Spectrum analysis failed: {:?}", e);
                }
            }
        }

        // Keep overlap for smoother updates (50% overlap)
        self.mono.drain(0..fft_size / 2);
    }
}

/// Map a linear magnitude onto 0.0..=1.0 over the configured dB range
fn normalize_db(magnitude: f32, min_db: f32, max_db: f32) -> f32 {
    if !(magnitude > 0.0) {
        return 0.0;
    }
    let db = 20.0 * magnitude.log10();
    ((db - min_db) / (max_db - min_db)).clamp(0.0, 1.0)
}

/// Source wrapper that feeds every sample to a `SpectrumTap`
pub struct AnalyzingSource<S>
where
    S: Source<Item = f32>,
{
    source: S,
    tap: SpectrumTap,
}

impl<S> AnalyzingSource<S>
where
    S: Source<Item = f32>,
{
    pub fn new(source: S, analyzer: SpectrumAnalyzer) -> Self {
        let tap = analyzer.tap(source.sample_rate(), source.channels());
        analyzer.reset();
        Self { source, tap }
    }
}

impl<S> Iterator for AnalyzingSource<S>
where
    S: Source<Item = f32>,
{
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        let sample = self.source.next()?;
        self.tap.push_sample(sample);
        Some(sample)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.source.size_hint()
    }
}

impl<S> Source for AnalyzingSource<S>
where
    S: Source<Item = f32>,
{
    fn current_span_len(&self) -> Option<usize> {
        self.source.current_span_len()
    }

    fn channels(&self) -> u16 {
        self.source.channels()
    }

    fn sample_rate(&self) -> u32 {
        self.source.sample_rate()
    }

    fn total_duration(&self) -> Option<Duration> {
        self.source.total_duration()
    }

    fn try_seek(&mut self, pos: Duration) -> Result<(), rodio::source::SeekError> {
        // Reset analysis buffers when seeking
        self.tap.reset();
        self.source.try_seek(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rodio::buffer::SamplesBuffer;

    fn sine(freq: f32, sample_rate: u32, frames: usize, channels: u16) -> Vec<f32> {
        (0..frames)
            .flat_map(|i| {
                let t = i as f32 / sample_rate as f32;
                let value = (2.0 * std::f32::consts::PI * freq * t).sin();
                std::iter::repeat_n(value, channels as usize)
            })
            .collect()
    }

    fn peak_bin(levels: &[f32]) -> usize {
        levels
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    #[test]
    fn test_initial_frame_is_silent() {
        let analyzer = SpectrumAnalyzer::new(SpectrumConfig::default());
        let frame = analyzer.latest();
        assert_eq!(frame.sequence, 0);
        assert_eq!(frame.levels.len(), 128);
        assert!(frame.is_silent());
    }

    #[test]
    fn test_fft_size_sanitized() {
        let analyzer = SpectrumAnalyzer::new(SpectrumConfig {
            fft_size: 300,
            ..Default::default()
        });
        assert_eq!(analyzer.config().fft_size, 512);
        assert_eq!(analyzer.bins(), 256);

        let analyzer = SpectrumAnalyzer::new(SpectrumConfig {
            fft_size: 1,
            ..Default::default()
        });
        assert_eq!(analyzer.config().fft_size, MIN_FFT_SIZE);
    }

    #[test]
    fn test_sine_peaks_at_expected_bin() {
        let analyzer = SpectrumAnalyzer::new(SpectrumConfig::default());
        let mut tap = analyzer.tap(44100, 1);

        for sample in sine(1000.0, 44100, 256, 1) {
            tap.push_sample(sample);
        }

        let frame = analyzer.latest();
        assert_eq!(frame.sequence, 1);
        // 44100 / 256 = 172.3 Hz per bin, 1 kHz lands between bins 5 and 6
        let peak = peak_bin(&frame.levels);
        assert!((4..=6).contains(&peak), "peak at bin {}", peak);
        assert!(frame.levels[peak] > 0.5);
        assert!(frame.levels[100] < frame.levels[peak] * 0.5);
    }

    #[test]
    fn test_overlap_publishes_every_half_window() {
        let analyzer = SpectrumAnalyzer::new(SpectrumConfig::default());
        let mut tap = analyzer.tap(48000, 2);

        // 640 stereo frames: one window at 256, then one per 128 more
        for sample in sine(440.0, 48000, 640, 2) {
            tap.push_sample(sample);
        }

        assert_eq!(analyzer.latest().sequence, 4);
    }

    #[test]
    fn test_silence_stays_at_floor() {
        let analyzer = SpectrumAnalyzer::new(SpectrumConfig::default());
        let mut tap = analyzer.tap(44100, 2);
        for _ in 0..1024 {
            tap.push_sample(0.0);
        }
        let frame = analyzer.latest();
        assert!(frame.sequence > 0);
        assert!(frame.is_silent());
    }

    #[test]
    fn test_decay_smooths_fall() {
        let analyzer = SpectrumAnalyzer::new(SpectrumConfig::default());
        let mut tap = analyzer.tap(44100, 1);

        for sample in sine(1000.0, 44100, 512, 1) {
            tap.push_sample(sample);
        }
        let loud = analyzer.latest();
        let peak = peak_bin(&loud.levels);

        for _ in 0..128 {
            tap.push_sample(0.0);
        }
        let after = analyzer.latest();
        assert!(after.levels[peak] > 0.0);
        assert!(after.levels[peak] < loud.levels[peak]);
    }

    #[test]
    fn test_reset_publishes_silence() {
        let analyzer = SpectrumAnalyzer::new(SpectrumConfig::default());
        let reader = analyzer.reader();
        let mut tap = analyzer.tap(44100, 1);

        for sample in sine(1000.0, 44100, 256, 1) {
            tap.push_sample(sample);
        }
        assert!(!reader.latest().is_silent());

        tap.reset();
        let frame = reader.latest();
        assert!(frame.is_silent());
        assert_eq!(frame.sequence, 2);
    }

    #[test]
    fn test_reader_holds_old_frame_after_publish() {
        let analyzer = SpectrumAnalyzer::new(SpectrumConfig::default());
        let reader = analyzer.reader();
        let held = reader.latest();

        analyzer.reset();

        assert_eq!(held.sequence, 0);
        assert_eq!(reader.latest().sequence, 1);
    }

    #[test]
    fn test_analyzing_source_passes_samples_through() {
        let samples = sine(440.0, 44100, 600, 2);
        let analyzer = SpectrumAnalyzer::new(SpectrumConfig::default());
        let source = AnalyzingSource::new(
            SamplesBuffer::new(2, 44100, samples.clone()),
            analyzer.clone(),
        );

        assert_eq!(source.channels(), 2);
        assert_eq!(source.sample_rate(), 44100);

        let out: Vec<f32> = source.collect();
        assert_eq!(out, samples);
        assert!(analyzer.latest().sequence > 1);
    }
}
