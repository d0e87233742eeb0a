//! Tonearm - track playback engine with a live spectrum visualizer

pub mod audio;
pub mod settings;
pub mod transport;
