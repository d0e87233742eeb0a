//! Tonearm - play a track in the terminal with a live spectrum
//!
//! Usage: `tonearm <file> [title] [artist]` or `tonearm --devices`

use std::io::{BufRead, Write};
use std::thread;
use std::time::Duration;

use anyhow::{Context, bail};

use tonearm::audio::{
    AudioEvent, BarSurface, FrameLoop, RodioSourceFactory, Track, output_devices,
    spawn_audio_thread,
};
use tonearm::settings::Settings;
use tonearm::transport::{PlayIcon, Transport, TransportGesture};

/// Block glyphs from lowest to tallest
const BAR_GLYPHS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Draws bars as a single line of block glyphs on stderr
struct TerminalBars;

impl BarSurface for TerminalBars {
    fn draw_bars(&mut self, heights: &[f32]) {
        let line: String = heights
            .iter()
            .map(|h| {
                let idx = (h.clamp(0.0, 1.0) * (BAR_GLYPHS.len() - 1) as f32).round() as usize;
                BAR_GLYPHS[idx]
            })
            .collect();
        let mut err = std::io::stderr().lock();
        let _ = write!(err, "\r{}", line);
        let _ = err.flush();
    }

    fn draw_idle(&mut self) {
        let mut err = std::io::stderr().lock();
        let _ = write!(err, "\r\x1b[2K");
        let _ = err.flush();
    }
}

fn print_devices() {
    let devices = output_devices();
    if devices.is_empty() {
        println!("No output devices found");
    }
    for device in devices {
        let marker = if device.is_default { "*" } else { " " };
        println!("{} {}", marker, device.name);
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing for logging
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(first) = args.first() else {
        bail!("usage: tonearm <file> [title] [artist] | tonearm --devices");
    };
    if first == "--devices" {
        print_devices();
        return Ok(());
    }

    let locator = first.clone();
    let title = args.get(1).cloned().unwrap_or_else(|| {
        std::path::Path::new(&locator)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| locator.clone())
    });
    let track = Track::new(locator, title).with_artist(args.get(2).map(String::as_str));

    let mut settings = Settings::load();
    let device_name = settings.device_name.clone();
    let renderer = Box::new(FrameLoop::new(TerminalBars, settings.visualizer_config()));

    let mut engine = spawn_audio_thread(
        &settings,
        move || RodioSourceFactory::new(device_name),
        renderer,
    )
    .context("failed to start the engine thread")?;

    let mut events = engine
        .take_event_rx()
        .context("event receiver already taken")?;
    thread::Builder::new()
        .name("tonearm-events".to_string())
        .spawn(move || {
            while let Some(event) = events.blocking_recv() {
                match event {
                    AudioEvent::StateChanged(state) => {
                        tracing::debug!("Phase: {}", state.phase);
                    }
                    AudioEvent::Error(info) => eprintln!("\n{}: {}", info.kind, info.message),
                    AudioEvent::RequestNext { shuffle } => {
                        eprintln!("\nNext track requested (shuffle: {})", shuffle);
                    }
                    AudioEvent::CommandRejected { command, reason } => {
                        eprintln!("\nRejected {}: {}", command, reason);
                    }
                }
            }
        })
        .context("failed to start the event thread")?;

    engine.handle.open_and_play(track);

    let mut transport = Transport::new(engine.handle.clone());
    eprintln!("p play/pause, f/b skip, m mute, r repeat, s shuffle, +/- volume, n next, t retry, i info, q quit");

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("failed to read stdin")?;
        let gesture = match line.trim() {
            "p" => TransportGesture::PlayPauseClicked,
            "f" => TransportGesture::SkipForwardClicked,
            "b" => TransportGesture::SkipBackClicked,
            "m" => TransportGesture::MuteClicked,
            "r" => TransportGesture::RepeatClicked,
            "s" => TransportGesture::ShuffleClicked,
            "n" => TransportGesture::NextClicked,
            "t" => TransportGesture::RetryClicked,
            "+" => TransportGesture::VolumeChanged(transport.view().volume + 0.1),
            "-" => TransportGesture::VolumeChanged(transport.view().volume - 0.1),
            "i" => {
                let view = transport.view();
                let icon = match view.play_icon {
                    PlayIcon::Play => "paused",
                    PlayIcon::Pause => "playing",
                };
                eprintln!(
                    "\n{} - {} [{}] {} / {} vol {:.0}%{}",
                    view.title,
                    view.artist,
                    icon,
                    view.elapsed_label,
                    view.total_label,
                    view.volume * 100.0,
                    if view.muted { " (muted)" } else { "" }
                );
                continue;
            }
            "q" => break,
            "" => continue,
            other => {
                eprintln!("\nUnknown command: {}", other);
                continue;
            }
        };
        transport.apply(gesture);
    }

    transport.apply(TransportGesture::CloseClicked);

    let last = engine.handle.snapshot();
    settings.volume = last.volume;
    settings.muted = last.muted;
    settings.repeat = last.repeat;
    settings.shuffle = last.shuffle;
    if let Err(e) = settings.save() {
        tracing::warn!("Failed to save settings: {}", e);
    }

    engine
        .join(Duration::from_secs(2))
        .map_err(anyhow::Error::msg)?;
    Ok(())
}
