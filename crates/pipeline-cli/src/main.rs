//! `pipeline-cli`: probe, play and convert media files with `audio-pipeline`.
//!
//! - `probe <file>`: stream properties and tags
//! - `play <file>`: play on the default (or `--device`) output until done or Ctrl-C
//! - `convert <in> <out>`: decode, resample and write PCM through the built-in backend
//! - `--list-devices`: list output devices and exit

mod cli;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use audio_pipeline::output::device;
use audio_pipeline::{
    AudioPlayer, ConversionConfig, CpalOutput, CpalOutputConfig, DecodeConfig, Decoder, Encoder,
    EncodingSettings, Error, MetadataReader, PcmBackend, PlaybackState, PlayerConfig,
    PlayerObserver, SymphoniaMetadataReader, UpmixPolicy,
};
use clap::Parser;
use crossbeam_channel::Sender;
use tracing_subscriber::EnvFilter;

use crate::cli::{Args, Command};

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,audio_pipeline=info")),
        )
        .init();

    if args.list_devices {
        let host = cpal::default_host();
        for (i, name) in device::list_devices(&host)?.iter().enumerate() {
            println!("#{i}: {name}");
        }
        return Ok(());
    }

    match args.command {
        Some(Command::Probe { path }) => probe(&path),
        Some(Command::Play {
            path,
            device,
            start,
            volume,
            chunk_frames,
            refill_max_frames,
            buffer_seconds,
            completion_poll_ms,
        }) => {
            let output = CpalOutputConfig {
                device,
                buffer_seconds,
                refill_max_frames,
                completion_poll: Duration::from_millis(completion_poll_ms),
            };
            let config = PlayerConfig {
                decode: DecodeConfig {
                    chunk_frames,
                    ..DecodeConfig::default()
                },
            };
            play(&path, output, config, start, volume)
        }
        Some(Command::Convert {
            input,
            output,
            codec,
            settings,
            sample_rate,
            bit_depth,
            channels,
            no_upmix,
            frame_size,
        }) => {
            let mut config = ConversionConfig::new(codec.into(), &output);
            if let Some(json) = settings {
                let settings: EncodingSettings =
                    serde_json::from_str(&json).context("parse --settings")?;
                config = config.with_settings(settings);
            }
            if let Some(rate) = sample_rate {
                config = config.with_sample_rate(rate);
            }
            if let Some(bits) = bit_depth {
                config = config.with_bit_depth(bits);
            }
            if let Some(channels) = channels {
                config = config.with_channels(channels);
            }
            if no_upmix {
                config = config.with_upmix(UpmixPolicy::Fail);
            }
            convert(&input, &config, frame_size)
        }
        None => Err(anyhow!("no command given (try --help)")),
    }
}

/// A flag raised by Ctrl-C. Without a handler the flag never rises and Ctrl-C kills the
/// process as usual.
fn interrupt_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let raised = flag.clone();
    if let Err(e) = ctrlc::set_handler(move || raised.store(true, Ordering::Relaxed)) {
        tracing::warn!(error = %e, "could not install Ctrl-C handler");
    }
    flag
}

fn probe(path: &Path) -> Result<()> {
    let info = Decoder::probe(path).with_context(|| format!("probe {}", path.display()))?;
    let meta = SymphoniaMetadataReader
        .read(path)
        .with_context(|| format!("read tags of {}", path.display()))?;

    println!("file:        {}", path.display());
    println!("codec:       {}", info.codec.as_deref().unwrap_or("unknown"));
    println!("container:   {}", info.container.as_deref().unwrap_or("unknown"));
    println!("sample rate: {} Hz", info.sample_rate);
    println!("channels:    {}", info.channels);
    if let Some(bits) = info.bit_depth {
        println!("bit depth:   {bits}");
    }
    if let Some(secs) = info.duration {
        println!("duration:    {secs:.3} s");
    }
    if let Some(bps) = info.bitrate {
        println!("bitrate:     {} kbps", bps / 1000);
    }
    for (label, value) in [
        ("title", &meta.title),
        ("artist", &meta.artist),
        ("album", &meta.album),
    ] {
        if let Some(value) = value {
            println!("{:<12} {value}", format!("{label}:"));
        }
    }
    if let Some(art) = &meta.cover_art {
        println!("cover art:   {} ({} bytes)", art.media_type, art.data.len());
    }
    Ok(())
}

/// Forwards completion and errors to the main thread.
struct ExitObserver {
    tx: Sender<Option<String>>,
}

impl PlayerObserver for ExitObserver {
    fn on_state_change(&self, state: PlaybackState) {
        if state == PlaybackState::Completed {
            let _ = self.tx.send(None);
        }
    }

    fn on_error(&self, error: &Error) {
        let _ = self.tx.send(Some(error.to_string()));
    }
}

fn play(
    path: &Path,
    output: CpalOutputConfig,
    config: PlayerConfig,
    start: Option<f64>,
    volume: f32,
) -> Result<()> {
    let output = Arc::new(CpalOutput::new(output));
    let player = AudioPlayer::with_config(output, Arc::new(SymphoniaMetadataReader), config);
    let (tx, rx) = crossbeam_channel::unbounded();
    player.set_observer(Arc::new(ExitObserver { tx }));

    let interrupted = interrupt_flag();

    player
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    player.set_volume(volume);
    if let Some(secs) = start {
        player.seek(secs).context("seek")?;
    }

    let status = player.status();
    tracing::info!(
        now_playing = status.now_playing.as_deref().unwrap_or(""),
        codec = status.source_codec.as_deref().unwrap_or("unknown"),
        duration_secs = status.duration_secs,
        passthrough = status.passthrough.unwrap_or(false),
        "playing"
    );
    player.play().context("start playback")?;

    loop {
        if interrupted.load(Ordering::Relaxed) {
            tracing::info!(position_secs = player.current_time(), "interrupted");
            player.stop();
            break;
        }
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(Some(error)) => {
                player.close();
                return Err(anyhow!("playback failed: {error}"));
            }
            Ok(None) => {
                if !matches!(player.state(), PlaybackState::Playing) {
                    break;
                }
            }
            Err(_) => {}
        }
    }
    player.close();
    Ok(())
}

fn convert(input: &Path, config: &ConversionConfig, frame_size: Option<usize>) -> Result<()> {
    let cancelled = interrupt_flag();

    let metadata = SymphoniaMetadataReader.read(input).ok();
    let encoder = Encoder::new(PcmBackend::new().with_frame_size(frame_size));
    let mut next_report = 0.1;
    let result = encoder.encode(
        input,
        config,
        metadata.as_ref(),
        |fraction| {
            if fraction >= next_report {
                tracing::info!(percent = (fraction * 100.0).round() as u32, "progress");
                next_report = (fraction + 0.1).min(1.0);
            }
        },
        || cancelled.load(Ordering::Relaxed),
    );

    match result {
        Ok(summary) => {
            println!(
                "wrote {} ({} samples @ {} Hz, {} ch, {} packets)",
                config.destination().display(),
                summary.samples_encoded,
                summary.sample_rate,
                summary.channels,
                summary.packets_written
            );
            Ok(())
        }
        Err(Error::Cancelled) => {
            if let Err(e) = std::fs::remove_file(config.destination()) {
                tracing::warn!(error = %e, "could not remove partial output");
            }
            Err(anyhow!("conversion cancelled"))
        }
        Err(e) => Err(e).with_context(|| format!("convert {}", input.display())),
    }
}
