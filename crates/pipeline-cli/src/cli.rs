//! Command-line interface definitions.
//!
//! Only the `clap` surface lives here; the commands themselves are in `main.rs`.

use std::path::PathBuf;

use audio_pipeline::OutputCodec;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "pipeline-cli", version)]
pub struct Args {
    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print stream properties and tags of a media file
    Probe { path: PathBuf },

    /// Play a media file on an output device
    Play {
        path: PathBuf,

        /// Use a specific output device by substring match
        #[arg(long)]
        device: Option<String>,

        /// Start position in seconds
        #[arg(long)]
        start: Option<f64>,

        /// Output volume, 0.0 to 1.0
        #[arg(long, default_value_t = 1.0)]
        volume: f32,

        /// Resampler input chunk size in frames (higher => more latency, lower => more overhead)
        #[arg(long, default_value_t = 1024)]
        chunk_frames: usize,

        /// Playback callback refill cap (frames). Larger reduces lock churn but can add latency.
        #[arg(long, default_value_t = 4096)]
        refill_max_frames: usize,

        /// Audio scheduled ahead of the device, in seconds
        #[arg(long, default_value_t = 2.0)]
        buffer_seconds: f32,

        /// Poll interval (ms) while waiting for the last audio to play out
        #[arg(long, default_value_t = 20)]
        completion_poll_ms: u64,
    },

    /// Convert a media file with the built-in PCM backend
    Convert {
        input: PathBuf,
        output: PathBuf,

        #[arg(long, value_enum, default_value_t = CodecArg::Wav)]
        codec: CodecArg,

        /// Codec settings as JSON, e.g. '{"codec":"lossless"}'
        #[arg(long)]
        settings: Option<String>,

        /// Output sample rate (defaults to the source rate)
        #[arg(long)]
        sample_rate: Option<u32>,

        /// Output bit depth: 16, 24 or 32
        #[arg(long)]
        bit_depth: Option<u16>,

        /// Output channel count (defaults to the source layout)
        #[arg(long)]
        channels: Option<usize>,

        /// Fail instead of duplicating channel 0 when up-mixing
        #[arg(long)]
        no_upmix: bool,

        /// Submit PCM to the encoder in fixed chunks of this many frames
        #[arg(long)]
        frame_size: Option<usize>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum CodecArg {
    Wav,
    Aiff,
    Flac,
    Alac,
    Mp3,
    Aac,
    Opus,
    Vorbis,
}

impl From<CodecArg> for OutputCodec {
    fn from(codec: CodecArg) -> Self {
        match codec {
            CodecArg::Wav => OutputCodec::Wav,
            CodecArg::Aiff => OutputCodec::Aiff,
            CodecArg::Flac => OutputCodec::Flac,
            CodecArg::Alac => OutputCodec::Alac,
            CodecArg::Mp3 => OutputCodec::Mp3,
            CodecArg::Aac => OutputCodec::Aac,
            CodecArg::Opus => OutputCodec::Opus,
            CodecArg::Vorbis => OutputCodec::Vorbis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_convert_overrides() {
        let args = Args::try_parse_from([
            "pipeline-cli",
            "convert",
            "in.flac",
            "out.wav",
            "--sample-rate",
            "48000",
            "--bit-depth",
            "24",
            "--frame-size",
            "1024",
        ])
        .unwrap();
        match args.command {
            Some(Command::Convert {
                codec,
                sample_rate,
                bit_depth,
                frame_size,
                no_upmix,
                ..
            }) => {
                assert_eq!(codec, CodecArg::Wav);
                assert_eq!(sample_rate, Some(48_000));
                assert_eq!(bit_depth, Some(24));
                assert_eq!(frame_size, Some(1024));
                assert!(!no_upmix);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn list_devices_needs_no_subcommand() {
        let args = Args::try_parse_from(["pipeline-cli", "--list-devices"]).unwrap();
        assert!(args.list_devices);
        assert!(args.command.is_none());
    }

    #[test]
    fn play_defaults_match_output_config() {
        let args = Args::try_parse_from(["pipeline-cli", "play", "song.flac"]).unwrap();
        let Some(Command::Play {
            buffer_seconds,
            refill_max_frames,
            chunk_frames,
            volume,
            completion_poll_ms,
            ..
        }) = args.command
        else {
            panic!("expected play");
        };
        let defaults = audio_pipeline::CpalOutputConfig::default();
        assert_eq!(
            std::time::Duration::from_millis(completion_poll_ms),
            defaults.completion_poll
        );
        assert_eq!(buffer_seconds, 2.0);
        assert_eq!(refill_max_frames, 4096);
        assert_eq!(chunk_frames, 1024);
        assert_eq!(volume, 1.0);
    }
}
