use serde::{Deserialize, Serialize};

/// PCM sample representation.
///
/// `I24` samples travel in `i32` containers (sign-extended, not left-justified).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    I16,
    I24,
    I32,
    F32,
    F64,
}

impl SampleFormat {
    /// Significant bits per sample.
    pub fn bits_per_sample(self) -> u16 {
        match self {
            SampleFormat::I16 => 16,
            SampleFormat::I24 => 24,
            SampleFormat::I32 | SampleFormat::F32 => 32,
            SampleFormat::F64 => 64,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, SampleFormat::F32 | SampleFormat::F64)
    }

    /// Integer format for a requested bit depth; anything above 24 bits maps to `I32`.
    pub fn integer_for_bit_depth(bits: u16) -> Self {
        match bits {
            0..=16 => SampleFormat::I16,
            17..=24 => SampleFormat::I24,
            _ => SampleFormat::I32,
        }
    }
}

/// Player lifecycle state.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// A source is open (or nothing is) and playback has not started.
    #[default]
    Idle,
    Playing,
    Paused,
    /// Explicitly stopped; the position is back at zero.
    Stopped,
    /// The source played through to its end.
    Completed,
}

/// What to do when a decoded stream has fewer channels than the requested output.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpmixPolicy {
    /// Copy the first channel into every missing output channel.
    #[default]
    DuplicateFirst,
    /// Refuse to build the conversion.
    Fail,
}

/// Target codec of an encode.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutputCodec {
    Wav,
    Aiff,
    Flac,
    Alac,
    Mp3,
    Aac,
    Opus,
    Vorbis,
}

impl OutputCodec {
    pub fn name(self) -> &'static str {
        match self {
            OutputCodec::Wav => "wav",
            OutputCodec::Aiff => "aiff",
            OutputCodec::Flac => "flac",
            OutputCodec::Alac => "alac",
            OutputCodec::Mp3 => "mp3",
            OutputCodec::Aac => "aac",
            OutputCodec::Opus => "opus",
            OutputCodec::Vorbis => "vorbis",
        }
    }

    /// Conventional file extension for the codec's usual container.
    pub fn extension(self) -> &'static str {
        match self {
            OutputCodec::Wav => "wav",
            OutputCodec::Aiff => "aiff",
            OutputCodec::Flac => "flac",
            OutputCodec::Alac | OutputCodec::Aac => "m4a",
            OutputCodec::Mp3 => "mp3",
            OutputCodec::Opus => "opus",
            OutputCodec::Vorbis => "ogg",
        }
    }

    pub fn is_lossless(self) -> bool {
        matches!(
            self,
            OutputCodec::Wav | OutputCodec::Aiff | OutputCodec::Flac | OutputCodec::Alac
        )
    }

    /// Settings used when the caller does not pick any.
    pub fn default_settings(self) -> EncodingSettings {
        match self {
            OutputCodec::Wav | OutputCodec::Aiff | OutputCodec::Alac => EncodingSettings::Lossless,
            OutputCodec::Flac => EncodingSettings::Flac {
                compression_level: 5,
            },
            OutputCodec::Mp3 => EncodingSettings::Mp3 {
                mode: Mp3BitrateMode::Vbr { quality: 2 },
            },
            OutputCodec::Aac => EncodingSettings::Aac {
                profile: AacProfile::Lc,
                bitrate_kbps: 256,
            },
            OutputCodec::Opus => EncodingSettings::Opus { bitrate_kbps: 160 },
            OutputCodec::Vorbis => EncodingSettings::Vorbis { quality: 6.0 },
        }
    }
}

/// MP3 rate control.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Mp3BitrateMode {
    Cbr { kbps: u32 },
    /// LAME-style quality, 0 (best) to 9.
    Vbr { quality: u8 },
    Abr { kbps: u32 },
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AacProfile {
    Lc,
    HeV1,
    HeV2,
}

/// Per-codec encoder settings.
///
/// Serialized with an explicit `codec` discriminator, e.g.
/// `{"codec":"opus","bitrate_kbps":128}`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "codec", rename_all = "snake_case")]
pub enum EncodingSettings {
    /// Uncompressed or lossless codecs without tunables (WAV, AIFF, ALAC).
    Lossless,
    Flac { compression_level: u8 },
    Mp3 { mode: Mp3BitrateMode },
    Aac { profile: AacProfile, bitrate_kbps: u32 },
    Opus { bitrate_kbps: u32 },
    Vorbis { quality: f32 },
}

impl EncodingSettings {
    /// Short family label used in error messages.
    pub fn family(&self) -> &'static str {
        match self {
            EncodingSettings::Lossless => "lossless",
            EncodingSettings::Flac { .. } => "flac",
            EncodingSettings::Mp3 { .. } => "mp3",
            EncodingSettings::Aac { .. } => "aac",
            EncodingSettings::Opus { .. } => "opus",
            EncodingSettings::Vorbis { .. } => "vorbis",
        }
    }

    /// Whether these settings belong to `codec`'s family.
    pub fn matches(&self, codec: OutputCodec) -> bool {
        matches!(
            (self, codec),
            (
                EncodingSettings::Lossless,
                OutputCodec::Wav | OutputCodec::Aiff | OutputCodec::Alac
            ) | (EncodingSettings::Flac { .. }, OutputCodec::Flac)
                | (EncodingSettings::Mp3 { .. }, OutputCodec::Mp3)
                | (EncodingSettings::Aac { .. }, OutputCodec::Aac)
                | (EncodingSettings::Opus { .. }, OutputCodec::Opus)
                | (EncodingSettings::Vorbis { .. }, OutputCodec::Vorbis)
        )
    }
}

/// Snapshot of an audio player, suitable for status displays.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PlayerStatus {
    pub state: PlaybackState,
    /// Current playback position in seconds.
    pub position_secs: f64,
    /// Total source duration in seconds (0 when nothing is open).
    pub duration_secs: f64,
    /// Source path of the open session.
    pub now_playing: Option<String>,
    /// Source codec (for example `FLAC`, `MP3`).
    pub source_codec: Option<String>,
    /// Source sample rate (Hz).
    pub sample_rate: Option<u32>,
    /// Source channel count.
    pub channels: Option<u16>,
    /// Source bit depth, if known.
    pub bit_depth: Option<u16>,
    /// Whether decoded audio reaches the sink without conversion.
    pub passthrough: Option<bool>,
    /// Output gain in `[0, 1]`.
    pub volume: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_serialize_with_codec_discriminator() {
        let json = serde_json::to_value(EncodingSettings::Opus { bitrate_kbps: 128 }).unwrap();
        assert_eq!(json["codec"], "opus");
        assert_eq!(json["bitrate_kbps"], 128);

        let parsed: EncodingSettings =
            serde_json::from_str(r#"{"codec":"flac","compression_level":8}"#).unwrap();
        assert_eq!(parsed, EncodingSettings::Flac { compression_level: 8 });
    }

    #[test]
    fn settings_match_only_their_codec_family() {
        assert!(EncodingSettings::Lossless.matches(OutputCodec::Wav));
        assert!(EncodingSettings::Lossless.matches(OutputCodec::Alac));
        assert!(!EncodingSettings::Lossless.matches(OutputCodec::Flac));
        let mp3 = EncodingSettings::Mp3 {
            mode: Mp3BitrateMode::Cbr { kbps: 320 },
        };
        assert!(mp3.matches(OutputCodec::Mp3));
        assert!(!mp3.matches(OutputCodec::Aac));
    }

    #[test]
    fn default_settings_match_their_codec() {
        for codec in [
            OutputCodec::Wav,
            OutputCodec::Aiff,
            OutputCodec::Flac,
            OutputCodec::Alac,
            OutputCodec::Mp3,
            OutputCodec::Aac,
            OutputCodec::Opus,
            OutputCodec::Vorbis,
        ] {
            assert!(codec.default_settings().matches(codec), "{codec:?}");
        }
    }

    #[test]
    fn integer_format_for_bit_depth() {
        assert_eq!(SampleFormat::integer_for_bit_depth(16), SampleFormat::I16);
        assert_eq!(SampleFormat::integer_for_bit_depth(24), SampleFormat::I24);
        assert_eq!(SampleFormat::integer_for_bit_depth(32), SampleFormat::I32);
        assert_eq!(SampleFormat::I24.bits_per_sample(), 24);
    }
}
