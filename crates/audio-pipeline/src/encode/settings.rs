use std::path::{Path, PathBuf};

use audio_pipeline_types::{AacProfile, EncodingSettings, Mp3BitrateMode, OutputCodec, UpmixPolicy};

use crate::error::{Error, Result};

/// Parameters of a single encode call.
#[derive(Clone, Debug, PartialEq)]
pub struct ConversionConfig {
    pub codec: OutputCodec,
    pub settings: EncodingSettings,
    /// Output rate; `None` keeps the source rate.
    pub sample_rate: Option<u32>,
    /// Output bit depth for integer PCM codecs; `None` keeps the source depth.
    pub bit_depth: Option<u16>,
    /// Output channel count; `None` keeps the source layout.
    pub channels: Option<usize>,
    pub destination: PathBuf,
    pub upmix: UpmixPolicy,
}

impl ConversionConfig {
    /// Config using the codec's default settings and the source's format.
    pub fn new(codec: OutputCodec, destination: impl Into<PathBuf>) -> Self {
        Self {
            codec,
            settings: codec.default_settings(),
            sample_rate: None,
            bit_depth: None,
            channels: None,
            destination: destination.into(),
            upmix: UpmixPolicy::default(),
        }
    }

    pub fn with_settings(mut self, settings: EncodingSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = Some(rate);
        self
    }

    pub fn with_bit_depth(mut self, bits: u16) -> Self {
        self.bit_depth = Some(bits);
        self
    }

    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn with_upmix(mut self, upmix: UpmixPolicy) -> Self {
        self.upmix = upmix;
        self
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Reject overrides and settings that cannot describe a valid encode.
    pub fn validate(&self) -> Result<()> {
        if !self.settings.matches(self.codec) {
            return Err(Error::InvalidConfig(format!(
                "{} settings cannot configure the {} encoder",
                self.settings.family(),
                self.codec.name()
            )));
        }
        if self.sample_rate == Some(0) {
            return Err(Error::InvalidConfig("sample rate must be positive".into()));
        }
        if self.channels == Some(0) {
            return Err(Error::InvalidConfig("channel count must be positive".into()));
        }
        if let Some(bits) = self.bit_depth {
            if !matches!(bits, 16 | 24 | 32) {
                return Err(Error::InvalidConfig(format!(
                    "bit depth {bits} is not one of 16, 24, 32"
                )));
            }
        }
        rate_control(self.codec, &self.settings).map(|_| ())
    }
}

/// Codec-neutral rate control handed to an encoder.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RateControl {
    /// Lossless codecs without tunables.
    None,
    ConstantBitrate { bits_per_second: u32 },
    AverageBitrate { bits_per_second: u32 },
    /// Codec-specific quality scale (LAME V0-V9, Vorbis -1..10).
    VbrQuality(f32),
    CompressionLevel(u8),
}

/// Translate per-codec settings into rate control plus an optional AAC profile.
pub fn rate_control(
    codec: OutputCodec,
    settings: &EncodingSettings,
) -> Result<(RateControl, Option<AacProfile>)> {
    if !settings.matches(codec) {
        return Err(Error::InvalidConfig(format!(
            "{} settings cannot configure the {} encoder",
            settings.family(),
            codec.name()
        )));
    }

    let mapped = match *settings {
        EncodingSettings::Lossless => (RateControl::None, None),
        EncodingSettings::Flac { compression_level } => {
            if compression_level > 12 {
                return Err(invalid(format!(
                    "flac compression level {compression_level} is above 12"
                )));
            }
            (RateControl::CompressionLevel(compression_level), None)
        }
        EncodingSettings::Mp3 { mode } => match mode {
            Mp3BitrateMode::Cbr { kbps } => (
                RateControl::ConstantBitrate {
                    bits_per_second: kbps_to_bps(kbps, 8..=320)?,
                },
                None,
            ),
            Mp3BitrateMode::Abr { kbps } => (
                RateControl::AverageBitrate {
                    bits_per_second: kbps_to_bps(kbps, 8..=320)?,
                },
                None,
            ),
            Mp3BitrateMode::Vbr { quality } => {
                if quality > 9 {
                    return Err(invalid(format!("mp3 vbr quality {quality} is above 9")));
                }
                (RateControl::VbrQuality(quality as f32), None)
            }
        },
        EncodingSettings::Aac {
            profile,
            bitrate_kbps,
        } => (
            RateControl::ConstantBitrate {
                bits_per_second: kbps_to_bps(bitrate_kbps, 16..=512)?,
            },
            Some(profile),
        ),
        EncodingSettings::Opus { bitrate_kbps } => (
            RateControl::AverageBitrate {
                bits_per_second: kbps_to_bps(bitrate_kbps, 6..=510)?,
            },
            None,
        ),
        EncodingSettings::Vorbis { quality } => {
            if !(-1.0..=10.0).contains(&quality) {
                return Err(invalid(format!("vorbis quality {quality} is outside -1..10")));
            }
            (RateControl::VbrQuality(quality), None)
        }
    };
    Ok(mapped)
}

fn kbps_to_bps(kbps: u32, range: std::ops::RangeInclusive<u32>) -> Result<u32> {
    if !range.contains(&kbps) {
        return Err(invalid(format!(
            "bitrate {kbps} kbps is outside {}..={} kbps",
            range.start(),
            range.end()
        )));
    }
    Ok(kbps * 1000)
}

fn invalid(detail: String) -> Error {
    Error::InvalidConfig(detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_settings_are_rejected() {
        let config = ConversionConfig::new(OutputCodec::Flac, "out.flac")
            .with_settings(EncodingSettings::Opus { bitrate_kbps: 128 });
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn defaults_validate_for_every_codec() {
        for codec in [
            OutputCodec::Wav,
            OutputCodec::Flac,
            OutputCodec::Mp3,
            OutputCodec::Aac,
            OutputCodec::Opus,
            OutputCodec::Vorbis,
        ] {
            let config = ConversionConfig::new(codec, "out");
            assert!(config.validate().is_ok(), "{codec:?}");
        }
    }

    #[test]
    fn maps_bitrate_modes() {
        let (rc, profile) = rate_control(
            OutputCodec::Aac,
            &EncodingSettings::Aac {
                profile: AacProfile::HeV1,
                bitrate_kbps: 96,
            },
        )
        .unwrap();
        assert_eq!(
            rc,
            RateControl::ConstantBitrate {
                bits_per_second: 96_000
            }
        );
        assert_eq!(profile, Some(AacProfile::HeV1));

        let (rc, _) = rate_control(
            OutputCodec::Mp3,
            &EncodingSettings::Mp3 {
                mode: Mp3BitrateMode::Vbr { quality: 0 },
            },
        )
        .unwrap();
        assert_eq!(rc, RateControl::VbrQuality(0.0));

        let (rc, _) = rate_control(OutputCodec::Wav, &EncodingSettings::Lossless).unwrap();
        assert_eq!(rc, RateControl::None);
    }

    #[test]
    fn out_of_range_values_fail() {
        assert!(
            rate_control(
                OutputCodec::Opus,
                &EncodingSettings::Opus { bitrate_kbps: 1000 }
            )
            .is_err()
        );
        assert!(
            rate_control(
                OutputCodec::Flac,
                &EncodingSettings::Flac {
                    compression_level: 13
                }
            )
            .is_err()
        );
        let config = ConversionConfig::new(OutputCodec::Wav, "out.wav").with_bit_depth(20);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        let config = ConversionConfig::new(OutputCodec::Wav, "out.wav").with_channels(0);
        assert!(config.validate().is_err());
    }
}
