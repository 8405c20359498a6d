use std::time::Duration;

use audio_pipeline_types::UpmixPolicy;

/// Decoder conversion tuning shared by playback and encoding.
#[derive(Clone, Debug)]
pub struct DecodeConfig {
    /// Resampler input chunk size in frames.
    pub chunk_frames: usize,
    /// Behaviour when the source has fewer channels than the target.
    pub upmix: UpmixPolicy,
    /// Always run the conversion stage, even when passthrough would apply.
    pub force_conversion: bool,
    /// Consecutive corrupt packets tolerated before decoding fails.
    pub max_decode_retries: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            chunk_frames: 1024,
            upmix: UpmixPolicy::DuplicateFirst,
            force_conversion: false,
            max_decode_retries: 3,
        }
    }
}

/// Player tuning parameters.
#[derive(Clone, Debug, Default)]
pub struct PlayerConfig {
    pub decode: DecodeConfig,
}

/// Tuning for the cpal-backed output.
#[derive(Clone, Debug)]
pub struct CpalOutputConfig {
    /// Output device substring; `None` picks the host default.
    pub device: Option<String>,
    /// Scheduled audio the sink may hold ahead of the render clock.
    pub buffer_seconds: f32,
    /// Max frames pulled per output callback refill.
    pub refill_max_frames: usize,
    /// Poll interval while waiting for scheduled audio to finish playing.
    pub completion_poll: Duration,
}

impl Default for CpalOutputConfig {
    /// Defaults tuned for low-risk playback across common devices.
    fn default() -> Self {
        Self {
            device: None,
            buffer_seconds: 2.0,
            refill_max_frames: 4096,
            completion_poll: Duration::from_millis(20),
        }
    }
}
