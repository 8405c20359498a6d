//! Error taxonomy shared by the decoder, encoder and player.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The source could not be opened or read.
    #[error("failed to open {}: {source}", path.display())]
    OpenFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The container could not be probed or lacks required stream parameters.
    #[error("stream info unavailable: {0}")]
    StreamInfoUnavailable(String),

    #[error("no audio stream found")]
    NoAudioStream,

    /// No decoder is registered for the stream's codec.
    #[error("no decoder available for codec {0}")]
    CodecUnavailable(String),

    #[error("failed to open codec: {0}")]
    CodecOpenFailed(String),

    /// An operation needs `configure`/`open` to have happened first.
    #[error("decoder is not configured")]
    NotConfigured,

    #[error("failed to initialise resampler: {0}")]
    ResamplerInitFailed(String),

    #[error("decode failed: {0}")]
    DecodeFailed(String),

    /// Normal end of the stream. Not a failure.
    #[error("end of stream")]
    EndOfFile,

    #[error("no encoder available for {0}")]
    EncoderNotFound(String),

    #[error("failed to open encoder: {0}")]
    EncoderOpenFailed(String),

    #[error("failed to open output {}: {detail}", path.display())]
    OutputOpenFailed { path: PathBuf, detail: String },

    #[error("failed to write container header: {0}")]
    HeaderWriteFailed(String),

    #[error("sample rate {requested} Hz is not supported by {encoder} (supported: {supported:?})")]
    UnsupportedSampleRate {
        requested: u32,
        supported: Vec<u32>,
        encoder: String,
    },

    #[error("encoding failed: {0}")]
    EncodingFailed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("playback could not be opened: {0}")]
    PlaybackOpenFailed(String),

    #[error("audio backend failed: {0}")]
    AudioBackendFailed(String),

    /// Settings that do not fit the selected codec, or unusable overrides.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The stream has fewer channels than requested and up-mixing is disabled.
    #[error("decoded stream has {decoded} channel(s), output needs {target}")]
    ChannelMismatch { decoded: usize, target: usize },
}

impl Error {
    /// `true` for the end-of-stream sentinel.
    pub fn is_end_of_file(&self) -> bool {
        matches!(self, Error::EndOfFile)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
