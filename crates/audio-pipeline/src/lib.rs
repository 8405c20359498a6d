//! Decode, resample, encode and play audio files.
//!
//! - [`Decoder`] turns a media file into PCM frames in a requested format.
//! - [`Encoder`] drives decode → encode → mux through a pluggable codec backend.
//! - [`AudioPlayer`] runs a playback state machine against any [`AudioOutput`].
//! - [`SampleBuffer`] keeps recent samples for visualisation.

pub mod config;
pub mod decode;
pub mod encode;
pub mod error;
pub mod frame;
pub mod metadata;
pub mod output;
pub mod player;
mod resample;
pub mod sample_buffer;

pub use audio_pipeline_types::{
    AacProfile, EncodingSettings, Mp3BitrateMode, OutputCodec, PlaybackState, PlayerStatus,
    SampleFormat, UpmixPolicy,
};
pub use config::{CpalOutputConfig, DecodeConfig, PlayerConfig};
pub use decode::{Decoder, SourceInfo};
pub use encode::backend::{
    CodecBackend, CodecEncoder, ContainerWriter, EncodedPacket, EncoderFrame, EncoderParams,
};
pub use encode::settings::{ConversionConfig, RateControl};
pub use encode::wav::PcmBackend;
pub use encode::{EncodeSummary, Encoder};
pub use error::{Error, Result};
pub use frame::{AudioOutputFormat, DecodedFrame, Planes};
pub use metadata::{CoverArt, MetadataReader, SymphoniaMetadataReader, TrackMetadata};
pub use output::{AudioOutput, CpalOutput};
pub use player::{AudioPlayer, PlayerObserver};
pub use sample_buffer::SampleBuffer;
