//! Contracts between the encode driver and the codec/container implementations it drives.

use std::path::Path;

use audio_pipeline_types::{AacProfile, OutputCodec, SampleFormat};

use crate::encode::settings::RateControl;
use crate::error::Result;
use crate::frame::DecodedFrame;
use crate::metadata::{CoverArt, TrackMetadata};

/// Stream parameters an encoder is opened with.
#[derive(Clone, Debug, PartialEq)]
pub struct EncoderParams {
    pub sample_rate: u32,
    pub channels: usize,
    pub sample_format: SampleFormat,
    pub rate_control: RateControl,
    pub aac_profile: Option<AacProfile>,
}

/// One chunk of PCM submitted to an encoder.
#[derive(Clone, Copy, Debug)]
pub struct EncoderFrame<'a> {
    /// Position of the first sample, in samples from stream start.
    pub pts: u64,
    pub data: DecodedFrame<'a>,
}

/// Compressed (or packed PCM) output of an encoder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedPacket {
    pub pts: u64,
    /// Duration in samples.
    pub duration: u64,
    pub data: Vec<u8>,
}

/// A codec instance producing packets from PCM chunks.
pub trait CodecEncoder: Send {
    fn name(&self) -> &str;

    /// Sample format this encoder consumes, given the requested bit depth.
    fn required_sample_format(&self, bit_depth: Option<u16>) -> SampleFormat;

    /// Exact number of frames every submission except the last must contain, if the codec
    /// has such a constraint.
    fn frame_size(&self) -> Option<usize>;

    /// Sample rates the codec accepts; `None` means any.
    fn supported_sample_rates(&self) -> Option<&[u32]>;

    fn open(&mut self, params: &EncoderParams) -> Result<()>;

    /// Submit a chunk, or `None` to flush delayed output at end of stream.
    fn send_frame(&mut self, frame: Option<EncoderFrame<'_>>) -> Result<()>;

    /// Next finished packet, if any is available.
    fn receive_packet(&mut self) -> Result<Option<EncodedPacket>>;
}

/// Output file muxer.
///
/// Call order: metadata and cover art declarations, header, cover art packet, packets,
/// trailer.
pub trait ContainerWriter: Send {
    fn set_metadata(&mut self, metadata: &TrackMetadata) -> Result<()>;
    /// Declare an attached-picture stream.
    fn add_cover_art(&mut self, art: &CoverArt) -> Result<()>;
    fn write_header(&mut self, params: &EncoderParams) -> Result<()>;
    fn write_cover_art_packet(&mut self, art: &CoverArt) -> Result<()>;
    fn write_packet(&mut self, packet: &EncodedPacket) -> Result<()>;
    fn write_trailer(&mut self) -> Result<()>;
}

/// Factory for encoders and containers.
pub trait CodecBackend: Send + Sync {
    /// Fails with `EncoderNotFound` when the codec is not available.
    fn make_encoder(&self, codec: OutputCodec) -> Result<Box<dyn CodecEncoder>>;

    /// Create the destination file. Fails with `OutputOpenFailed`.
    fn create_container(&self, codec: OutputCodec, path: &Path) -> Result<Box<dyn ContainerWriter>>;
}
