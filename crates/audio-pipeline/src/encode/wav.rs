//! Built-in PCM/WAV backend on top of `hound`.
//!
//! The encoder packs interleaved little-endian PCM into packets the way a real codec would
//! emit them; the container unpacks and hands the samples to `hound`, which owns the RIFF
//! layout. An optional fixed frame size makes the encoder demand uniform chunks, so the
//! FIFO path of the driver can be exercised end to end without an external codec library.

use std::collections::VecDeque;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use audio_pipeline_types::{OutputCodec, SampleFormat};

use crate::encode::backend::{
    CodecBackend, CodecEncoder, ContainerWriter, EncodedPacket, EncoderFrame, EncoderParams,
};
use crate::error::{Error, Result};
use crate::frame::Planes;
use crate::metadata::{CoverArt, TrackMetadata};

/// WAV-only [`CodecBackend`].
#[derive(Clone, Debug, Default)]
pub struct PcmBackend {
    frame_size: Option<usize>,
    supported_rates: Option<Vec<u32>>,
}

impl PcmBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require every submission but the last to hold exactly `frames` frames.
    pub fn with_frame_size(mut self, frames: Option<usize>) -> Self {
        self.frame_size = frames.filter(|&n| n > 0);
        self
    }

    /// Restrict the accepted output sample rates.
    pub fn with_supported_rates(mut self, mut rates: Vec<u32>) -> Self {
        rates.sort_unstable();
        rates.dedup();
        self.supported_rates = Some(rates);
        self
    }
}

impl CodecBackend for PcmBackend {
    fn make_encoder(&self, codec: OutputCodec) -> Result<Box<dyn CodecEncoder>> {
        match codec {
            OutputCodec::Wav => Ok(Box::new(PcmEncoder {
                frame_size: self.frame_size,
                supported_rates: self.supported_rates.clone(),
                params: None,
                pending: VecDeque::new(),
                flushed: false,
            })),
            other => Err(Error::EncoderNotFound(other.name().to_string())),
        }
    }

    fn create_container(&self, codec: OutputCodec, path: &Path) -> Result<Box<dyn ContainerWriter>> {
        if codec != OutputCodec::Wav {
            return Err(Error::EncoderNotFound(codec.name().to_string()));
        }
        let file = File::create(path).map_err(|e| Error::OutputOpenFailed {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        Ok(Box::new(WavContainer {
            path: path.to_path_buf(),
            file: Some(BufWriter::new(file)),
            writer: None,
            format: SampleFormat::I16,
        }))
    }
}

struct PcmEncoder {
    frame_size: Option<usize>,
    supported_rates: Option<Vec<u32>>,
    params: Option<EncoderParams>,
    pending: VecDeque<EncodedPacket>,
    flushed: bool,
}

impl CodecEncoder for PcmEncoder {
    fn name(&self) -> &str {
        "pcm_wav"
    }

    fn required_sample_format(&self, bit_depth: Option<u16>) -> SampleFormat {
        bit_depth.map_or(SampleFormat::I16, SampleFormat::integer_for_bit_depth)
    }

    fn frame_size(&self) -> Option<usize> {
        self.frame_size
    }

    fn supported_sample_rates(&self) -> Option<&[u32]> {
        self.supported_rates.as_deref()
    }

    fn open(&mut self, params: &EncoderParams) -> Result<()> {
        if params.channels == 0 || params.channels > u16::MAX as usize {
            return Err(Error::EncoderOpenFailed(format!(
                "unsupported channel count {}",
                params.channels
            )));
        }
        if params.sample_format == SampleFormat::F64 {
            return Err(Error::EncoderOpenFailed(
                "64-bit float PCM is not supported".into(),
            ));
        }
        self.params = Some(params.clone());
        Ok(())
    }

    fn send_frame(&mut self, frame: Option<EncoderFrame<'_>>) -> Result<()> {
        let params = self
            .params
            .as_ref()
            .ok_or_else(|| Error::EncodingFailed("encoder is not open".into()))?;
        let Some(frame) = frame else {
            self.flushed = true;
            return Ok(());
        };
        if self.flushed {
            return Err(Error::EncodingFailed("frame submitted after flush".into()));
        }

        let data = frame.data;
        if data.channels() != params.channels {
            return Err(Error::EncodingFailed(format!(
                "frame has {} channels, encoder expects {}",
                data.channels(),
                params.channels
            )));
        }
        if let Some(size) = self.frame_size {
            if data.frames() > size {
                return Err(Error::EncodingFailed(format!(
                    "frame of {} samples exceeds frame size {size}",
                    data.frames()
                )));
            }
        }

        let bytes = pack_interleaved(&data.planes(), params.sample_format)?;
        self.pending.push_back(EncodedPacket {
            pts: frame.pts,
            duration: data.frames() as u64,
            data: bytes,
        });
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<Option<EncodedPacket>> {
        Ok(self.pending.pop_front())
    }
}

fn bytes_per_sample(format: SampleFormat) -> usize {
    match format {
        SampleFormat::I16 => 2,
        SampleFormat::I24 => 3,
        SampleFormat::I32 | SampleFormat::F32 => 4,
        SampleFormat::F64 => 8,
    }
}

/// Interleave planes into little-endian WAV sample layout.
fn pack_interleaved(planes: &Planes<'_>, format: SampleFormat) -> Result<Vec<u8>> {
    let frames = planes.frames();
    let channels = planes.channels();
    let mut out = Vec::with_capacity(frames * channels * bytes_per_sample(format));
    match (planes, format) {
        (Planes::I16(p), SampleFormat::I16) => {
            for i in 0..frames {
                for plane in p.iter() {
                    out.extend_from_slice(&plane[i].to_le_bytes());
                }
            }
        }
        (Planes::I32(p), SampleFormat::I24) => {
            for i in 0..frames {
                for plane in p.iter() {
                    out.extend_from_slice(&plane[i].to_le_bytes()[..3]);
                }
            }
        }
        (Planes::I32(p), SampleFormat::I32) => {
            for i in 0..frames {
                for plane in p.iter() {
                    out.extend_from_slice(&plane[i].to_le_bytes());
                }
            }
        }
        (Planes::F32(p), SampleFormat::F32) => {
            for i in 0..frames {
                for plane in p.iter() {
                    out.extend_from_slice(&plane[i].to_le_bytes());
                }
            }
        }
        (planes, format) => {
            return Err(Error::EncodingFailed(format!(
                "{planes_kind} samples cannot be packed as {format:?}",
                planes_kind = planes_kind(planes)
            )));
        }
    }
    Ok(out)
}

fn planes_kind(planes: &Planes<'_>) -> &'static str {
    match planes {
        Planes::I16(_) => "i16",
        Planes::I32(_) => "i32",
        Planes::F32(_) => "f32",
        Planes::F64(_) => "f64",
    }
}

struct WavContainer {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    format: SampleFormat,
}

impl WavContainer {
    fn writer(&mut self) -> Result<&mut hound::WavWriter<BufWriter<File>>> {
        self.writer
            .as_mut()
            .ok_or_else(|| Error::EncodingFailed("container header not written".into()))
    }
}

impl ContainerWriter for WavContainer {
    fn set_metadata(&mut self, metadata: &TrackMetadata) -> Result<()> {
        tracing::debug!(
            title = metadata.title.as_deref().unwrap_or(""),
            "wav output carries no tags; skipping metadata"
        );
        Ok(())
    }

    fn add_cover_art(&mut self, art: &CoverArt) -> Result<()> {
        tracing::debug!(media_type = %art.media_type, "wav output cannot embed cover art");
        Ok(())
    }

    fn write_header(&mut self, params: &EncoderParams) -> Result<()> {
        let file = self
            .file
            .take()
            .ok_or_else(|| Error::HeaderWriteFailed("header already written".into()))?;
        let spec = hound::WavSpec {
            channels: params.channels as u16,
            sample_rate: params.sample_rate,
            bits_per_sample: params.sample_format.bits_per_sample(),
            sample_format: if params.sample_format.is_float() {
                hound::SampleFormat::Float
            } else {
                hound::SampleFormat::Int
            },
        };
        let writer = hound::WavWriter::new(file, spec).map_err(|e| {
            Error::HeaderWriteFailed(format!("{}: {e}", self.path.display()))
        })?;
        self.writer = Some(writer);
        self.format = params.sample_format;
        Ok(())
    }

    fn write_cover_art_packet(&mut self, _art: &CoverArt) -> Result<()> {
        Ok(())
    }

    fn write_packet(&mut self, packet: &EncodedPacket) -> Result<()> {
        let format = self.format;
        let width = bytes_per_sample(format);
        let writer = self.writer()?;
        let map_err = |e: hound::Error| Error::EncodingFailed(format!("wav write: {e}"));
        for sample in packet.data.chunks_exact(width) {
            match format {
                SampleFormat::I16 => writer
                    .write_sample(i16::from_le_bytes([sample[0], sample[1]]))
                    .map_err(map_err)?,
                SampleFormat::I24 => {
                    // Sign-extend from the top byte.
                    let value = i32::from_le_bytes([0, sample[0], sample[1], sample[2]]) >> 8;
                    writer.write_sample(value).map_err(map_err)?
                }
                SampleFormat::I32 => writer
                    .write_sample(i32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]]))
                    .map_err(map_err)?,
                SampleFormat::F32 => writer
                    .write_sample(f32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]]))
                    .map_err(map_err)?,
                SampleFormat::F64 => {
                    return Err(Error::EncodingFailed("64-bit float PCM is not supported".into()));
                }
            }
        }
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| Error::EncodingFailed("container header not written".into()))?;
        writer
            .finalize()
            .map_err(|e| Error::EncodingFailed(format!("wav finalize: {e}")))
    }
}
