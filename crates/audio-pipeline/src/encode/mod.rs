//! Decode → convert → encode → mux driver.
//!
//! The [`Encoder`] owns nothing codec-specific: it asks a [`CodecBackend`] for an encoder and
//! a container, feeds the encoder PCM from a [`Decoder`] configured for planar `f32` at the
//! output rate, and regroups samples through a FIFO when the codec demands a fixed frame size.

pub mod backend;
mod fifo;
pub mod settings;
pub mod wav;

use std::path::Path;

use audio_pipeline_types::SampleFormat;

use crate::config::DecodeConfig;
use crate::decode::Decoder;
use crate::error::{Error, Result};
use crate::frame::{AudioOutputFormat, DecodedFrame, PlanarBuffer};
use crate::metadata::TrackMetadata;

use self::backend::{CodecBackend, CodecEncoder, ContainerWriter, EncoderFrame, EncoderParams};
use self::fifo::SampleFifo;
use self::settings::{ConversionConfig, rate_control};
use self::wav::PcmBackend;

/// Outcome of a finished encode.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EncodeSummary {
    /// Frames (samples per channel) submitted to the encoder.
    pub samples_encoded: u64,
    /// Number of submissions, including the final short one.
    pub chunks: usize,
    /// Size of the last submission.
    pub final_chunk_frames: usize,
    pub packets_written: usize,
    /// Estimate used for progress reporting.
    pub expected_total_samples: u64,
    pub sample_rate: u32,
    pub channels: usize,
    pub encoder: String,
}

/// Drives encodes through a [`CodecBackend`].
pub struct Encoder {
    backend: Box<dyn CodecBackend>,
    decode: DecodeConfig,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(PcmBackend::new())
    }
}

impl Encoder {
    pub fn new(backend: impl CodecBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            decode: DecodeConfig::default(),
        }
    }

    pub fn with_decode_config(mut self, decode: DecodeConfig) -> Self {
        self.decode = decode;
        self
    }

    /// Encode `input` into `config.destination`.
    ///
    /// `progress` receives a monotonically increasing estimate in `[0, 1]`; `cancelled` is
    /// polled once per decoded frame. On cancellation the partial output stays on disk.
    pub fn encode(
        &self,
        input: impl AsRef<Path>,
        config: &ConversionConfig,
        metadata: Option<&TrackMetadata>,
        mut progress: impl FnMut(f64),
        cancelled: impl Fn() -> bool,
    ) -> Result<EncodeSummary> {
        let input = input.as_ref();
        config.validate()?;
        let (rate_control, aac_profile) = rate_control(config.codec, &config.settings)?;

        let source = Decoder::probe(input)?;
        let sample_rate = config.sample_rate.unwrap_or(source.sample_rate);
        let channels = config.channels.unwrap_or(source.channels);

        let mut decoder = Decoder::new(DecodeConfig {
            upmix: config.upmix,
            ..self.decode.clone()
        });
        decoder.configure(AudioOutputFormat::planar_f32(sample_rate, channels));
        decoder.open(input)?;

        let mut encoder = self.backend.make_encoder(config.codec)?;
        let sample_format = encoder.required_sample_format(config.bit_depth.or(source.bit_depth));

        if let Some(rates) = encoder.supported_sample_rates() {
            if !rates.contains(&sample_rate) {
                let mut supported = rates.to_vec();
                supported.sort_unstable();
                return Err(Error::UnsupportedSampleRate {
                    requested: sample_rate,
                    supported,
                    encoder: encoder.name().to_string(),
                });
            }
        }

        let params = EncoderParams {
            sample_rate,
            channels,
            sample_format,
            rate_control,
            aac_profile,
        };
        encoder.open(&params)?;

        let mut container = self
            .backend
            .create_container(config.codec, config.destination())?;
        let art = metadata.and_then(|m| m.cover_art.as_ref());
        if let Some(metadata) = metadata {
            container.set_metadata(metadata)?;
        }
        if let Some(art) = art {
            container.add_cover_art(art)?;
        }
        container.write_header(&params)?;
        if let Some(art) = art {
            container.write_cover_art_packet(art)?;
        }

        let expected_total_samples = source
            .duration
            .map(|secs| (secs * sample_rate as f64).round() as u64)
            .unwrap_or(0);

        tracing::info!(
            input = %input.display(),
            output = %config.destination().display(),
            encoder = encoder.name(),
            rate_hz = sample_rate,
            channels,
            format = ?sample_format,
            frame_size = ?encoder.frame_size(),
            "encode started"
        );

        let mut run = EncodeRun::new(encoder, container, &params, expected_total_samples);
        loop {
            if cancelled() {
                tracing::info!(output = %config.destination().display(), "encode cancelled");
                return Err(Error::Cancelled);
            }
            match decoder.decode_next_frame(|frame| run.accept(&frame, &mut progress)) {
                Ok(submitted) => submitted?,
                Err(e) if e.is_end_of_file() => break,
                Err(e) => return Err(e),
            }
        }

        let summary = run.finish(&mut progress)?;
        decoder.close();
        tracing::info!(
            samples = summary.samples_encoded,
            chunks = summary.chunks,
            packets = summary.packets_written,
            "encode finished"
        );
        Ok(summary)
    }
}

/// State of one encode between header and trailer.
struct EncodeRun {
    encoder: Box<dyn CodecEncoder>,
    container: Box<dyn ContainerWriter>,
    fifo: Option<(SampleFifo, usize)>,
    chunk: Vec<Vec<f32>>,
    staging: PlanarBuffer,
    sample_format: SampleFormat,
    sample_rate: u32,
    summary: EncodeSummary,
    last_progress: f64,
}

impl EncodeRun {
    fn new(
        encoder: Box<dyn CodecEncoder>,
        container: Box<dyn ContainerWriter>,
        params: &EncoderParams,
        expected_total_samples: u64,
    ) -> Self {
        let fifo = encoder
            .frame_size()
            .map(|size| (SampleFifo::new(params.channels, size), size));
        let summary = EncodeSummary {
            expected_total_samples,
            sample_rate: params.sample_rate,
            channels: params.channels,
            encoder: encoder.name().to_string(),
            ..EncodeSummary::default()
        };
        Self {
            encoder,
            container,
            fifo,
            chunk: vec![Vec::new(); params.channels],
            staging: PlanarBuffer::new(params.sample_format, params.channels),
            sample_format: params.sample_format,
            sample_rate: params.sample_rate,
            summary,
            last_progress: 0.0,
        }
    }

    /// Take one decoded frame: queue it in the FIFO and drain full chunks, or submit it as is.
    fn accept(&mut self, frame: &DecodedFrame<'_>, progress: &mut dyn FnMut(f64)) -> Result<()> {
        match self.fifo.as_mut() {
            Some((fifo, size)) => {
                let size = *size;
                fifo.push(frame);
                loop {
                    let Some((fifo, _)) = self.fifo.as_mut() else {
                        break;
                    };
                    if fifo.len() < size {
                        break;
                    }
                    fifo.pop_into(size, &mut self.chunk);
                    self.submit_chunk(progress)?;
                }
            }
            None => {
                for (ch, plane) in self.chunk.iter_mut().enumerate() {
                    plane.clear();
                    frame.extend_channel_f32(ch, plane);
                }
                self.submit_chunk(progress)?;
            }
        }
        Ok(())
    }

    fn submit_chunk(&mut self, progress: &mut dyn FnMut(f64)) -> Result<()> {
        let frames = self.chunk.first().map_or(0, Vec::len);
        if frames == 0 {
            return Ok(());
        }

        let pts = self.summary.samples_encoded;
        let timestamp = pts as f64 / self.sample_rate as f64;
        let format = self.sample_format;
        let rate = self.sample_rate;
        self.staging.reserve(frames);
        self.staging.fill_from_f32(&self.chunk, format);
        let encoder = &mut self.encoder;
        self.staging.with_planes(|planes| {
            encoder.send_frame(Some(EncoderFrame {
                pts,
                data: DecodedFrame::new(planes, format, rate, timestamp),
            }))
        })?;
        self.drain_packets()?;

        self.summary.samples_encoded += frames as u64;
        self.summary.chunks += 1;
        self.summary.final_chunk_frames = frames;

        if self.summary.expected_total_samples > 0 {
            let fraction = (self.summary.samples_encoded as f64
                / self.summary.expected_total_samples as f64)
                .min(1.0);
            if fraction > self.last_progress {
                self.last_progress = fraction;
                progress(fraction);
            }
        }
        Ok(())
    }

    fn drain_packets(&mut self) -> Result<()> {
        while let Some(packet) = self.encoder.receive_packet()? {
            self.container.write_packet(&packet)?;
            self.summary.packets_written += 1;
        }
        Ok(())
    }

    /// Submit the FIFO remainder, flush the encoder and write the trailer.
    fn finish(mut self, progress: &mut dyn FnMut(f64)) -> Result<EncodeSummary> {
        if let Some((fifo, _)) = self.fifo.as_mut() {
            let remaining = fifo.len();
            if remaining > 0 {
                fifo.pop_into(remaining, &mut self.chunk);
                self.submit_chunk(progress)?;
            }
        }

        self.encoder.send_frame(None)?;
        self.drain_packets()?;
        self.container.write_trailer()?;

        if self.last_progress < 1.0 {
            progress(1.0);
        }
        Ok(self.summary)
    }
}
