//! Session-based audio decoder.
//!
//! Uses Symphonia to:
//! - probe the input container/codec
//! - decode packets of the first audio track one native frame at a time
//! - hand each frame to a caller-supplied handler, either straight from the codec's output
//!   buffer (passthrough) or after the [`Converter`] has mapped it to the configured format
//!
//! Frames are never queued: the handler runs on the caller's thread before the next packet is
//! decoded, so the borrowed buffers stay valid for exactly one call.

use std::fs::File;
use std::path::{Path, PathBuf};

use audio_pipeline_types::SampleFormat;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef};
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters, DecoderOptions};
use symphonia::core::errors::{Error as SymphoniaError, SeekErrorKind};
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::{Hint, ProbeResult};
use symphonia::core::units::{Time, TimeBase};

use crate::config::DecodeConfig;
use crate::error::{Error, Result};
use crate::frame::{AudioOutputFormat, DecodedFrame, Planes};
use crate::resample::Converter;

/// Stream properties captured while probing the source.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceInfo {
    /// Duration in seconds, when the container reports a frame count.
    pub duration: Option<f64>,
    pub sample_rate: u32,
    pub channels: usize,
    /// Average bitrate in bits per second, derived from file size and duration.
    pub bitrate: Option<u32>,
    /// Codec name (best-effort), e.g. `FLAC`, `MP3`.
    pub codec: Option<String>,
    /// Source bit depth (best-effort).
    pub bit_depth: Option<u16>,
    /// Container/extension hint (best-effort).
    pub container: Option<String>,
}

/// Decodes one media file into PCM frames in a configured output format.
pub struct Decoder {
    config: DecodeConfig,
    target: Option<AudioOutputFormat>,
    session: Option<Session>,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(DecodeConfig::default())
    }
}

impl Decoder {
    pub fn new(config: DecodeConfig) -> Self {
        Self {
            config,
            target: None,
            session: None,
        }
    }

    /// Set the output format used by the next [`Decoder::open`].
    ///
    /// An already-open session keeps its format; use [`Decoder::reconfigure`] for that.
    pub fn configure(&mut self, format: AudioOutputFormat) {
        self.target = Some(format);
    }

    /// Open `path` and prepare the conversion stage for the configured format.
    ///
    /// Any previous session is closed first.
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let target = self.target.ok_or(Error::NotConfigured)?;
        self.close();

        let path = path.as_ref();
        let (probed, file_len) = probe_file(path)?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(Error::NoAudioStream)?;
        let track_id = track.id;
        let params = track.codec_params.clone();
        let info = source_info(path, &params, file_len)?;

        let codec = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| match e {
                SymphoniaError::Unsupported(_) => {
                    Error::CodecUnavailable(info.codec.clone().unwrap_or_else(|| "unknown".into()))
                }
                other => Error::CodecOpenFailed(other.to_string()),
            })?;

        let native = native_sample_format(&params);
        let mode = build_mode(&info, native, target, &self.config)?;

        tracing::info!(
            path = %path.display(),
            codec = info.codec.as_deref().unwrap_or("unknown"),
            rate_hz = info.sample_rate,
            channels = info.channels,
            duration_secs = info.duration.unwrap_or(0.0),
            "decoder opened"
        );

        self.session = Some(Session {
            path: path.to_path_buf(),
            format,
            codec,
            track_id,
            time_base: params.time_base,
            info,
            native,
            target,
            mode,
            scratch: None,
            decode_errors: 0,
            eof: false,
            flushed: false,
        });
        Ok(())
    }

    /// Rebuild the conversion stage of the open session for a new output format.
    pub fn reconfigure(&mut self, format: AudioOutputFormat) -> Result<()> {
        let session = self.session.as_mut().ok_or(Error::NotConfigured)?;
        session.mode = build_mode(&session.info, session.native, format, &self.config)?;
        session.target = format;
        session.scratch = None;
        self.target = Some(format);
        Ok(())
    }

    /// Decode the next frame and pass it to `handler`.
    ///
    /// Fails with [`Error::EndOfFile`] once the stream is exhausted, and keeps doing so until
    /// the next [`Decoder::seek`].
    pub fn decode_next_frame<R>(&mut self, handler: impl FnOnce(DecodedFrame<'_>) -> R) -> Result<R> {
        let max_errors = self.config.max_decode_retries;
        let config = &self.config;
        let session = self.session.as_mut().ok_or(Error::NotConfigured)?;
        session.decode_next(handler, config, max_errors)
    }

    /// Reposition to the nearest decodable point at or before `seconds`.
    ///
    /// Seeking at or past the end leaves the decoder at end of stream.
    pub fn seek(&mut self, seconds: f64) -> Result<()> {
        let session = self.session.as_mut().ok_or(Error::NotConfigured)?;
        session.seek(seconds.max(0.0))
    }

    /// Release the open session. Idempotent.
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::debug!(path = %session.path.display(), "decoder closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn source_info(&self) -> Option<&SourceInfo> {
        self.session.as_ref().map(|s| &s.info)
    }

    pub fn duration(&self) -> Option<f64> {
        self.source_info().and_then(|i| i.duration)
    }

    pub fn sample_rate(&self) -> u32 {
        self.source_info().map_or(0, |i| i.sample_rate)
    }

    pub fn channels(&self) -> usize {
        self.source_info().map_or(0, |i| i.channels)
    }

    pub fn bitrate(&self) -> Option<u32> {
        self.source_info().and_then(|i| i.bitrate)
    }

    pub fn codec_name(&self) -> Option<&str> {
        self.source_info().and_then(|i| i.codec.as_deref())
    }

    pub fn bit_depth(&self) -> Option<u16> {
        self.source_info().and_then(|i| i.bit_depth)
    }

    /// Output format of the open session, or the one the next `open` will use.
    pub fn output_format(&self) -> Option<AudioOutputFormat> {
        self.session.as_ref().map(|s| s.target).or(self.target)
    }

    /// `true` when the open session hands out codec buffers without conversion.
    pub fn is_passthrough(&self) -> bool {
        matches!(
            self.session.as_ref().map(|s| &s.mode),
            Some(Mode::Passthrough { .. })
        )
    }

    /// Read stream properties without opening a codec.
    pub fn probe(path: impl AsRef<Path>) -> Result<SourceInfo> {
        let path = path.as_ref();
        let (probed, file_len) = probe_file(path)?;
        let track = probed
            .format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(Error::NoAudioStream)?;
        source_info(path, &track.codec_params, file_len)
    }
}

enum Mode {
    /// Codec buffers are wrapped directly. `fallback` is built lazily if the codec ever hands
    /// back a buffer type that cannot be wrapped as the target format.
    Passthrough { fallback: Option<Converter> },
    Convert(Converter),
}

struct Session {
    path: PathBuf,
    format: Box<dyn FormatReader>,
    codec: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    info: SourceInfo,
    native: Option<SampleFormat>,
    target: AudioOutputFormat,
    mode: Mode,
    /// Widening buffer for codec output that is not already `f32`.
    scratch: Option<AudioBuffer<f32>>,
    decode_errors: usize,
    eof: bool,
    /// The converter's tail has been pushed after end of stream.
    flushed: bool,
}

impl Session {
    fn converter_mut(&mut self) -> Option<&mut Converter> {
        match &mut self.mode {
            Mode::Convert(c) => Some(c),
            Mode::Passthrough { fallback } => fallback.as_mut(),
        }
    }

    fn decode_next<R>(
        &mut self,
        handler: impl FnOnce(DecodedFrame<'_>) -> R,
        config: &DecodeConfig,
        max_errors: usize,
    ) -> Result<R> {
        loop {
            if let Some(conv) = self.converter_mut() {
                if conv.has_ready() {
                    return Ok(conv.take(handler));
                }
            }

            if self.eof {
                if !self.flushed {
                    self.flushed = true;
                    if let Some(conv) = self.converter_mut() {
                        conv.finish()?;
                    }
                    continue;
                }
                return Err(Error::EndOfFile);
            }

            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    self.eof = true;
                    continue;
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.codec.reset();
                    continue;
                }
                Err(e) => return Err(Error::DecodeFailed(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let rate = self.info.sample_rate;
            let timestamp = match self.time_base {
                Some(tb) => {
                    let t = tb.calc_time(packet.ts());
                    t.seconds as f64 + t.frac
                }
                None => packet.ts() as f64 / rate.max(1) as f64,
            };

            let decoded = match self.codec.decode(&packet) {
                Ok(d) => {
                    self.decode_errors = 0;
                    d
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    self.decode_errors += 1;
                    if self.decode_errors > max_errors {
                        return Err(Error::DecodeFailed(e.to_string()));
                    }
                    tracing::warn!(error = %e, "skipping undecodable packet");
                    continue;
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.codec.reset();
                    continue;
                }
                Err(e) => return Err(Error::DecodeFailed(e.to_string())),
            };

            if decoded.frames() == 0 {
                continue;
            }

            let converter = match &mut self.mode {
                Mode::Convert(c) => c,
                Mode::Passthrough { fallback } => {
                    let target_format = self.target.sample_format;
                    match &decoded {
                        AudioBufferRef::F32(buf) => {
                            let planes = buf.planes();
                            let frame = DecodedFrame::new(
                                Planes::F32(planes.planes()),
                                SampleFormat::F32,
                                rate,
                                timestamp,
                            );
                            return Ok(handler(frame));
                        }
                        AudioBufferRef::F64(buf) if target_format == SampleFormat::F64 => {
                            let planes = buf.planes();
                            let frame = DecodedFrame::new(
                                Planes::F64(planes.planes()),
                                SampleFormat::F64,
                                rate,
                                timestamp,
                            );
                            return Ok(handler(frame));
                        }
                        AudioBufferRef::S16(buf) if target_format == SampleFormat::I16 => {
                            let planes = buf.planes();
                            let frame = DecodedFrame::new(
                                Planes::I16(planes.planes()),
                                SampleFormat::I16,
                                rate,
                                timestamp,
                            );
                            return Ok(handler(frame));
                        }
                        AudioBufferRef::S32(buf) if target_format == SampleFormat::I32 => {
                            let planes = buf.planes();
                            let frame = DecodedFrame::new(
                                Planes::I32(planes.planes()),
                                SampleFormat::I32,
                                rate,
                                timestamp,
                            );
                            return Ok(handler(frame));
                        }
                        _ => {}
                    }

                    if fallback.is_none() {
                        tracing::warn!(
                            expected = ?self.native,
                            target = ?target_format,
                            "codec buffer cannot be passed through; converting"
                        );
                        *fallback = Some(Converter::new(
                            rate,
                            self.info.channels,
                            self.target,
                            config,
                        )?);
                    }
                    match fallback.as_mut() {
                        Some(c) => c,
                        None => continue,
                    }
                }
            };

            match &decoded {
                AudioBufferRef::F32(buf) => {
                    let planes = buf.planes();
                    converter.push(&DecodedFrame::new(
                        Planes::F32(planes.planes()),
                        SampleFormat::F32,
                        rate,
                        timestamp,
                    ))?;
                }
                _ => {
                    let spec = *decoded.spec();
                    let needs_alloc = self
                        .scratch
                        .as_ref()
                        .is_none_or(|s| s.capacity() < decoded.frames() || *s.spec() != spec);
                    if needs_alloc {
                        self.scratch = Some(AudioBuffer::new(decoded.capacity() as u64, spec));
                    }
                    if let Some(scratch) = self.scratch.as_mut() {
                        decoded.convert(scratch);
                        let planes = scratch.planes();
                        converter.push(&DecodedFrame::new(
                            Planes::F32(planes.planes()),
                            SampleFormat::F32,
                            rate,
                            timestamp,
                        ))?;
                    }
                }
            }
        }
    }

    fn seek(&mut self, seconds: f64) -> Result<()> {
        self.decode_errors = 0;
        if let Some(conv) = self.converter_mut() {
            conv.reset();
        }

        if self.info.duration.is_some_and(|d| seconds >= d) {
            tracing::debug!(seconds, "seek past end");
            self.eof = true;
            self.flushed = true;
            return Ok(());
        }

        let time = Time::new(seconds.trunc() as u64, seconds.fract());
        match self.format.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time,
                track_id: Some(self.track_id),
            },
        ) {
            Ok(seeked) => {
                tracing::debug!(
                    seconds,
                    required_ts = seeked.required_ts,
                    actual_ts = seeked.actual_ts,
                    "seeked"
                );
                self.eof = false;
                self.flushed = false;
            }
            Err(SymphoniaError::SeekError(SeekErrorKind::OutOfRange)) => {
                self.eof = true;
                self.flushed = true;
            }
            Err(e) => return Err(Error::DecodeFailed(format!("seek to {seconds:.3}s: {e}"))),
        }
        self.codec.reset();
        Ok(())
    }
}

/// Pick passthrough or conversion for a session.
fn build_mode(
    info: &SourceInfo,
    native: Option<SampleFormat>,
    target: AudioOutputFormat,
    config: &DecodeConfig,
) -> Result<Mode> {
    let same_shape = info.sample_rate == target.rate_hz() && info.channels == target.channels;
    let format_matches = match native {
        Some(SampleFormat::F32) => true,
        Some(native) => native == target.sample_format && !target.interleaved,
        None => false,
    };

    if same_shape && format_matches && !config.force_conversion {
        tracing::info!(
            rate_hz = info.sample_rate,
            channels = info.channels,
            "passthrough"
        );
        return Ok(Mode::Passthrough { fallback: None });
    }

    let converter = Converter::new(info.sample_rate, info.channels, target, config)?;
    tracing::info!(
        src_hz = info.sample_rate,
        dst_hz = target.rate_hz(),
        src_channels = info.channels,
        dst_channels = target.channels,
        format = ?target.sample_format,
        resampling = converter.is_resampling(),
        "converting"
    );
    Ok(Mode::Convert(converter))
}

/// Open and probe `path`, returning the probe result and the file size.
pub(crate) fn probe_file(path: &Path) -> Result<(ProbeResult, Option<u64>)> {
    let file = File::open(path).map_err(|source| Error::OpenFailure {
        path: path.to_path_buf(),
        source,
    })?;
    let file_len = file.metadata().ok().map(|m| m.len());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::StreamInfoUnavailable(e.to_string()))?;
    Ok((probed, file_len))
}

pub(crate) fn source_info(
    path: &Path,
    params: &CodecParameters,
    file_len: Option<u64>,
) -> Result<SourceInfo> {
    let sample_rate = params
        .sample_rate
        .filter(|&r| r > 0)
        .ok_or_else(|| Error::StreamInfoUnavailable("unknown sample rate".into()))?;
    let channels = params
        .channels
        .map(|c| c.count())
        .filter(|&c| c > 0)
        .ok_or_else(|| Error::StreamInfoUnavailable("unknown channel layout".into()))?;

    let duration = duration_secs_from_codec_params(params);
    let bitrate = match (file_len, duration) {
        (Some(len), Some(secs)) if secs > 0.0 => Some((len as f64 * 8.0 / secs).round() as u32),
        _ => None,
    };

    Ok(SourceInfo {
        duration,
        sample_rate,
        channels,
        bitrate,
        codec: codec_name_from_params(params),
        bit_depth: params
            .bits_per_sample
            .or(params.bits_per_coded_sample)
            .and_then(|v| u16::try_from(v).ok()),
        container: path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase),
    })
}

/// Best-effort duration in seconds from codec metadata.
fn duration_secs_from_codec_params(params: &CodecParameters) -> Option<f64> {
    let frames = params.n_frames?;
    if let Some(tb) = params.time_base {
        let t = tb.calc_time(frames);
        return Some(t.seconds as f64 + t.frac);
    }
    let rate = params.sample_rate?;
    if rate == 0 {
        return None;
    }
    Some(frames as f64 / rate as f64)
}

/// Buffer type the codec is expected to produce, when it is one that can be handed out as-is.
fn native_sample_format(params: &CodecParameters) -> Option<SampleFormat> {
    use symphonia::core::codecs::*;
    match params.codec {
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => Some(SampleFormat::I16),
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE | CODEC_TYPE_FLAC | CODEC_TYPE_ALAC => {
            Some(SampleFormat::I32)
        }
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => Some(SampleFormat::F32),
        CODEC_TYPE_PCM_F64LE | CODEC_TYPE_PCM_F64BE => Some(SampleFormat::F64),
        CODEC_TYPE_MP3 | CODEC_TYPE_MP2 | CODEC_TYPE_MP1 | CODEC_TYPE_AAC | CODEC_TYPE_VORBIS => {
            Some(SampleFormat::F32)
        }
        _ => None,
    }
}

/// Best-effort codec label used for status payloads.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        CODEC_TYPE_PCM_F64LE | CODEC_TYPE_PCM_F64BE => "PCM_F64",
        CODEC_TYPE_NULL => return None,
        other => {
            return symphonia::default::get_codecs()
                .get_codec(other)
                .map(|d| d.short_name.to_ascii_uppercase());
        }
    };
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::codecs::*;
    use super::Decoder;

    fn info(rate: u32, channels: usize) -> SourceInfo {
        SourceInfo {
            sample_rate: rate,
            channels,
            ..SourceInfo::default()
        }
    }

    #[test]
    fn duration_from_codec_params_handles_zero_rate() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(0);
        params.n_frames = Some(100);
        assert!(duration_secs_from_codec_params(&params).is_none());
    }

    #[test]
    fn duration_from_codec_params_computes() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(48_000);
        params.n_frames = Some(96_000);
        assert_eq!(duration_secs_from_codec_params(&params), Some(2.0));
    }

    #[test]
    fn codec_name_from_params_maps_known_codecs() {
        let mut params = CodecParameters::new();
        params.codec = CODEC_TYPE_FLAC;
        assert_eq!(codec_name_from_params(&params), Some("FLAC".to_string()));
        params.codec = CODEC_TYPE_PCM_S16LE;
        assert_eq!(codec_name_from_params(&params), Some("PCM_S16".to_string()));
    }

    #[test]
    fn codec_name_from_params_unknown_returns_none() {
        let params = CodecParameters::new();
        assert!(codec_name_from_params(&params).is_none());
    }

    #[test]
    fn planar_float_source_passes_through_any_target_format() {
        let target = AudioOutputFormat::new(44_100.0, 2, SampleFormat::I16, true);
        let mode = build_mode(
            &info(44_100, 2),
            Some(SampleFormat::F32),
            target,
            &DecodeConfig::default(),
        )
        .unwrap();
        assert!(matches!(mode, Mode::Passthrough { .. }));
    }

    #[test]
    fn integer_source_passes_through_only_on_exact_match() {
        let cfg = DecodeConfig::default();
        let exact = AudioOutputFormat::new(48_000.0, 2, SampleFormat::I16, false);
        let mode = build_mode(&info(48_000, 2), Some(SampleFormat::I16), exact, &cfg).unwrap();
        assert!(matches!(mode, Mode::Passthrough { .. }));

        let float = AudioOutputFormat::planar_f32(48_000, 2);
        let mode = build_mode(&info(48_000, 2), Some(SampleFormat::I16), float, &cfg).unwrap();
        assert!(matches!(mode, Mode::Convert(_)));
    }

    #[test]
    fn rate_or_channel_change_and_forced_conversion_disable_passthrough() {
        let cfg = DecodeConfig::default();
        let mode = build_mode(
            &info(44_100, 2),
            Some(SampleFormat::F32),
            AudioOutputFormat::planar_f32(48_000, 2),
            &cfg,
        )
        .unwrap();
        assert!(matches!(mode, Mode::Convert(ref c) if c.is_resampling()));

        let forced = DecodeConfig {
            force_conversion: true,
            ..DecodeConfig::default()
        };
        let mode = build_mode(
            &info(44_100, 2),
            Some(SampleFormat::F32),
            AudioOutputFormat::planar_f32(44_100, 2),
            &forced,
        )
        .unwrap();
        assert!(matches!(mode, Mode::Convert(ref c) if !c.is_resampling()));
    }

    #[test]
    fn open_requires_configure() {
        let mut decoder = Decoder::default();
        let err = decoder.open("does-not-matter.wav").unwrap_err();
        assert!(matches!(err, Error::NotConfigured));
    }

    #[test]
    fn session_operations_require_open() {
        let mut decoder = Decoder::default();
        decoder.configure(AudioOutputFormat::planar_f32(44_100, 2));
        assert!(matches!(
            decoder.reconfigure(AudioOutputFormat::planar_f32(48_000, 2)),
            Err(Error::NotConfigured)
        ));
        assert!(matches!(
            decoder.decode_next_frame(|f| f.frames()),
            Err(Error::NotConfigured)
        ));
        assert!(matches!(decoder.seek(1.0), Err(Error::NotConfigured)));
        decoder.close();
        decoder.close();
        assert_eq!(decoder.sample_rate(), 0);
        assert!(decoder.duration().is_none());
    }

    #[test]
    fn missing_file_is_an_open_failure() {
        let mut decoder = Decoder::default();
        decoder.configure(AudioOutputFormat::planar_f32(44_100, 2));
        let err = decoder.open("/definitely/not/here.flac").unwrap_err();
        assert!(matches!(err, Error::OpenFailure { .. }));
    }
}
