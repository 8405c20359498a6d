//! Conversion stage between native decoded PCM and a target [`AudioOutputFormat`].
//!
//! Samples are widened to planar `f32`, mapped onto the target channel layout, run through
//! Rubato's async sinc resampler when the rates differ, and narrowed to the target sample
//! format. The resampler is fed fixed-size input chunks; whatever does not fill a chunk waits
//! for the next decoded frame (or for [`Converter::finish`] at end of stream), so a single
//! `push` can legitimately produce no output at all.
//!
//! The sinc filter delays its output by [`Resampler::output_delay`] frames. That lead-in is
//! dropped after construction and after every [`Converter::reset`], and `finish` pushes silence
//! until the delayed tail has come out, so output frame `n` lines up with input time
//! `n / target_rate`.

use audio_pipeline_types::{SampleFormat, UpmixPolicy};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::config::DecodeConfig;
use crate::error::{Error, Result};
use crate::frame::{AudioOutputFormat, DecodedFrame, PlanarBuffer, Planes};

pub(crate) struct Converter {
    target: AudioOutputFormat,
    target_rate: u32,
    src_channels: usize,
    chunk_frames: usize,
    resampler: Option<Async<f32>>,
    /// Channel-mapped input at the source rate, waiting for a full resampler chunk.
    pending: Vec<Vec<f32>>,
    interleaved_in: Vec<f32>,
    interleaved_out: Vec<f32>,
    /// Converted `f32` output at the target rate and layout, not yet delivered.
    ready: Vec<Vec<f32>>,
    narrowed: PlanarBuffer,
    base_time: Option<f64>,
    emitted_frames: u64,
    ratio: f64,
    resampler_in_frames: u64,
    /// Delivered resampler output, lead-in excluded.
    resampler_out_frames: u64,
    /// Lead-in frames still to drop from the resampler output.
    delay_remaining: usize,
}

impl Converter {
    pub(crate) fn new(
        src_rate: u32,
        src_channels: usize,
        target: AudioOutputFormat,
        cfg: &DecodeConfig,
    ) -> Result<Self> {
        let channels = target.channels;
        if channels == 0 || src_channels == 0 {
            return Err(Error::ResamplerInitFailed(format!(
                "channel count must be non-zero (source {src_channels}, target {channels})"
            )));
        }
        if channels > src_channels && cfg.upmix == UpmixPolicy::Fail {
            return Err(Error::ChannelMismatch {
                decoded: src_channels,
                target: channels,
            });
        }

        let target_rate = target.rate_hz();
        let chunk_frames = cfg.chunk_frames.max(1);
        let resampler = if src_rate == target_rate {
            None
        } else {
            Some(build_resampler(src_rate, target_rate, chunk_frames, channels)?)
        };
        let delay_remaining = resampler.as_ref().map_or(0, lead_in_frames);

        Ok(Self {
            target,
            target_rate,
            src_channels,
            chunk_frames,
            resampler,
            pending: vec![Vec::new(); channels],
            interleaved_in: Vec::with_capacity(chunk_frames * channels),
            interleaved_out: Vec::new(),
            ready: vec![Vec::new(); channels],
            narrowed: PlanarBuffer::new(target.sample_format, channels),
            base_time: None,
            emitted_frames: 0,
            ratio: target_rate as f64 / src_rate.max(1) as f64,
            resampler_in_frames: 0,
            resampler_out_frames: 0,
            delay_remaining,
        })
    }

    pub(crate) fn is_resampling(&self) -> bool {
        self.resampler.is_some()
    }

    /// Feed one native frame through channel mapping and, if needed, the resampler.
    pub(crate) fn push(&mut self, frame: &DecodedFrame<'_>) -> Result<()> {
        if frame.frames() == 0 {
            return Ok(());
        }
        if self.base_time.is_none() {
            self.base_time = Some(frame.timestamp());
        }

        let sink = if self.resampler.is_some() {
            &mut self.pending
        } else {
            &mut self.ready
        };
        map_channels(frame, self.src_channels, sink);
        if self.resampler.is_some() {
            self.resampler_in_frames += frame.frames() as u64;
        }

        while self.resampler.is_some() && self.pending_frames() >= self.chunk_frames {
            self.process_chunk()?;
        }
        Ok(())
    }

    /// Drain the resampler at end of stream.
    ///
    /// The partial last chunk is zero-padded and silence keeps being pushed until the output
    /// reaches the length implied by the input and the rate ratio; anything beyond that is
    /// padding and gets dropped.
    pub(crate) fn finish(&mut self) -> Result<()> {
        let Some(resampler) = self.resampler.as_ref() else {
            return Ok(());
        };
        if self.resampler_in_frames == 0 {
            return Ok(());
        }

        let expected = (self.resampler_in_frames as f64 * self.ratio).round() as u64;
        let per_chunk = (self.chunk_frames as f64 * self.ratio).max(1.0);
        let max_chunks = 2 + ((lead_in_frames(resampler) + self.pending_frames()) as f64
            / per_chunk)
            .ceil() as usize;
        for _ in 0..max_chunks {
            if self.resampler_out_frames >= expected {
                break;
            }
            for plane in &mut self.pending {
                plane.resize(self.chunk_frames, 0.0);
            }
            self.process_chunk()?;
        }
        for plane in &mut self.pending {
            plane.clear();
        }

        let excess = self.resampler_out_frames.saturating_sub(expected) as usize;
        if excess > 0 {
            for plane in &mut self.ready {
                let keep = plane.len().saturating_sub(excess);
                plane.truncate(keep);
            }
            self.resampler_out_frames -= excess as u64;
        }
        Ok(())
    }

    /// Whether converted output is waiting to be taken.
    pub(crate) fn has_ready(&self) -> bool {
        self.ready.first().is_some_and(|p| !p.is_empty())
    }

    /// Hand all converted output to `f` as one frame. Only valid when [`Self::has_ready`].
    pub(crate) fn take<R>(&mut self, f: impl FnOnce(DecodedFrame<'_>) -> R) -> R {
        let frames = self.ready.first().map_or(0, Vec::len);
        debug_assert!(frames > 0, "take called without ready output");

        let timestamp =
            self.base_time.unwrap_or(0.0) + self.emitted_frames as f64 / self.target_rate as f64;
        let format = self.target.sample_format;
        let rate = self.target_rate;

        let result = if format == SampleFormat::F32 {
            let refs: Vec<&[f32]> = self.ready.iter().map(Vec::as_slice).collect();
            f(DecodedFrame::new(Planes::F32(&refs), format, rate, timestamp))
        } else {
            self.narrowed.reserve(frames);
            self.narrowed.fill_from_f32(&self.ready, format);
            self.narrowed
                .with_planes(|planes| f(DecodedFrame::new(planes, format, rate, timestamp)))
        };

        for plane in &mut self.ready {
            plane.clear();
        }
        self.emitted_frames += frames as u64;
        result
    }

    /// Drop buffered audio and resampler history, e.g. after a seek.
    pub(crate) fn reset(&mut self) {
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
        for plane in self.pending.iter_mut().chain(self.ready.iter_mut()) {
            plane.clear();
        }
        self.base_time = None;
        self.emitted_frames = 0;
        self.resampler_in_frames = 0;
        self.resampler_out_frames = 0;
        self.delay_remaining = self.resampler.as_ref().map_or(0, lead_in_frames);
    }

    fn pending_frames(&self) -> usize {
        self.pending.first().map_or(0, Vec::len)
    }

    /// Run one full chunk of `pending` through the resampler.
    fn process_chunk(&mut self) -> Result<()> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(());
        };
        let channels = self.target.channels;
        let frames = self.chunk_frames;

        self.interleaved_in.clear();
        for i in 0..frames {
            for plane in &self.pending {
                self.interleaved_in.push(plane[i]);
            }
        }

        let out_capacity_frames = resampler.output_frames_max();
        if self.interleaved_out.len() < out_capacity_frames * channels {
            self.interleaved_out.resize(out_capacity_frames * channels, 0.0);
        }

        let input = InterleavedSlice::new(&self.interleaved_in, channels, frames)
            .map_err(|e| Error::DecodeFailed(format!("resampler input buffer: {e}")))?;
        let mut output =
            InterleavedSlice::new_mut(&mut self.interleaved_out, channels, out_capacity_frames)
                .map_err(|e| Error::DecodeFailed(format!("resampler output buffer: {e}")))?;

        let (_nbr_in, nbr_out) = resampler
            .process_into_buffer(&input, &mut output, None)
            .map_err(|e| Error::DecodeFailed(format!("resampler: {e}")))?;

        let skip = self.delay_remaining.min(nbr_out);
        self.delay_remaining -= skip;
        for (ch, plane) in self.ready.iter_mut().enumerate() {
            plane.extend(
                self.interleaved_out[skip * channels..nbr_out * channels]
                    .iter()
                    .skip(ch)
                    .step_by(channels),
            );
        }
        for plane in &mut self.pending {
            plane.drain(..frames);
        }
        self.resampler_out_frames += (nbr_out - skip) as u64;
        Ok(())
    }
}

/// Output frames to drop so the first delivered frame lines up with input time zero.
fn lead_in_frames(resampler: &Async<f32>) -> usize {
    resampler.output_delay().saturating_sub(1)
}

fn build_resampler(
    src_rate: u32,
    dst_rate: u32,
    chunk_frames: usize,
    channels: usize,
) -> Result<Async<f32>> {
    let sinc_len = 128;
    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff: calculate_cutoff(sinc_len, window),
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window,
    };

    let ratio = dst_rate as f64 / src_rate as f64;
    let resampler = Async::<f32>::new_sinc(
        ratio,
        1.1,
        &params,
        chunk_frames,
        channels,
        FixedAsync::Input,
    )
    .map_err(|e| Error::ResamplerInitFailed(e.to_string()))?;

    tracing::info!(src_hz = src_rate, dst_hz = dst_rate, channels, "resampling");
    Ok(resampler)
}

/// Append `frame` to `out` (one plane per target channel) using the channel layout rules:
/// a mono target averages every source channel, extra target channels repeat channel 0 and
/// surplus source channels are dropped.
fn map_channels(frame: &DecodedFrame<'_>, src_channels: usize, out: &mut [Vec<f32>]) {
    let frames = frame.frames();
    let available = frame.channels().min(src_channels).max(1);

    if out.len() == 1 && available > 1 {
        let plane = &mut out[0];
        plane.reserve(frames);
        let scale = 1.0 / available as f32;
        for i in 0..frames {
            let sum: f32 = (0..available).map(|ch| frame.sample_f32(ch, i)).sum();
            plane.push(sum * scale);
        }
        return;
    }

    for (ch, plane) in out.iter_mut().enumerate() {
        let src = if ch < available { ch } else { 0 };
        frame.extend_channel_f32(src, plane);
    }
}
