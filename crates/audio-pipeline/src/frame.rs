//! PCM format descriptors and the borrowed frame view handed to decode callbacks.
//!
//! A [`DecodedFrame`] never owns its samples. It points either at the codec's own output
//! buffer (passthrough) or at the conversion stage's scratch buffers, both of which are
//! overwritten by the next decode step. The `'a` lifetime ties the view to the callback
//! invocation, so a handler cannot keep it.

use audio_pipeline_types::SampleFormat;
use symphonia::core::conv::FromSample;

/// Target PCM format for decoded output.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AudioOutputFormat {
    /// Sample rate in Hz.
    pub sample_rate: f64,
    pub channels: usize,
    pub sample_format: SampleFormat,
    /// `true` when the consumer wants a single interleaved buffer.
    pub interleaved: bool,
}

impl AudioOutputFormat {
    pub fn new(
        sample_rate: f64,
        channels: usize,
        sample_format: SampleFormat,
        interleaved: bool,
    ) -> Self {
        Self {
            sample_rate,
            channels,
            sample_format,
            interleaved,
        }
    }

    /// Planar `f32`, the pipeline's canonical intermediate format.
    pub fn planar_f32(sample_rate: u32, channels: usize) -> Self {
        Self::new(sample_rate as f64, channels, SampleFormat::F32, false)
    }

    /// Sample rate rounded to whole hertz (never zero).
    pub fn rate_hz(&self) -> u32 {
        self.sample_rate.round().max(1.0) as u32
    }
}

/// One slice per channel, typed by sample representation.
///
/// `I32` carries both 24-bit and 32-bit integer audio; the owning frame's
/// [`SampleFormat`] tells them apart.
#[derive(Clone, Copy, Debug)]
pub enum Planes<'a> {
    I16(&'a [&'a [i16]]),
    I32(&'a [&'a [i32]]),
    F32(&'a [&'a [f32]]),
    F64(&'a [&'a [f64]]),
}

impl<'a> Planes<'a> {
    pub fn channels(&self) -> usize {
        match self {
            Planes::I16(p) => p.len(),
            Planes::I32(p) => p.len(),
            Planes::F32(p) => p.len(),
            Planes::F64(p) => p.len(),
        }
    }

    /// Frames per channel (length of the first plane).
    pub fn frames(&self) -> usize {
        match self {
            Planes::I16(p) => p.first().map_or(0, |c| c.len()),
            Planes::I32(p) => p.first().map_or(0, |c| c.len()),
            Planes::F32(p) => p.first().map_or(0, |c| c.len()),
            Planes::F64(p) => p.first().map_or(0, |c| c.len()),
        }
    }
}

/// Borrowed planar PCM produced by one decode step.
#[derive(Clone, Copy, Debug)]
pub struct DecodedFrame<'a> {
    planes: Planes<'a>,
    sample_format: SampleFormat,
    sample_rate: u32,
    timestamp: f64,
}

impl<'a> DecodedFrame<'a> {
    /// Wrap planes in a frame. Every plane must have the same length.
    pub fn new(
        planes: Planes<'a>,
        sample_format: SampleFormat,
        sample_rate: u32,
        timestamp: f64,
    ) -> Self {
        debug_assert!(planes_are_uniform(&planes), "planes differ in length");
        Self {
            planes,
            sample_format,
            sample_rate,
            timestamp,
        }
    }

    pub fn planes(&self) -> Planes<'a> {
        self.planes
    }

    pub fn channels(&self) -> usize {
        self.planes.channels()
    }

    pub fn frames(&self) -> usize {
        self.planes.frames()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn sample_format(&self) -> SampleFormat {
        self.sample_format
    }

    /// Presentation time of the first sample, in seconds from stream start.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Direct access to the slices when the frame is planar `f32`.
    pub fn as_f32(&self) -> Option<&'a [&'a [f32]]> {
        match self.planes {
            Planes::F32(p) => Some(p),
            _ => None,
        }
    }

    /// Append channel `ch` to `out` as `f32`.
    pub fn extend_channel_f32(&self, ch: usize, out: &mut Vec<f32>) {
        match self.planes {
            Planes::F32(p) => out.extend_from_slice(p[ch]),
            Planes::F64(p) => out.extend(p[ch].iter().map(|&s| f32::from_sample(s))),
            Planes::I16(p) => out.extend(p[ch].iter().map(|&s| f32::from_sample(s))),
            Planes::I32(p) => {
                let format = self.sample_format;
                out.extend(p[ch].iter().map(|&s| int32_to_f32(s, format)))
            }
        }
    }

    /// Append every frame to `out` as interleaved `f32`.
    pub fn extend_interleaved_f32(&self, out: &mut Vec<f32>) {
        let channels = self.channels();
        let frames = self.frames();
        out.reserve(channels * frames);
        for i in 0..frames {
            for ch in 0..channels {
                out.push(self.sample_f32(ch, i));
            }
        }
    }

    /// Single sample as `f32`.
    pub fn sample_f32(&self, ch: usize, index: usize) -> f32 {
        match self.planes {
            Planes::F32(p) => p[ch][index],
            Planes::F64(p) => f32::from_sample(p[ch][index]),
            Planes::I16(p) => f32::from_sample(p[ch][index]),
            Planes::I32(p) => int32_to_f32(p[ch][index], self.sample_format),
        }
    }
}

fn planes_are_uniform(planes: &Planes<'_>) -> bool {
    fn uniform<T>(p: &[&[T]]) -> bool {
        p.windows(2).all(|w| w[0].len() == w[1].len())
    }
    match planes {
        Planes::I16(p) => uniform(p),
        Planes::I32(p) => uniform(p),
        Planes::F32(p) => uniform(p),
        Planes::F64(p) => uniform(p),
    }
}

const I24_SCALE: f64 = 8_388_608.0;

fn int32_to_f32(sample: i32, format: SampleFormat) -> f32 {
    match format {
        SampleFormat::I24 => (sample as f64 / I24_SCALE) as f32,
        _ => f32::from_sample(sample),
    }
}

fn f32_to_i24(sample: f32) -> i32 {
    (sample as f64 * I24_SCALE)
        .round()
        .clamp(-I24_SCALE, I24_SCALE - 1.0) as i32
}

/// Owned planar scratch storage in any supported sample format.
#[derive(Debug)]
pub(crate) enum PlanarBuffer {
    I16(Vec<Vec<i16>>),
    I32(Vec<Vec<i32>>),
    F32(Vec<Vec<f32>>),
    F64(Vec<Vec<f64>>),
}

impl PlanarBuffer {
    pub(crate) fn new(format: SampleFormat, channels: usize) -> Self {
        match format {
            SampleFormat::I16 => PlanarBuffer::I16(vec![Vec::new(); channels]),
            SampleFormat::I24 | SampleFormat::I32 => PlanarBuffer::I32(vec![Vec::new(); channels]),
            SampleFormat::F32 => PlanarBuffer::F32(vec![Vec::new(); channels]),
            SampleFormat::F64 => PlanarBuffer::F64(vec![Vec::new(); channels]),
        }
    }

    /// Ensure every plane can hold `frames` samples without reallocating.
    pub(crate) fn reserve(&mut self, frames: usize) {
        fn grow<T>(planes: &mut [Vec<T>], frames: usize) {
            for p in planes {
                p.reserve(frames.saturating_sub(p.len()));
            }
        }
        match self {
            PlanarBuffer::I16(p) => grow(p, frames),
            PlanarBuffer::I32(p) => grow(p, frames),
            PlanarBuffer::F32(p) => grow(p, frames),
            PlanarBuffer::F64(p) => grow(p, frames),
        }
    }

    pub(crate) fn frames(&self) -> usize {
        match self {
            PlanarBuffer::I16(p) => p.first().map_or(0, Vec::len),
            PlanarBuffer::I32(p) => p.first().map_or(0, Vec::len),
            PlanarBuffer::F32(p) => p.first().map_or(0, Vec::len),
            PlanarBuffer::F64(p) => p.first().map_or(0, Vec::len),
        }
    }

    /// Replace the contents with `src` converted to `format`.
    ///
    /// `format` must be the one the buffer was created with.
    pub(crate) fn fill_from_f32<S: AsRef<[f32]>>(&mut self, src: &[S], format: SampleFormat) {
        fn fill<T, S: AsRef<[f32]>>(dst: &mut Vec<Vec<T>>, src: &[S], conv: impl Fn(f32) -> T) {
            dst.resize_with(src.len(), Vec::new);
            for (d, s) in dst.iter_mut().zip(src) {
                d.clear();
                d.extend(s.as_ref().iter().map(|&x| conv(x)));
            }
        }
        match self {
            PlanarBuffer::I16(p) => fill(p, src, i16::from_sample),
            PlanarBuffer::I32(p) if format == SampleFormat::I24 => fill(p, src, f32_to_i24),
            PlanarBuffer::I32(p) => fill(p, src, i32::from_sample),
            PlanarBuffer::F32(p) => fill(p, src, |x| x),
            PlanarBuffer::F64(p) => fill(p, src, f64::from_sample),
        }
    }

    /// Borrow the contents as [`Planes`] for the duration of `f`.
    pub(crate) fn with_planes<R>(&self, f: impl FnOnce(Planes<'_>) -> R) -> R {
        match self {
            PlanarBuffer::I16(p) => {
                let refs: Vec<&[i16]> = p.iter().map(Vec::as_slice).collect();
                f(Planes::I16(&refs))
            }
            PlanarBuffer::I32(p) => {
                let refs: Vec<&[i32]> = p.iter().map(Vec::as_slice).collect();
                f(Planes::I32(&refs))
            }
            PlanarBuffer::F32(p) => {
                let refs: Vec<&[f32]> = p.iter().map(Vec::as_slice).collect();
                f(Planes::F32(&refs))
            }
            PlanarBuffer::F64(p) => {
                let refs: Vec<&[f64]> = p.iter().map(Vec::as_slice).collect();
                f(Planes::F64(&refs))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_reports_shape_and_interleaves() {
        let left = [0.1f32, 0.2, 0.3];
        let right = [-0.1f32, -0.2, -0.3];
        let planes: [&[f32]; 2] = [&left, &right];
        let frame = DecodedFrame::new(Planes::F32(&planes), SampleFormat::F32, 48_000, 0.5);

        assert_eq!(frame.channels(), 2);
        assert_eq!(frame.frames(), 3);
        assert_eq!(frame.timestamp(), 0.5);
        let mut out = Vec::new();
        frame.extend_interleaved_f32(&mut out);
        assert_eq!(out, vec![0.1, -0.1, 0.2, -0.2, 0.3, -0.3]);
    }

    #[test]
    fn i24_samples_scale_by_their_own_range() {
        let data = [4_194_304i32, -8_388_608];
        let planes: [&[i32]; 1] = [&data];
        let frame = DecodedFrame::new(Planes::I32(&planes), SampleFormat::I24, 44_100, 0.0);
        assert!((frame.sample_f32(0, 0) - 0.5).abs() < 1e-6);
        assert!((frame.sample_f32(0, 1) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn planar_buffer_converts_from_f32() {
        let src = vec![vec![0.5f32, -0.5], vec![1.0f32, -1.0]];
        let mut buf = PlanarBuffer::new(SampleFormat::I24, 2);
        buf.fill_from_f32(&src, SampleFormat::I24);
        assert_eq!(buf.frames(), 2);
        buf.with_planes(|planes| match planes {
            Planes::I32(p) => {
                assert_eq!(p[0], &[4_194_304, -4_194_304]);
                assert_eq!(p[1], &[8_388_607, -8_388_608]);
            }
            other => panic!("unexpected planes {other:?}"),
        });
    }

    #[test]
    fn output_format_rounds_rate() {
        let fmt = AudioOutputFormat::new(44_099.6, 2, SampleFormat::F32, false);
        assert_eq!(fmt.rate_hz(), 44_100);
        assert_eq!(AudioOutputFormat::planar_f32(48_000, 2).sample_format, SampleFormat::F32);
    }
}
