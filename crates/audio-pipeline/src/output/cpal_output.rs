//! [`AudioOutput`] on a cpal output stream.
//!
//! `cpal::Stream` is not `Send`, so each configured stream lives on its own owner thread that
//! builds it, then plays or pauses it on command until shut down. Scheduled audio travels
//! through a bounded [`FrameQueue`]; the render callback refills a small local buffer from it
//! without blocking, maps channels, applies volume, and counts rendered frames for the clock.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};

use crate::config::CpalOutputConfig;
use crate::error::{Error, Result};
use crate::frame::DecodedFrame;
use crate::sample_buffer::SampleBuffer;

use super::AudioOutput;
use super::device;
use super::queue::{FrameQueue, calc_max_buffered_samples};

/// cpal-backed audio sink.
pub struct CpalOutput {
    config: CpalOutputConfig,
    shared: Arc<RenderShared>,
    active: Mutex<Option<ActiveStream>>,
}

/// State that outlives individual streams.
struct RenderShared {
    volume_bits: AtomicU32,
    tap: Option<Arc<SampleBuffer>>,
}

/// Per-stream flags shared between the control side and the render callback.
#[derive(Default)]
struct StreamClock {
    paused: AtomicBool,
    played_frames: AtomicU64,
    /// Bumped by `stop`; the callback drops its local buffer when it sees a new value.
    generation: AtomicU64,
}

struct ActiveStream {
    queue: Arc<FrameQueue>,
    clock: Arc<StreamClock>,
    device_rate: u32,
    commands: Sender<StreamCommand>,
    owner: Option<JoinHandle<()>>,
}

enum StreamCommand {
    Play,
    Pause,
    Shutdown,
}

impl CpalOutput {
    pub fn new(config: CpalOutputConfig) -> Self {
        Self {
            config,
            shared: Arc::new(RenderShared {
                volume_bits: AtomicU32::new(1.0f32.to_bits()),
                tap: None,
            }),
            active: Mutex::new(None),
        }
    }

    /// Mirror rendered audio, down-mixed to mono, into `tap`.
    pub fn with_sample_tap(mut self, tap: Arc<SampleBuffer>) -> Self {
        let volume_bits = self.shared.volume_bits.load(Ordering::Relaxed);
        self.shared = Arc::new(RenderShared {
            volume_bits: AtomicU32::new(volume_bits),
            tap: Some(tap),
        });
        self
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveStream>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_active<R>(&self, f: impl FnOnce(&ActiveStream) -> R) -> Option<R> {
        self.lock_active().as_ref().map(f)
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        if let Some(active) = self.lock_active().take() {
            active.shutdown();
        }
    }
}

impl AudioOutput for CpalOutput {
    fn configure(&self, sample_rate: u32, channels: usize) -> Result<()> {
        if sample_rate == 0 || channels == 0 {
            return Err(Error::AudioBackendFailed(format!(
                "unusable output format: {sample_rate} Hz, {channels} channel(s)"
            )));
        }
        let mut active = self.lock_active();
        if let Some(previous) = active.take() {
            previous.shutdown();
        }

        let queue = Arc::new(FrameQueue::new(
            channels,
            calc_max_buffered_samples(sample_rate, channels, self.config.buffer_seconds),
        ));
        let clock = Arc::new(StreamClock::default());
        clock.paused.store(true, Ordering::Relaxed);

        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let (commands, command_rx) = crossbeam_channel::unbounded();
        let ctx = RenderContext {
            queue: queue.clone(),
            clock: clock.clone(),
            shared: self.shared.clone(),
            refill_max_frames: self.config.refill_max_frames.max(1),
        };
        let device_name = self.config.device.clone();
        let owner = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || run_stream_owner(device_name, sample_rate, ctx, ready_tx, command_rx))
            .map_err(|e| Error::AudioBackendFailed(format!("spawning output thread: {e}")))?;

        let device_rate = match ready_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = owner.join();
                return Err(e);
            }
            Err(_) => {
                let _ = owner.join();
                return Err(Error::AudioBackendFailed(
                    "output thread exited before opening a stream".to_string(),
                ));
            }
        };

        if device_rate != sample_rate {
            tracing::info!(
                requested_hz = sample_rate,
                device_hz = device_rate,
                "device runs at a different rate"
            );
        }
        *active = Some(ActiveStream {
            queue,
            clock,
            device_rate,
            commands,
            owner: Some(owner),
        });
        Ok(())
    }

    fn start(&self) -> Result<()> {
        self.with_active(|a| {
            a.queue.reopen();
            a.clock.paused.store(false, Ordering::Relaxed);
            a.send(StreamCommand::Play);
        })
        .ok_or_else(not_configured)
    }

    fn pause(&self) {
        self.with_active(|a| {
            a.clock.paused.store(true, Ordering::Relaxed);
            a.send(StreamCommand::Pause);
        });
    }

    fn stop(&self) {
        self.with_active(|a| {
            a.clock.paused.store(true, Ordering::Relaxed);
            a.queue.close_and_clear();
            a.clock.generation.fetch_add(1, Ordering::AcqRel);
            a.clock.played_frames.store(0, Ordering::Relaxed);
            a.send(StreamCommand::Pause);
        });
    }

    fn schedule(&self, frame: &DecodedFrame<'_>) -> Result<()> {
        // Clone the queue out so a blocking push never holds the lock `stop` needs.
        let queue = self
            .with_active(|a| a.queue.clone())
            .ok_or_else(not_configured)?;
        if frame.channels() != queue.channels() {
            return Err(Error::AudioBackendFailed(format!(
                "frame has {} channel(s), output is configured for {}",
                frame.channels(),
                queue.channels()
            )));
        }
        let mut samples = Vec::with_capacity(frame.frames() * frame.channels());
        frame.extend_interleaved_f32(&mut samples);
        if !queue.push_blocking(&samples) {
            tracing::debug!(frames = frame.frames(), "output stopped; frame dropped");
        }
        Ok(())
    }

    fn wait_for_completion(&self, cancelled: &dyn Fn() -> bool) -> bool {
        let Some(queue) = self.with_active(|a| a.queue.clone()) else {
            return true;
        };
        queue.wait_until_drained_or_cancel(cancelled, self.config.completion_poll)
    }

    fn playback_position(&self) -> f64 {
        self.with_active(|a| {
            a.clock.played_frames.load(Ordering::Relaxed) as f64 / a.device_rate as f64
        })
        .unwrap_or(-1.0)
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.shared.volume_bits.load(Ordering::Relaxed))
    }

    fn set_volume(&self, volume: f32) {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        self.shared
            .volume_bits
            .store(volume.to_bits(), Ordering::Relaxed);
    }

    fn device_sample_rate(&self) -> Option<u32> {
        self.with_active(|a| a.device_rate)
    }
}

fn not_configured() -> Error {
    Error::AudioBackendFailed("output is not configured".to_string())
}

impl ActiveStream {
    fn send(&self, command: StreamCommand) {
        if self.commands.send(command).is_err() {
            tracing::warn!("output thread is gone");
        }
    }

    fn shutdown(mut self) {
        self.queue.close_and_clear();
        let _ = self.commands.send(StreamCommand::Shutdown);
        if let Some(owner) = self.owner.take() {
            if owner.join().is_err() {
                tracing::warn!("output thread panicked");
            }
        }
    }
}

/// Owner thread body: open the stream, report the device rate, then serve commands.
fn run_stream_owner(
    device_name: Option<String>,
    sample_rate: u32,
    ctx: RenderContext,
    ready: Sender<Result<u32>>,
    commands: Receiver<StreamCommand>,
) {
    let stream = match open_stream(device_name.as_deref(), sample_rate, ctx) {
        Ok((stream, rate)) => {
            let _ = ready.send(Ok(rate));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    for command in commands.iter() {
        match command {
            StreamCommand::Play => {
                if let Err(e) = stream.play() {
                    tracing::warn!(error = %e, "stream play failed");
                }
            }
            StreamCommand::Pause => {
                if let Err(e) = stream.pause() {
                    tracing::debug!(error = %e, "stream pause failed");
                }
            }
            StreamCommand::Shutdown => break,
        }
    }
    tracing::debug!("output stream closed");
}

fn open_stream(
    device_name: Option<&str>,
    sample_rate: u32,
    ctx: RenderContext,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, device_name)?;
    let config = device::pick_output_config(&device, Some(sample_rate))?;
    let mut stream_config: cpal::StreamConfig = config.clone().into();
    if let Some(buf) = device::pick_buffer_size(&config) {
        stream_config.buffer_size = buf;
    }

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, ctx),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, ctx),
        cpal::SampleFormat::I32 => build_stream::<i32>(&device, &stream_config, ctx),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, ctx),
        other => Err(Error::AudioBackendFailed(format!(
            "unsupported device sample format: {other:?}"
        ))),
    }?;

    tracing::info!(
        device = %device.description().map(|d| d.to_string()).unwrap_or_default(),
        rate_hz = stream_config.sample_rate,
        channels = stream_config.channels,
        format = ?config.sample_format(),
        buffer_size = ?stream_config.buffer_size,
        "output stream opened"
    );
    Ok((stream, stream_config.sample_rate))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    ctx: RenderContext,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = config.channels as usize;
    let mut state = RenderState::new(ctx.queue.channels(), ctx.refill_max_frames);
    let err_fn = |err| tracing::warn!("stream error: {err}");
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _| render(data, channels_out, &mut state, &ctx),
            err_fn,
            None,
        )
        .map_err(|e| Error::AudioBackendFailed(format!("building output stream: {e}")))
}

struct RenderContext {
    queue: Arc<FrameQueue>,
    clock: Arc<StreamClock>,
    shared: Arc<RenderShared>,
    refill_max_frames: usize,
}

/// Mono samples collected per tap write.
const TAP_CHUNK: usize = 512;

/// Callback-local buffer of interleaved samples taken from the queue.
///
/// Both buffers are sized up front; the callback never grows them.
struct RenderState {
    pos: usize,
    src_channels: usize,
    src: Vec<f32>,
    generation: u64,
    tap_scratch: Box<[f32]>,
    tap_len: usize,
}

impl RenderState {
    fn new(src_channels: usize, refill_max_frames: usize) -> Self {
        let src_channels = src_channels.max(1);
        Self {
            pos: 0,
            src_channels,
            src: Vec::with_capacity(refill_max_frames.max(1) * src_channels),
            generation: 0,
            tap_scratch: vec![0.0; TAP_CHUNK].into_boxed_slice(),
            tap_len: 0,
        }
    }

    fn flush_tap(&mut self, tap: &SampleBuffer) {
        tap.write(&self.tap_scratch[..self.tap_len]);
        self.tap_len = 0;
    }
}

/// Fill one device buffer. Never blocks; missing audio becomes silence.
fn render<T>(data: &mut [T], channels_out: usize, st: &mut RenderState, ctx: &RenderContext)
where
    T: cpal::Sample + cpal::FromSample<f32>,
{
    let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);
    let clock = &ctx.clock;

    let generation = clock.generation.load(Ordering::Acquire);
    if generation != st.generation {
        st.generation = generation;
        st.src.clear();
        st.pos = 0;
    }
    if clock.paused.load(Ordering::Relaxed) || channels_out == 0 {
        data.fill(silence);
        return;
    }

    let volume = f32::from_bits(ctx.shared.volume_bits.load(Ordering::Relaxed));
    let frames = data.len() / channels_out;
    let mut filled = 0usize;
    for frame in 0..frames {
        if st.pos >= st.src.len() {
            st.pos = 0;
            st.src.clear();
            if ctx.queue.pop_into(&mut st.src, ctx.refill_max_frames) == 0 {
                data[frame * channels_out..].fill(silence);
                break;
            }
        }
        let mut mono = 0.0f32;
        for ch in 0..channels_out {
            let sample = next_sample_mapped(st, channels_out, ch) * volume;
            mono += sample;
            data[frame * channels_out + ch] = <T as cpal::Sample>::from_sample::<f32>(sample);
        }
        if let Some(tap) = &ctx.shared.tap {
            st.tap_scratch[st.tap_len] = mono / channels_out as f32;
            st.tap_len += 1;
            if st.tap_len == st.tap_scratch.len() {
                st.flush_tap(tap);
            }
        }
        filled += 1;
    }

    if clock.generation.load(Ordering::Acquire) == st.generation {
        clock
            .played_frames
            .fetch_add(filled as u64, Ordering::Relaxed);
        ctx.queue.set_unrendered(st.src.len() - st.pos);
    }
    if let Some(tap) = &ctx.shared.tap {
        st.flush_tap(tap);
    }
}

/// One output sample for `dst_ch`: mono is duplicated, stereo to mono is averaged, anything
/// else clamps to the available source channels. Advances after the last output channel.
fn next_sample_mapped(st: &mut RenderState, dst_channels: usize, dst_ch: usize) -> f32 {
    if st.pos >= st.src.len() {
        return 0.0;
    }
    let frame_start = st.pos;
    let get = |ch: usize| st.src.get(frame_start + ch).copied().unwrap_or(0.0);

    let out = match (st.src_channels, dst_channels) {
        (2, 1) => 0.5 * (get(0) + get(1)),
        (src, _) => get(dst_ch.min(src - 1)),
    };

    if dst_ch + 1 == dst_channels {
        st.pos += st.src_channels;
    }
    out
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn context(channels: usize, tap: Option<Arc<SampleBuffer>>) -> RenderContext {
        RenderContext {
            queue: Arc::new(FrameQueue::new(channels, 1024)),
            clock: Arc::new(StreamClock::default()),
            shared: Arc::new(RenderShared {
                volume_bits: AtomicU32::new(1.0f32.to_bits()),
                tap,
            }),
            refill_max_frames: 64,
        }
    }

    #[test]
    fn renders_stereo_and_counts_frames() {
        let ctx = context(2, None);
        ctx.queue.push_blocking(&[0.1, 0.2, 0.3, 0.4]);
        let mut st = RenderState::new(2, 64);
        let mut data = [1.0f32; 8];
        render(&mut data, 2, &mut st, &ctx);
        assert_eq!(data, [0.1, 0.2, 0.3, 0.4, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(ctx.clock.played_frames.load(Ordering::Relaxed), 2);
        assert!(ctx.queue.wait_until_drained_or_cancel(&|| false, Duration::from_millis(1)));
    }

    #[test]
    fn paused_outputs_silence_without_draining() {
        let ctx = context(1, None);
        ctx.queue.push_blocking(&[0.5; 4]);
        ctx.clock.paused.store(true, Ordering::Relaxed);
        let mut st = RenderState::new(1, 64);
        let mut data = [1.0f32; 4];
        render(&mut data, 1, &mut st, &ctx);
        assert_eq!(data, [0.0; 4]);
        assert_eq!(ctx.queue.len_frames(), 4);
        assert_eq!(ctx.clock.played_frames.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn mono_source_is_duplicated_with_volume() {
        let ctx = context(1, None);
        ctx.shared
            .volume_bits
            .store(0.5f32.to_bits(), Ordering::Relaxed);
        ctx.queue.push_blocking(&[0.8, -0.4]);
        let mut st = RenderState::new(1, 64);
        let mut data = [0i16; 4];
        render(&mut data, 2, &mut st, &ctx);
        assert_eq!(data[0], data[1]);
        assert_eq!(data[2], data[3]);
        assert!(data[0] > 0 && data[2] < 0);
    }

    #[test]
    fn stop_generation_discards_local_buffer() {
        let ctx = context(1, None);
        ctx.queue.push_blocking(&[0.25; 8]);
        let mut st = RenderState::new(1, 64);
        let mut data = [0.0f32; 2];
        render(&mut data, 1, &mut st, &ctx);
        assert!(st.src.len() > st.pos);

        ctx.queue.close_and_clear();
        ctx.clock.generation.fetch_add(1, Ordering::AcqRel);
        render(&mut data, 1, &mut st, &ctx);
        assert_eq!(data, [0.0, 0.0]);
    }

    #[test]
    fn tap_receives_mono_downmix() {
        let tap = Arc::new(SampleBuffer::new(4));
        let ctx = context(2, Some(tap.clone()));
        ctx.queue.push_blocking(&[0.2, 0.4, -0.2, -0.4]);
        let mut st = RenderState::new(2, 64);
        let mut data = [0.0f32; 4];
        render(&mut data, 2, &mut st, &ctx);
        let mirrored = tap.read(2);
        assert!((mirrored[0] - 0.3).abs() < 1e-6);
        assert!((mirrored[1] + 0.3).abs() < 1e-6);
    }

    #[test]
    fn popped_chunk_counts_until_rendered() {
        let ctx = context(1, None);
        ctx.queue.push_blocking(&[0.5; 8]);
        let mut st = RenderState::new(1, 64);
        let mut data = [0.0f32; 2];
        render(&mut data, 1, &mut st, &ctx);
        assert_eq!(ctx.queue.len_frames(), 0);
        let polls = std::cell::Cell::new(0);
        let second_poll = || {
            polls.set(polls.get() + 1);
            polls.get() > 1
        };
        assert!(!ctx.queue.wait_until_drained_or_cancel(&second_poll, Duration::from_millis(1)));

        let mut rest = [0.0f32; 6];
        render(&mut rest, 1, &mut st, &ctx);
        assert_eq!(rest, [0.5; 6]);
        assert!(ctx.queue.wait_until_drained_or_cancel(&|| false, Duration::from_millis(1)));
    }

    #[test]
    fn tap_keeps_up_with_large_callbacks() {
        let tap = Arc::new(SampleBuffer::new(2048));
        let ctx = context(1, Some(tap.clone()));
        let ramp: Vec<f32> = (0..1500).map(|i| i as f32 / 2000.0).collect();
        ctx.queue.push_blocking(&ramp);
        let mut st = RenderState::new(1, 2048);
        let src_capacity = st.src.capacity();
        let mut data = vec![0.0f32; 1500];
        render(&mut data, 1, &mut st, &ctx);
        assert_eq!(tap.read(1500), ramp);
        assert_eq!(st.src.capacity(), src_capacity);
    }

    #[test]
    fn volume_is_clamped() {
        let output = CpalOutput::new(CpalOutputConfig::default());
        output.set_volume(1.7);
        assert_eq!(output.volume(), 1.0);
        output.set_volume(-0.3);
        assert_eq!(output.volume(), 0.0);
        output.set_volume(0.4);
        assert!((output.volume() - 0.4).abs() < f32::EPSILON);
    }

    #[test]
    fn unconfigured_output_reports_unknown_position() {
        let output = CpalOutput::new(CpalOutputConfig::default());
        assert!(output.playback_position() < 0.0);
        assert!(output.device_sample_rate().is_none());
        assert!(output.wait_for_completion(&|| false));
        assert!(matches!(output.start(), Err(Error::AudioBackendFailed(_))));
    }
}
