#![allow(dead_code)]

use std::f32::consts::TAU;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use audio_pipeline::{
    AudioOutput, CodecBackend, CodecEncoder, ContainerWriter, CoverArt, DecodedFrame,
    EncodedPacket, EncoderFrame, EncoderParams, Error, OutputCodec, PlaybackState,
    PlayerObserver, Result, SampleFormat, TrackMetadata,
};
use crossbeam_channel::{Receiver, Sender};

/// Write a 16-bit PCM sine WAV.
pub fn write_sine_wav(
    path: &Path,
    sample_rate: u32,
    channels: u16,
    seconds: f32,
    freq_hz: f32,
) -> PathBuf {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let frames = (sample_rate as f32 * seconds).round() as usize;
    for i in 0..frames {
        let value = (TAU * freq_hz * i as f32 / sample_rate as f32).sin() * 0.5;
        let sample = (value * i16::MAX as f32) as i16;
        for _ in 0..channels {
            writer.write_sample(sample).unwrap();
        }
    }
    writer.finalize().unwrap();
    path.to_path_buf()
}

/// Write a 32-bit float WAV whose samples are distinct per frame and channel.
pub fn write_float_wav(path: &Path, sample_rate: u32, channels: u16, frames: usize) -> PathBuf {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..frames {
        for ch in 0..channels {
            let value = ((i % 2000) as f32 / 2000.0 - 0.5) * if ch == 0 { 1.0 } else { -0.5 };
            writer.write_sample(value).unwrap();
        }
    }
    writer.finalize().unwrap();
    path.to_path_buf()
}

/// In-memory sink that "renders" scheduled audio at `speed` times real time.
pub struct MockOutput {
    speed: f64,
    device_rate: Option<u32>,
    fail_after_frames: Option<u64>,
    panic_after_frames: Option<u64>,
    start_failures: AtomicUsize,
    rate: AtomicU32,
    channels: AtomicUsize,
    started: AtomicBool,
    played_frames: AtomicU64,
    pub scheduled_frames: AtomicU64,
    pub scheduled_rates: Mutex<Vec<u32>>,
    pub stop_calls: AtomicUsize,
    volume_bits: AtomicU32,
}

impl MockOutput {
    pub fn new(speed: f64) -> Self {
        Self {
            speed,
            device_rate: None,
            fail_after_frames: None,
            panic_after_frames: None,
            start_failures: AtomicUsize::new(0),
            rate: AtomicU32::new(0),
            channels: AtomicUsize::new(0),
            started: AtomicBool::new(false),
            played_frames: AtomicU64::new(0),
            scheduled_frames: AtomicU64::new(0),
            scheduled_rates: Mutex::new(Vec::new()),
            stop_calls: AtomicUsize::new(0),
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    pub fn with_device_rate(mut self, rate: u32) -> Self {
        self.device_rate = Some(rate);
        self
    }

    pub fn failing_after(mut self, frames: u64) -> Self {
        self.fail_after_frames = Some(frames);
        self
    }

    /// Crash the scheduling thread once `frames` have been scheduled.
    pub fn panicking_after(mut self, frames: u64) -> Self {
        self.panic_after_frames = Some(frames);
        self
    }

    /// Refuse the next `count` calls to `start`.
    pub fn failing_starts(self, count: usize) -> Self {
        self.start_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn scheduled(&self) -> u64 {
        self.scheduled_frames.load(Ordering::SeqCst)
    }
}

impl AudioOutput for MockOutput {
    fn configure(&self, sample_rate: u32, channels: usize) -> Result<()> {
        self.rate
            .store(self.device_rate.unwrap_or(sample_rate), Ordering::SeqCst);
        self.channels.store(channels, Ordering::SeqCst);
        Ok(())
    }

    fn start(&self) -> Result<()> {
        let refused = self
            .start_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(Error::AudioBackendFailed("busy".into()));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&self) {
        self.started.store(false, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
        self.played_frames.store(0, Ordering::SeqCst);
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn schedule(&self, frame: &DecodedFrame<'_>) -> Result<()> {
        let frames = frame.frames() as u64;
        if let Some(limit) = self.fail_after_frames {
            if self.scheduled() + frames > limit {
                return Err(Error::AudioBackendFailed("device unplugged".into()));
            }
        }
        if let Some(limit) = self.panic_after_frames {
            if self.scheduled() >= limit {
                panic!("output driver crashed");
            }
        }
        self.scheduled_rates
            .lock()
            .unwrap()
            .push(frame.sample_rate());
        let secs = frames as f64 / frame.sample_rate() as f64 / self.speed;
        thread::sleep(Duration::from_secs_f64(secs));
        self.scheduled_frames.fetch_add(frames, Ordering::SeqCst);
        if self.started.load(Ordering::SeqCst) {
            self.played_frames.fetch_add(frames, Ordering::SeqCst);
        }
        Ok(())
    }

    fn wait_for_completion(&self, cancelled: &dyn Fn() -> bool) -> bool {
        !cancelled()
    }

    fn playback_position(&self) -> f64 {
        let rate = self.rate.load(Ordering::SeqCst);
        if rate == 0 {
            return -1.0;
        }
        self.played_frames.load(Ordering::SeqCst) as f64 / rate as f64
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::SeqCst))
    }

    fn set_volume(&self, volume: f32) {
        self.volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::SeqCst);
    }

    fn device_sample_rate(&self) -> Option<u32> {
        self.device_rate
    }
}

/// Player events forwarded into channels.
pub enum PlayerEvent {
    Progress(f64),
    State(PlaybackState),
    Error(String),
}

pub struct ChannelObserver {
    tx: Sender<PlayerEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Arc<Self>, Receiver<PlayerEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Arc::new(Self { tx }), rx)
    }
}

impl PlayerObserver for ChannelObserver {
    fn on_progress(&self, position: f64, _duration: f64) {
        let _ = self.tx.send(PlayerEvent::Progress(position));
    }

    fn on_state_change(&self, state: PlaybackState) {
        let _ = self.tx.send(PlayerEvent::State(state));
    }

    fn on_error(&self, error: &Error) {
        let _ = self.tx.send(PlayerEvent::Error(error.to_string()));
    }
}

/// Wait up to `timeout` for the player to report `state`.
pub fn wait_for_state(rx: &Receiver<PlayerEvent>, state: PlaybackState, timeout: Duration) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while let Some(left) = deadline.checked_duration_since(std::time::Instant::now()) {
        match rx.recv_timeout(left) {
            Ok(PlayerEvent::State(s)) if s == state => return true,
            Ok(_) => {}
            Err(_) => return false,
        }
    }
    false
}

/// Everything the mock codec backend saw, in call order.
#[derive(Default)]
pub struct Recorded {
    pub calls: Vec<String>,
    /// `(pts, frames)` per submission.
    pub submissions: Vec<(u64, usize)>,
    pub packet_pts: Vec<u64>,
    pub flushes: usize,
}

/// Codec backend that holds packets back until flush, like encoders with lookahead.
#[derive(Clone)]
pub struct MockBackend {
    pub frame_size: Option<usize>,
    pub delay: usize,
    pub supported_rates: Option<Vec<u32>>,
    pub recorded: Arc<Mutex<Recorded>>,
}

impl MockBackend {
    pub fn new(frame_size: Option<usize>, delay: usize) -> Self {
        Self {
            frame_size,
            delay,
            supported_rates: None,
            recorded: Arc::new(Mutex::new(Recorded::default())),
        }
    }
}

impl CodecBackend for MockBackend {
    fn make_encoder(&self, codec: OutputCodec) -> Result<Box<dyn CodecEncoder>> {
        if codec != OutputCodec::Opus {
            return Err(Error::EncoderNotFound(codec.name().to_string()));
        }
        Ok(Box::new(MockEncoder {
            frame_size: self.frame_size,
            delay: self.delay,
            supported_rates: self.supported_rates.clone(),
            held: Vec::new(),
            ready: Vec::new(),
            recorded: self.recorded.clone(),
        }))
    }

    fn create_container(&self, _codec: OutputCodec, path: &Path) -> Result<Box<dyn ContainerWriter>> {
        let file = File::create(path).map_err(|e| Error::OutputOpenFailed {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        Ok(Box::new(MockContainer {
            file,
            recorded: self.recorded.clone(),
        }))
    }
}

struct MockEncoder {
    frame_size: Option<usize>,
    delay: usize,
    supported_rates: Option<Vec<u32>>,
    held: Vec<EncodedPacket>,
    ready: Vec<EncodedPacket>,
    recorded: Arc<Mutex<Recorded>>,
}

impl CodecEncoder for MockEncoder {
    fn name(&self) -> &str {
        "mock_opus"
    }

    fn required_sample_format(&self, _bit_depth: Option<u16>) -> SampleFormat {
        SampleFormat::F32
    }

    fn frame_size(&self) -> Option<usize> {
        self.frame_size
    }

    fn supported_sample_rates(&self) -> Option<&[u32]> {
        self.supported_rates.as_deref()
    }

    fn open(&mut self, _params: &EncoderParams) -> Result<()> {
        self.recorded.lock().unwrap().calls.push("open".into());
        Ok(())
    }

    fn send_frame(&mut self, frame: Option<EncoderFrame<'_>>) -> Result<()> {
        match frame {
            Some(frame) => {
                let frames = frame.data.frames();
                self.recorded
                    .lock()
                    .unwrap()
                    .submissions
                    .push((frame.pts, frames));
                self.held.push(EncodedPacket {
                    pts: frame.pts,
                    duration: frames as u64,
                    data: vec![0u8; 4],
                });
                if self.held.len() > self.delay {
                    let packet = self.held.remove(0);
                    self.ready.push(packet);
                }
            }
            None => {
                self.recorded.lock().unwrap().flushes += 1;
                self.ready.append(&mut self.held);
            }
        }
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<Option<EncodedPacket>> {
        if self.ready.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.ready.remove(0)))
    }
}

struct MockContainer {
    file: File,
    recorded: Arc<Mutex<Recorded>>,
}

impl MockContainer {
    fn call(&self, name: &str) {
        self.recorded.lock().unwrap().calls.push(name.to_string());
    }
}

impl ContainerWriter for MockContainer {
    fn set_metadata(&mut self, _metadata: &TrackMetadata) -> Result<()> {
        self.call("metadata");
        Ok(())
    }

    fn add_cover_art(&mut self, _art: &CoverArt) -> Result<()> {
        self.call("cover_art");
        Ok(())
    }

    fn write_header(&mut self, _params: &EncoderParams) -> Result<()> {
        self.call("header");
        Ok(())
    }

    fn write_cover_art_packet(&mut self, _art: &CoverArt) -> Result<()> {
        self.call("cover_art_packet");
        Ok(())
    }

    fn write_packet(&mut self, packet: &EncodedPacket) -> Result<()> {
        self.recorded.lock().unwrap().packet_pts.push(packet.pts);
        self.file
            .write_all(&packet.data)
            .map_err(|e| Error::EncodingFailed(e.to_string()))
    }

    fn write_trailer(&mut self) -> Result<()> {
        self.call("trailer");
        Ok(())
    }
}
