//! Playback state machine on top of [`Decoder`] and an [`AudioOutput`].
//!
//! Control calls (`open`, `play`, `pause`, `seek`, `stop`, `close`) are serialized behind one
//! lock and never return while a decode worker could still schedule audio for the old state:
//! they raise the worker's exit flag and join it, getting the decoder back.
//!
//! The reported position is `seek_base + output clock` while playing and a cached value
//! otherwise. The output clock restarts from zero on every `AudioOutput::stop`.

mod worker;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use audio_pipeline_types::{PlaybackState, PlayerStatus};

use crate::config::PlayerConfig;
use crate::decode::Decoder;
use crate::error::{Error, Result};
use crate::frame::AudioOutputFormat;
use crate::metadata::{MetadataReader, TrackMetadata};
use crate::output::AudioOutput;

use self::worker::Worker;

/// Receives player events. Called from the decode worker and from control calls; must not
/// call back into the player.
pub trait PlayerObserver: Send + Sync {
    fn on_progress(&self, _position: f64, _duration: f64) {}
    fn on_state_change(&self, _state: PlaybackState) {}
    fn on_error(&self, _error: &Error) {}
}

/// Plays one media file at a time through an [`AudioOutput`].
pub struct AudioPlayer {
    output: Arc<dyn AudioOutput>,
    metadata_reader: Arc<dyn MetadataReader>,
    config: PlayerConfig,
    shared: Arc<Shared>,
    control: Mutex<Control>,
}

/// Loaded source. The decoder is `None` while a worker holds it.
#[derive(Default)]
struct Control {
    path: Option<PathBuf>,
    decoder: Option<Decoder>,
    worker: Option<Worker>,
    metadata: Option<TrackMetadata>,
    duration: Option<f64>,
    passthrough: bool,
}

/// State the worker updates without taking the control lock.
struct Shared {
    state: Mutex<PlaybackState>,
    clock: Mutex<PositionClock>,
    observer: RwLock<Option<Arc<dyn PlayerObserver>>>,
}

#[derive(Clone, Copy, Default)]
struct PositionClock {
    /// Position reported while not playing.
    cached: f64,
    /// Source position the output clock counts from.
    seek_base: f64,
    /// Upper bound for the computed position.
    duration: Option<f64>,
}

impl AudioPlayer {
    pub fn new(output: Arc<dyn AudioOutput>, metadata_reader: Arc<dyn MetadataReader>) -> Self {
        Self::with_config(output, metadata_reader, PlayerConfig::default())
    }

    pub fn with_config(
        output: Arc<dyn AudioOutput>,
        metadata_reader: Arc<dyn MetadataReader>,
        config: PlayerConfig,
    ) -> Self {
        Self {
            output,
            metadata_reader,
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(PlaybackState::Idle),
                clock: Mutex::new(PositionClock::default()),
                observer: RwLock::new(None),
            }),
            control: Mutex::new(Control::default()),
        }
    }

    pub fn set_observer(&self, observer: Arc<dyn PlayerObserver>) {
        *self
            .shared
            .observer
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(observer);
    }

    /// Load `path` for playback, replacing any current source. Ends in `Idle`.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut control = self.lock_control();
        self.close_locked(&mut control);

        let info = Decoder::probe(path)?;
        let metadata = match self.metadata_reader.read(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "metadata unavailable");
                TrackMetadata::from_source_info(&info)
            }
        };

        let mut decoder = Decoder::new(self.config.decode.clone());
        decoder.configure(AudioOutputFormat::planar_f32(info.sample_rate, info.channels));
        decoder.open(path)?;

        self.output
            .configure(info.sample_rate, info.channels)
            .map_err(|e| Error::PlaybackOpenFailed(e.to_string()))?;
        if let Some(device_rate) = self.output.device_sample_rate() {
            if device_rate != info.sample_rate {
                tracing::info!(
                    source_hz = info.sample_rate,
                    device_hz = device_rate,
                    "resampling for output device"
                );
                decoder.reconfigure(AudioOutputFormat::planar_f32(device_rate, info.channels))?;
            }
        }

        let duration = decoder.duration().or(metadata.duration);
        control.passthrough = decoder.is_passthrough();
        control.decoder = Some(decoder);
        control.path = Some(path.to_path_buf());
        control.metadata = Some(metadata);
        control.duration = duration;
        self.shared.reset_clock(duration);
        self.shared.set_state(PlaybackState::Idle);

        tracing::info!(
            path = %path.display(),
            duration_secs = duration.unwrap_or(0.0),
            passthrough = control.passthrough,
            "track opened"
        );
        Ok(())
    }

    /// Start or resume playback. Restarts from zero after completion; no-op while playing.
    pub fn play(&self) -> Result<()> {
        let mut control = self.lock_control();
        match self.shared.state() {
            PlaybackState::Playing => return Ok(()),
            PlaybackState::Paused => {}
            PlaybackState::Completed => {
                self.halt(&mut control, Halt::Stop);
                self.reposition(&mut control, 0.0)?;
            }
            PlaybackState::Idle | PlaybackState::Stopped => {
                self.halt(&mut control, Halt::Stop);
                let cached = self.shared.clock().cached;
                self.shared.update_clock(|c| c.seek_base = cached);
            }
        }
        self.start_worker(&mut control)
    }

    /// Freeze playback at the current position. Only acts while playing.
    pub fn pause(&self) {
        let mut control = self.lock_control();
        if self.shared.state() != PlaybackState::Playing {
            return;
        }
        self.halt(&mut control, Halt::Pause);
        // The worker may have finished or failed while being joined.
        if self.shared.state() != PlaybackState::Playing {
            return;
        }
        self.output.pause();
        let position = self.shared.position(self.output.as_ref());
        self.shared.set_cached_position(position);
        self.shared.set_state(PlaybackState::Paused);
    }

    /// Halt playback and rewind to the start.
    pub fn stop(&self) {
        let mut control = self.lock_control();
        if control.path.is_none() {
            return;
        }
        self.halt(&mut control, Halt::Stop);
        if let Some(decoder) = control.decoder.as_mut() {
            if let Err(e) = decoder.seek(0.0) {
                tracing::warn!(error = %e, "rewind on stop failed");
            }
        }
        self.shared.reset_clock(control.duration);
        self.shared.set_state(PlaybackState::Stopped);
    }

    /// Move to `seconds`, clamped to the track. Seeking to or past the end completes the track.
    pub fn seek(&self, seconds: f64) -> Result<()> {
        let mut control = self.lock_control();
        if control.path.is_none() {
            return Err(Error::NotConfigured);
        }
        let target = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        let was_playing = self.shared.state() == PlaybackState::Playing;
        self.halt(&mut control, Halt::Stop);

        if let Some(duration) = control.duration.filter(|d| target >= *d) {
            if let Some(decoder) = control.decoder.as_mut() {
                if let Err(e) = decoder.seek(duration) {
                    self.settle_after_failed_seek(&mut control);
                    return Err(e);
                }
            }
            self.shared.update_clock(|c| {
                c.cached = duration;
                c.seek_base = duration;
            });
            self.shared.notify_progress(duration, duration);
            self.shared.set_state(PlaybackState::Completed);
            return Ok(());
        }

        if let Err(e) = self.reposition(&mut control, target) {
            self.settle_after_failed_seek(&mut control);
            return Err(e);
        }
        if was_playing {
            self.start_worker(&mut control)?;
        }
        Ok(())
    }

    /// Release the current source. Ends in `Idle` with nothing loaded.
    pub fn close(&self) {
        let mut control = self.lock_control();
        self.close_locked(&mut control);
    }

    /// Playback position in seconds.
    pub fn current_time(&self) -> f64 {
        if self.shared.state() == PlaybackState::Playing {
            self.shared.position(self.output.as_ref())
        } else {
            self.shared.clock().cached
        }
    }

    /// Track duration in seconds, zero when unknown or nothing is loaded.
    pub fn duration(&self) -> f64 {
        self.lock_control().duration.unwrap_or(0.0)
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.state()
    }

    pub fn metadata(&self) -> Option<TrackMetadata> {
        self.lock_control().metadata.clone()
    }

    pub fn volume(&self) -> f32 {
        self.output.volume()
    }

    pub fn set_volume(&self, volume: f32) {
        self.output.set_volume(volume);
    }

    /// Snapshot for status displays.
    pub fn status(&self) -> PlayerStatus {
        let control = self.lock_control();
        let metadata = control.metadata.as_ref();
        let now_playing = metadata.and_then(|m| m.title.clone()).or_else(|| {
            control
                .path
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
        });
        PlayerStatus {
            state: self.shared.state(),
            position_secs: self.current_time(),
            duration_secs: control.duration.unwrap_or(0.0),
            now_playing,
            source_codec: metadata.and_then(|m| m.codec.clone()),
            sample_rate: metadata.and_then(|m| m.sample_rate),
            channels: metadata.and_then(|m| m.channels),
            bit_depth: metadata.and_then(|m| m.bit_depth),
            passthrough: control.path.as_ref().map(|_| control.passthrough),
            volume: self.output.volume(),
        }
    }

    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close_locked(&self, control: &mut Control) {
        self.halt(control, Halt::Stop);
        if let Some(path) = control.path.take() {
            tracing::info!(path = %path.display(), "track closed");
        }
        if let Some(mut decoder) = control.decoder.take() {
            decoder.close();
        }
        control.metadata = None;
        control.duration = None;
        control.passthrough = false;
        self.shared.reset_clock(None);
        self.shared.set_state(PlaybackState::Idle);
    }

    /// Exit the worker, if any, and put its decoder back.
    fn halt(&self, control: &mut Control, mode: Halt) {
        match control.worker.take() {
            Some(worker) => {
                worker.request_stop();
                if mode == Halt::Stop {
                    // Releases a worker blocked on a full output queue.
                    self.output.stop();
                }
                if let Some(decoder) = worker.join() {
                    control.decoder = Some(decoder);
                }
            }
            None if mode == Halt::Stop => self.output.stop(),
            None => {}
        }
    }

    fn reposition(&self, control: &mut Control, seconds: f64) -> Result<()> {
        let decoder = control.decoder.as_mut().ok_or(Error::NotConfigured)?;
        decoder.seek(seconds)?;
        tracing::debug!(seconds, "player seek");
        self.shared.update_clock(|c| {
            c.cached = seconds;
            c.seek_base = seconds;
        });
        Ok(())
    }

    /// The worker is halted and the output stopped; leave a state `play` can recover from.
    fn settle_after_failed_seek(&self, control: &mut Control) {
        if let Some(decoder) = control.decoder.as_mut() {
            if let Err(e) = decoder.seek(0.0) {
                tracing::warn!(error = %e, "rewind after failed seek failed");
            }
        }
        self.shared.reset_clock(control.duration);
        if self.shared.state() != PlaybackState::Idle {
            self.shared.set_state(PlaybackState::Stopped);
        }
    }

    fn start_worker(&self, control: &mut Control) -> Result<()> {
        if control.decoder.is_none() {
            return Err(Error::NotConfigured);
        }
        self.output.start()?;
        let decoder = control.decoder.take().ok_or(Error::NotConfigured)?;
        match Worker::spawn(
            decoder,
            self.output.clone(),
            self.shared.clone(),
            control.duration,
        ) {
            Ok(worker) => {
                control.worker = Some(worker);
                self.shared.set_state(PlaybackState::Playing);
                Ok(())
            }
            Err((e, decoder)) => {
                control.decoder = Some(decoder);
                self.output.stop();
                // Audio decoded ahead of the clock was dropped with the output queue.
                let cached = self.shared.clock().cached;
                if let Err(seek_err) = self.reposition(control, cached) {
                    tracing::warn!(error = %seek_err, "rewind after failed start failed");
                }
                self.shared.set_state(PlaybackState::Stopped);
                Err(e)
            }
        }
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        let mut control = self.lock_control();
        self.halt(&mut control, Halt::Stop);
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Halt {
    /// Keep the output's queue and clock; it is paused afterwards.
    Pause,
    /// Drop queued audio and reset the output clock.
    Stop,
}

impl Shared {
    fn state(&self) -> PlaybackState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: PlaybackState) {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, next)
        };
        if previous != next {
            tracing::info!(from = ?previous, to = ?next, "player state");
            if let Some(observer) = self.observer() {
                observer.on_state_change(next);
            }
        }
    }

    fn clock(&self) -> PositionClock {
        *self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_clock(&self, f: impl FnOnce(&mut PositionClock)) {
        f(&mut self.clock.lock().unwrap_or_else(PoisonError::into_inner));
    }

    fn reset_clock(&self, duration: Option<f64>) {
        self.update_clock(|c| {
            *c = PositionClock {
                duration,
                ..PositionClock::default()
            }
        });
    }

    fn set_cached_position(&self, seconds: f64) {
        self.update_clock(|c| c.cached = seconds);
    }

    /// `seek_base` plus the output clock, clamped to the track.
    fn position(&self, output: &dyn AudioOutput) -> f64 {
        let clock = self.clock();
        let elapsed = output.playback_position().max(0.0);
        let position = clock.seek_base + elapsed;
        match clock.duration {
            Some(duration) => position.min(duration),
            None => position,
        }
    }

    fn observer(&self) -> Option<Arc<dyn PlayerObserver>> {
        self.observer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn notify_progress(&self, position: f64, duration: f64) {
        if let Some(observer) = self.observer() {
            observer.on_progress(position, duration);
        }
    }

    fn notify_error(&self, error: &Error) {
        if let Some(observer) = self.observer() {
            observer.on_error(error);
        }
    }
}
