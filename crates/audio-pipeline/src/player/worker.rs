//! Decode loop run on the player's worker thread.
//!
//! The worker owns the [`Decoder`] while it runs and hands it back through its
//! `JoinHandle`, so halting the loop is a plain join rather than a timed wait.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use audio_pipeline_types::PlaybackState;

use crate::decode::Decoder;
use crate::error::Error;
use crate::output::AudioOutput;

use super::Shared;

/// A running decode loop.
pub(super) struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Option<Decoder>>,
}

impl Worker {
    /// Start the loop on a new thread.
    ///
    /// The decoder is handed over only once the thread exists, so a failed spawn gives it
    /// back to the caller.
    pub(super) fn spawn(
        decoder: Decoder,
        output: Arc<dyn AudioOutput>,
        shared: Arc<Shared>,
        duration: Option<f64>,
    ) -> std::result::Result<Self, (Error, Decoder)> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let (handoff, incoming) = crossbeam_channel::bounded::<Decoder>(1);
        let spawned = thread::Builder::new()
            .name("audio-player-decode".to_string())
            .spawn(move || {
                incoming
                    .recv()
                    .ok()
                    .map(|decoder| run(decoder, output.as_ref(), &shared, &stop_flag, duration))
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                let error = Error::PlaybackOpenFailed(format!("spawning decode thread: {e}"));
                return Err((error, decoder));
            }
        };
        if let Err(crossbeam_channel::SendError(decoder)) = handoff.send(decoder) {
            let _ = handle.join();
            let error = Error::PlaybackOpenFailed("decode thread exited before start".into());
            return Err((error, decoder));
        }
        Ok(Self { stop, handle })
    }

    /// Ask the loop to exit at its next check.
    pub(super) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Wait for the loop to exit and take the decoder back.
    ///
    /// `None` only if the worker panicked, in which case the decoder is gone.
    pub(super) fn join(self) -> Option<Decoder> {
        self.request_stop();
        match self.handle.join() {
            Ok(decoder) => decoder,
            Err(_) => {
                tracing::error!("decode worker panicked");
                None
            }
        }
    }
}

fn run(
    mut decoder: Decoder,
    output: &dyn AudioOutput,
    shared: &Shared,
    stop: &AtomicBool,
    duration: Option<f64>,
) -> Decoder {
    let stopped = || stop.load(Ordering::Acquire);
    let duration_secs = duration.unwrap_or(0.0);
    let mut frames = 0u64;

    let reason = loop {
        if stopped() {
            break "halted";
        }
        let scheduled = decoder
            .decode_next_frame(|frame| output.schedule(&frame))
            .and_then(|r| r);
        match scheduled {
            Ok(()) => {
                frames += 1;
                let position = shared.position(output);
                shared.notify_progress(position, duration_secs);
            }
            Err(Error::EndOfFile) => {
                tracing::debug!("end of stream; waiting for output to drain");
                if !output.wait_for_completion(&stopped) {
                    break "halted while draining";
                }
                let end = duration.unwrap_or_else(|| shared.position(output));
                shared.set_cached_position(end);
                shared.notify_progress(end, duration_secs);
                shared.set_state(PlaybackState::Completed);
                break "completed";
            }
            Err(e) => {
                tracing::error!(error = %e, "playback failed");
                output.stop();
                if let Err(seek_err) = decoder.seek(0.0) {
                    tracing::warn!(error = %seek_err, "rewind after failure failed");
                }
                shared.set_cached_position(0.0);
                shared.set_state(PlaybackState::Stopped);
                shared.notify_error(&e);
                break "failed";
            }
        }
    };

    tracing::debug!(frames, reason, "decode worker exited");
    decoder
}
