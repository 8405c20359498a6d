//! Bounded interleaved sample queue between the decode worker and the render callback.
//!
//! The producer blocks while the queue is full; the render callback only ever takes what is
//! available without waiting. Closing the queue releases a blocked producer and drops
//! everything buffered, which is how a stop guarantees silence.
//!
//! Samples the consumer has popped but not yet rendered are tracked under the same lock, so
//! "drained" never reads an empty queue while a popped chunk is still waiting to play.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub(crate) struct FrameQueue {
    channels: usize,
    max_buffered_samples: usize,
    inner: Mutex<Inner>,
    cv: Condvar,
}

struct Inner {
    queue: VecDeque<f32>,
    /// Popped by the consumer, not yet rendered.
    unrendered: usize,
    closed: bool,
}

/// Queue capacity in samples for `seconds` of audio.
///
/// Non-finite or non-positive `seconds` fall back to two seconds.
pub(crate) fn calc_max_buffered_samples(rate_hz: u32, channels: usize, seconds: f32) -> usize {
    let secs = if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        2.0
    };
    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels).max(channels)
}

impl FrameQueue {
    pub(crate) fn new(channels: usize, max_buffered_samples: usize) -> Self {
        Self {
            channels: channels.max(1),
            max_buffered_samples: max_buffered_samples.max(channels.max(1)),
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                unrendered: 0,
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn channels(&self) -> usize {
        self.channels
    }

    pub(crate) fn len_frames(&self) -> usize {
        self.lock().queue.len() / self.channels
    }

    /// Append samples, blocking while full. Returns `false` if the queue was closed before
    /// everything was queued.
    pub(crate) fn push_blocking(&self, samples: &[f32]) -> bool {
        let mut offset = 0;
        while offset < samples.len() {
            let mut g = self.lock();
            while g.queue.len() >= self.max_buffered_samples && !g.closed {
                g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
            }
            if g.closed {
                return false;
            }
            let room = self.max_buffered_samples - g.queue.len();
            let take = room.min(samples.len() - offset);
            g.queue.extend(&samples[offset..offset + take]);
            offset += take;
            drop(g);
            self.cv.notify_all();
        }
        true
    }

    /// Move up to `max_frames` whole frames into `out` without waiting. Returns frames moved.
    ///
    /// The moved samples count as unrendered until [`FrameQueue::set_unrendered`] says
    /// otherwise; the caller is expected to have rendered everything it popped before.
    pub(crate) fn pop_into(&self, out: &mut Vec<f32>, max_frames: usize) -> usize {
        let mut g = self.lock();
        let frames = (g.queue.len() / self.channels).min(max_frames);
        if frames == 0 {
            g.unrendered = 0;
            return 0;
        }
        out.extend(g.queue.drain(..frames * self.channels));
        g.unrendered = frames * self.channels;
        drop(g);
        self.cv.notify_all();
        frames
    }

    /// Drop buffered samples and refuse new ones until [`FrameQueue::reopen`].
    pub(crate) fn close_and_clear(&self) {
        let mut g = self.lock();
        g.closed = true;
        g.queue.clear();
        g.unrendered = 0;
        drop(g);
        self.cv.notify_all();
    }

    pub(crate) fn reopen(&self) {
        self.lock().closed = false;
    }

    /// Report how many popped samples the consumer still holds.
    pub(crate) fn set_unrendered(&self, samples: usize) {
        let mut g = self.lock();
        if !g.closed {
            g.unrendered = samples;
        }
    }

    /// Block until everything pushed has been rendered, `cancelled` returns `true`, or the
    /// queue is closed.
    ///
    /// Returns `true` only for a drained, open queue.
    pub(crate) fn wait_until_drained_or_cancel(
        &self,
        cancelled: &dyn Fn() -> bool,
        poll: Duration,
    ) -> bool {
        let mut g = self.lock();
        loop {
            if cancelled() || g.closed {
                return false;
            }
            if g.queue.is_empty() && g.unrendered == 0 {
                return true;
            }
            let (ng, _timeout) = self
                .cv
                .wait_timeout(g, poll)
                .unwrap_or_else(PoisonError::into_inner);
            g = ng;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
