//! Fixed-capacity ring of recent samples, written from the render thread and read by
//! visualisation consumers.

use std::sync::{Mutex, MutexGuard, PoisonError};

struct Ring {
    samples: Vec<f32>,
    cursor: usize,
}

/// Thread-safe circular sample buffer.
///
/// The lock is held only while copying; neither `write` nor `read` allocates under it.
pub struct SampleBuffer {
    capacity: usize,
    inner: Mutex<Ring>,
}

impl SampleBuffer {
    /// Zero-filled ring holding `capacity` samples (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(Ring {
                samples: vec![0.0; capacity],
                cursor: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append samples, overwriting the oldest ones once the ring is full.
    pub fn write(&self, samples: &[f32]) {
        // Only the newest `capacity` samples can survive the write.
        let samples = &samples[samples.len().saturating_sub(self.capacity)..];
        if samples.is_empty() {
            return;
        }
        let mut ring = self.lock();
        let cursor = ring.cursor;
        let first = samples.len().min(self.capacity - cursor);
        ring.samples[cursor..cursor + first].copy_from_slice(&samples[..first]);
        let rest = samples.len() - first;
        ring.samples[..rest].copy_from_slice(&samples[first..]);
        ring.cursor = (cursor + samples.len()) % self.capacity;
    }

    /// The most recent `min(count, capacity)` samples, oldest first.
    pub fn read(&self, count: usize) -> Vec<f32> {
        let mut out = vec![0.0; count.min(self.capacity)];
        self.read_into(&mut out);
        out
    }

    /// Fill `out` with the most recent samples, oldest first. Returns how many were written
    /// (`min(out.len(), capacity)`).
    pub fn read_into(&self, out: &mut [f32]) -> usize {
        let count = out.len().min(self.capacity);
        if count == 0 {
            return 0;
        }
        let ring = self.lock();
        let start = (ring.cursor + self.capacity - count) % self.capacity;
        let first = count.min(self.capacity - start);
        out[..first].copy_from_slice(&ring.samples[start..start + first]);
        out[first..count].copy_from_slice(&ring.samples[..count - first]);
        count
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
