use std::collections::VecDeque;

use crate::frame::DecodedFrame;

/// Per-channel sample FIFO that regroups variable-size decoded frames into the fixed chunk
/// size an encoder demands.
pub(crate) struct SampleFifo {
    planes: Vec<VecDeque<f32>>,
}

impl SampleFifo {
    pub(crate) fn new(channels: usize, frame_size: usize) -> Self {
        Self {
            planes: (0..channels)
                .map(|_| VecDeque::with_capacity(frame_size * 2))
                .collect(),
        }
    }

    /// Buffered frames per channel.
    pub(crate) fn len(&self) -> usize {
        self.planes.first().map_or(0, VecDeque::len)
    }

    pub(crate) fn push(&mut self, frame: &DecodedFrame<'_>) {
        match frame.as_f32() {
            Some(planes) => {
                for (fifo, plane) in self.planes.iter_mut().zip(planes) {
                    fifo.extend(plane.iter().copied());
                }
            }
            None => {
                for (ch, fifo) in self.planes.iter_mut().enumerate() {
                    fifo.extend((0..frame.frames()).map(|i| frame.sample_f32(ch, i)));
                }
            }
        }
    }

    /// Move the oldest `frames` frames into `out`, one `Vec` per channel.
    pub(crate) fn pop_into(&mut self, frames: usize, out: &mut [Vec<f32>]) {
        let frames = frames.min(self.len());
        for (fifo, dst) in self.planes.iter_mut().zip(out.iter_mut()) {
            dst.clear();
            dst.extend(fifo.drain(..frames));
        }
    }
}
