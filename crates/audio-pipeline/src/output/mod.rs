//! Audio sink contract consumed by the player, plus the cpal implementation.

mod cpal_output;
pub mod device;
mod queue;

pub use cpal_output::CpalOutput;

use crate::error::Result;
use crate::frame::DecodedFrame;

/// A real-time audio sink.
///
/// All methods take `&self`: the player drives the sink from its control thread and its decode
/// worker at the same time.
pub trait AudioOutput: Send + Sync {
    /// Prepare for audio at `sample_rate` with `channels` interleaved channels.
    fn configure(&self, sample_rate: u32, channels: usize) -> Result<()>;

    /// Begin (or resume) rendering scheduled audio.
    fn start(&self) -> Result<()>;

    /// Halt rendering, keeping scheduled audio and the clock.
    fn pause(&self);

    /// Halt rendering and drop all scheduled audio. No audio is heard after this returns and
    /// the clock restarts from zero.
    fn stop(&self);

    /// Copy `frame` into the sink's queue. May block while the queue is full; returns early
    /// once the sink is stopped.
    fn schedule(&self, frame: &DecodedFrame<'_>) -> Result<()>;

    /// Block until everything scheduled has been rendered (`true`) or `cancelled` returns
    /// `true` (`false`). `cancelled` is polled on a short fixed interval.
    fn wait_for_completion(&self, cancelled: &dyn Fn() -> bool) -> bool;

    /// Seconds rendered since the last `stop`, or a negative value when unknown.
    fn playback_position(&self) -> f64;

    fn volume(&self) -> f32;

    /// Output gain, clamped to `[0, 1]`.
    fn set_volume(&self, volume: f32);

    /// Rate the hardware actually runs at, when it differs from what was requested.
    fn device_sample_rate(&self) -> Option<u32> {
        None
    }
}
