//! Gapless playback scheduling
//!
//! Each decoded fragment starts exactly where the previous one ends on the
//! output clock, or now if the cursor has fallen behind. A turn boundary
//! pulls the cursor back to the present so new speech is not queued behind
//! stale drift.

use tracing::debug;

use super::pcm::{decode_base64_pcm, decode_pcm, pcm16_to_float32};
use crate::error::PcmError;

/// Decoded mono samples ready for an output
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Where a buffer landed on the output clock (seconds)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub start: f64,
    pub duration: f64,
}

impl ScheduledBuffer {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Audio output with its own clock
pub trait AudioOutput: Send {
    /// Output clock in seconds; monotonic
    fn current_time(&self) -> f64;

    /// Queue `buffer` to start at `start_time` on the output clock
    fn schedule(&mut self, buffer: PlaybackBuffer, start_time: f64) -> anyhow::Result<()>;

    /// Discard audio that is scheduled but not yet played. Outputs that
    /// cannot take audio back keep the default no-op.
    fn clear(&mut self) {}
}

impl<O: AudioOutput + ?Sized> AudioOutput for Box<O> {
    fn current_time(&self) -> f64 {
        (**self).current_time()
    }

    fn schedule(&mut self, buffer: PlaybackBuffer, start_time: f64) -> anyhow::Result<()> {
        (**self).schedule(buffer, start_time)
    }

    fn clear(&mut self) {
        (**self).clear()
    }
}

pub struct PlaybackScheduler<O: AudioOutput> {
    output: O,
    sample_rate: u32,
    next_start_time: f64,
    scheduled: u64,
}

impl<O: AudioOutput> PlaybackScheduler<O> {
    pub fn new(output: O, sample_rate: u32) -> Self {
        Self {
            output,
            sample_rate,
            next_start_time: 0.0,
            scheduled: 0,
        }
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Buffers scheduled since creation
    pub fn scheduled_count(&self) -> u64 {
        self.scheduled
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    pub fn into_output(self) -> O {
        self.output
    }

    /// Decode raw PCM16 bytes and schedule them
    pub fn play_pcm(&mut self, bytes: &[u8]) -> Result<ScheduledBuffer, PlaybackError> {
        let samples = decode_pcm(bytes)?;
        self.play_samples(&samples)
    }

    /// Decode a base64 `data` field and schedule it
    pub fn play_base64(&mut self, data: &str) -> Result<ScheduledBuffer, PlaybackError> {
        let samples = decode_base64_pcm(data)?;
        self.play_samples(&samples)
    }

    pub fn play_samples(&mut self, samples: &[i16]) -> Result<ScheduledBuffer, PlaybackError> {
        let buffer = PlaybackBuffer {
            samples: pcm16_to_float32(samples),
            sample_rate: self.sample_rate,
        };
        self.schedule(buffer)
    }

    fn schedule(&mut self, buffer: PlaybackBuffer) -> Result<ScheduledBuffer, PlaybackError> {
        let now = self.output.current_time();
        let start = self.next_start_time.max(now);
        let duration = buffer.duration();

        self.output
            .schedule(buffer, start)
            .map_err(|e| PlaybackError::Output(format!("{:#}", e)))?;

        self.next_start_time = start + duration;
        self.scheduled += 1;

        debug!(
            "Scheduled {:.3}s of audio at {:.3}s (now {:.3}s)",
            duration, start, now
        );
        Ok(ScheduledBuffer { start, duration })
    }

    /// Turn complete: next fragment starts immediately
    pub fn reset(&mut self) {
        self.next_start_time = self.output.current_time();
    }

    /// Turn interrupted: silence whatever is still queued, then reset
    pub fn interrupt(&mut self) {
        self.output.clear();
        self.reset();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error(transparent)]
    Decode(#[from] PcmError),

    #[error("Audio output error: {0}")]
    Output(String),
}
