pub mod accumulator;
pub mod backend;
pub mod capture;
pub mod file;
pub mod gate;
pub mod output;
pub mod pcm;
pub mod playback;
pub mod ring;

#[cfg(feature = "backend-cpal")]
pub mod cpal_backend;

/// Smallest accepted capture frame size (samples)
pub const MIN_BUFFER_SIZE: usize = 128;
/// Largest accepted capture frame size, and the default
pub const MAX_BUFFER_SIZE: usize = 4096;

pub use accumulator::{AudioFrame, CaptureCounters, CaptureMessage, CaptureProcessor, FrameAccumulator};
pub use backend::{CaptureConstraints, InputDevice, RenderCallback};
pub use capture::{AudioCaptureGraph, CaptureState, FrameHandler};
pub use file::{write_wav, AudioFile, WavFileDevice};
pub use gate::NoiseGate;
pub use output::{OutputTimeline, WavFileOutput};
pub use playback::{AudioOutput, PlaybackBuffer, PlaybackError, PlaybackScheduler, ScheduledBuffer};
pub use ring::SampleRing;

#[cfg(feature = "backend-cpal")]
pub use cpal_backend::{CpalInputDevice, CpalOutput};
