use async_trait::async_trait;

use crate::error::CaptureError;

/// Render callback installed on an input device.
///
/// Invoked on the device's real-time thread with each block of mono
/// normalized samples. Devices keep calling it on their clock while
/// connected, with an empty block when no input is available.
pub type RenderCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Fixed constraints requested when acquiring the microphone
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConstraints {
    /// Target sample rate (will downsample if needed)
    pub sample_rate: u32,
    /// Always 1; the graph only handles mono
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            sample_rate: 16000, // 16kHz uplink
            channels: 1,        // Mono
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

/// Audio input device
///
/// Implementations:
/// - `WavFileDevice`: replays a WAV file at the device clock (testing/batch)
/// - `CpalInputDevice`: live microphone (feature `backend-cpal`)
#[async_trait]
pub trait InputDevice: Send {
    /// Request access with the given constraints.
    ///
    /// A denied request must return `CaptureError::Permission`.
    async fn acquire(&mut self, constraints: &CaptureConstraints) -> Result<(), CaptureError>;

    /// Start invoking `render` on the device clock
    fn connect(&mut self, render: RenderCallback) -> Result<(), CaptureError>;

    /// Stop invoking the callback and drop it. Once this returns the callback
    /// is never called again. No-op when not connected.
    fn disconnect(&mut self);

    /// Release the device (stop the track). No-op when not acquired.
    fn release(&mut self);

    /// Get device name for logging
    fn name(&self) -> &str;
}

/// Sample-rate and channel conversion used by input devices
pub mod convert {
    /// Downsample by decimation (take every Nth sample).
    ///
    /// Returns `None` when `from` is not an integer multiple of `to`.
    pub fn decimate(samples: &[f32], from: u32, to: u32) -> Option<Vec<f32>> {
        if from == to {
            return Some(samples.to_vec());
        }
        if to == 0 || from < to || from % to != 0 {
            return None;
        }

        let ratio = (from / to) as usize;
        Some(samples.iter().step_by(ratio).copied().collect())
    }

    /// Interleaved multi-channel → mono by averaging each frame
    pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
        if channels <= 1 {
            return samples.to_vec();
        }

        let channels = channels as usize;
        samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }
}
