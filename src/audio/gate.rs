// Noise gate stage
//
// Envelope follower that smooths toward 1.0 while the input is above the
// threshold and toward 0.0 below it, then scales the signal by the envelope.
// Attack/release are one-pole time constants so the gate never clicks.

use crate::config::NoiseGateConfig;
use crate::error::CaptureError;

/// Convert a dBFS level to linear amplitude
pub fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// One-pole smoothing coefficient for a time constant in milliseconds
fn time_constant_coeff(ms: f32, sample_rate: u32) -> f32 {
    let samples = ms / 1000.0 * sample_rate as f32;
    (-1.0 / samples).exp()
}

#[derive(Debug, Clone)]
pub struct NoiseGate {
    /// Linear amplitude; configured in dB
    threshold: f32,
    attack_coeff: f32,
    release_coeff: f32,
    envelope: f32,
}

impl NoiseGate {
    pub fn new(config: &NoiseGateConfig, sample_rate: u32) -> Result<Self, CaptureError> {
        if sample_rate == 0 {
            return Err(CaptureError::Initialization(
                "noise gate needs a non-zero sample rate".to_string(),
            ));
        }
        if !config.threshold_db.is_finite() || config.threshold_db > 0.0 {
            return Err(CaptureError::Initialization(format!(
                "noise gate threshold must be a finite dBFS value <= 0, got {}",
                config.threshold_db
            )));
        }
        let positive = |ms: f32| ms.is_finite() && ms > 0.0;
        if !positive(config.attack_ms) || !positive(config.release_ms) {
            return Err(CaptureError::Initialization(format!(
                "noise gate attack/release must be positive (attack={}ms, release={}ms)",
                config.attack_ms, config.release_ms
            )));
        }

        Ok(Self {
            threshold: db_to_linear(config.threshold_db),
            attack_coeff: time_constant_coeff(config.attack_ms, sample_rate),
            release_coeff: time_constant_coeff(config.release_ms, sample_rate),
            envelope: 0.0,
        })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn envelope(&self) -> f32 {
        self.envelope
    }

    #[inline]
    pub fn process_sample(&mut self, sample: f32) -> f32 {
        let target = if sample.abs() > self.threshold { 1.0 } else { 0.0 };
        let coeff = if target > self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope = target + coeff * (self.envelope - target);
        sample * self.envelope
    }

    /// Gate `input` into `output` (same length)
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        for (out, &sample) in output.iter_mut().zip(input) {
            *out = self.process_sample(sample);
        }
    }

    pub fn process_in_place(&mut self, block: &mut [f32]) {
        for sample in block.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }

    pub fn reset(&mut self) {
        self.envelope = 0.0;
    }
}
