use anyhow::{bail, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::audio::{MAX_BUFFER_SIZE, MIN_BUFFER_SIZE};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transport: TransportConfig,
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
    pub rate_limit: RateLimitConfig,
    pub session: SessionConfig,
    pub protocol: ProtocolConfig,
}

/// Which receive/send channel implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Server-sent events in, HTTP POST out
    #[default]
    Sse,
    /// NATS subject subscription in, NATS publish out
    Nats,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub backend: BackendKind,
    pub base_url: String,
    pub language: String,
    pub nats_url: String,
    pub nats_prefix: String,
    pub heartbeat_interval_ms: u64,
    pub reconnect_interval_ms: u64,
    pub max_reconnect_attempts: u32,
    pub request_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Sse,
            base_url: "http://localhost:8000".to_string(),
            language: "en".to_string(),
            nats_url: "nats://localhost:4222".to_string(),
            nats_prefix: "voice".to_string(),
            heartbeat_interval_ms: 15_000,
            reconnect_interval_ms: 3_000,
            max_reconnect_attempts: 5,
            request_timeout_ms: 10_000,
        }
    }
}

impl TransportConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Requested device sample rate (the backend expects 16kHz)
    pub sample_rate: u32,
    /// Samples per posted frame
    pub frame_size: usize,
    /// How often accumulated audio is sent upstream
    pub flush_interval_ms: u64,
    /// How long stop() waits for the final partial frame
    pub stop_grace_ms: u64,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub noise_gate: NoiseGateConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_size: MAX_BUFFER_SIZE,
            flush_interval_ms: 200,
            stop_grace_ms: 150,
            echo_cancellation: true,
            noise_suppression: true,
            noise_gate: NoiseGateConfig::default(),
        }
    }
}

impl CaptureConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NoiseGateConfig {
    /// Gate opens above this level (dBFS)
    pub threshold_db: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
}

impl Default for NoiseGateConfig {
    fn default() -> Self {
        Self {
            threshold_db: -50.0,
            attack_ms: 5.0,
            release_ms: 80.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub sample_rate: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self { sample_rate: 24000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub min_interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 100,
        }
    }
}

impl RateLimitConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Deactivated sessions idle for longer than this are removed
    pub max_inactive_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_inactive_secs: 3600,
        }
    }
}

impl SessionConfig {
    pub fn max_inactive(&self) -> Duration {
        Duration::from_secs(self.max_inactive_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Characters per outgoing text chunk
    pub text_chunk_size: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            text_chunk_size: 1024,
        }
    }
}

impl Config {
    /// Load from an optional file plus `VOICE_STREAM__<SECTION>__<KEY>` env overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("VOICE_STREAM")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let cfg: Self = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let frame_size = self.capture.frame_size;
        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&frame_size) {
            bail!(
                "capture.frame_size {} outside {}..={}",
                frame_size,
                MIN_BUFFER_SIZE,
                MAX_BUFFER_SIZE
            );
        }
        if self.capture.sample_rate == 0 || self.playback.sample_rate == 0 {
            bail!("sample rates must be non-zero");
        }
        if self.capture.flush_interval_ms == 0 {
            bail!("capture.flush_interval_ms must be non-zero");
        }
        if self.transport.heartbeat_interval_ms == 0 {
            bail!("transport.heartbeat_interval_ms must be non-zero");
        }
        if self.protocol.text_chunk_size == 0 {
            bail!("protocol.text_chunk_size must be non-zero");
        }
        Ok(())
    }
}
