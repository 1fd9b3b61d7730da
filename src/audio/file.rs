use anyhow::{Context, Result};
use async_trait::async_trait;
use hound::WavReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

use super::backend::{convert, CaptureConstraints, InputDevice, RenderCallback};
use super::pcm::{pcm16_to_float32, sample_to_pcm16};
use crate::error::CaptureError;

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Normalized mono samples at `target_rate`
    pub fn to_mono_f32(&self, target_rate: u32) -> Result<Vec<f32>> {
        let mono = convert::downmix(&pcm16_to_float32(&self.samples), self.channels);
        convert::decimate(&mono, self.sample_rate, target_rate).with_context(|| {
            format!(
                "Cannot convert {}Hz to {}Hz (needs an integer ratio)",
                self.sample_rate, target_rate
            )
        })
    }
}

/// Write mono normalized samples as a 16-bit WAV file
pub fn write_wav(path: impl AsRef<Path>, samples: &[f32], sample_rate: u32) -> Result<()> {
    let path = path.as_ref();
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create WAV file: {:?}", path))?;
    for &sample in samples {
        writer
            .write_sample(sample_to_pcm16(sample))
            .context("Failed to write sample to WAV")?;
    }
    writer.finalize().context("Failed to finalize WAV file")?;

    info!("Wrote {} samples to {}", samples.len(), path.display());
    Ok(())
}

/// Input device that replays a WAV file on its own clock thread.
///
/// After the file is exhausted the clock keeps ticking with empty blocks
/// until the device is disconnected.
pub struct WavFileDevice {
    path: PathBuf,
    realtime: bool,
    block_size: usize,
    samples: Option<Arc<Vec<f32>>>,
    sample_rate: u32,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WavFileDevice {
    /// `realtime` paces blocks at the sample rate; otherwise blocks are
    /// delivered as fast as the callback consumes them.
    pub fn new(path: impl Into<PathBuf>, realtime: bool) -> Self {
        Self {
            path: path.into(),
            realtime,
            block_size: 160,
            samples: None,
            sample_rate: 16000,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }
}

#[async_trait]
impl InputDevice for WavFileDevice {
    async fn acquire(&mut self, constraints: &CaptureConstraints) -> Result<(), CaptureError> {
        let path = self.path.clone();
        let target_rate = constraints.sample_rate;

        let samples = tokio::task::spawn_blocking(move || {
            AudioFile::open(&path).and_then(|file| file.to_mono_f32(target_rate))
        })
        .await
        .map_err(|e| CaptureError::Device(e.to_string()))?
        .map_err(|e| CaptureError::Device(format!("{:#}", e)))?;

        self.sample_rate = target_rate;
        self.samples = Some(Arc::new(samples));
        Ok(())
    }

    fn connect(&mut self, mut render: RenderCallback) -> Result<(), CaptureError> {
        let samples = self
            .samples
            .clone()
            .ok_or_else(|| CaptureError::InvalidState("WAV device not acquired".to_string()))?;
        if self.thread.is_some() {
            return Err(CaptureError::InvalidState(
                "WAV device already connected".to_string(),
            ));
        }

        let running = Arc::clone(&self.running);
        running.store(true, Ordering::SeqCst);

        let block_size = self.block_size;
        let tick = if self.realtime {
            Duration::from_secs_f64(block_size as f64 / self.sample_rate as f64)
        } else {
            Duration::ZERO
        };

        let thread = std::thread::Builder::new()
            .name("wav-device".to_string())
            .spawn(move || {
                let mut position = 0;
                while running.load(Ordering::SeqCst) {
                    let end = (position + block_size).min(samples.len());
                    let exhausted = position == end;
                    render(&samples[position..end]);
                    position = end;

                    if !tick.is_zero() {
                        std::thread::sleep(tick);
                    } else if exhausted {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                }
            })
            .map_err(|e| CaptureError::Device(format!("Failed to spawn device thread: {}", e)))?;

        self.thread = Some(thread);
        info!("WAV device connected: {}", self.path.display());
        Ok(())
    }

    fn disconnect(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("WAV device thread panicked");
            }
        }
    }

    fn release(&mut self) {
        self.disconnect();
        self.samples = None;
    }

    fn name(&self) -> &str {
        "WAV file"
    }
}
