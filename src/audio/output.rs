use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

use super::pcm::sample_to_pcm16;
use super::playback::{AudioOutput, PlaybackBuffer};

/// Buffers waiting to be mixed, keyed by start frame on the output clock.
///
/// Entries stay sorted by start no matter the order they were inserted in,
/// so a fragment scheduled after a reset can land before ones queued earlier.
#[derive(Debug, Default)]
pub struct OutputTimeline {
    queue: VecDeque<(u64, Vec<f32>)>,
}

impl OutputTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `samples` to start at `start`; ties keep insertion order
    pub fn insert(&mut self, start: u64, samples: Vec<f32>) {
        let at = self.queue.partition_point(|(s, _)| *s <= start);
        self.queue.insert(at, (start, samples));
    }

    /// Forget every buffer that ends at or before `frame`
    pub fn prune(&mut self, frame: u64) {
        self.queue
            .retain(|(start, samples)| start + samples.len() as u64 > frame);
    }

    /// Sum of every buffer sounding at `frame`, clamped to [-1, 1]
    pub fn mix(&self, frame: u64) -> f32 {
        let mut value = 0.0;
        for (start, samples) in &self.queue {
            if *start > frame {
                break;
            }
            if let Some(&s) = samples.get((frame - start) as usize) {
                value += s;
            }
        }
        value.clamp(-1.0, 1.0)
    }

    /// Drop everything still queued
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Output that renders the scheduled timeline into a WAV file.
///
/// The clock is wall time since creation, so gaps between turns show up as
/// silence in the file just as they would on a speaker.
pub struct WavFileOutput {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    path: PathBuf,
    sample_rate: u32,
    started: Instant,
    frames_written: u64,
}

impl WavFileOutput {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(&path, spec)
            .with_context(|| format!("Failed to create WAV file: {:?}", path))?;

        info!("Recording replies to {} ({}Hz)", path.display(), sample_rate);

        Ok(Self {
            writer: Some(writer),
            path,
            sample_rate,
            started: Instant::now(),
            frames_written: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn finish(mut self) -> Result<PathBuf> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().context("Failed to finalize WAV file")?;
        }
        Ok(self.path.clone())
    }
}

impl AudioOutput for WavFileOutput {
    fn current_time(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn schedule(&mut self, buffer: PlaybackBuffer, start_time: f64) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .context("WAV output already finished")?;

        let start_frame = (start_time * self.sample_rate as f64).round() as u64;
        // Silence up to the scheduled start; scheduling never goes backwards.
        while self.frames_written < start_frame {
            writer.write_sample(0i16).context("Failed to write silence")?;
            self.frames_written += 1;
        }

        for &sample in &buffer.samples {
            writer
                .write_sample(sample_to_pcm16(sample))
                .context("Failed to write sample to WAV")?;
        }
        self.frames_written += buffer.samples.len() as u64;
        Ok(())
    }
}

impl Drop for WavFileOutput {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize WAV writer on drop: {}", e);
            }
        }
    }
}
