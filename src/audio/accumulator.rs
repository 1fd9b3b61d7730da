// Frame accumulator stage and the render-side processor chain
//
// Runs inside the device callback: no awaits, no locks, no logging. Full
// frames are copied out and posted with try_send; the only allocation is the
// fixed-size copy per frame.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::gate::NoiseGate;

/// A run of normalized samples posted from the render callback
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Frame number since capture started
    pub sequence: u64,
    /// Offset of the first sample since capture started
    pub timestamp_ms: u64,
    /// Short frame produced by the stop-time flush
    pub partial: bool,
}

impl AudioFrame {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Messages from the render context to the cooperative side
#[derive(Debug)]
pub enum CaptureMessage {
    Frame(AudioFrame),
    /// Flush requested by stop() has been handled
    Flushed,
}

/// Counters shared between the render callback and the graph
#[derive(Debug, Default)]
pub struct CaptureCounters {
    pub frames_posted: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub samples_processed: AtomicU64,
}

/// Fixed-size frame buffer
pub struct FrameAccumulator {
    buffer: Vec<f32>,
    filled: usize,
    sample_rate: u32,
    sequence: u64,
    samples_emitted: u64,
    tx: mpsc::Sender<CaptureMessage>,
    counters: Arc<CaptureCounters>,
}

impl FrameAccumulator {
    pub fn new(
        frame_size: usize,
        sample_rate: u32,
        tx: mpsc::Sender<CaptureMessage>,
        counters: Arc<CaptureCounters>,
    ) -> Self {
        Self {
            buffer: vec![0.0; frame_size],
            filled: 0,
            sample_rate,
            sequence: 0,
            samples_emitted: 0,
            tx,
            counters,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.buffer.len()
    }

    /// Samples waiting for the current frame to fill
    pub fn buffered(&self) -> usize {
        self.filled
    }

    pub fn push(&mut self, mut input: &[f32]) {
        while !input.is_empty() {
            let space = self.buffer.len() - self.filled;
            let take = space.min(input.len());
            self.buffer[self.filled..self.filled + take].copy_from_slice(&input[..take]);
            self.filled += take;
            input = &input[take..];

            if self.filled == self.buffer.len() {
                self.post(false);
            }
        }
    }

    /// Post whatever is buffered as a partial frame, then the flush marker
    pub fn flush(&mut self) {
        if self.filled > 0 {
            self.post(true);
        }
        // The marker is only a wake-up; stop() falls back to its grace timeout.
        let _ = self.tx.try_send(CaptureMessage::Flushed);
    }

    fn post(&mut self, partial: bool) {
        let frame = AudioFrame {
            samples: self.buffer[..self.filled].to_vec(),
            sample_rate: self.sample_rate,
            sequence: self.sequence,
            timestamp_ms: self.samples_emitted * 1000 / self.sample_rate as u64,
            partial,
        };

        self.sequence += 1;
        self.samples_emitted += self.filled as u64;
        self.filled = 0;

        match self.tx.try_send(CaptureMessage::Frame(frame)) {
            Ok(()) => {
                self.counters.frames_posted.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Noise gate feeding the frame accumulator, driven by the device callback
pub struct CaptureProcessor {
    gate: NoiseGate,
    accumulator: FrameAccumulator,
    scratch: Vec<f32>,
    flush_requested: Arc<AtomicBool>,
    counters: Arc<CaptureCounters>,
}

impl CaptureProcessor {
    pub fn new(
        gate: NoiseGate,
        accumulator: FrameAccumulator,
        flush_requested: Arc<AtomicBool>,
        counters: Arc<CaptureCounters>,
    ) -> Self {
        let scratch = vec![0.0; accumulator.frame_size()];
        Self {
            gate,
            accumulator,
            scratch,
            flush_requested,
            counters,
        }
    }

    /// Render callback body. `block` may be empty when the device has no
    /// input this period; the flush flag is still honored.
    pub fn process(&mut self, block: &[f32]) {
        for piece in block.chunks(self.scratch.len()) {
            let out = &mut self.scratch[..piece.len()];
            self.gate.process(piece, out);
            self.accumulator.push(out);
        }
        self.counters
            .samples_processed
            .fetch_add(block.len() as u64, Ordering::Relaxed);

        if self.flush_requested.swap(false, Ordering::AcqRel) {
            self.accumulator.flush();
        }
    }
}
