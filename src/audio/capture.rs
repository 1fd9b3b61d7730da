//! Audio capture graph
//!
//! Input device → noise gate → frame accumulator. The two stages run inside
//! the device's render callback; frames travel to the cooperative side over
//! a bounded channel and are collected by a forwarding task that records
//! them and invokes the per-frame handler.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::accumulator::{
    AudioFrame, CaptureCounters, CaptureMessage, CaptureProcessor, FrameAccumulator,
};
use super::backend::{CaptureConstraints, InputDevice};
use super::gate::NoiseGate;
use super::{MAX_BUFFER_SIZE, MIN_BUFFER_SIZE};
use crate::config::CaptureConfig;
use crate::error::CaptureError;

/// Frames that may queue between the render callback and the forwarder
const FRAME_QUEUE_DEPTH: usize = 32;

/// Called on the cooperative side for every captured frame
pub type FrameHandler = Arc<dyn Fn(&AudioFrame) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Initializing,
    Capturing,
    Stopping,
}

pub struct AudioCaptureGraph {
    config: CaptureConfig,
    device: Box<dyn InputDevice>,
    state: CaptureState,
    initialized: bool,
    device_acquired: bool,
    device_connected: bool,
    /// Stage built by initialize(), consumed by the first start()
    prepared: Option<NoiseGate>,
    flush_requested: Arc<AtomicBool>,
    flushed: Arc<Notify>,
    counters: Arc<CaptureCounters>,
    recorded: Arc<Mutex<Vec<f32>>>,
    frame_handler: Option<FrameHandler>,
    forwarder: Option<JoinHandle<()>>,
}

impl AudioCaptureGraph {
    pub fn new(config: CaptureConfig, device: Box<dyn InputDevice>) -> Self {
        Self {
            config,
            device,
            state: CaptureState::Idle,
            initialized: false,
            device_acquired: false,
            device_connected: false,
            prepared: None,
            flush_requested: Arc::new(AtomicBool::new(false)),
            flushed: Arc::new(Notify::new()),
            counters: Arc::new(CaptureCounters::default()),
            recorded: Arc::new(Mutex::new(Vec::new())),
            frame_handler: None,
            forwarder: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_capturing(&self) -> bool {
        self.state == CaptureState::Capturing
    }

    pub fn counters(&self) -> &Arc<CaptureCounters> {
        &self.counters
    }

    /// Register the per-frame handler. Takes effect on the next start().
    pub fn on_frame(&mut self, handler: impl Fn(&AudioFrame) + Send + Sync + 'static) {
        self.frame_handler = Some(Arc::new(handler));
    }

    pub fn constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            sample_rate: self.config.sample_rate,
            channels: 1,
            echo_cancellation: self.config.echo_cancellation,
            noise_suppression: self.config.noise_suppression,
        }
    }

    /// Acquire the device and build the processing stages.
    ///
    /// On failure everything acquired so far is released and the graph is
    /// back to `Idle`.
    pub async fn initialize(&mut self) -> Result<(), CaptureError> {
        if self.initialized {
            warn!("Capture graph already initialized");
            return Ok(());
        }
        if self.state != CaptureState::Idle {
            return Err(CaptureError::InvalidState(format!(
                "cannot initialize while {:?}",
                self.state
            )));
        }

        info!(
            "Initializing capture graph on {} ({}Hz, frame {} samples)",
            self.device.name(),
            self.config.sample_rate,
            self.config.frame_size
        );
        self.state = CaptureState::Initializing;

        let constraints = self.constraints();
        if let Err(e) = self.device.acquire(&constraints).await {
            error!("Failed to acquire {}: {}", self.device.name(), e);
            self.abort_initialization();
            return Err(match e {
                CaptureError::Permission(_) => e,
                other => CaptureError::Initialization(other.to_string()),
            });
        }
        self.device_acquired = true;

        match self.build_gate() {
            Ok(gate) => self.prepared = Some(gate),
            Err(e) => {
                error!("Failed to build capture stages: {}", e);
                self.abort_initialization();
                return Err(e);
            }
        }

        self.initialized = true;
        self.state = CaptureState::Idle;
        info!("Capture graph initialized");
        Ok(())
    }

    fn build_gate(&self) -> Result<NoiseGate, CaptureError> {
        let frame_size = self.config.frame_size;
        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&frame_size) {
            return Err(CaptureError::Initialization(format!(
                "frame size {} outside {}..={}",
                frame_size, MIN_BUFFER_SIZE, MAX_BUFFER_SIZE
            )));
        }
        NoiseGate::new(&self.config.noise_gate, self.config.sample_rate)
    }

    fn abort_initialization(&mut self) {
        if self.device_acquired {
            self.device.release();
            self.device_acquired = false;
        }
        self.prepared = None;
        self.state = CaptureState::Idle;
    }

    /// Connect the stages to the device and begin posting frames.
    ///
    /// Fails if the graph is not initialized or is already capturing.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if !self.initialized {
            return Err(CaptureError::InvalidState(
                "capture graph not initialized".to_string(),
            ));
        }
        match self.state {
            CaptureState::Idle => {}
            CaptureState::Capturing => return Err(CaptureError::AlreadyCapturing),
            other => {
                return Err(CaptureError::InvalidState(format!(
                    "cannot start while {:?}",
                    other
                )))
            }
        }

        let gate = match self.prepared.take() {
            Some(gate) => gate,
            None => self.build_gate()?,
        };

        self.recorded.lock().clear();
        self.flush_requested.store(false, Ordering::SeqCst);
        // A marker that arrived after the last stop() gave up must not
        // satisfy the next one
        self.flushed = Arc::new(Notify::new());

        let (tx, rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
        let accumulator = FrameAccumulator::new(
            self.config.frame_size,
            self.config.sample_rate,
            tx,
            Arc::clone(&self.counters),
        );
        let mut processor = CaptureProcessor::new(
            gate,
            accumulator,
            Arc::clone(&self.flush_requested),
            Arc::clone(&self.counters),
        );

        self.device
            .connect(Box::new(move |block: &[f32]| processor.process(block)))?;
        self.device_connected = true;

        self.forwarder = Some(tokio::spawn(forward_frames(
            rx,
            Arc::clone(&self.recorded),
            self.frame_handler.clone(),
            Arc::clone(&self.flushed),
        )));

        self.state = CaptureState::Capturing;
        info!("Capture started on {}", self.device.name());
        Ok(())
    }

    /// Flush the partial frame, disconnect the device and return everything
    /// recorded since start(). Stopping an idle graph returns nothing.
    pub async fn stop(&mut self) -> Result<Vec<f32>, CaptureError> {
        if self.state != CaptureState::Capturing {
            debug!("stop() while {:?}; nothing to do", self.state);
            return Ok(Vec::new());
        }

        info!("Stopping capture");
        self.state = CaptureState::Stopping;

        // Ask the render callback to post its partial frame, then wait briefly.
        let flushed = self.flushed.notified();
        self.flush_requested.store(true, Ordering::SeqCst);
        if tokio::time::timeout(self.config.stop_grace(), flushed)
            .await
            .is_err()
        {
            debug!("No flush marker within {:?}", self.config.stop_grace());
        }

        self.device.disconnect();
        self.device_connected = false;

        // The sender went away with the callback; drain what is in flight.
        if let Some(mut forwarder) = self.forwarder.take() {
            if tokio::time::timeout(self.config.stop_grace(), &mut forwarder)
                .await
                .is_err()
            {
                warn!("Frame forwarder did not drain in time");
                forwarder.abort();
            }
        }

        let samples = std::mem::take(&mut *self.recorded.lock());
        self.state = CaptureState::Idle;

        info!(
            "Capture stopped: {} samples ({:.2}s), {} frames dropped",
            samples.len(),
            samples.len() as f64 / self.config.sample_rate as f64,
            self.counters.frames_dropped.load(Ordering::Relaxed)
        );
        Ok(samples)
    }

    /// Disconnect every stage, release the device and forget the stages.
    /// Safe to call any number of times.
    pub fn cleanup(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if self.device_connected {
            self.device.disconnect();
            self.device_connected = false;
        }
        if self.device_acquired {
            info!("Releasing {}", self.device.name());
            self.device.release();
            self.device_acquired = false;
        }

        self.prepared = None;
        self.initialized = false;
        self.flush_requested.store(false, Ordering::SeqCst);
        self.state = CaptureState::Idle;
    }
}

impl Drop for AudioCaptureGraph {
    fn drop(&mut self) {
        self.cleanup();
    }
}

async fn forward_frames(
    mut rx: mpsc::Receiver<CaptureMessage>,
    recorded: Arc<Mutex<Vec<f32>>>,
    handler: Option<FrameHandler>,
    flushed: Arc<Notify>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            CaptureMessage::Frame(frame) => {
                recorded.lock().extend_from_slice(&frame.samples);
                if let Some(handler) = &handler {
                    handler(&frame);
                }
            }
            CaptureMessage::Flushed => flushed.notify_one(),
        }
    }
}
