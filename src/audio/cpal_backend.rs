// Live microphone and speaker backends using cpal
//
// cpal streams are not Send on every platform, so each stream lives on a
// dedicated thread that builds it, plays it, and drops it when told to stop.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info, warn};

use super::backend::{convert, CaptureConstraints, InputDevice, RenderCallback};
use super::output::OutputTimeline;
use super::playback::{AudioOutput, PlaybackBuffer};
use crate::error::CaptureError;

/// Keeps every Nth sample across callback boundaries
struct Decimator {
    ratio: u64,
    phase: u64,
}

impl Decimator {
    fn push(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for &sample in input {
            if self.phase % self.ratio == 0 {
                out.push(sample);
            }
            self.phase = self.phase.wrapping_add(1);
        }
    }
}

fn classify(err: impl std::fmt::Display) -> CaptureError {
    let message = err.to_string();
    let lowered = message.to_lowercase();
    if lowered.contains("permission") || lowered.contains("denied") {
        CaptureError::Permission(message)
    } else {
        CaptureError::Device(message)
    }
}

/// Default system microphone
pub struct CpalInputDevice {
    name: String,
    target_rate: u32,
    acquired: bool,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalInputDevice {
    pub fn new() -> Self {
        Self {
            name: "cpal microphone".to_string(),
            target_rate: 16000,
            acquired: false,
            stop_tx: None,
            thread: None,
        }
    }
}

impl Default for CpalInputDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InputDevice for CpalInputDevice {
    async fn acquire(&mut self, constraints: &CaptureConstraints) -> Result<(), CaptureError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| CaptureError::Device("No input device available".to_string()))?;
        let supported = device.default_input_config().map_err(classify)?;
        let native_rate = supported.sample_rate().0;

        if native_rate % constraints.sample_rate != 0 {
            return Err(CaptureError::Device(format!(
                "Input runs at {}Hz, not a multiple of {}Hz",
                native_rate, constraints.sample_rate
            )));
        }

        self.name = device.name().unwrap_or_else(|_| "cpal microphone".to_string());
        self.target_rate = constraints.sample_rate;
        self.acquired = true;

        // Echo cancellation / noise suppression are left to the OS input chain.
        info!(
            "Microphone acquired: {} ({}Hz, {} channels, {:?})",
            self.name,
            native_rate,
            supported.channels(),
            supported.sample_format()
        );
        Ok(())
    }

    fn connect(&mut self, mut render: RenderCallback) -> Result<(), CaptureError> {
        if !self.acquired {
            return Err(CaptureError::InvalidState("microphone not acquired".to_string()));
        }
        if self.thread.is_some() {
            return Err(CaptureError::InvalidState("microphone already connected".to_string()));
        }

        let target_rate = self.target_rate;
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), CaptureError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("cpal-input".to_string())
            .spawn(move || {
                let built = (|| -> Result<cpal::Stream, CaptureError> {
                    let host = cpal::default_host();
                    let device = host
                        .default_input_device()
                        .ok_or_else(|| CaptureError::Device("Input device disappeared".to_string()))?;
                    let supported = device.default_input_config().map_err(classify)?;
                    let channels = supported.channels();
                    let format = supported.sample_format();
                    let config: cpal::StreamConfig = supported.into();
                    let mut decimator = Decimator {
                        ratio: (config.sample_rate.0 / target_rate) as u64,
                        phase: 0,
                    };
                    let mut block = Vec::with_capacity(8192);
                    let err_fn = |e: cpal::StreamError| error!("Input stream error: {}", e);

                    let stream = match format {
                        cpal::SampleFormat::F32 => device.build_input_stream(
                            &config,
                            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                                block.clear();
                                decimator.push(&convert::downmix(data, channels), &mut block);
                                render(&block);
                            },
                            err_fn,
                            None,
                        ),
                        cpal::SampleFormat::I16 => device.build_input_stream(
                            &config,
                            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                                let floats: Vec<f32> =
                                    data.iter().map(|&s| s as f32 / 32768.0).collect();
                                block.clear();
                                decimator.push(&convert::downmix(&floats, channels), &mut block);
                                render(&block);
                            },
                            err_fn,
                            None,
                        ),
                        other => {
                            return Err(CaptureError::Device(format!(
                                "Unsupported input sample format {:?}",
                                other
                            )))
                        }
                    }
                    .map_err(classify)?;

                    stream.play().map_err(classify)?;
                    Ok(stream)
                })();

                match built {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        // Park until disconnect; dropping the stream stops the callback.
                        let _ = stop_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| CaptureError::Device(format!("Failed to spawn input thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.stop_tx = Some(stop_tx);
                self.thread = Some(thread);
                info!("Microphone stream running");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(CaptureError::Device("Input thread exited early".to_string()))
            }
        }
    }

    fn disconnect(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Input thread panicked");
            }
        }
    }

    fn release(&mut self) {
        self.disconnect();
        self.acquired = false;
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Default system speaker
pub struct CpalOutput {
    source_rate: u32,
    device_rate: u32,
    frames_played: Arc<AtomicU64>,
    /// Scheduled buffers in source-rate frames
    timeline: Arc<Mutex<OutputTimeline>>,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalOutput {
    /// Open the default output device for `source_rate` audio
    pub fn open(source_rate: u32) -> anyhow::Result<Self> {
        let frames_played = Arc::new(AtomicU64::new(0));
        let timeline = Arc::new(Mutex::new(OutputTimeline::new()));
        let (ready_tx, ready_rx) = std_mpsc::channel::<anyhow::Result<u32>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let played = Arc::clone(&frames_played);
        let shared = Arc::clone(&timeline);

        let thread = std::thread::Builder::new()
            .name("cpal-output".to_string())
            .spawn(move || {
                let built = (|| -> anyhow::Result<(cpal::Stream, u32)> {
                    let host = cpal::default_host();
                    let device = host
                        .default_output_device()
                        .ok_or_else(|| anyhow::anyhow!("No output device available"))?;
                    let supported = device.default_output_config()?;
                    if supported.sample_format() != cpal::SampleFormat::F32 {
                        anyhow::bail!(
                            "Unsupported output sample format {:?}",
                            supported.sample_format()
                        );
                    }
                    let config: cpal::StreamConfig = supported.into();
                    let channels = config.channels as usize;
                    let device_rate = config.sample_rate.0;

                    let stream = device.build_output_stream(
                        &config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            let frames = data.len() / channels;
                            let base = played.load(Ordering::Acquire);
                            match shared.try_lock() {
                                Some(mut timeline) => {
                                    render_output(
                                        &mut timeline,
                                        data,
                                        channels,
                                        base,
                                        source_rate,
                                        device_rate,
                                    );
                                }
                                None => data.iter_mut().for_each(|s| *s = 0.0),
                            }
                            played.store(base + frames as u64, Ordering::Release);
                        },
                        |e| error!("Output stream error: {}", e),
                        None,
                    )?;
                    stream.play()?;
                    Ok((stream, device_rate))
                })();

                match built {
                    Ok((stream, device_rate)) => {
                        let _ = ready_tx.send(Ok(device_rate));
                        let _ = stop_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })?;

        let device_rate = match ready_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                anyhow::bail!("Output thread exited early");
            }
        };

        info!("Speaker output running at {}Hz", device_rate);

        Ok(Self {
            source_rate,
            device_rate,
            frames_played,
            timeline,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

fn render_output(
    timeline: &mut OutputTimeline,
    data: &mut [f32],
    channels: usize,
    base: u64,
    source_rate: u32,
    device_rate: u32,
) {
    let to_source = |device_frame: u64| device_frame * source_rate as u64 / device_rate as u64;

    timeline.prune(to_source(base));
    for (i, frame) in data.chunks_mut(channels).enumerate() {
        let value = timeline.mix(to_source(base + i as u64));
        frame.iter_mut().for_each(|out| *out = value);
    }
}

impl AudioOutput for CpalOutput {
    fn current_time(&self) -> f64 {
        self.frames_played.load(Ordering::Acquire) as f64 / self.device_rate as f64
    }

    fn schedule(&mut self, buffer: PlaybackBuffer, start_time: f64) -> anyhow::Result<()> {
        let start = (start_time * self.source_rate as f64).round() as u64;
        self.timeline.lock().insert(start, buffer.samples);
        Ok(())
    }

    fn clear(&mut self) {
        self.timeline.lock().clear();
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
