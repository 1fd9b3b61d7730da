// Shared test doubles: a scripted stream backend and a scripted input device
#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use voice_stream::audio::{CaptureConstraints, InputDevice, RenderCallback};
use voice_stream::config::TransportConfig;
use voice_stream::transport::{InboundItem, InboundStream, StreamBackend, TransportEvent};
use voice_stream::{CaptureError, ClientMessage, TransportError};

pub type Feed = mpsc::UnboundedSender<Result<InboundItem, TransportError>>;

/// Backend whose receive channels are opened from a script.
///
/// Each `accept_next` queues one successful open and returns the sender that
/// feeds its stream; dropping the sender closes the channel. Opens beyond the
/// script fail.
#[derive(Default)]
pub struct MockBackend {
    script: Mutex<VecDeque<mpsc::UnboundedReceiver<Result<InboundItem, TransportError>>>>,
    open_calls: AtomicUsize,
    sent: Mutex<Vec<ClientMessage>>,
    pub fail_sends: AtomicBool,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn accept_next(&self) -> Feed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.script.lock().push_back(rx);
        tx
    }

    pub fn opens(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl StreamBackend for MockBackend {
    async fn open(&self, _session_id: &str, _language: &str) -> Result<InboundStream, TransportError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().pop_front();
        match next {
            Some(rx) => Ok(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed()),
            None => Err(TransportError::Network("connection refused".to_string())),
        }
    }

    async fn send(&self, message: &ClientMessage) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Status {
                status: 500,
                body: "backend down".to_string(),
            });
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

pub fn transport_config(max_reconnect_attempts: u32) -> TransportConfig {
    TransportConfig {
        heartbeat_interval_ms: 1000,
        reconnect_interval_ms: 100,
        max_reconnect_attempts,
        ..Default::default()
    }
}

pub fn payload(json: serde_json::Value) -> Result<InboundItem, TransportError> {
    Ok(InboundItem::Payload(json.to_string()))
}

pub async fn next_event<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Collect events up to and including the first one matching `stop`
pub async fn events_until(
    rx: &mut mpsc::UnboundedReceiver<TransportEvent>,
    stop: impl Fn(&TransportEvent) -> bool,
) -> Vec<TransportEvent> {
    let mut events = Vec::new();
    loop {
        let event = next_event(rx).await;
        let done = stop(&event);
        events.push(event);
        if done {
            return events;
        }
    }
}

/// How a scripted device answers `acquire`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Grant,
    Deny,
    Fail,
}

/// Lifecycle calls observed on a scripted device
#[derive(Debug, Default)]
pub struct DeviceLog {
    pub acquires: AtomicUsize,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub releases: AtomicUsize,
}

/// Input device driven by the test: blocks pushed through `BlockFeed` are
/// delivered to the render callback on a dedicated thread, like a real
/// device clock. An empty block is delivered between pushes so flush
/// requests are honored even when the test sends nothing.
pub struct ScriptedDevice {
    outcome: AcquireOutcome,
    log: Arc<DeviceLog>,
    blocks: Arc<Mutex<VecDeque<Vec<f32>>>>,
    running: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

#[derive(Clone)]
pub struct BlockFeed(Arc<Mutex<VecDeque<Vec<f32>>>>);

impl BlockFeed {
    pub fn push(&self, block: Vec<f32>) {
        self.0.lock().push_back(block);
    }

    pub fn is_drained(&self) -> bool {
        self.0.lock().is_empty()
    }
}

impl ScriptedDevice {
    pub fn new(outcome: AcquireOutcome) -> (Self, Arc<DeviceLog>, BlockFeed) {
        let log = Arc::new(DeviceLog::default());
        let blocks = Arc::new(Mutex::new(VecDeque::new()));
        let device = Self {
            outcome,
            log: Arc::clone(&log),
            blocks: Arc::clone(&blocks),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        };
        (device, log, BlockFeed(blocks))
    }
}

#[async_trait]
impl InputDevice for ScriptedDevice {
    async fn acquire(&mut self, _constraints: &CaptureConstraints) -> Result<(), CaptureError> {
        self.log.acquires.fetch_add(1, Ordering::SeqCst);
        match self.outcome {
            AcquireOutcome::Grant => Ok(()),
            AcquireOutcome::Deny => Err(CaptureError::Permission("denied by user".to_string())),
            AcquireOutcome::Fail => Err(CaptureError::Device("no input device".to_string())),
        }
    }

    fn connect(&mut self, mut render: RenderCallback) -> Result<(), CaptureError> {
        self.log.connects.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let blocks = Arc::clone(&self.blocks);
        self.thread = Some(std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                let block = blocks.lock().pop_front();
                match block {
                    Some(block) => render(&block),
                    None => {
                        render(&[]);
                        std::thread::sleep(Duration::from_millis(1));
                    }
                }
            }
        }));
        Ok(())
    }

    fn disconnect(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            self.log.disconnects.fetch_add(1, Ordering::SeqCst);
            let _ = thread.join();
        }
    }

    fn release(&mut self) {
        self.disconnect();
        self.log.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
