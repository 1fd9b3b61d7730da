use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::backend::{InboundItem, InboundStream, StreamBackend};
use super::state::{ConnectionMachine, ConnectionState, RetryDecision};
use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::protocol::{ClientMessage, InboundPayload, ServerMessage};
use crate::session::{Session, SessionRegistry};

/// Everything the transport reports, in one tagged stream
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Validated message from the backend
    Message(ServerMessage),
    /// `{"error": ...}` pushed by the backend
    ServerError(String),
    /// `{"status": ...}` pushed by the backend
    ServerStatus(String),
    /// Local transport failure
    Error(TransportError),
    StatusChanged(ConnectionState),
}

struct Shared {
    machine: ConnectionMachine,
    session_id: Option<String>,
    task: Option<JoinHandle<()>>,
    /// Bumped on every connect/disconnect so a superseded connection task
    /// cannot touch state that no longer belongs to it
    generation: u64,
}

struct Inner {
    config: TransportConfig,
    backend: Arc<dyn StreamBackend>,
    registry: Arc<SessionRegistry>,
    events: mpsc::UnboundedSender<TransportEvent>,
    shared: Mutex<Shared>,
    dropped: AtomicU64,
}

/// Shared by every handle but never by the connection task, so it drops
/// with the last handle and takes the connection down with it.
struct HandleGuard(Arc<Inner>);

impl Drop for HandleGuard {
    fn drop(&mut self) {
        if self.0.teardown(None) {
            debug!("Last transport handle dropped; connection closed");
        }
    }
}

/// Persistent receive channel plus per-message send channel for one session.
///
/// Cloning yields another handle to the same transport. Dropping the last
/// handle disconnects like [`StreamingTransport::disconnect`].
#[derive(Clone)]
pub struct StreamingTransport {
    inner: Arc<Inner>,
    _guard: Arc<HandleGuard>,
}

impl StreamingTransport {
    /// Fails if the heartbeat interval is zero.
    pub fn new(
        config: TransportConfig,
        backend: Arc<dyn StreamBackend>,
        registry: Arc<SessionRegistry>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>), TransportError> {
        if config.heartbeat_interval_ms == 0 {
            return Err(TransportError::InvalidConfig(
                "heartbeat_interval_ms must be non-zero".to_string(),
            ));
        }

        let (events, rx) = mpsc::unbounded_channel();
        let machine = ConnectionMachine::new(
            config.max_reconnect_attempts,
            config.reconnect_interval(),
            config.heartbeat_interval(),
        );

        let inner = Inner {
            config,
            backend,
            registry,
            events,
            shared: Mutex::new(Shared {
                machine,
                session_id: None,
                task: None,
                generation: 0,
            }),
            dropped: AtomicU64::new(0),
        };

        let inner = Arc::new(inner);
        let guard = Arc::new(HandleGuard(Arc::clone(&inner)));
        Ok((
            Self {
                inner,
                _guard: guard,
            },
            rx,
        ))
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().machine.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.shared.lock().session_id.clone()
    }

    /// Reconnect attempts since the last successful open
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.shared.lock().machine.attempts()
    }

    /// Inbound payloads dropped as malformed or unsupported
    pub fn dropped_messages(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.inner.registry
    }

    /// Open the receive channel for `session_id`, or for a new session.
    ///
    /// Resolves after the first open attempt. A failed first attempt is
    /// reported as an error event and retried like any later failure. While
    /// a connection is already active this only logs a warning.
    pub async fn connect(&self, session_id: Option<&str>) -> Result<Session, TransportError> {
        let inner = &self.inner;
        let registry = &inner.registry;

        let (generation, session) = {
            let mut shared = inner.shared.lock();

            if shared.machine.is_exhausted() {
                return Err(TransportError::ReconnectExhausted {
                    attempts: shared.machine.attempts(),
                });
            }
            if shared.machine.is_active() {
                warn!(
                    "connect() ignored: transport already {}",
                    shared.machine.state()
                );
                return shared
                    .session_id
                    .as_deref()
                    .and_then(|id| registry.get_session(id))
                    .ok_or(TransportError::NotConnected);
            }

            let session = match session_id.and_then(|id| registry.get_session(id)) {
                Some(existing) => {
                    registry.set_active_session(&existing.id);
                    registry.get_session(&existing.id).unwrap_or(existing)
                }
                None => {
                    if let Some(id) = session_id {
                        warn!("Unknown session {}; creating a new one", id);
                    }
                    registry.create_session(None)
                }
            };

            shared.machine.begin_connect();
            inner.emit(TransportEvent::StatusChanged(ConnectionState::Connecting));
            shared.generation += 1;
            shared.session_id = Some(session.id.clone());
            (shared.generation, session)
        };

        info!(
            "Connecting session {} via {} backend",
            session.id,
            inner.backend.name()
        );

        let (ready_tx, ready_rx) = oneshot::channel();
        let handle = tokio::spawn(run_connection(
            Arc::clone(inner),
            generation,
            session.id.clone(),
            ready_tx,
        ));

        {
            let mut shared = inner.shared.lock();
            if shared.generation == generation {
                shared.task = Some(handle);
            } else {
                // disconnect() raced us
                handle.abort();
            }
        }

        let _ = ready_rx.await;
        Ok(registry.get_session(&session.id).unwrap_or(session))
    }

    /// Deliver one message on the send channel.
    ///
    /// Failures are reported as an error event and returned; they never
    /// trigger reconnection.
    pub async fn send(&self, message: &ClientMessage) -> Result<(), TransportError> {
        match self.inner.backend.send(message).await {
            Ok(()) => {
                self.inner.registry.touch(message.session_id());
                Ok(())
            }
            Err(e) => {
                warn!("Send failed for session {}: {}", message.session_id(), e);
                self.inner.emit(TransportEvent::Error(e.clone()));
                Err(e)
            }
        }
    }

    /// Stop the heartbeat, cancel any pending reconnect, close the receive
    /// channel and deactivate the session. Idempotent.
    pub fn disconnect(&self) {
        self.inner.teardown(None);
    }
}

impl Inner {
    fn emit(&self, event: TransportEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    /// Run `f` on the state machine if `generation` is still current,
    /// reporting any state change. `None` means the caller was superseded.
    fn transition<R>(
        &self,
        generation: u64,
        f: impl FnOnce(&mut ConnectionMachine) -> R,
    ) -> Option<R> {
        let mut shared = self.shared.lock();
        if shared.generation != generation {
            return None;
        }

        let before = shared.machine.state();
        let result = f(&mut shared.machine);
        let after = shared.machine.state();
        if before != after {
            self.emit(TransportEvent::StatusChanged(after));
        }
        Some(result)
    }

    /// `from_generation` is set when the connection task tears itself down;
    /// it must not abort its own handle.
    fn teardown(&self, from_generation: Option<u64>) -> bool {
        let (task, session_id) = {
            let mut shared = self.shared.lock();
            if let Some(generation) = from_generation {
                if shared.generation != generation {
                    return false;
                }
            }

            shared.generation += 1;
            let was = shared.machine.state();
            shared.machine.on_disconnect();
            if was != ConnectionState::Disconnected {
                self.emit(TransportEvent::StatusChanged(ConnectionState::Disconnected));
            }
            (shared.task.take(), shared.session_id.take())
        };

        if let Some(task) = task {
            if from_generation.is_none() {
                task.abort();
            }
        }

        match session_id {
            Some(id) => {
                self.registry.deactivate_session(&id);
                info!("Disconnected session {}", id);
                true
            }
            None => false,
        }
    }

    /// Read the receive channel until it closes or goes stale
    async fn pump(&self, generation: u64, session_id: &str, mut stream: InboundStream) -> TransportError {
        let period = self.config.heartbeat_interval();
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                item = stream.next() => match item {
                    Some(Ok(item)) => {
                        let now = Instant::now();
                        if self.transition(generation, |m| m.on_event(now)).is_none() {
                            return TransportError::Closed;
                        }
                        self.registry.touch(session_id);
                        if let InboundItem::Payload(payload) = item {
                            self.dispatch(&payload);
                        }
                    }
                    Some(Err(e)) => return e,
                    None => return TransportError::Closed,
                },
                _ = heartbeat.tick() => {
                    let now = Instant::now();
                    match self.transition(generation, |m| (m.on_tick(now), m.silence(now))) {
                        None => return TransportError::Closed,
                        Some((true, silence)) => {
                            let silent_ms = silence.map(|d| d.as_millis() as u64).unwrap_or_default();
                            warn!("No events for {}ms on session {}; treating channel as stale", silent_ms, session_id);
                            return TransportError::Stale { silent_ms };
                        }
                        Some((false, _)) => {}
                    }
                }
            }
        }
    }

    fn dispatch(&self, payload: &str) {
        let parsed = InboundPayload::parse(payload).and_then(|p| match p {
            InboundPayload::Message(wire) => ServerMessage::try_from(wire).map(TransportEvent::Message),
            InboundPayload::Error(m) => Ok(TransportEvent::ServerError(m.error)),
            InboundPayload::Status(m) => Ok(TransportEvent::ServerStatus(m.status)),
        });

        match parsed {
            Ok(event) => {
                if let TransportEvent::ServerError(message) = &event {
                    warn!("Backend reported error: {}", message);
                }
                self.emit(event);
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Dropping inbound payload: {}", e);
                debug!("Dropped payload: {}", payload);
            }
        }
    }
}

async fn run_connection(
    inner: Arc<Inner>,
    generation: u64,
    session_id: String,
    ready: oneshot::Sender<()>,
) {
    let mut ready = Some(ready);
    let language = inner.config.language.clone();

    loop {
        let failure = match inner.backend.open(&session_id, &language).await {
            Ok(stream) => {
                let now = Instant::now();
                if inner.transition(generation, |m| m.on_open(now)).is_none() {
                    return;
                }
                info!("Receive channel open for session {}", session_id);
                inner.registry.touch(&session_id);
                if let Some(tx) = ready.take() {
                    let _ = tx.send(());
                }
                inner.pump(generation, &session_id, stream).await
            }
            Err(e) => {
                warn!("Failed to open receive channel for {}: {}", session_id, e);
                e
            }
        };

        if let Some(tx) = ready.take() {
            let _ = tx.send(());
        }
        if inner.transition(generation, |m| m.on_close()).is_none() {
            return;
        }
        inner.emit(TransportEvent::Error(failure));

        match inner.transition(generation, |m| m.next_retry()) {
            None => return,
            Some(RetryDecision::Reconnect { attempt, delay }) => {
                info!(
                    "Reconnecting session {} in {:?} (attempt {}/{})",
                    session_id, delay, attempt, inner.config.max_reconnect_attempts
                );
                tokio::time::sleep(delay).await;
                if inner.transition(generation, |m| m.begin_reconnect()).is_none() {
                    return;
                }
            }
            Some(RetryDecision::GiveUp { attempts }) => {
                error!(
                    "Giving up on session {} after {} reconnect attempts",
                    session_id, attempts
                );
                inner.emit(TransportEvent::Error(TransportError::ReconnectExhausted {
                    attempts,
                }));
                inner.teardown(Some(generation));
                return;
            }
        }
    }
}
