//! Conversation pipeline
//!
//! Uplink: capture frames → sample ring → periodic flush → PCM16/base64 →
//! rate limiter ("audio" channel) → transport send. Text turns are chunked and
//! queued on the "text" channel, the last piece marked `is_final`.
//!
//! Downlink: transport events → aggregator (chunked text) or playback
//! scheduler (audio) → [`ConversationEvent`]s for the UI.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::audio::pcm::float32_to_pcm16;
use crate::audio::{
    AudioCaptureGraph, AudioFrame, AudioOutput, PlaybackScheduler, SampleRing, ScheduledBuffer,
};
use crate::config::CaptureConfig;
use crate::error::{ProtocolError, SendError, TransportError};
use crate::protocol::{chunk_message, Aggregator, ClientMessage, MessageType, ServerMessage};
use crate::rate_limit::RateLimiter;
use crate::session::ConversationStats;
use crate::transport::{ConnectionState, StreamingTransport, TransportEvent};

/// Rate limiter channel for captured audio
pub const AUDIO_CHANNEL: &str = "audio";
/// Rate limiter channel for text turns
pub const TEXT_CHANNEL: &str = "text";

/// What the UI sees of a conversation
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    /// A complete text message (reassembled if it arrived in chunks)
    Text {
        session_id: String,
        message_type: MessageType,
        text: String,
    },
    /// An audio fragment landed on the output clock
    AudioScheduled(ScheduledBuffer),
    TurnComplete,
    Interrupted,
    ServerError(String),
    ServerStatus(String),
    StatusChanged(ConnectionState),
    Error(TransportError),
}

/// Send side of a conversation. Cheap to clone.
#[derive(Clone)]
pub struct Conversation {
    transport: StreamingTransport,
    limiter: Arc<RateLimiter>,
    stats: Arc<ConversationStats>,
    text_chunk_size: usize,
}

impl Conversation {
    pub fn new(
        transport: StreamingTransport,
        limiter: Arc<RateLimiter>,
        stats: Arc<ConversationStats>,
        text_chunk_size: usize,
    ) -> Self {
        Self {
            transport,
            limiter,
            stats,
            text_chunk_size,
        }
    }

    pub fn transport(&self) -> &StreamingTransport {
        &self.transport
    }

    pub fn stats(&self) -> &Arc<ConversationStats> {
        &self.stats
    }

    fn session_id(&self) -> Result<String, TransportError> {
        self.transport.session_id().ok_or(TransportError::NotConnected)
    }

    /// Send a user text turn, split into `text_chunk_size` pieces.
    ///
    /// All pieces are queued before the first one is sent, so they keep
    /// their order on the text channel. Stops at the first failed piece.
    /// Returns the number of pieces sent.
    pub async fn send_text(&self, text: &str) -> Result<usize, SendError> {
        let session_id = self.session_id()?;
        let chunks = chunk_message(text, self.text_chunk_size)?;
        let count = chunks.count();
        if count == 0 {
            return Err(ProtocolError::EmptyData.into());
        }

        let mut queued = Vec::with_capacity(count);
        for (index, piece) in chunks.iter().enumerate() {
            let message =
                ClientMessage::text(session_id.as_str(), piece)?.with_final(index + 1 == count);
            let transport = self.transport.clone();
            queued.push(self.limiter.send(TEXT_CHANNEL, message, move |m| async move {
                transport.send(&m).await
            }));
        }

        debug!("Sending text turn in {} chunk(s)", count);
        for send in queued {
            if let Err(e) = send.await {
                ConversationStats::incr(&self.stats.send_failures);
                return Err(e.into());
            }
            ConversationStats::incr(&self.stats.text_chunks_sent);
        }
        Ok(count)
    }

    /// Encode `samples` as one audio message and reserve its slot on the
    /// audio channel. The returned future performs the send.
    pub fn queue_audio(
        &self,
        samples: &[f32],
    ) -> Result<impl Future<Output = Result<(), SendError>> + Send + 'static, SendError> {
        let session_id = self.session_id()?;
        let message = ClientMessage::audio(session_id, &float32_to_pcm16(samples))?;

        let transport = self.transport.clone();
        let send = self.limiter.send(AUDIO_CHANNEL, message, move |m| async move {
            transport.send(&m).await
        });

        let stats = Arc::clone(&self.stats);
        Ok(async move {
            match send.await {
                Ok(()) => {
                    ConversationStats::incr(&stats.audio_chunks_sent);
                    Ok(())
                }
                Err(e) => {
                    ConversationStats::incr(&stats.send_failures);
                    Err(e.into())
                }
            }
        })
    }

    pub async fn send_audio(&self, samples: &[f32]) -> Result<(), SendError> {
        self.queue_audio(samples)?.await
    }

    /// Route `graph`'s frames upstream, flushing every `flush_interval`.
    ///
    /// Replaces the graph's frame handler, so call before `start()`.
    pub fn attach_uplink(
        &self,
        graph: &mut AudioCaptureGraph,
        flush_interval: Duration,
        capacity: usize,
    ) -> AudioUplink {
        let ring = Arc::new(Mutex::new(SampleRing::with_capacity(capacity)));

        let frame_ring = Arc::clone(&ring);
        let stats = Arc::clone(&self.stats);
        graph.on_frame(move |frame: &AudioFrame| {
            ConversationStats::incr(&stats.frames_captured);
            let lost = frame_ring.lock().push_slice(&frame.samples);
            if lost > 0 {
                stats
                    .samples_dropped
                    .fetch_add(lost as u64, Ordering::Relaxed);
            }
        });

        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_uplink(
            self.clone(),
            Arc::clone(&ring),
            flush_interval,
            shutdown_rx,
        ));

        info!(
            "Audio uplink attached (flush every {:?}, ring {} samples)",
            flush_interval, capacity
        );
        AudioUplink {
            ring,
            shutdown: Some(shutdown),
            task: Some(task),
        }
    }

    /// Drain the ring into one queued send, if anything is buffered
    fn flush_ring(
        &self,
        ring: &Mutex<SampleRing>,
    ) -> Option<impl Future<Output = Result<(), SendError>> + Send + 'static> {
        let samples = {
            let mut ring = ring.lock();
            if ring.is_empty() {
                return None;
            }
            ring.drain()
        };

        match self.queue_audio(&samples) {
            Ok(send) => Some(send),
            Err(e) => {
                warn!("Dropping {} buffered samples: {}", samples.len(), e);
                self.stats
                    .samples_dropped
                    .fetch_add(samples.len() as u64, Ordering::Relaxed);
                None
            }
        }
    }
}

async fn run_uplink(
    conversation: Conversation,
    ring: Arc<Mutex<SampleRing>>,
    period: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(send) = conversation.flush_ring(&ring) {
                    // Slot already reserved; completion order follows it
                    tokio::spawn(async move {
                        let _ = send.await;
                    });
                }
            }
            _ = &mut shutdown => {
                if let Some(send) = conversation.flush_ring(&ring) {
                    let _ = send.await;
                }
                debug!("Audio uplink stopped");
                return;
            }
        }
    }
}

/// Running uplink; dropping it stops flushing without a final send
pub struct AudioUplink {
    ring: Arc<Mutex<SampleRing>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl AudioUplink {
    /// Ring size for `config`: a few flush periods or frames, whichever is larger
    pub fn capacity_for(config: &CaptureConfig) -> usize {
        let per_flush = (config.sample_rate as u64 * config.flush_interval_ms / 1000) as usize;
        per_flush.max(config.frame_size) * 4
    }

    /// Samples waiting for the next flush
    pub fn buffered(&self) -> usize {
        self.ring.lock().len()
    }

    /// Send whatever is still buffered and stop the ticker
    pub async fn finish(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for AudioUplink {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Receive side of a conversation: reassembles text, schedules audio
pub struct InboundHandler<O: AudioOutput> {
    aggregator: Aggregator,
    playback: PlaybackScheduler<O>,
    stats: Arc<ConversationStats>,
}

impl<O: AudioOutput> InboundHandler<O> {
    pub fn new(playback: PlaybackScheduler<O>, stats: Arc<ConversationStats>) -> Self {
        Self {
            aggregator: Aggregator::new(),
            playback,
            stats,
        }
    }

    pub fn playback(&self) -> &PlaybackScheduler<O> {
        &self.playback
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn into_playback(self) -> PlaybackScheduler<O> {
        self.playback
    }

    pub fn handle(&mut self, event: TransportEvent) -> Vec<ConversationEvent> {
        match event {
            TransportEvent::Message(message) => self.handle_message(message),
            TransportEvent::ServerError(error) => vec![ConversationEvent::ServerError(error)],
            TransportEvent::ServerStatus(status) => vec![ConversationEvent::ServerStatus(status)],
            TransportEvent::StatusChanged(state) => vec![ConversationEvent::StatusChanged(state)],
            TransportEvent::Error(error) => vec![ConversationEvent::Error(error)],
        }
    }

    fn handle_message(&mut self, message: ServerMessage) -> Vec<ConversationEvent> {
        let mut events = Vec::new();

        if message.is_audio() {
            if !message.data.is_empty() {
                match self.playback.play_base64(&message.data) {
                    Ok(scheduled) => {
                        ConversationStats::incr(&self.stats.audio_fragments_played);
                        events.push(ConversationEvent::AudioScheduled(scheduled));
                    }
                    Err(e) => {
                        ConversationStats::incr(&self.stats.protocol_errors);
                        warn!("Dropping audio fragment: {}", e);
                    }
                }
            }
        } else if let Some(text) = self.assemble_text(&message) {
            ConversationStats::incr(&self.stats.text_messages_received);
            events.push(ConversationEvent::Text {
                session_id: message.session_id.clone(),
                message_type: message.message_type,
                text,
            });
        }

        if message.is_interrupted() {
            let discarded = self.aggregator.discard_session(&message.session_id);
            if discarded > 0 {
                debug!(
                    "Discarded {} partial text streams for interrupted session {}",
                    discarded, message.session_id
                );
            }
            self.playback.interrupt();
            events.push(ConversationEvent::Interrupted);
        } else if message.is_turn_complete() {
            self.playback.reset();
            events.push(ConversationEvent::TurnComplete);
        }

        events
    }

    /// Chunked text goes through the aggregator; anything without an
    /// `is_final` marker is already whole.
    fn assemble_text(&mut self, message: &ServerMessage) -> Option<String> {
        if message.is_final.is_some() {
            return self.aggregator.add_chunk(message);
        }
        if message.data.is_empty() {
            return None;
        }
        Some(message.data.clone())
    }
}

/// Feed transport events through `handler` until either side goes away.
/// Returns the handler so its output can be finalized.
pub async fn run_inbound<O: AudioOutput>(
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    mut handler: InboundHandler<O>,
    out: mpsc::UnboundedSender<ConversationEvent>,
) -> InboundHandler<O> {
    while let Some(event) = events.recv().await {
        for event in handler.handle(event) {
            if out.send(event).is_err() {
                debug!("Conversation listener gone; stopping inbound loop");
                return handler;
            }
        }
    }
    handler
}
