// Integration tests for the streaming transport
//
// The connection machine is tested directly with an injected clock; the
// transport runs against a scripted backend on paused tokio time, and the
// SSE/HTTP backend against an axum mock server.

mod common;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use common::{events_until, next_event, payload, transport_config, MockBackend};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use voice_stream::transport::{
    ConnectionMachine, ConnectionState, InboundItem, RetryDecision, SseBackend, SseDecoder,
    StreamBackend,
};
use voice_stream::config::TransportConfig;
use voice_stream::{ClientMessage, SessionRegistry, StreamingTransport, TransportError, TransportEvent};

fn text_payload(session_id: &str, data: &str) -> Value {
    json!({
        "mime_type": "text/plain",
        "data": data,
        "session_id": session_id,
        "message_type": "response",
    })
}

fn is_exhausted(event: &TransportEvent) -> bool {
    matches!(
        event,
        TransportEvent::Error(TransportError::ReconnectExhausted { .. })
    )
}

#[test]
fn test_machine_happy_path() {
    let mut machine = ConnectionMachine::new(3, Duration::from_secs(3), Duration::from_secs(15));
    assert_eq!(machine.state(), ConnectionState::Disconnected);

    assert!(machine.begin_connect());
    assert_eq!(machine.state(), ConnectionState::Connecting);
    assert!(!machine.begin_connect(), "second connect while active");

    machine.on_open(Instant::now());
    assert_eq!(machine.state(), ConnectionState::Connected);

    machine.on_disconnect();
    assert_eq!(machine.state(), ConnectionState::Disconnected);
    assert!(machine.begin_connect());
}

#[test]
fn test_machine_retry_cap() {
    let mut machine = ConnectionMachine::new(2, Duration::from_millis(500), Duration::from_secs(15));
    machine.begin_connect();

    machine.on_close();
    assert_eq!(machine.state(), ConnectionState::Error);
    assert_eq!(
        machine.next_retry(),
        RetryDecision::Reconnect {
            attempt: 1,
            delay: Duration::from_millis(500)
        }
    );
    assert_eq!(machine.state(), ConnectionState::Reconnecting);
    machine.begin_reconnect();
    assert_eq!(machine.state(), ConnectionState::Connecting);

    machine.on_close();
    assert!(matches!(machine.next_retry(), RetryDecision::Reconnect { attempt: 2, .. }));
    machine.begin_reconnect();

    machine.on_close();
    assert_eq!(machine.next_retry(), RetryDecision::GiveUp { attempts: 2 });
    assert_eq!(machine.state(), ConnectionState::Disconnected);
    assert!(machine.is_exhausted());
    assert!(!machine.begin_connect());
}

#[test]
fn test_machine_open_resets_attempts() {
    let mut machine = ConnectionMachine::new(2, Duration::from_millis(10), Duration::from_secs(15));
    machine.begin_connect();
    machine.on_close();
    machine.next_retry();
    machine.begin_reconnect();
    assert_eq!(machine.attempts(), 1);

    machine.on_open(Instant::now());
    assert_eq!(machine.attempts(), 0);
}

#[test]
fn test_machine_heartbeat_staleness() {
    let heartbeat = Duration::from_secs(15);
    let mut machine = ConnectionMachine::new(3, Duration::from_secs(3), heartbeat);
    let opened = Instant::now();
    machine.begin_connect();
    machine.on_open(opened);

    assert!(!machine.on_tick(opened + heartbeat));
    assert!(!machine.on_tick(opened + heartbeat * 2));

    // Activity pushes the deadline out
    machine.on_event(opened + Duration::from_secs(20));
    assert!(!machine.on_tick(opened + Duration::from_secs(45)));

    assert!(machine.on_tick(opened + Duration::from_secs(51)));
    assert_eq!(machine.state(), ConnectionState::Error);
}

#[test]
fn test_sse_decoder_events_and_keepalives() {
    let mut decoder = SseDecoder::new();

    let items = decoder.feed(b": keep-alive\n\ndata: {\"status\":\"ready\"}\n\n");
    assert_eq!(
        items,
        vec![
            InboundItem::KeepAlive,
            InboundItem::Payload("{\"status\":\"ready\"}".to_string()),
        ]
    );
}

#[test]
fn test_sse_decoder_handles_split_chunks() {
    let mut decoder = SseDecoder::new();

    assert!(decoder.feed(b"data: {\"a\":").is_empty());
    assert!(decoder.feed(&"\"h\u{e9}".as_bytes()[..3]).is_empty());
    assert!(decoder.feed(&"\"h\u{e9}".as_bytes()[3..]).is_empty());
    let items = decoder.feed(b"\"}\r\n\r\n");

    assert_eq!(items, vec![InboundItem::Payload("{\"a\":\"h\u{e9}\"}".to_string())]);
}

#[test]
fn test_sse_decoder_multiline_and_named_events() {
    let mut decoder = SseDecoder::new();

    let items = decoder.feed(b"event: ping\ndata: ignored\n\ndata: line1\ndata: line2\n\n");
    assert_eq!(items, vec![InboundItem::Payload("line1\nline2".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn test_connect_opens_and_delivers_messages() -> Result<()> {
    let backend = MockBackend::new();
    let feed = backend.accept_next();
    let registry = Arc::new(SessionRegistry::new());
    let (transport, mut events) =
        StreamingTransport::new(transport_config(3), backend.clone(), Arc::clone(&registry))?;

    let session = transport.connect(None).await?;
    assert!(session.is_active);
    assert_eq!(transport.session_id(), Some(session.id.clone()));
    assert_eq!(registry.active_session().map(|s| s.id), Some(session.id.clone()));

    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::StatusChanged(ConnectionState::Connecting)
    );
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::StatusChanged(ConnectionState::Connected)
    );
    assert!(transport.is_connected());

    feed.send(payload(text_payload(&session.id, "Hello")))?;
    let TransportEvent::Message(message) = next_event(&mut events).await else {
        panic!("expected a message event");
    };
    assert_eq!(message.data, "Hello");
    assert_eq!(message.session_id, session.id);

    feed.send(payload(json!({"error": "model overloaded"})))?;
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::ServerError("model overloaded".to_string())
    );

    feed.send(payload(json!({"status": "thinking"})))?;
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::ServerStatus("thinking".to_string())
    );

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_invalid_payloads_are_dropped() -> Result<()> {
    let backend = MockBackend::new();
    let feed = backend.accept_next();
    let (transport, mut events) =
        StreamingTransport::new(transport_config(3), backend.clone(), Arc::new(SessionRegistry::new()))?;
    let session = transport.connect(None).await?;
    events_until(&mut events, |e| *e == TransportEvent::StatusChanged(ConnectionState::Connected)).await;

    feed.send(Ok(InboundItem::Payload("{not json".to_string())))?;
    feed.send(payload(json!({
        "mime_type": "video/mp4",
        "data": "x",
        "session_id": session.id,
        "message_type": "response",
    })))?;
    feed.send(payload(text_payload(&session.id, "")))?;
    feed.send(payload(text_payload(&session.id, "still here")))?;

    let TransportEvent::Message(message) = next_event(&mut events).await else {
        panic!("expected the valid message right after the dropped ones");
    };
    assert_eq!(message.data, "still here");
    assert_eq!(transport.dropped_messages(), 3);
    assert!(transport.is_connected());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_exhaustion_is_terminal() -> Result<()> {
    // Every open fails
    let backend = MockBackend::new();
    let registry = Arc::new(SessionRegistry::new());
    let (transport, mut events) =
        StreamingTransport::new(transport_config(3), backend.clone(), Arc::clone(&registry))?;

    let session = transport.connect(None).await?;
    let seen = events_until(&mut events, is_exhausted).await;

    // Initial attempt plus three reconnects
    assert_eq!(backend.opens(), 4);
    assert_eq!(transport.state(), ConnectionState::Disconnected);
    assert_eq!(
        seen.last(),
        Some(&TransportEvent::Error(TransportError::ReconnectExhausted { attempts: 3 }))
    );
    let reconnecting = seen
        .iter()
        .filter(|e| **e == TransportEvent::StatusChanged(ConnectionState::Reconnecting))
        .count();
    assert_eq!(reconnecting, 3);

    // No further attempts, no second exhaustion event
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(backend.opens(), 4);
    while let Ok(event) = events.try_recv() {
        assert!(!is_exhausted(&event), "exhaustion reported twice");
    }

    // The instance refuses to start over
    assert_eq!(
        transport.connect(None).await.unwrap_err(),
        TransportError::ReconnectExhausted { attempts: 3 }
    );
    assert_eq!(backend.opens(), 4);
    assert!(!registry.get_session(&session.id).unwrap().is_active);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_channel_closes() -> Result<()> {
    let backend = MockBackend::new();
    let first = backend.accept_next();
    let _second = backend.accept_next();
    let (transport, mut events) =
        StreamingTransport::new(transport_config(3), backend.clone(), Arc::new(SessionRegistry::new()))?;

    let session = transport.connect(None).await?;
    events_until(&mut events, |e| *e == TransportEvent::StatusChanged(ConnectionState::Connected)).await;

    drop(first);
    let seen = events_until(&mut events, |e| {
        *e == TransportEvent::StatusChanged(ConnectionState::Connected)
    })
    .await;

    assert!(seen.contains(&TransportEvent::Error(TransportError::Closed)));
    assert!(seen.contains(&TransportEvent::StatusChanged(ConnectionState::Reconnecting)));
    assert_eq!(backend.opens(), 2);
    assert_eq!(transport.reconnect_attempts(), 0);
    // Same session across reconnects
    assert_eq!(transport.session_id(), Some(session.id));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stale_channel_triggers_reconnect() -> Result<()> {
    let backend = MockBackend::new();
    let _silent = backend.accept_next();
    let _next = backend.accept_next();
    let (transport, mut events) =
        StreamingTransport::new(transport_config(3), backend.clone(), Arc::new(SessionRegistry::new()))?;

    transport.connect(None).await?;
    events_until(&mut events, |e| *e == TransportEvent::StatusChanged(ConnectionState::Connected)).await;

    let started = Instant::now();
    let seen = events_until(&mut events, |e| matches!(e, TransportEvent::Error(_))).await;
    let Some(TransportEvent::Error(TransportError::Stale { silent_ms })) = seen.last() else {
        panic!("expected a stale error, got {:?}", seen.last());
    };
    // Heartbeat is 1s; stale means more than two intervals of silence
    assert!(*silent_ms > 2000);
    assert!(started.elapsed() > Duration::from_secs(2));

    events_until(&mut events, |e| *e == TransportEvent::StatusChanged(ConnectionState::Connected)).await;
    assert_eq!(backend.opens(), 2);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_keepalives_prevent_staleness() -> Result<()> {
    let backend = MockBackend::new();
    let feed = backend.accept_next();
    let (transport, mut events) =
        StreamingTransport::new(transport_config(3), backend.clone(), Arc::new(SessionRegistry::new()))?;

    transport.connect(None).await?;
    events_until(&mut events, |e| *e == TransportEvent::StatusChanged(ConnectionState::Connected)).await;

    let pinger = tokio::spawn(async move {
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let _ = feed.send(Ok(InboundItem::KeepAlive));
        }
        feed
    });
    let _feed = pinger.await?;

    assert!(transport.is_connected());
    assert!(events.try_recv().is_err(), "no events while keep-alives flow");
    assert_eq!(backend.opens(), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_send_failure_does_not_reconnect() -> Result<()> {
    let backend = MockBackend::new();
    let _feed = backend.accept_next();
    let (transport, mut events) =
        StreamingTransport::new(transport_config(3), backend.clone(), Arc::new(SessionRegistry::new()))?;

    let session = transport.connect(None).await?;
    events_until(&mut events, |e| *e == TransportEvent::StatusChanged(ConnectionState::Connected)).await;

    let message = ClientMessage::text(session.id.as_str(), "hello")?;
    transport.send(&message).await?;
    assert_eq!(backend.sent(), vec![message.clone()]);

    backend
        .fail_sends
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let err = transport.send(&message).await.unwrap_err();
    assert!(matches!(err, TransportError::Status { status: 500, .. }));
    assert_eq!(next_event(&mut events).await, TransportEvent::Error(err));

    assert!(transport.is_connected());
    assert_eq!(backend.opens(), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_connect_while_active_is_ignored() -> Result<()> {
    let backend = MockBackend::new();
    let _feed = backend.accept_next();
    let (transport, _events) =
        StreamingTransport::new(transport_config(3), backend.clone(), Arc::new(SessionRegistry::new()))?;

    let first = transport.connect(None).await?;
    let second = transport.connect(None).await?;

    assert_eq!(first.id, second.id);
    assert_eq!(backend.opens(), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_is_idempotent_and_cancels_retries() -> Result<()> {
    // Nothing scripted: the first open fails and a reconnect gets scheduled
    let backend = MockBackend::new();
    let registry = Arc::new(SessionRegistry::new());
    let (transport, mut events) =
        StreamingTransport::new(transport_config(3), backend.clone(), Arc::clone(&registry))?;

    let session = transport.connect(None).await?;
    events_until(&mut events, |e| {
        *e == TransportEvent::StatusChanged(ConnectionState::Reconnecting)
    })
    .await;

    transport.disconnect();
    transport.disconnect();

    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::StatusChanged(ConnectionState::Disconnected)
    );
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(events.try_recv().is_err());
    assert_eq!(backend.opens(), 1, "pending reconnect was cancelled");
    assert_eq!(transport.state(), ConnectionState::Disconnected);
    assert_eq!(transport.session_id(), None);
    assert!(!registry.get_session(&session.id).unwrap().is_active);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_closes_channel_and_allows_resume() -> Result<()> {
    let backend = MockBackend::new();
    let first = backend.accept_next();
    let registry = Arc::new(SessionRegistry::new());
    let (transport, mut events) =
        StreamingTransport::new(transport_config(3), backend.clone(), Arc::clone(&registry))?;

    let session = transport.connect(None).await?;
    events_until(&mut events, |e| *e == TransportEvent::StatusChanged(ConnectionState::Connected)).await;

    transport.disconnect();
    tokio::time::timeout(Duration::from_secs(1), first.closed()).await?;

    // Resume the same session
    let _second = backend.accept_next();
    let resumed = transport.connect(Some(&session.id)).await?;
    assert_eq!(resumed.id, session.id);
    assert!(resumed.is_active);
    assert_eq!(registry.len(), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_connect_with_unknown_session_creates_one() -> Result<()> {
    let backend = MockBackend::new();
    let _feed = backend.accept_next();
    let registry = Arc::new(SessionRegistry::new());
    let (transport, _events) =
        StreamingTransport::new(transport_config(3), backend.clone(), Arc::clone(&registry))?;

    let session = transport.connect(Some("session-from-elsewhere")).await?;
    assert_ne!(session.id, "session-from-elsewhere");
    assert!(registry.get_session("session-from-elsewhere").is_none());
    assert_eq!(registry.len(), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_dropping_last_handle_closes_connection() -> Result<()> {
    let backend = MockBackend::new();
    let feed = backend.accept_next();
    let registry = Arc::new(SessionRegistry::new());
    let (transport, mut events) =
        StreamingTransport::new(transport_config(3), backend.clone(), Arc::clone(&registry))?;

    let session = transport.connect(None).await?;
    events_until(&mut events, |e| *e == TransportEvent::StatusChanged(ConnectionState::Connected)).await;

    // Another handle going away leaves the connection alone
    let other = transport.clone();
    drop(other);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!feed.is_closed());
    assert_eq!(transport.state(), ConnectionState::Connected);

    drop(transport);
    drop(events);
    tokio::time::timeout(Duration::from_secs(1), feed.closed()).await?;
    assert!(!registry.get_session(&session.id).unwrap().is_active);

    // No reconnect loop keeps running in the background
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(backend.opens(), 1);

    Ok(())
}

#[test]
fn test_zero_heartbeat_interval_is_rejected() {
    let config = TransportConfig {
        heartbeat_interval_ms: 0,
        ..transport_config(3)
    };
    let result = StreamingTransport::new(config, MockBackend::new(), Arc::new(SessionRegistry::new()));
    assert!(matches!(result, Err(TransportError::InvalidConfig(_))));
}

#[derive(Clone, Default)]
struct MockServer {
    received: Arc<Mutex<Vec<(String, Value)>>>,
}

async fn events_handler(
    Path((language, session_id)): Path<(String, String)>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let events = vec![
        Ok(Event::default().comment("keep-alive")),
        Ok(Event::default().data(json!({"status": format!("ready:{}", language)}).to_string())),
        Ok(Event::default().data(text_payload(&session_id, "hello over sse").to_string())),
    ];
    Sse::new(futures::stream::iter(events).chain(futures::stream::pending()))
}

async fn send_handler(
    State(server): State<MockServer>,
    Path(session_id): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    if session_id == "busy" {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    server.received.lock().push((session_id, body));
    StatusCode::OK
}

/// 500 whose body has a two-byte character straddling the kept prefix
async fn failing_handler() -> (StatusCode, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("{}é and more", "a".repeat(255)),
    )
}

async fn spawn_mock_server() -> Result<(String, MockServer)> {
    let server = MockServer::default();
    let app = Router::new()
        .route("/events/:language/:session_id", get(events_handler))
        .route("/send/:session_id", post(send_handler))
        .route("/failing/events/:language/:session_id", get(failing_handler))
        .route("/failing/send/:session_id", post(failing_handler))
        .with_state(server.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Ok((format!("http://{}", addr), server))
}

#[tokio::test]
async fn test_sse_backend_urls() -> Result<()> {
    let backend = SseBackend::new("http://localhost:8000/", Duration::from_secs(5))?;
    assert_eq!(backend.base_url(), "http://localhost:8000");
    assert_eq!(
        backend.events_url("session-1", "en"),
        "http://localhost:8000/events/en/session-1"
    );
    assert_eq!(backend.send_url("session-1"), "http://localhost:8000/send/session-1");
    Ok(())
}

#[tokio::test]
async fn test_sse_backend_receives_events() -> Result<()> {
    let (base_url, _server) = spawn_mock_server().await?;
    let backend = SseBackend::new(&base_url, Duration::from_secs(5))?;

    let mut stream = backend.open("session-1", "en").await?;

    let mut items = Vec::new();
    while items.len() < 3 {
        let item = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await?
            .expect("stream ended early")?;
        items.push(item);
    }

    assert_eq!(items[0], InboundItem::KeepAlive);
    assert_eq!(
        items[1],
        InboundItem::Payload(json!({"status": "ready:en"}).to_string())
    );
    let InboundItem::Payload(message) = &items[2] else {
        panic!("expected a payload");
    };
    assert!(message.contains("hello over sse"));

    Ok(())
}

#[tokio::test]
async fn test_sse_backend_send() -> Result<()> {
    let (base_url, server) = spawn_mock_server().await?;
    let backend = SseBackend::new(&base_url, Duration::from_secs(5))?;

    let message = ClientMessage::text("session-1", "hi there")?;
    backend.send(&message).await?;

    let received = server.received.lock().clone();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, "session-1");
    assert_eq!(received[0].1["data"], "hi there");
    assert_eq!(received[0].1["mime_type"], "text/plain");

    let busy = ClientMessage::text("busy", "hi")?;
    let err = backend.send(&busy).await.unwrap_err();
    assert!(matches!(err, TransportError::Status { status: 503, .. }));

    Ok(())
}

#[tokio::test]
async fn test_sse_backend_error_body_cut_on_char_boundary() -> Result<()> {
    let (base_url, _server) = spawn_mock_server().await?;
    let backend = SseBackend::new(&format!("{}/failing", base_url), Duration::from_secs(5))?;

    let open = backend.open("session-1", "en").await;
    let Err(TransportError::Status { status, body }) = open else {
        panic!("expected a status error");
    };
    assert_eq!(status, 500);
    assert_eq!(body, "a".repeat(255));

    let message = ClientMessage::text("session-1", "hi")?;
    let Err(TransportError::Status { status, body }) = backend.send(&message).await else {
        panic!("expected a status error");
    };
    assert_eq!(status, 500);
    assert_eq!(body, "a".repeat(255));

    Ok(())
}

#[tokio::test]
async fn test_transport_recovers_from_non_ascii_error_bodies() -> Result<()> {
    let (base_url, _server) = spawn_mock_server().await?;
    let backend = Arc::new(SseBackend::new(
        &format!("{}/failing", base_url),
        Duration::from_secs(5),
    )?);

    let (transport, mut events) =
        StreamingTransport::new(transport_config(1), backend, Arc::new(SessionRegistry::new()))?;
    let session = transport.connect(None).await?;

    let send = transport
        .send(&ClientMessage::text(session.id.as_str(), "hi")?)
        .await;
    assert!(matches!(send, Err(TransportError::Status { status: 500, .. })));

    // Both open attempts fail cleanly and the transport gives up
    let seen = events_until(&mut events, is_exhausted).await;
    let open_failures = seen
        .iter()
        .filter(|e| matches!(e, TransportEvent::Error(TransportError::Status { status: 500, .. })))
        .count();
    assert!(open_failures >= 2);
    assert_eq!(transport.state(), ConnectionState::Disconnected);

    Ok(())
}

#[tokio::test]
async fn test_sse_backend_open_refused() -> Result<()> {
    // Nothing listens on port 9 locally
    let backend = SseBackend::new("http://127.0.0.1:9", Duration::from_secs(2))?;
    let result = backend.open("session-1", "en").await;
    assert!(matches!(result, Err(TransportError::Network(_))));
    Ok(())
}

#[tokio::test]
async fn test_transport_over_sse_end_to_end() -> Result<()> {
    let (base_url, server) = spawn_mock_server().await?;
    let backend = Arc::new(SseBackend::new(&base_url, Duration::from_secs(5))?);

    let mut config = transport_config(3);
    config.base_url = base_url;
    let (transport, mut events) =
        StreamingTransport::new(config, backend, Arc::new(SessionRegistry::new()))?;

    let session = transport.connect(None).await?;
    let seen = events_until(&mut events, |e| matches!(e, TransportEvent::Message(_))).await;

    assert!(seen.contains(&TransportEvent::StatusChanged(ConnectionState::Connected)));
    assert!(seen.contains(&TransportEvent::ServerStatus("ready:en".to_string())));
    let Some(TransportEvent::Message(message)) = seen.last() else {
        panic!("expected a message");
    };
    assert_eq!(message.data, "hello over sse");
    assert_eq!(message.session_id, session.id);

    transport
        .send(&ClientMessage::text(session.id.as_str(), "reply")?)
        .await?;
    assert_eq!(server.received.lock().len(), 1);

    transport.disconnect();
    assert_eq!(transport.state(), ConnectionState::Disconnected);

    Ok(())
}
