use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voice_stream::audio::{AudioOutput, InputDevice};
use voice_stream::pipeline::{AudioUplink, ConversationEvent};
use voice_stream::transport::{backend_from_config, StreamBackend};
use voice_stream::{
    AudioCaptureGraph, Config, Conversation, ConversationStats, InboundHandler,
    PlaybackScheduler, RateLimiter, SessionRegistry, StreamingTransport, TransportEvent,
    WavFileDevice, WavFileOutput,
};

#[derive(Parser)]
#[command(name = "voice-stream", version, about = "Real-time voice and text conversation client")]
struct Cli {
    /// Config file (without extension)
    #[arg(long, default_value = "config/voice-stream")]
    config: String,

    /// Resume an existing session id instead of creating one
    #[arg(long)]
    session: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream audio to the backend and play its replies
    Talk {
        /// WAV file to stream instead of the microphone
        #[arg(long)]
        input: Option<PathBuf>,

        /// Write replies to this WAV file instead of the speaker
        #[arg(long)]
        output: Option<PathBuf>,

        /// Stop capturing after this many seconds
        #[arg(long, default_value_t = 15)]
        duration: u64,

        /// How long to wait for the reply after capture stops
        #[arg(long, default_value_t = 30)]
        reply_timeout: u64,
    },
    /// Send a text turn and print the reply
    Say {
        text: String,

        #[arg(long)]
        output: Option<PathBuf>,

        #[arg(long, default_value_t = 30)]
        reply_timeout: u64,
    },
    /// Print inbound events until interrupted
    Listen {
        /// Stop after this many seconds (0 = until Ctrl-C)
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },
}

struct App {
    config: Config,
    registry: Arc<SessionRegistry>,
    stats: Arc<ConversationStats>,
    conversation: Conversation,
    events: UnboundedReceiver<TransportEvent>,
}

impl App {
    async fn build(config: Config) -> Result<Self> {
        let backend = backend_from_config(&config.transport)
            .await
            .context("Failed to create transport backend")?;
        info!("Using {} backend", backend.name());

        let registry = Arc::new(SessionRegistry::new());
        let (transport, events) =
            StreamingTransport::new(config.transport.clone(), backend, Arc::clone(&registry))?;

        let stats = Arc::new(ConversationStats::new());
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.min_interval()));
        let conversation = Conversation::new(
            transport,
            limiter,
            Arc::clone(&stats),
            config.protocol.text_chunk_size,
        );

        Ok(Self {
            config,
            registry,
            stats,
            conversation,
            events,
        })
    }

    fn transport(&self) -> &StreamingTransport {
        self.conversation.transport()
    }

    fn inbound(&self, output: Box<dyn AudioOutput>) -> InboundHandler<Box<dyn AudioOutput>> {
        InboundHandler::new(
            PlaybackScheduler::new(output, self.config.playback.sample_rate),
            Arc::clone(&self.stats),
        )
    }

    /// Handle events until `done` matches one, the timeout passes or Ctrl-C
    async fn pump(
        &mut self,
        handler: &mut InboundHandler<Box<dyn AudioOutput>>,
        timeout: Option<Duration>,
        done: impl Fn(&ConversationEvent) -> bool,
    ) -> Result<()> {
        let deadline = async {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    info!("Timed out waiting for events");
                    return Ok(());
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    return Ok(());
                }
                event = self.events.recv() => {
                    let Some(event) = event else {
                        return Ok(());
                    };
                    for event in handler.handle(event) {
                        report(&event);
                        if let ConversationEvent::Error(e) = &event {
                            if e.is_terminal() {
                                bail!("Transport gave up: {}", e);
                            }
                        }
                        if done(&event) {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn finish(&self) {
        self.transport().disconnect();
        let removed = self
            .registry
            .cleanup_sessions(self.config.session.max_inactive());
        if removed > 0 {
            info!("Removed {} expired sessions", removed);
        }

        match serde_json::to_string_pretty(&self.stats.snapshot()) {
            Ok(json) => info!("Conversation stats:\n{}", json),
            Err(e) => warn!("Failed to serialize stats: {}", e),
        }
    }
}

fn report(event: &ConversationEvent) {
    match event {
        ConversationEvent::Text {
            message_type, text, ..
        } => println!("[{}] {}", message_type, text),
        ConversationEvent::AudioScheduled(buffer) => {
            info!(
                "Playing {:.2}s of audio at {:.2}s",
                buffer.duration, buffer.start
            )
        }
        ConversationEvent::TurnComplete => info!("Turn complete"),
        ConversationEvent::Interrupted => info!("Response interrupted"),
        ConversationEvent::ServerError(error) => warn!("Backend error: {}", error),
        ConversationEvent::ServerStatus(status) => info!("Backend status: {}", status),
        ConversationEvent::StatusChanged(state) => info!("Connection {}", state),
        ConversationEvent::Error(error) => warn!("Transport error: {}", error),
    }
}

fn is_turn_end(event: &ConversationEvent) -> bool {
    matches!(
        event,
        ConversationEvent::TurnComplete | ConversationEvent::Interrupted
    )
}

fn open_output(path: Option<&Path>, sample_rate: u32) -> Result<Box<dyn AudioOutput>> {
    match path {
        Some(path) => Ok(Box::new(WavFileOutput::create(path, sample_rate)?)),
        None => default_output(sample_rate),
    }
}

#[cfg(feature = "backend-cpal")]
fn default_output(sample_rate: u32) -> Result<Box<dyn AudioOutput>> {
    Ok(Box::new(voice_stream::audio::CpalOutput::open(sample_rate)?))
}

#[cfg(not(feature = "backend-cpal"))]
fn default_output(sample_rate: u32) -> Result<Box<dyn AudioOutput>> {
    Ok(Box::new(WavFileOutput::create("reply.wav", sample_rate)?))
}

fn open_input(path: Option<&Path>) -> Result<Box<dyn InputDevice>> {
    match path {
        Some(path) => Ok(Box::new(WavFileDevice::new(path, true))),
        None => default_input(),
    }
}

#[cfg(feature = "backend-cpal")]
fn default_input() -> Result<Box<dyn InputDevice>> {
    Ok(Box::new(voice_stream::audio::CpalInputDevice::new()))
}

#[cfg(not(feature = "backend-cpal"))]
fn default_input() -> Result<Box<dyn InputDevice>> {
    bail!("No --input given and microphone support not built (enable feature backend-cpal)")
}

async fn talk(
    app: &mut App,
    session: Option<&str>,
    input: Option<&Path>,
    output: Option<&Path>,
    duration: Duration,
    reply_timeout: Duration,
) -> Result<()> {
    let device = open_input(input)?;
    let mut handler = app.inbound(open_output(output, app.config.playback.sample_rate)?);

    let session = app.transport().connect(session).await?;
    info!("Session {}", session.id);

    let mut graph = AudioCaptureGraph::new(app.config.capture.clone(), device);
    graph.initialize().await?;
    let uplink = app.conversation.attach_uplink(
        &mut graph,
        app.config.capture.flush_interval(),
        AudioUplink::capacity_for(&app.config.capture),
    );
    graph.start()?;
    info!("Capturing for {:?}", duration);

    let captured = app.pump(&mut handler, Some(duration), |_| false).await;

    let recorded = graph.stop().await?;
    uplink.finish().await;
    graph.cleanup();
    info!(
        "Captured {:.1}s of audio",
        recorded.len() as f64 / app.config.capture.sample_rate as f64
    );
    captured?;

    app.pump(&mut handler, Some(reply_timeout), is_turn_end).await
}

async fn say(
    app: &mut App,
    session: Option<&str>,
    text: &str,
    output: Option<&Path>,
    reply_timeout: Duration,
) -> Result<()> {
    let mut handler = app.inbound(open_output(output, app.config.playback.sample_rate)?);

    let session = app.transport().connect(session).await?;
    info!("Session {}", session.id);

    let chunks = app.conversation.send_text(text).await?;
    info!("Sent text in {} chunk(s)", chunks);

    app.pump(&mut handler, Some(reply_timeout), is_turn_end).await
}

async fn listen(app: &mut App, session: Option<&str>, duration: Option<Duration>) -> Result<()> {
    let mut handler = app.inbound(open_output(None, app.config.playback.sample_rate)?);

    let session = app.transport().connect(session).await?;
    info!("Listening on session {}", session.id);

    app.pump(&mut handler, duration, |_| false).await
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    info!("voice-stream v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Backend {} (language {})",
        config.transport.base_url, config.transport.language
    );

    let mut app = App::build(config).await?;
    let session = cli.session.as_deref();

    let result = match &cli.command {
        Command::Talk {
            input,
            output,
            duration,
            reply_timeout,
        } => {
            talk(
                &mut app,
                session,
                input.as_deref(),
                output.as_deref(),
                Duration::from_secs(*duration),
                Duration::from_secs(*reply_timeout),
            )
            .await
        }
        Command::Say {
            text,
            output,
            reply_timeout,
        } => {
            say(
                &mut app,
                session,
                text,
                output.as_deref(),
                Duration::from_secs(*reply_timeout),
            )
            .await
        }
        Command::Listen { duration } => {
            let duration = (*duration > 0).then(|| Duration::from_secs(*duration));
            listen(&mut app, session, duration).await
        }
    };

    app.finish();
    result
}
