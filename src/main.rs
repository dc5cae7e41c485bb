use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use voice_live::config::DEFAULT_CONFIG_PATH;
use voice_live::{
    api_key_from_env, create_router, event_channels, AppState, AudioSource, Config,
    EventReceivers, SessionState, SessionView, SystemAudioDevices, Visualizer, VoiceSession,
    WebSocketConnector,
};

/// Talk to a live voice model from the terminal
#[derive(Parser)]
#[command(name = "voice-live", version)]
struct Cli {
    /// Config file (extension optional)
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Replay a WAV file instead of using the microphone
    #[arg(long)]
    input_file: Option<PathBuf>,

    /// Discard model speech instead of playing it
    #[arg(long)]
    mute: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control API instead of the console
    Serve,
}

/// Visualizer redraw interval
const FRAME_INTERVAL: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() -> Result<()> {
    // stdout belongs to the transcript and visualizer
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Voice Live v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    let api_key = api_key_from_env();
    if api_key.is_none() {
        warn!("No API key found in API_KEY or GEMINI_API_KEY");
    }

    let source = match cli.input_file {
        Some(path) => AudioSource::File(path),
        None => AudioSource::Microphone,
    };
    let session_config = cfg.session_config();
    let connector = WebSocketConnector::new(
        session_config.endpoint.clone(),
        session_config.handshake_timeout,
    );

    let (events, receivers) = event_channels();
    let session = VoiceSession::new(
        session_config,
        api_key,
        Arc::new(SystemAudioDevices::new(source, cli.mute)),
        Arc::new(connector),
        events,
    );

    match cli.command {
        Some(Command::Serve) => serve(&cfg, session, receivers).await,
        None => run_console(session, receivers).await,
    }
}

async fn serve(cfg: &Config, session: VoiceSession, receivers: EventReceivers) -> Result<()> {
    let EventReceivers {
        state,
        transcript,
        level,
    } = receivers;

    let app_state = AppState::new(session.clone(), level);
    app_state.spawn_event_pump(state, transcript);

    let addr = format!("{}:{}", cfg.http.bind, cfg.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, create_router(app_state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("HTTP server failed")?;

    session.disconnect().await;
    Ok(())
}

async fn run_console(session: VoiceSession, receivers: EventReceivers) -> Result<()> {
    let EventReceivers {
        mut state,
        mut transcript,
        level,
    } = receivers;

    info!("Connecting; press Ctrl-C to hang up");
    let mut connecting = {
        let session = session.clone();
        tokio::spawn(async move { session.connect().await })
    };
    let mut connect_done = false;

    let mut view = SessionView::new();
    let mut visualizer = Visualizer::default();
    let mut printed = 0;
    let mut was_active = false;

    let started = Instant::now();
    let mut last_frame = started;
    let mut frames = tokio::time::interval(FRAME_INTERVAL);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!();
                info!("Hanging up");
                break;
            }
            result = &mut connecting, if !connect_done => {
                connect_done = true;
                match result {
                    Ok(Ok(())) => info!("Connected; start talking"),
                    Ok(Err(e)) => {
                        while let Ok(next) = state.try_recv() {
                            view.apply_state(next);
                        }
                        println!();
                        if let Some(banner) = &view.error {
                            println!("{}", banner);
                        }
                        warn!("Could not connect: {}", e);
                        break;
                    }
                    Err(e) => {
                        warn!("Connect task failed: {}", e);
                        break;
                    }
                }
            }
            Some(next) = state.recv() => {
                view.apply_state(next);
                visualizer.set_active(next == SessionState::Connected);

                match next {
                    SessionState::Connecting | SessionState::Connected => was_active = true,
                    SessionState::Error => {
                        if let Some(banner) = &view.error {
                            println!("\r{}", banner);
                        }
                    }
                    SessionState::Disconnected if was_active => break,
                    SessionState::Disconnected => {}
                }
            }
            Some(fragment) = transcript.recv() => {
                view.apply_transcript(fragment);

                // A message is done once final or once another follows it
                let messages = view.transcript.messages();
                while printed < messages.len() {
                    let message = &messages[printed];
                    if message.is_partial && printed + 1 == messages.len() {
                        break;
                    }
                    println!("\r{:?}: {}", message.role, message.text.trim());
                    printed += 1;
                }
            }
            _ = frames.tick() => {
                let now = Instant::now();
                visualizer.push_level(*level.borrow());
                visualizer.tick(now.duration_since(last_frame).as_secs_f64());
                last_frame = now;

                print!("\r{} {:<12}", visualizer.render(now.duration_since(started).as_secs_f64()), view.state);
                let _ = std::io::stdout().flush();
            }
        }
    }

    let stats = session.get_stats().await;
    session.disconnect().await;
    if !connect_done {
        // Returns promptly once the disconnect is observed
        let _ = connecting.await;
    }

    info!(
        "Session ended ({} frames sent, {} dropped)",
        stats.frames_sent, stats.frames_dropped
    );

    Ok(())
}
