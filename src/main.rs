//! # voice-session - Main Application Entry Point
//!
//! Two commands share one binary:
//! - **serve** (default): the voice session server
//! - **talk**: a terminal client that records, sends and saves replies
//!
//! ## Startup (serve):
//! 1. Load `.env`, set up tracing
//! 2. Load and validate configuration (defaults → config.toml → environment)
//! 3. Build the Transcriber / Responder / Synthesizer clients
//! 4. Bind and run the HTTP server until SIGINT/SIGTERM

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::TcpListener;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voice_session::client::talk::{run_talk, TalkOptions};
use voice_session::config::AppConfig;
use voice_session::providers::build_provider_set;
use voice_session::state::AppState;

#[derive(Debug, Parser)]
#[command(name = "voice-session", version, about = "Real-time voice sessions over WebSocket")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the session server
    Serve,
    /// Talk to an agent from the terminal
    Talk {
        /// Agent profile to connect to
        #[arg(long)]
        agent: Option<String>,
        /// Audio file to send instead of recording from the microphone
        #[arg(long)]
        input: Option<PathBuf>,
        /// Capture device to record from (microphone builds); the system default when unset
        #[arg(long)]
        device: Option<String>,
        /// Directory to save reply audio into
        #[arg(long)]
        output: Option<PathBuf>,
        /// Server WebSocket base, e.g. ws://127.0.0.1:8000/ws
        #[arg(long)]
        endpoint: Option<String>,
        /// Send the input once and exit when the reply is complete
        #[arg(long)]
        once: bool,
    },
}

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let cli = Cli::parse();
    let mut config = AppConfig::load()?;
    config.validate()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Talk {
            agent,
            input,
            device,
            output,
            endpoint,
            once,
        } => {
            if let Some(endpoint) = endpoint {
                config.client.endpoint = endpoint;
            }
            let options = TalkOptions {
                agent: agent.unwrap_or_else(|| config.client.agent.clone()),
                input,
                device,
                output,
                once,
            };
            run_talk(&config.client, options).await
        }
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    info!("Starting voice-session v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Providers: {} (stt={}, llm={}, tts={})",
        config.providers.base_url,
        config.providers.transcription_model,
        config.providers.response_model,
        config.providers.speech_model
    );

    let providers = build_provider_set(&config.providers, config.session.stage_timeout())
        .context("failed to build provider clients")?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener =
        TcpListener::bind(&bind_addr).with_context(|| format!("failed to bind {}", bind_addr))?;

    let state = AppState::new(config, providers);
    info!("Starting HTTP server on {}", bind_addr);

    let server = voice_session::app::run(listener, state, None)?;
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        signal = wait_for_shutdown() => {
            signal?;
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Tracing with `RUST_LOG` filtering; defaults to `voice_session=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_session=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("failed to initialise tracing")?;

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C");
    Ok(())
}
