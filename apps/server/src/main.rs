//! Standalone server binary for the wearable HUD audio-fusion demo.
//!
//! Loads configuration, bootstraps the direction/STT/alarm background
//! loops, and serves the `/events`, `/stt`, and `/esp32/audio` WebSocket
//! routes until a shutdown signal arrives.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use hud_core::api::AppState;
use hud_core::{bootstrap_services, start_server};
use tokio::signal;

/// Headless server for the wearable HUD audio-fusion demo.
#[derive(Parser, Debug)]
#[command(name = "hud-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "HUD_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind host (overrides config file / env).
    #[arg(long, env = "HUD_BIND_HOST")]
    bind_host: Option<String>,

    /// Bind port (overrides config file / env).
    #[arg(short = 'p', long, env = "HUD_BIND_PORT")]
    bind_port: Option<u16>,

    /// Sample rate assumed for all mic ingress and the radar FFT (Hz).
    #[arg(long, default_value_t = hud_core::protocol_constants::DEFAULT_SAMPLE_RATE_HZ, env = "HUD_SAMPLE_RATE_HZ")]
    sample_rate_hz: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("HUD Server v{}", env!("CARGO_PKG_VERSION"));

    let mut core_config = config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(host) = args.bind_host {
        core_config.bind_host = host;
    }
    if let Some(port) = args.bind_port {
        core_config.bind_port = port;
    }

    log::info!(
        "Configuration: bind={}:{}, stt_audio_source={:?}",
        core_config.bind_host,
        core_config.bind_port,
        core_config.stt_audio_source
    );

    let services = bootstrap_services(core_config, args.sample_rate_hz);
    log::info!("Services bootstrapped successfully");

    let (bind_host, bind_port) = {
        let cfg = services.config.read();
        (cfg.bind_host.clone(), cfg.bind_port)
    };

    let app_state = AppState {
        audio: services.audio.clone(),
        config: services.config.clone(),
        hub: services.hub.clone(),
        events_ws: services.events_ws.clone(),
        stt_ws: services.stt_ws.clone(),
        esp32_ws: services.esp32_ws.clone(),
        haptics_left: services.haptics_left.clone(),
        haptics_right: services.haptics_right.clone(),
        sample_rate_hz: services.sample_rate_hz,
        shutdown: services.cancel_token.clone(),
    };

    let server_bind_host = bind_host.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state, &server_bind_host, bind_port).await {
            log::error!("Server error: {}", e);
        }
    });

    log::info!("HTTP server started on {}:{}", bind_host, bind_port);

    shutdown_signal().await;
    log::info!("Shutdown signal received, cleaning up...");

    services.shutdown().await;
    server_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
