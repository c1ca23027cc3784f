//! # Whisper ASR Webservice - Main Entry Point
//!
//! Wires the pieces together and runs the HTTP server:
//!
//! - **config**: layered configuration (defaults, config.toml, environment)
//! - **device**: compute device selection for inference
//! - **transcription**: model lifecycle, inference, correction, formatting
//! - **audio**: upload decoding into 16 kHz mono waveforms
//! - **handlers / health**: the HTTP surface
//! - **state / middleware**: shared state, request logging and metrics
//!
//! Shutdown is cooperative: SIGTERM/SIGINT stop the HTTP server gracefully
//! and a watch channel tells the idle evictor to exit.

mod audio;
mod config;
mod device;
mod error;
mod handlers;
mod health;
mod middleware;
mod state;
mod transcription;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::{IdleEvictor, ModelLifecycleManager, TranscriptionCoordinator};

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = Arc::new(AppConfig::load()?);
    config.validate()?;

    info!("Starting whisper-asr-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Model: {} (device preference: {})",
        config.model.name, config.model.device
    );

    let compute_device = device::select_device(&config.model.device);
    let lifecycle = Arc::new(ModelLifecycleManager::new(
        config.model.clone(),
        compute_device,
    ));
    let coordinator = Arc::new(TranscriptionCoordinator::new(
        lifecycle.clone(),
        config.subtitle.clone(),
        config.correction.clone(),
    ));
    let app_state = AppState::new(config.clone(), coordinator, lifecycle.clone());

    // The evictor stops when this channel flips to true at shutdown.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let evictor_handle =
        IdleEvictor::from_config(lifecycle, &config.idle).map(|evictor| evictor.spawn(shutdown_rx));

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::RequestLogging)
            .route("/asr", web::post().to(handlers::asr::asr))
            .route(
                "/detect-language",
                web::post().to(handlers::asr::detect_language),
            )
            .route("/languages", web::get().to(handlers::asr::languages))
            .route("/status", web::get().to(health::status))
            .route("/health", web::get().to(health::health))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => error!("Server task error: {}", e),
            }
        }
        _ = wait_for_signal() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    // Stop the evictor and wait for it so eviction never races teardown.
    let _ = shutdown_tx.send(true);
    if let Some(handle) = evictor_handle {
        let _ = handle.await;
    }

    info!("Server stopped gracefully");
    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "whisper_asr_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Resolve when SIGTERM or SIGINT arrives.
async fn wait_for_signal() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("Failed to install SIGTERM handler");
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .expect("Failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
}
