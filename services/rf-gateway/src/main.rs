//! RF Observer gateway - REST control and WebSocket streaming over the capture core

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use rf_capture::{ControlService, DeviceManager, EventBridge, RadioDriver, SimulatedDriver};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod routes;
mod settings;
mod ws_handler;

use settings::Settings;

/// Shared application state
pub struct AppState {
    pub service: ControlService,
    pub bridge: Arc<EventBridge>,
    /// Default decimation for REST spectrum reads
    pub max_fft_points: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rf_gateway=info".parse()?)
                .add_directive("rf_capture=info".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("===========================================");
    info!("   RF Observer - SDR Acquisition Gateway");
    info!("===========================================");

    let settings = Settings::load("rf-observer")?;

    info!("Configuration:");
    info!("  HTTP/WS address: {}", settings.bind_addr());
    info!("  Simulated radio: {}", settings.simulate);
    info!("  Probe tool: {}", settings.probe_tool);
    info!("  Block size: {} samples", settings.acquisition.block_size);
    info!("  Data dir: {}", settings.acquisition.data_dir.display());
    info!(
        "  Stream rate: {}..{} ms, {} points max",
        settings.bridge.base_delay_ms, settings.bridge.max_delay_ms, settings.bridge.max_fft_points
    );

    let driver = build_driver(&settings);
    let registry = Arc::new(DeviceManager::new(driver, settings.acquisition.clone()));
    let service = ControlService::new(registry.clone(), settings.timeouts.clone());

    match service.rescan().await {
        Ok(devices) if devices.is_empty() => warn!("No SDR devices found; waiting for rescan"),
        Ok(devices) => info!("Found {} device(s): {:?}", devices.len(), devices),
        Err(e) => error!("Initial discovery failed: {}", e),
    }

    let bridge = Arc::new(EventBridge::new(settings.bridge.clone()));
    let tasks = bridge.spawn(registry.clone());

    let app_state = Arc::new(AppState {
        service: service.clone(),
        bridge: bridge.clone(),
        max_fft_points: settings.bridge.max_fft_points,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        // WebSocket endpoint
        .route("/ws", get(ws_handler::ws_handler))
        // Device control
        .route("/api/devices", get(routes::list_devices))
        .route("/api/devices/all", get(routes::all_devices))
        .route("/api/devices/rescan", post(routes::rescan))
        .route("/api/devices/:index", get(routes::device_info))
        .route("/api/devices/:index/start", post(routes::start_scan))
        .route("/api/devices/:index/stop", post(routes::stop_scan))
        .route("/api/devices/:index/tune", post(routes::tune))
        // Results
        .route("/api/devices/:index/fft", get(routes::latest_fft))
        .route("/api/devices/:index/waterfall", get(routes::waterfall))
        .route("/api/devices/:index/bursts", get(routes::device_bursts))
        .route("/api/bursts", get(routes::all_bursts))
        .route("/health", get(routes::health_check))
        .layer(cors)
        .with_state(app_state);

    let addr = settings.bind_addr();
    info!("Starting HTTP/WebSocket server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
        error!("HTTP server error: {}", e);
    }

    info!("Shutting down");
    tasks.abort();
    bridge.shutdown();
    if let Err(e) = service.shutdown().await {
        error!("Device shutdown incomplete: {}", e);
    }

    Ok(())
}

#[cfg(feature = "rtlsdr")]
fn build_driver(settings: &Settings) -> Arc<dyn RadioDriver> {
    if settings.simulate {
        return simulated_driver(settings);
    }
    info!("Using RTL-SDR hardware driver");
    Arc::new(rf_capture::sdr::rtlsdr::RtlSdrDriver::new(settings.probe_tool.clone()))
}

#[cfg(not(feature = "rtlsdr"))]
fn build_driver(settings: &Settings) -> Arc<dyn RadioDriver> {
    if !settings.simulate {
        warn!("Built without the rtlsdr feature; falling back to the simulated radio");
    }
    simulated_driver(settings)
}

fn simulated_driver(settings: &Settings) -> Arc<dyn RadioDriver> {
    info!("Using simulated radio with {} device(s)", settings.simulated_devices);
    Arc::new(SimulatedDriver::new(settings.simulated_devices, settings.scene.clone()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
