//! CardioSense Gateway: browser-facing routes, auth edge checks and the assessment, coach
//! and plan endpoints. Listens on `bind_addr:port` from `AppConfig`.

mod app;
mod error;
mod middleware;
mod routes;
#[cfg(test)]
mod testing;

use cardiosense_core::AppConfig;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[cardiosense-gateway] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[cardiosense-gateway] invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    if !config.api_available {
        tracing::warn!(target: "cardiosense::gateway", "API_AVAILABLE=false: health API calls return mock payloads");
    }

    let addr = format!("{}:{}", config.bind_addr, config.port);
    let state = match app::AppState::from_config(config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("[cardiosense-gateway] could not open local stores: {}", e);
            std::process::exit(1);
        }
    };

    let app = app::build_app(state).layer(TraceLayer::new_for_http());

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("[cardiosense-gateway] bind {} failed: {}", addr, e);
            std::process::exit(1);
        }
    };
    tracing::info!(target: "cardiosense::gateway", %addr, version = cardiosense_core::version(), "listening");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(target: "cardiosense::gateway", error = %e, "server stopped");
    }
}
