use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use anyhow::anyhow;

use voxpipe::{ServerConfig, routes, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    // Load configuration
    let config = ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?;
    let address = config.address();

    if !config.providers_configured() {
        tracing::warn!(
            "Speech providers not fully configured; voice sessions will be rejected \
             (set ASSEMBLYAI_API_KEY, ELEVENLABS_API_KEY and ELEVENLABS_VOICE_ID)"
        );
    }

    // Create application state
    let app_state = AppState::new(config);

    // Public health check route plus the WebSocket session route
    let public_routes = Router::new().route(
        "/",
        axum::routing::get(voxpipe::handlers::api::health_check),
    );
    let ws_routes = routes::ws::create_ws_router();

    let app = public_routes
        .merge(ws_routes)
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    // Create listener
    let listener = TcpListener::bind(&address).await?;

    tracing::info!("Server listening on {address}");

    // Start server
    axum::serve(listener, app).await?;

    Ok(())
}
