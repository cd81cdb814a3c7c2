//! Main Entrypoint for the Aria Call Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging and shared services (dialer, session registry,
//!    lifecycle notifier).
//! 3. Constructing the Axum router and applying middleware.
//! 4. Starting the web server and handling graceful shutdown, draining any
//!    still-active calls before exit.

use anyhow::Context;
use aria_api::{
    config::Config,
    notify::LifecycleNotifier,
    router::create_router,
    state::AppState,
    telephony::TwilioDialer,
    ws::SessionManager,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Shared Services ---
    let notifier = Arc::new(LifecycleNotifier::new(config.lifecycle_webhook_url.clone()));
    let manager = Arc::new(SessionManager::new());
    let dialer = Arc::new(TwilioDialer::new(
        config.twilio_account_sid.clone(),
        config.twilio_auth_token.clone(),
        config.twilio_from_number.clone(),
        config.media_stream_url(),
    ));

    let app_state = Arc::new(AppState {
        config: Arc::new(config.clone()),
        manager: manager.clone(),
        dialer,
        notifier,
    });

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        llm_provider = ?config.llm_provider,
        model = %config.chat_model,
        tts_provider = ?config.tts_provider,
        bind_address = %config.bind_address,
        media_stream_url = %config.media_stream_url(),
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Calls still live at shutdown get a final lifecycle event instead of
    // silently vanishing with the process.
    manager.drain("service shutdown").await;
    info!("Server has shut down.");
    Ok(())
}
