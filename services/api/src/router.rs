//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, media-stream WebSocket endpoint, and OpenAPI
//! documentation.

use crate::{
    handlers,
    models::{
        ActiveCallsResponse, CallConfig, CallStatus, CreateCallPayload, CreateCallResponse,
        ErrorResponse, ProviderCredentials,
    },
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Router,
    routing::{delete, get},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::create_call, handlers::list_calls, handlers::end_call),
    components(
        schemas(
            CreateCallPayload,
            CreateCallResponse,
            ActiveCallsResponse,
            CallConfig,
            ProviderCredentials,
            ErrorResponse,
            CallStatus
        )
    ),
    tags(
        (name = "Aria API", description = "Outbound voice-call orchestration")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/calls", get(handlers::list_calls).post(handlers::create_call))
        .route("/calls/{id}", delete(handlers::end_call))
        .route("/media-stream", get(ws_handler))
        // Apply the state ONLY to this group of routes.
        .with_state(app_state);

    // Create the final router that merges the stateful routes
    // with the stateless routes (like Swagger UI).
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
