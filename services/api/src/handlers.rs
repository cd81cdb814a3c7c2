//! Axum Handlers for the REST API
//!
//! This module contains the logic for handling HTTP requests for call
//! management. It uses `utoipa` doc comments to generate OpenAPI
//! documentation.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    models::{
        ActiveCallsResponse, CallStatus, CreateCallPayload, CreateCallResponse, ErrorResponse,
        LifecycleEvent,
    },
    providers::{TtsProvider, build_synthesizer},
    state::AppState,
    ws::call::{CallSession, EndReason},
};
use aria_core::{LlmProvider, OpenAiCompatibleClient};

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    /// The upstream telephony provider refused or failed the request.
    BadGateway(anyhow::Error),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::BadGateway(err) => {
                error!("Upstream provider error: {:?}", err);
                let message = "The telephony provider could not place the call.".to_string();
                (StatusCode::BAD_GATEWAY, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// Initiate an outbound call.
#[utoipa::path(
    post,
    path = "/calls",
    request_body = CreateCallPayload,
    responses(
        (status = 201, description = "Call accepted and being placed", body = CreateCallResponse),
        (status = 400, description = "Invalid payload or missing provider credentials", body = ErrorResponse),
        (status = 502, description = "Telephony provider refused the call", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn create_call(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateCallPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload.validate().map_err(ApiError::BadRequest)?;

    let config = &state.config;
    let creds = payload.provider_credentials.clone().unwrap_or_default();
    let call_config = payload.call_config.clone();

    // Resolve providers and credentials: per-call overrides win over the
    // service-level configuration.
    let llm_provider = call_config.llm_provider.unwrap_or(config.llm_provider);
    let llm_api_key = creds
        .llm_api_key
        .or_else(|| match llm_provider {
            LlmProvider::OpenAi => config.openai_api_key.clone(),
            LlmProvider::Gemini => config.gemini_api_key.clone(),
        })
        .ok_or_else(|| {
            ApiError::BadRequest("no API key available for the requested llm provider".to_string())
        })?;
    let chat_model = call_config
        .chat_model
        .clone()
        .unwrap_or_else(|| config.chat_model.clone());

    let tts_provider = call_config.tts_provider.unwrap_or(config.tts_provider);
    let tts_api_key = creds
        .tts_api_key
        .or_else(|| match tts_provider {
            TtsProvider::ElevenLabs => config.elevenlabs_api_key.clone(),
            TtsProvider::Deepgram => Some(config.deepgram_api_key.clone()),
        })
        .ok_or_else(|| {
            ApiError::BadRequest("no API key available for the requested tts provider".to_string())
        })?;
    let stt_api_key = creds
        .stt_api_key
        .unwrap_or_else(|| config.deepgram_api_key.clone());

    let llm = Arc::new(OpenAiCompatibleClient::for_provider(
        llm_provider,
        &llm_api_key,
        chat_model,
    ));
    let tts = build_synthesizer(tts_provider, &tts_api_key);

    let call_id = Uuid::new_v4();
    let session = CallSession::new(
        call_id,
        payload.tenant_id.clone(),
        call_config,
        llm,
        tts,
        tts_provider.fallback_voice().to_string(),
        stt_api_key,
        state.notifier.clone(),
    );
    let session = state.manager.insert(call_id, session);
    state
        .notifier
        .notify(LifecycleEvent::status(call_id, CallStatus::Pending));

    match state.dialer.place_call(&payload.to_number, call_id).await {
        Ok(call_ref) => {
            info!(%call_id, %call_ref, tenant_id = %payload.tenant_id, "Outbound call placed");
            session.lock().await.set_provider_call_ref(call_ref);
            Ok((StatusCode::CREATED, Json(CreateCallResponse { call_id })))
        }
        Err(e) => {
            // The session never had a transport; deregister it so the id does
            // not linger as a phantom active call.
            state.manager.remove(&call_id);
            state
                .notifier
                .notify(LifecycleEvent::status(call_id, CallStatus::Failed));
            Err(ApiError::BadGateway(e))
        }
    }
}

/// List the ids of all currently active calls.
#[utoipa::path(
    get,
    path = "/calls",
    responses(
        (status = 200, description = "Active call ids", body = ActiveCallsResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn list_calls(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ActiveCallsResponse>, ApiError> {
    Ok(Json(ActiveCallsResponse {
        call_ids: state.manager.active_ids(),
    }))
}

/// End an active call.
#[utoipa::path(
    delete,
    path = "/calls/{id}",
    responses(
        (status = 204, description = "Call ending"),
        (status = 404, description = "No active call with that id", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Call ID")
    )
)]
pub async fn end_call(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let ended = state
        .manager
        .end_session(&id, EndReason::Requested("api request".to_string()))
        .await;
    if ended {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!(
            "No active call with id '{}'",
            id
        )))
    }
}
