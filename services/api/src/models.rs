//! API Models
//!
//! This module defines the payloads of the call-initiation REST API, the
//! per-call configuration, and the lifecycle event delivered to the external
//! webhook. OpenAPI documentation is generated from these with `utoipa`.

use aria_core::{LlmProvider, TranscriptEntry};
use crate::providers::TtsProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

/// Externally visible lifecycle status of a call.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// Session allocated, outbound call not yet connected.
    Pending,
    /// Media stream attached, conversation running.
    InProgress,
    /// Call ended normally (remote hangup or explicit end).
    Completed,
    /// Call ended by an error or the duration ceiling.
    Failed,
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallStatus::Pending => write!(f, "pending"),
            CallStatus::InProgress => write!(f, "in_progress"),
            CallStatus::Completed => write!(f, "completed"),
            CallStatus::Failed => write!(f, "failed"),
        }
    }
}

fn default_max_duration_secs() -> u64 {
    300
}

/// Per-call configuration, immutable once the session is created.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CallConfig {
    /// System prompt driving the assistant's behaviour for this call.
    #[schema(example = "You are Aria, a friendly scheduling assistant.")]
    pub system_prompt: String,
    /// Substrings whose presence in user speech marks the call goal achieved.
    #[serde(default)]
    pub goal_phrases: Vec<String>,
    /// Synthesis voice identity; the provider default is used when omitted.
    #[serde(default)]
    pub voice: Option<String>,
    /// Scripted line spoken as soon as the media stream attaches.
    #[serde(default)]
    #[schema(example = "Hello, this is Aria.")]
    pub opening_line: Option<String>,
    /// Hard ceiling on call length, independent of conversational progress.
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
    /// Language-generation backend; the service default is used when omitted.
    #[serde(default)]
    #[schema(value_type = Option<String>, example = "openai")]
    pub llm_provider: Option<LlmProvider>,
    /// Chat model identifier; the service default is used when omitted.
    #[serde(default)]
    pub chat_model: Option<String>,
    /// Speech-synthesis backend; the service default is used when omitted.
    #[serde(default)]
    #[schema(value_type = Option<String>, example = "elevenlabs")]
    pub tts_provider: Option<TtsProvider>,
}

impl CallConfig {
    /// Rejects configurations that must never reach the telephony provider.
    pub fn validate(&self) -> Result<(), String> {
        if self.system_prompt.trim().is_empty() {
            return Err("systemPrompt must not be empty".to_string());
        }
        if self.max_duration_secs == 0 || self.max_duration_secs > 3600 {
            return Err("maxDurationSecs must be between 1 and 3600".to_string());
        }
        Ok(())
    }
}

/// Per-call overrides for service-level provider credentials.
#[derive(Debug, Deserialize, ToSchema, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCredentials {
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default)]
    pub stt_api_key: Option<String>,
    #[serde(default)]
    pub tts_api_key: Option<String>,
}

/// Request body of the call-initiation endpoint.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateCallPayload {
    #[schema(example = "acme-corp")]
    pub tenant_id: String,
    /// Destination number in E.164 form.
    #[schema(example = "+15551234567")]
    pub to_number: String,
    pub call_config: CallConfig,
    #[serde(default)]
    pub provider_credentials: Option<ProviderCredentials>,
}

impl CreateCallPayload {
    pub fn validate(&self) -> Result<(), String> {
        if self.tenant_id.trim().is_empty() {
            return Err("tenantId must not be empty".to_string());
        }
        let number = self.to_number.trim();
        if !number.starts_with('+') || number.len() < 8 || !number[1..].chars().all(|c| c.is_ascii_digit()) {
            return Err("toNumber must be an E.164 number, e.g. +15551234567".to_string());
        }
        self.call_config.validate()
    }
}

/// Response of the call-initiation endpoint.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateCallResponse {
    #[schema(value_type = String, format = Uuid)]
    pub call_id: Uuid,
}

/// Response listing the currently active calls.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActiveCallsResponse {
    #[schema(value_type = Vec<String>)]
    pub call_ids: Vec<Uuid>,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

/// Event POSTed to the external lifecycle webhook. Delivery is best-effort;
/// the subsystem keeps no durable record of its own.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub call_id: Uuid,
    pub status: CallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<Vec<TranscriptEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_achieved: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl LifecycleEvent {
    /// A bare status-change event with no optional payload.
    pub fn status(call_id: Uuid, status: CallStatus) -> Self {
        Self {
            call_id,
            status,
            transcript: None,
            goal_achieved: None,
            duration_seconds: None,
            error_message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_payload() -> CreateCallPayload {
        CreateCallPayload {
            tenant_id: "acme".to_string(),
            to_number: "+15551234567".to_string(),
            call_config: CallConfig {
                system_prompt: "You are Aria.".to_string(),
                goal_phrases: vec![],
                voice: None,
                opening_line: None,
                max_duration_secs: 300,
                llm_provider: None,
                chat_model: None,
                tts_provider: None,
            },
            provider_credentials: None,
        }
    }

    #[test]
    fn test_call_status_serialization() {
        assert_eq!(
            serde_json::to_string(&CallStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(
            serde_json::to_string(&CallStatus::Completed).unwrap(),
            "\"completed\""
        );
    }

    #[test]
    fn test_call_status_display() {
        assert_eq!(format!("{}", CallStatus::Pending), "pending");
        assert_eq!(format!("{}", CallStatus::Failed), "failed");
    }

    #[test]
    fn test_payload_deserialization_with_defaults() {
        let json = r#"{
            "tenantId": "acme",
            "toNumber": "+15551234567",
            "callConfig": { "systemPrompt": "You are Aria." }
        }"#;
        let payload: CreateCallPayload = serde_json::from_str(json).unwrap();

        assert_eq!(payload.tenant_id, "acme");
        assert_eq!(payload.call_config.max_duration_secs, 300);
        assert!(payload.call_config.goal_phrases.is_empty());
        assert!(payload.call_config.opening_line.is_none());
        assert!(payload.provider_credentials.is_none());
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn test_payload_missing_required_field() {
        let json = r#"{"tenantId": "acme", "toNumber": "+15551234567"}"#;
        let result: Result<CreateCallPayload, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_number() {
        let mut payload = valid_payload();
        payload.to_number = "555-1234".to_string();
        assert!(payload.validate().is_err());

        payload.to_number = "+1555abc4567".to_string();
        assert!(payload.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_prompt_and_bad_duration() {
        let mut payload = valid_payload();
        payload.call_config.system_prompt = "   ".to_string();
        assert!(payload.validate().is_err());

        let mut payload = valid_payload();
        payload.call_config.max_duration_secs = 0;
        assert!(payload.validate().is_err());

        let mut payload = valid_payload();
        payload.call_config.max_duration_secs = 7200;
        assert!(payload.validate().is_err());
    }

    #[test]
    fn test_lifecycle_event_skips_empty_fields() {
        let event = LifecycleEvent::status(Uuid::new_v4(), CallStatus::InProgress);
        let json = serde_json::to_string(&event).unwrap();

        assert!(json.contains("callId"));
        assert!(json.contains("in_progress"));
        assert!(!json.contains("transcript"));
        assert!(!json.contains("errorMessage"));
    }

    #[test]
    fn test_lifecycle_event_with_final_state() {
        let event = LifecycleEvent {
            call_id: Uuid::new_v4(),
            status: CallStatus::Failed,
            transcript: Some(vec![]),
            goal_achieved: Some(false),
            duration_seconds: Some(60),
            error_message: Some("max call duration of 60s reached".to_string()),
        };
        let json = serde_json::to_string(&event).unwrap();

        assert!(json.contains("\"durationSeconds\":60"));
        assert!(json.contains("max call duration"));
    }
}
