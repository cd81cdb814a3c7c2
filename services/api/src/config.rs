use crate::providers::TtsProvider;
use aria_core::LlmProvider;
use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
///
/// Service-level provider credentials live here; a call-initiation request may
/// override the recognition/generation/synthesis keys per call.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Publicly reachable hostname the telephony provider connects back to
    /// with the media stream.
    pub public_host: String,
    pub llm_provider: LlmProvider,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub chat_model: String,
    pub deepgram_api_key: String,
    pub tts_provider: TtsProvider,
    pub elevenlabs_api_key: Option<String>,
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_from_number: String,
    /// Where lifecycle events (status, transcript, goal) are POSTed. Optional;
    /// without it events are only logged.
    pub lifecycle_webhook_url: Option<String>,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let public_host = std::env::var("PUBLIC_HOST")
            .map_err(|_| ConfigError::MissingVar("PUBLIC_HOST".to_string()))?;

        let llm_provider_str =
            std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = match llm_provider_str.to_lowercase().as_str() {
            "gemini" => LlmProvider::Gemini,
            _ => LlmProvider::OpenAi,
        };

        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let gemini_api_key = std::env::var("GEMINI_API_KEY").ok();
        let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let deepgram_api_key = std::env::var("DEEPGRAM_API_KEY")
            .map_err(|_| ConfigError::MissingVar("DEEPGRAM_API_KEY".to_string()))?;

        let tts_provider_str =
            std::env::var("TTS_PROVIDER").unwrap_or_else(|_| "elevenlabs".to_string());
        let tts_provider = match tts_provider_str.to_lowercase().as_str() {
            "deepgram" => TtsProvider::Deepgram,
            _ => TtsProvider::ElevenLabs,
        };
        let elevenlabs_api_key = std::env::var("ELEVENLABS_API_KEY").ok();

        let twilio_account_sid = std::env::var("TWILIO_ACCOUNT_SID")
            .map_err(|_| ConfigError::MissingVar("TWILIO_ACCOUNT_SID".to_string()))?;
        let twilio_auth_token = std::env::var("TWILIO_AUTH_TOKEN")
            .map_err(|_| ConfigError::MissingVar("TWILIO_AUTH_TOKEN".to_string()))?;
        let twilio_from_number = std::env::var("TWILIO_FROM_NUMBER")
            .map_err(|_| ConfigError::MissingVar("TWILIO_FROM_NUMBER".to_string()))?;

        let lifecycle_webhook_url = std::env::var("LIFECYCLE_WEBHOOK_URL").ok();

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        match llm_provider {
            LlmProvider::OpenAi => {
                if openai_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "OPENAI_API_KEY must be set for 'openai' provider".to_string(),
                    ));
                }
            }
            LlmProvider::Gemini => {
                if gemini_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "GEMINI_API_KEY must be set for 'gemini' provider".to_string(),
                    ));
                }
            }
        }
        if tts_provider == TtsProvider::ElevenLabs && elevenlabs_api_key.is_none() {
            return Err(ConfigError::MissingVar(
                "ELEVENLABS_API_KEY must be set for 'elevenlabs' provider".to_string(),
            ));
        }

        Ok(Self {
            bind_address,
            public_host,
            llm_provider,
            openai_api_key,
            gemini_api_key,
            chat_model,
            deepgram_api_key,
            tts_provider,
            elevenlabs_api_key,
            twilio_account_sid,
            twilio_auth_token,
            twilio_from_number,
            lifecycle_webhook_url,
            log_level,
        })
    }

    /// WebSocket URL the telephony provider streams call media to.
    pub fn media_stream_url(&self) -> String {
        format!("wss://{}/media-stream", self.public_host)
    }
}
