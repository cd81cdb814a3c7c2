//! ElevenLabs speech synthesis adapter.

use crate::providers::{SpeechSynthesizer, TtsError};
use async_trait::async_trait;
use bytes::Bytes;

/// Always-available stock voice ("Rachel") used when a configured voice is
/// rejected.
pub const FALLBACK_VOICE: &str = "21m00Tcm4TlvDq8ikWAM";

const TTS_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";
const MODEL_ID: &str = "eleven_turbo_v2_5";

pub struct ElevenLabsTts {
    http: reqwest::Client,
    api_key: String,
}

impl ElevenLabsTts {
    pub fn new(api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsTts {
    async fn synthesize_voice(&self, text: &str, voice: &str) -> Result<Bytes, TtsError> {
        // The output format is requested explicitly so the bytes are
        // wire-ready for the telephony stream without transcoding.
        let url = format!("{}/{}?output_format=ulaw_8000", TTS_URL, voice);
        let response = self
            .http
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&serde_json::json!({
                "text": text,
                "model_id": MODEL_ID,
            }))
            .send()
            .await
            .map_err(|e| TtsError::Request(e.to_string()))?;

        let status = response.status();
        // Access/billing restrictions and unknown voice ids come back as
        // client errors on the voice resource; those are recoverable with the
        // fallback voice.
        if matches!(status.as_u16(), 402 | 403 | 404 | 422) {
            return Err(TtsError::VoiceRejected {
                voice: voice.to_string(),
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(TtsError::Request(format!(
                "synthesis returned status {}",
                status
            )));
        }
        response
            .bytes()
            .await
            .map_err(|e| TtsError::Request(e.to_string()))
    }
}
