//! Speech provider adapters.
//!
//! Recognition and synthesis each sit behind their own seam so the call
//! session never touches a vendor type: recognition is a channel of
//! [`deepgram::SttEvent`]s, synthesis is the [`SpeechSynthesizer`] trait with
//! one adapter per vendor, selected by configuration at session creation.

pub mod deepgram;
pub mod elevenlabs;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Supported speech-synthesis backends.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TtsProvider {
    #[default]
    ElevenLabs,
    Deepgram,
}

impl TtsProvider {
    /// Hard-coded always-available voice identity for the vendor. A call must
    /// never go silent merely because a custom voice is unavailable.
    pub fn fallback_voice(&self) -> &'static str {
        match self {
            TtsProvider::ElevenLabs => elevenlabs::FALLBACK_VOICE,
            TtsProvider::Deepgram => deepgram::FALLBACK_VOICE,
        }
    }
}

/// Errors surfaced by speech-synthesis adapters.
#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    /// The provider refused the requested voice (access, billing, or an
    /// unknown voice id). Recoverable by retrying with the fallback voice.
    #[error("voice '{voice}' rejected by provider (status {status})")]
    VoiceRejected { voice: String, status: u16 },
    #[error("synthesis request failed: {0}")]
    Request(String),
}

/// Converts text to wire-ready telephony audio (companded 8 kHz bytes).
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize_voice(&self, text: &str, voice: &str) -> Result<Bytes, TtsError>;
}

/// Builds the configured synthesis adapter.
pub fn build_synthesizer(provider: TtsProvider, api_key: &str) -> Arc<dyn SpeechSynthesizer> {
    match provider {
        TtsProvider::ElevenLabs => Arc::new(elevenlabs::ElevenLabsTts::new(api_key)),
        TtsProvider::Deepgram => Arc::new(deepgram::DeepgramTts::new(api_key)),
    }
}

/// Synthesizes with the configured voice, transparently retrying once with the
/// fallback voice if the provider rejects the configured one.
pub async fn synthesize_with_fallback(
    synth: &dyn SpeechSynthesizer,
    text: &str,
    voice: &str,
    fallback_voice: &str,
) -> Result<Bytes, TtsError> {
    match synth.synthesize_voice(text, voice).await {
        Err(TtsError::VoiceRejected { status, .. }) if voice != fallback_voice => {
            warn!(voice, status, fallback_voice, "Configured voice rejected; retrying with fallback");
            synth.synthesize_voice(text, fallback_voice).await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use mockall::predicate::eq;

    mock! {
        Synth {}

        #[async_trait]
        impl SpeechSynthesizer for Synth {
            async fn synthesize_voice(&self, text: &str, voice: &str) -> Result<Bytes, TtsError>;
        }
    }

    #[tokio::test]
    async fn test_fallback_retry_on_voice_rejection() {
        let mut synth = MockSynth::new();
        synth
            .expect_synthesize_voice()
            .with(eq("hi"), eq("custom-voice"))
            .times(1)
            .returning(|_, voice| {
                Err(TtsError::VoiceRejected {
                    voice: voice.to_string(),
                    status: 403,
                })
            });
        synth
            .expect_synthesize_voice()
            .with(eq("hi"), eq("fallback"))
            .times(1)
            .returning(|_, _| Ok(Bytes::from_static(&[0xff, 0x7f])));

        let audio = synthesize_with_fallback(&synth, "hi", "custom-voice", "fallback")
            .await
            .unwrap();
        assert_eq!(audio.len(), 2);
    }

    #[tokio::test]
    async fn test_fallback_is_a_single_retry() {
        let mut synth = MockSynth::new();
        // Both the configured and the fallback voice are rejected: exactly two
        // calls, then the error surfaces. No unbounded loop.
        synth.expect_synthesize_voice().times(2).returning(|_, voice| {
            Err(TtsError::VoiceRejected {
                voice: voice.to_string(),
                status: 403,
            })
        });

        let result = synthesize_with_fallback(&synth, "hi", "custom-voice", "fallback").await;
        assert!(matches!(result, Err(TtsError::VoiceRejected { .. })));
    }

    #[tokio::test]
    async fn test_no_retry_when_already_using_fallback() {
        let mut synth = MockSynth::new();
        synth.expect_synthesize_voice().times(1).returning(|_, voice| {
            Err(TtsError::VoiceRejected {
                voice: voice.to_string(),
                status: 403,
            })
        });

        let result = synthesize_with_fallback(&synth, "hi", "fallback", "fallback").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_no_retry_on_plain_request_error() {
        let mut synth = MockSynth::new();
        synth
            .expect_synthesize_voice()
            .times(1)
            .returning(|_, _| Err(TtsError::Request("timeout".to_string())));

        let result = synthesize_with_fallback(&synth, "hi", "custom-voice", "fallback").await;
        assert!(matches!(result, Err(TtsError::Request(_))));
    }

    #[test]
    fn test_fallback_voice_per_provider() {
        assert!(!TtsProvider::ElevenLabs.fallback_voice().is_empty());
        assert!(TtsProvider::Deepgram.fallback_voice().starts_with("aura-"));
    }

    #[test]
    fn test_tts_provider_deserialization() {
        let p: TtsProvider = serde_json::from_str("\"deepgram\"").unwrap();
        assert_eq!(p, TtsProvider::Deepgram);
        let p: TtsProvider = serde_json::from_str("\"elevenlabs\"").unwrap();
        assert_eq!(p, TtsProvider::ElevenLabs);
    }
}
