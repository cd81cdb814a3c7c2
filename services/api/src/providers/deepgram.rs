//! Deepgram adapters: streaming speech recognition and Aura speech synthesis.

use crate::audio::MediaFormat;
use crate::providers::{SpeechSynthesizer, TtsError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message as WsMessage},
};
use tracing::{debug, warn};

/// Always-available Aura voice used when a configured voice is rejected.
pub const FALLBACK_VOICE: &str = "aura-asteria-en";

const LISTEN_URL: &str = "wss://api.deepgram.com/v1/listen";
const SPEAK_URL: &str = "https://api.deepgram.com/v1/speak";

/// Quiet time after the last spoken word before the provider emits its own
/// end-of-utterance signal.
const UTTERANCE_END_MS: u32 = 1000;

// --- Local Deepgram wire types (for encapsulation) ---
mod wire {
    use serde::Deserialize;

    /// Superset of the streaming response messages we care about. Deepgram
    /// tags messages with a `type` field; anything we do not recognize is
    /// ignored.
    #[derive(Deserialize, Debug)]
    pub(super) struct ServerMessage {
        #[serde(rename = "type")]
        pub kind: String,
        #[serde(default)]
        pub is_final: bool,
        #[serde(default)]
        pub channel: Option<Channel>,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct Channel {
        pub alternatives: Vec<Alternative>,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct Alternative {
        pub transcript: String,
        #[serde(default)]
        pub confidence: f64,
    }
}

/// Events emitted by the recognition stream, in provider order
/// (interim before final, final before utterance end).
#[derive(Debug, Clone, PartialEq)]
pub enum SttEvent {
    Transcript {
        text: String,
        is_final: bool,
        confidence: f64,
    },
    /// Voice-activity-based end-of-utterance signal.
    UtteranceEnd,
    /// The provider connection ended; no further events will arrive.
    Closed,
}

/// Builds the streaming-recognition URL from the negotiated media format.
///
/// The encoding and sample rate MUST match what the transport negotiated;
/// a mismatch produces silent garbage transcripts rather than an error.
fn build_listen_url(format: &MediaFormat) -> String {
    format!(
        "{}?model=nova-2-phonecall&language=en&encoding={}&sample_rate={}&channels={}&interim_results=true&vad_events=true&utterance_end_ms={}",
        LISTEN_URL,
        format.recognition_encoding(),
        format.sample_rate,
        format.channels,
        UTTERANCE_END_MS,
    )
}

/// A live streaming-recognition connection.
///
/// Audio goes in through [`Recognizer::send_audio`]; transcript events come
/// out of [`Recognizer::next_event`]. Dropping or closing the recognizer tears
/// down both background tasks.
pub struct Recognizer {
    /// `None` once closed; dropping the sender is what lets the writer task
    /// flush its `CloseStream` message and finish.
    audio_tx: Option<mpsc::Sender<Bytes>>,
    events_rx: mpsc::Receiver<SttEvent>,
    reader_task: JoinHandle<()>,
}

impl Recognizer {
    /// Connects to the recognition provider, configured from the negotiated
    /// media format.
    pub async fn start(api_key: &str, format: &MediaFormat) -> Result<Self> {
        let mut request = build_listen_url(format).into_client_request()?;
        request
            .headers_mut()
            .insert("Authorization", format!("Token {}", api_key).parse()?);

        let (ws_stream, _) = connect_async(request)
            .await
            .context("Failed to connect to the recognition provider")?;
        let (mut dg_tx, mut dg_rx) = ws_stream.split();
        debug!("Recognition stream connected");

        let (audio_tx, mut audio_rx) = mpsc::channel::<Bytes>(128);
        let (events_tx, events_rx) = mpsc::channel::<SttEvent>(64);

        // The writer terminates on its own once the audio channel closes, so
        // its handle does not need to be retained.
        tokio::spawn(async move {
            while let Some(chunk) = audio_rx.recv().await {
                if dg_tx.send(WsMessage::Binary(chunk)).await.is_err() {
                    warn!("Recognition stream rejected audio; stopping writer");
                    break;
                }
            }
            // Channel closed: tell the provider to flush and finish.
            let _ = dg_tx
                .send(WsMessage::Text(r#"{"type":"CloseStream"}"#.into()))
                .await;
        });

        let reader_task = tokio::spawn(async move {
            while let Some(msg_result) = dg_rx.next().await {
                let text = match msg_result {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                let Ok(msg) = serde_json::from_str::<wire::ServerMessage>(&text) else {
                    debug!("Ignoring unparseable recognition message");
                    continue;
                };
                let event = match msg.kind.as_str() {
                    "Results" => {
                        let Some(alt) = msg
                            .channel
                            .as_ref()
                            .and_then(|c| c.alternatives.first())
                        else {
                            continue;
                        };
                        SttEvent::Transcript {
                            text: alt.transcript.clone(),
                            is_final: msg.is_final,
                            confidence: alt.confidence,
                        }
                    }
                    "UtteranceEnd" => SttEvent::UtteranceEnd,
                    _ => continue,
                };
                if events_tx.send(event).await.is_err() {
                    break;
                }
            }
            let _ = events_tx.send(SttEvent::Closed).await;
        });

        Ok(Self {
            audio_tx: Some(audio_tx),
            events_rx,
            reader_task,
        })
    }

    /// Forwards one chunk of caller audio to the provider. Audio keeps
    /// flowing here even while a turn is being generated.
    pub async fn send_audio(&self, chunk: Bytes) {
        let Some(audio_tx) = &self.audio_tx else {
            debug!("Recognition stream closed; dropping audio chunk");
            return;
        };
        if audio_tx.send(chunk).await.is_err() {
            debug!("Recognition stream closed; dropping audio chunk");
        }
    }

    /// Next recognition event, or `None` once the stream is torn down.
    pub async fn next_event(&mut self) -> Option<SttEvent> {
        self.events_rx.recv().await
    }

    /// Tears down the provider connection. Closing the audio channel lets the
    /// writer flush its `CloseStream` message and finish on its own; only the
    /// reader is stopped outright.
    pub fn close(&mut self) {
        self.audio_tx = None;
        self.reader_task.abort();
    }
}

#[cfg(test)]
impl Recognizer {
    /// Builds a recognizer wired to in-memory channels instead of a live
    /// provider connection.
    pub(crate) fn channel_backed(
        audio_tx: mpsc::Sender<Bytes>,
        events_rx: mpsc::Receiver<SttEvent>,
    ) -> Self {
        Self {
            audio_tx: Some(audio_tx),
            events_rx,
            reader_task: tokio::spawn(async {}),
        }
    }
}

impl Drop for Recognizer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Aura speech synthesis, requesting telephony-ready mu-law explicitly.
pub struct DeepgramTts {
    http: reqwest::Client,
    api_key: String,
}

impl DeepgramTts {
    pub fn new(api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for DeepgramTts {
    async fn synthesize_voice(&self, text: &str, voice: &str) -> Result<Bytes, TtsError> {
        let url = format!(
            "{}?model={}&encoding=mulaw&sample_rate=8000&container=none",
            SPEAK_URL, voice
        );
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| TtsError::Request(e.to_string()))?;

        let status = response.status();
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
