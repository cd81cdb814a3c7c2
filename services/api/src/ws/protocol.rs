//! Wire codec for the telephony provider's duplex media-streaming protocol.
//!
//! Inbound frames are JSON text messages tagged by an `event` field: `start`
//! announces the stream and its negotiated audio format, `media` carries a
//! base64 audio payload, `mark` echoes a playback-completion token, and `stop`
//! means the remote side closed the stream. Outbound audio is chunked into
//! ~20 ms pieces followed by a single `mark` frame carrying a correlation
//! token, so playback completion of each utterance can be observed.

use crate::audio::MediaFormat;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Frames received from the media stream.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundFrame {
    /// Protocol handshake preceding `start`; carries nothing we need.
    Connected,
    Start {
        start: StreamStart,
    },
    Media {
        media: MediaPayload,
    },
    Stop,
    Mark {
        mark: MarkPayload,
    },
}

/// Stream metadata from the `start` frame: the provider-assigned identifiers
/// and the negotiated audio format.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StreamStart {
    pub stream_sid: String,
    pub call_sid: String,
    pub media_format: MediaFormat,
    /// Parameters this service attached when placing the call; carries the
    /// session's `callId` so the stream can be routed to it.
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct MediaPayload {
    /// Base64-encoded audio in the negotiated format.
    pub payload: String,
}

impl MediaPayload {
    /// Decodes the audio payload; `None` for corrupt base64.
    pub fn decode(&self) -> Option<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.payload)
            .ok()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MarkPayload {
    pub name: String,
}

/// Frames sent to the media stream.
#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundFrame {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkPayload,
    },
    /// Discards any audio still buffered for playback on the provider side.
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Serialize, PartialEq)]
pub struct OutboundMedia {
    pub payload: String,
}

/// Decodes one raw text frame. Malformed frames are dropped with a log line;
/// transient corruption must never terminate a live call.
pub fn decode_inbound(raw: &str) -> Option<InboundFrame> {
    match serde_json::from_str::<InboundFrame>(raw) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(error = %e, "Dropping malformed media-stream frame");
            None
        }
    }
}

/// Chunks synthesized audio into `media` frames of one chunk of playback time
/// each, terminated by a single `mark` frame with the given correlation token.
///
/// The chunking keeps the transport from being fed faster than real time and
/// bounds interruption latency to one chunk.
pub fn encode_outbound(
    audio: &[u8],
    stream_sid: &str,
    mark_name: &str,
    format: &MediaFormat,
) -> Vec<OutboundFrame> {
    let chunk_size = format.chunk_bytes().max(1);
    let mut frames: Vec<OutboundFrame> = audio
        .chunks(chunk_size)
        .map(|chunk| OutboundFrame::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia {
                payload: base64::engine::general_purpose::STANDARD.encode(chunk),
            },
        })
        .collect();
    frames.push(OutboundFrame::Mark {
        stream_sid: stream_sid.to_string(),
        mark: MarkPayload {
            name: mark_name.to_string(),
        },
    });
    frames
}
