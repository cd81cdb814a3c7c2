//! Negotiated audio format for a media stream.
//!
//! The telephony provider announces the format in the stream `start` frame;
//! the recognition adapter and the outbound chunker are both configured from
//! it so the two sides can never disagree about encoding or sample rate.

use serde::Deserialize;

/// Outbound audio is cut into pieces of roughly this much playback time, so
/// the transport is never fed faster than real time and an interruption only
/// ever has one chunk of latency.
pub const CHUNK_MS: u32 = 20;

/// Audio format negotiated for one media stream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    /// Wire encoding name, e.g. `audio/x-mulaw`.
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for MediaFormat {
    /// Standard narrowband telephony: companded mu-law, 8 kHz, mono.
    fn default() -> Self {
        Self {
            encoding: "audio/x-mulaw".to_string(),
            sample_rate: 8000,
            channels: 1,
        }
    }
}

impl MediaFormat {
    /// True for companded G.711 formats (one byte per sample).
    pub fn is_companded(&self) -> bool {
        self.encoding.contains("mulaw") || self.encoding.contains("alaw")
    }

    fn bytes_per_sample(&self) -> usize {
        if self.is_companded() { 1 } else { 2 }
    }

    /// Size in bytes of one outbound chunk ([`CHUNK_MS`] of audio).
    pub fn chunk_bytes(&self) -> usize {
        self.sample_rate as usize * self.bytes_per_sample() * self.channels as usize
            * CHUNK_MS as usize
            / 1000
    }

    /// Encoding name the recognition provider expects (`mulaw`, `alaw`, `linear16`).
    pub fn recognition_encoding(&self) -> &'static str {
        if self.encoding.contains("mulaw") {
            "mulaw"
        } else if self.encoding.contains("alaw") {
            "alaw"
        } else {
            "linear16"
        }
    }
}
