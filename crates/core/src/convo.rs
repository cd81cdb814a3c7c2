//! Conversation data model shared by the orchestrator service.
//!
//! A call's conversation is tracked in two parallel structures: the
//! `turn_messages` context window sent to the language model on every turn,
//! and the append-only `transcript_log` audit trail handed to the lifecycle
//! webhook when the call ends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Speaker role for a conversation entry.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

/// One entry of the context window sent to the language model.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TurnMessage {
    pub role: Role,
    pub text: String,
}

impl TurnMessage {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

/// Immutable entry of the append-only transcript audit trail.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    pub timestamp_utc: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl TranscriptEntry {
    /// Creates an entry timestamped now.
    pub fn now(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp_utc: Utc::now(),
            confidence: None,
            duration_ms: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Case-insensitive substring match of any configured goal phrase against a
/// user utterance. Empty phrases never match.
pub fn goal_matched(utterance: &str, goal_phrases: &[String]) -> bool {
    if goal_phrases.is_empty() {
        return false;
    }
    let lowered = utterance.to_lowercase();
    goal_phrases
        .iter()
        .filter(|phrase| !phrase.trim().is_empty())
        .any(|phrase| lowered.contains(&phrase.to_lowercase()))
}
