//! Aria Core
//!
//! Provider-agnostic building blocks for the voice-call orchestrator: the
//! conversation data model (roles, turn messages, the append-only transcript)
//! and the language-generation abstraction used once per conversational turn.

pub mod convo;
pub mod llm;

pub use convo::{Role, TranscriptEntry, TurnMessage, goal_matched};
pub use llm::{LlmClient, LlmProvider, OpenAiCompatibleClient};
