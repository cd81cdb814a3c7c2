//! Language generation behind a provider-agnostic trait.
//!
//! The call session depends only on [`LlmClient`]. Both supported vendors
//! (OpenAI and Gemini) speak the OpenAI chat-completions protocol, so a single
//! [`OpenAiCompatibleClient`] covers both by pointing at the matching API base;
//! which one is used is purely a configuration decision.

use crate::convo::{Role, TurnMessage};
use anyhow::Result;
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Replies are spoken aloud; long completions mean long synthesis latency and
/// unnatural monologues, so the output token budget stays small.
pub const MAX_RESPONSE_TOKENS: u32 = 160;

/// Supported language-generation backends.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    OpenAi,
    Gemini,
}

impl LlmProvider {
    /// OpenAI-compatible API base for the provider.
    pub fn api_base(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "https://api.openai.com/v1/",
            LlmProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
        }
    }
}

/// A generic client for one conversational turn against an LLM.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Produces the assistant reply for the given history.
    ///
    /// An empty string means the provider had nothing usable this turn
    /// (including provider errors and timeouts); callers treat it as "say
    /// nothing", never as a fatal condition.
    async fn generate(&self, system_prompt: &str, history: &[TurnMessage]) -> Result<String>;
}

/// An implementation of [`LlmClient`] for any OpenAI-compatible API.
pub struct OpenAiCompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiCompatibleClient {
    /// Creates a client from an explicit `async-openai` configuration.
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }

    /// Creates a client for the given provider, selecting the matching API base.
    pub fn for_provider(provider: LlmProvider, api_key: &str, model: String) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(provider.api_base());
        Self::new(config, model)
    }
}

/// Builds the wire message list for a chat-completion request.
///
/// `system` entries inside the history are folded into the dedicated
/// system-prompt parameter rather than forwarded as regular messages; the
/// session never needs to know which provider is active.
pub fn build_messages(
    system_prompt: &str,
    history: &[TurnMessage],
) -> Result<Vec<ChatCompletionRequestMessage>> {
    let mut system_text = system_prompt.to_string();
    for msg in history.iter().filter(|m| m.role == Role::System) {
        system_text.push_str("\n\n");
        system_text.push_str(&msg.text);
    }

    let mut messages: Vec<ChatCompletionRequestMessage> = vec![
        ChatCompletionRequestSystemMessageArgs::default()
            .content(system_text)
            .build()?
            .into(),
    ];
    for msg in history {
        match msg.role {
            Role::User => messages.push(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(msg.text.clone())
                    .build()?
                    .into(),
            ),
            Role::Assistant => messages.push(
                ChatCompletionRequestAssistantMessageArgs::default()
                    .content(msg.text.clone())
                    .build()?
                    .into(),
            ),
            Role::System => {}
        }
    }
    Ok(messages)
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn generate(&self, system_prompt: &str, history: &[TurnMessage]) -> Result<String> {
        let messages = build_messages(system_prompt, history)?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .max_completion_tokens(MAX_RESPONSE_TOKENS)
            .stream(true)
            .build()?;

        let mut stream = match self.client.chat().create_stream(request).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = ?e, "Chat completion request failed; skipping this turn");
                return Ok(String::new());
            }
        };

        let mut reply = String::new();
        while let Some(result) = stream.next().await {
            match result {
                Ok(response) => {
                    if let Some(content) = response
                        .choices
                        .first()
                        .and_then(|choice| choice.delta.content.as_ref())
                    {
                        reply.push_str(content);
                    }
                }
                Err(e) => {
                    // Keep whatever arrived before the stream broke.
                    warn!(error = ?e, "Chat completion stream interrupted");
                    break;
                }
            }
        }
        Ok(reply)
    }
}
