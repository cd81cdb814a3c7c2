//! Per-call session state machine.
//!
//! A session moves `pending -> connected -> active -> ended` and owns the
//! conversational state of exactly one phone call: the context window sent to
//! the language model, the append-only transcript, the accumulator for the
//! utterance currently being recognized, and the single-flight guard that
//! keeps turns strictly sequential. The event loop in `session.rs` drives it;
//! everything here is plain state manipulation, which keeps it testable
//! without sockets.

use crate::{
    audio::MediaFormat,
    models::{CallConfig, CallStatus, LifecycleEvent},
    notify::LifecycleNotifier,
    providers::{SpeechSynthesizer, synthesize_with_fallback},
    ws::protocol::{OutboundFrame, StreamStart, encode_outbound},
};
use anyhow::{Result, bail};
use aria_core::{LlmClient, Role, TranscriptEntry, TurnMessage, goal_matched};
use bytes::Bytes;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle states. There are no transitions out of `Ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Pending,
    Connected,
    Active,
    Ended,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The remote side closed the media stream (`stop` frame).
    RemoteHangup,
    /// The max-duration ceiling fired.
    MaxDurationReached,
    /// An external caller asked for the call to end.
    Requested(String),
    /// The transport or a mandatory provider connection failed.
    TransportError(String),
}

impl EndReason {
    fn status(&self) -> CallStatus {
        match self {
            EndReason::RemoteHangup | EndReason::Requested(_) => CallStatus::Completed,
            EndReason::MaxDurationReached | EndReason::TransportError(_) => CallStatus::Failed,
        }
    }
}

/// Everything the spawned turn pipeline needs, detached from the session so
/// inbound audio keeps flowing while the pipeline awaits its providers.
pub struct TurnContext {
    pub call_id: Uuid,
    pub mark: String,
    system_prompt: String,
    history: Vec<TurnMessage>,
    voice: String,
    fallback_voice: String,
    llm: Arc<dyn LlmClient>,
    tts: Arc<dyn SpeechSynthesizer>,
}

/// Result of one generation+synthesis cycle. An empty `assistant_text` means
/// "say nothing this turn".
#[derive(Debug)]
pub struct TurnOutcome {
    pub assistant_text: String,
    pub audio: Bytes,
    pub mark: String,
}

/// Runs the generation+synthesis pipeline for one claimed turn.
///
/// Provider failures degrade to a silent turn, never an error: the phone-call
/// participant experiences at worst a skipped response.
pub async fn run_turn(ctx: TurnContext) -> TurnOutcome {
    let silent = |mark: &str| TurnOutcome {
        assistant_text: String::new(),
        audio: Bytes::new(),
        mark: mark.to_string(),
    };

    let reply = match ctx.llm.generate(&ctx.system_prompt, &ctx.history).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(call_id = %ctx.call_id, error = ?e, "Generation failed; skipping turn");
            return silent(&ctx.mark);
        }
    };
    if reply.trim().is_empty() {
        debug!(call_id = %ctx.call_id, "Empty generation; skipping turn");
        return silent(&ctx.mark);
    }

    match synthesize_with_fallback(ctx.tts.as_ref(), &reply, &ctx.voice, &ctx.fallback_voice).await
    {
        Ok(audio) => TurnOutcome {
            assistant_text: reply,
            audio,
            mark: ctx.mark,
        },
        Err(e) => {
            // Appending text the callee never heard would desynchronize the
            // context window from the actual conversation, so the turn is
            // skipped entirely.
            warn!(call_id = %ctx.call_id, error = %e, "Synthesis failed; skipping turn");
            silent(&ctx.mark)
        }
    }
}

pub struct CallSession {
    pub call_id: Uuid,
    pub tenant_id: String,
    config: CallConfig,
    state: CallState,
    provider_call_ref: Option<String>,
    provider_stream_ref: Option<String>,
    format: MediaFormat,
    turn_messages: Vec<TurnMessage>,
    transcript_log: Vec<TranscriptEntry>,
    pending_utterance: String,
    pending_confidence: Option<f64>,
    goal_achieved: bool,
    is_generating: Arc<AtomicBool>,
    turn_seq: u64,
    connected_at: Option<Instant>,
    voice: String,
    fallback_voice: String,
    stt_api_key: String,
    llm: Arc<dyn LlmClient>,
    tts: Arc<dyn SpeechSynthesizer>,
    notifier: Arc<LifecycleNotifier>,
}

impl CallSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        call_id: Uuid,
        tenant_id: String,
        config: CallConfig,
        llm: Arc<dyn LlmClient>,
        tts: Arc<dyn SpeechSynthesizer>,
        fallback_voice: String,
        stt_api_key: String,
        notifier: Arc<LifecycleNotifier>,
    ) -> Self {
        let voice = config
            .voice
            .clone()
            .unwrap_or_else(|| fallback_voice.clone());
        Self {
            call_id,
            tenant_id,
            config,
            state: CallState::Pending,
            provider_call_ref: None,
            provider_stream_ref: None,
            format: MediaFormat::default(),
            turn_messages: Vec::new(),
            transcript_log: Vec::new(),
            pending_utterance: String::new(),
            pending_confidence: None,
            goal_achieved: false,
            is_generating: Arc::new(AtomicBool::new(false)),
            turn_seq: 0,
            connected_at: None,
            voice,
            fallback_voice,
            stt_api_key,
            llm,
            tts,
            notifier,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn goal_achieved(&self) -> bool {
        self.goal_achieved
    }

    pub fn is_generating(&self) -> bool {
        self.is_generating.load(Ordering::SeqCst)
    }

    pub fn turn_messages(&self) -> &[TurnMessage] {
        &self.turn_messages
    }

    pub fn transcript_log(&self) -> &[TranscriptEntry] {
        &self.transcript_log
    }

    pub fn format(&self) -> &MediaFormat {
        &self.format
    }

    pub fn stream_ref(&self) -> Option<&str> {
        self.provider_stream_ref.as_deref()
    }

    /// The recognition credential resolved for this call (per-call override
    /// or the service-level key).
    pub fn stt_api_key(&self) -> &str {
        &self.stt_api_key
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.config.max_duration_secs)
    }

    /// Records the provider's call reference, assigned when the outbound call
    /// is placed. Set exactly once.
    pub fn set_provider_call_ref(&mut self, call_ref: String) {
        if self.provider_call_ref.is_none() {
            self.provider_call_ref = Some(call_ref);
        }
    }

    /// Binds the media stream to this session: `pending -> connected`.
    ///
    /// Exactly one live transport may be attached over a session's lifetime;
    /// a second attach attempt is an error the caller must treat as fatal for
    /// the new connection, not for the session.
    pub fn attach(&mut self, start: &StreamStart) -> Result<()> {
        if self.state != CallState::Pending {
            bail!(
                "session {} is not awaiting a transport (state {:?})",
                self.call_id,
                self.state
            );
        }
        self.provider_stream_ref = Some(start.stream_sid.clone());
        if self.provider_call_ref.is_none() {
            self.provider_call_ref = Some(start.call_sid.clone());
        }
        self.format = start.media_format.clone();
        self.connected_at = Some(Instant::now());
        self.state = CallState::Connected;
        info!(call_id = %self.call_id, stream_sid = %start.stream_sid, "Transport attached");
        self.notifier
            .notify(LifecycleEvent::status(self.call_id, CallStatus::InProgress));
        Ok(())
    }

    /// Speaks the configured opening line (if any) and enters `active`.
    /// Runs before any user input is processed.
    pub async fn play_opening(&mut self) -> Vec<OutboundFrame> {
        debug_assert_eq!(self.state, CallState::Connected);
        let mut frames = Vec::new();
        if let Some(line) = self.config.opening_line.clone() {
            match synthesize_with_fallback(
                self.tts.as_ref(),
                &line,
                &self.voice,
                &self.fallback_voice,
            )
            .await
            {
                Ok(audio) => {
                    self.turn_messages
                        .push(TurnMessage::new(Role::Assistant, line.clone()));
                    self.transcript_log
                        .push(TranscriptEntry::now(Role::Assistant, line));
                    frames = self.encode_audio(&audio, "opening");
                }
                Err(e) => {
                    warn!(call_id = %self.call_id, error = %e, "Opening line synthesis failed; continuing without it");
                }
            }
        }
        self.state = CallState::Active;
        frames
    }

    /// Feeds one recognition result. Interim results exist for debugging only
    /// and never affect session state; final results accumulate into the
    /// pending utterance for the next turn.
    pub fn on_transcript(&mut self, text: &str, is_final: bool, confidence: f64) {
        if self.state == CallState::Ended {
            return;
        }
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !is_final {
            debug!(call_id = %self.call_id, interim = text, "Interim transcript");
            return;
        }
        if !self.pending_utterance.is_empty() {
            self.pending_utterance.push(' ');
        }
        self.pending_utterance.push_str(text);
        self.pending_confidence = Some(confidence);
    }

    /// Claims the next turn, if there is one to dispatch.
    ///
    /// Both turn triggers (provider utterance-end and the session's silence
    /// timer) funnel through here; the compare-and-set on `is_generating` is
    /// the single-flight claim, so whichever trigger arrives second is a
    /// no-op even if they fire back to back.
    pub fn begin_turn(&mut self) -> Option<TurnContext> {
        if self.state != CallState::Active {
            return None;
        }
        if self.pending_utterance.trim().is_empty() {
            return None;
        }
        if self
            .is_generating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(call_id = %self.call_id, "Turn already in flight; ignoring dispatch trigger");
            return None;
        }

        let user_text = std::mem::take(&mut self.pending_utterance);
        let confidence = self.pending_confidence.take();

        if !self.goal_achieved && goal_matched(&user_text, &self.config.goal_phrases) {
            self.goal_achieved = true;
            info!(call_id = %self.call_id, "Conversation goal achieved");
            let mut event = LifecycleEvent::status(self.call_id, CallStatus::InProgress);
            event.goal_achieved = Some(true);
            self.notifier.notify(event);
        }

        self.turn_messages
            .push(TurnMessage::new(Role::User, user_text.clone()));
        let mut entry = TranscriptEntry::now(Role::User, user_text);
        if let Some(confidence) = confidence {
            entry = entry.with_confidence(confidence);
        }
        self.transcript_log.push(entry);

        self.turn_seq += 1;
        Some(TurnContext {
            call_id: self.call_id,
            mark: format!("turn-{}", self.turn_seq),
            system_prompt: self.config.system_prompt.clone(),
            history: self.turn_messages.clone(),
            voice: self.voice.clone(),
            fallback_voice: self.fallback_voice.clone(),
            llm: self.llm.clone(),
            tts: self.tts.clone(),
        })
    }

    /// Applies the result of a finished turn pipeline and releases the
    /// single-flight guard. Returns the frames to enqueue on the transport;
    /// empty for a silent turn or a result that arrived after the session
    /// ended (late results are discarded, not replayed).
    pub fn complete_turn(&mut self, outcome: TurnOutcome) -> Vec<OutboundFrame> {
        if self.state == CallState::Ended {
            debug!(call_id = %self.call_id, "Discarding turn result that arrived after session end");
            return Vec::new();
        }
        self.is_generating.store(false, Ordering::SeqCst);

        if outcome.assistant_text.is_empty() {
            return Vec::new();
        }
        self.turn_messages
            .push(TurnMessage::new(Role::Assistant, outcome.assistant_text.clone()));
        self.transcript_log
            .push(TranscriptEntry::now(Role::Assistant, outcome.assistant_text));

        let mut event = LifecycleEvent::status(self.call_id, CallStatus::InProgress);
        event.transcript = Some(self.transcript_log.clone());
        event.goal_achieved = Some(self.goal_achieved);
        self.notifier.notify(event);

        self.encode_audio(&outcome.audio, &outcome.mark)
    }

    /// Terminal transition. Idempotent: only the first call produces the
    /// final lifecycle event; repeats return `None`.
    pub fn end(&mut self, reason: EndReason) -> Option<LifecycleEvent> {
        if self.state == CallState::Ended {
            return None;
        }
        self.state = CallState::Ended;
        let duration_seconds = self
            .connected_at
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0);
        let error_message = match &reason {
            EndReason::MaxDurationReached => Some(format!(
                "max call duration of {}s reached",
                self.config.max_duration_secs
            )),
            EndReason::TransportError(msg) => Some(msg.clone()),
            EndReason::RemoteHangup | EndReason::Requested(_) => None,
        };
        info!(call_id = %self.call_id, reason = ?reason, duration_seconds, "Call ended");

        self.transcript_log.push(TranscriptEntry::now(
            Role::System,
            match &reason {
                EndReason::RemoteHangup => "call ended: remote hangup".to_string(),
                EndReason::MaxDurationReached => "call ended: duration ceiling".to_string(),
                EndReason::Requested(who) => format!("call ended: requested ({})", who),
                EndReason::TransportError(msg) => format!("call ended: {}", msg),
            },
        ));

        let event = LifecycleEvent {
            call_id: self.call_id,
            status: reason.status(),
            transcript: Some(self.transcript_log.clone()),
            goal_achieved: Some(self.goal_achieved),
            duration_seconds: Some(duration_seconds),
            error_message,
        };
        self.notifier.notify(event.clone());
        Some(event)
    }

    fn encode_audio(&self, audio: &[u8], mark: &str) -> Vec<OutboundFrame> {
        let Some(stream_sid) = self.provider_stream_ref.as_deref() else {
            warn!(call_id = %self.call_id, "No stream attached; dropping synthesized audio");
            return Vec::new();
        };
        encode_outbound(audio, stream_sid, mark, &self.format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::TtsError;
    use async_trait::async_trait;
    use mockall::mock;
    use std::collections::HashMap;

    mock! {
        Llm {}

        #[async_trait]
        impl LlmClient for Llm {
            async fn generate(&self, system_prompt: &str, history: &[TurnMessage]) -> anyhow::Result<String>;
        }
    }

    mock! {
        Tts {}

        #[async_trait]
        impl SpeechSynthesizer for Tts {
            async fn synthesize_voice(&self, text: &str, voice: &str) -> Result<Bytes, TtsError>;
        }
    }

    fn test_config() -> CallConfig {
        CallConfig {
            system_prompt: "You are Aria.".to_string(),
            goal_phrases: vec!["let's do it".to_string()],
            voice: Some("custom-voice".to_string()),
            opening_line: None,
            max_duration_secs: 60,
            llm_provider: None,
            chat_model: None,
            tts_provider: None,
        }
    }

    fn test_start() -> StreamStart {
        StreamStart {
            stream_sid: "MZ123".to_string(),
            call_sid: "CA123".to_string(),
            media_format: MediaFormat::default(),
            custom_parameters: HashMap::new(),
        }
    }

    fn make_session(config: CallConfig, llm: MockLlm, tts: MockTts) -> CallSession {
        CallSession::new(
            Uuid::new_v4(),
            "acme".to_string(),
            config,
            Arc::new(llm),
            Arc::new(tts),
            "fallback-voice".to_string(),
            "dg-test-key".to_string(),
            Arc::new(LifecycleNotifier::new(None)),
        )
    }

    async fn make_active(session: &mut CallSession) {
        session.attach(&test_start()).unwrap();
        let _ = session.play_opening().await;
        assert_eq!(session.state(), CallState::Active);
    }

    #[tokio::test]
    async fn test_opening_line_is_first_transcript_entry() {
        let mut config = test_config();
        config.opening_line = Some("Hello, this is Aria.".to_string());
        let mut tts = MockTts::new();
        tts.expect_synthesize_voice()
            .times(1)
            .returning(|_, _| Ok(Bytes::from(vec![0u8; 320])));
        let mut session = make_session(config, MockLlm::new(), tts);

        session.attach(&test_start()).unwrap();
        let frames = session.play_opening().await;

        let first = &session.transcript_log()[0];
        assert_eq!(first.role, Role::Assistant);
        assert_eq!(first.text, "Hello, this is Aria.");
        assert_eq!(session.turn_messages().len(), 1);
        // 320 bytes = 2 chunks + 1 mark.
        assert_eq!(frames.len(), 3);
        assert_eq!(session.state(), CallState::Active);
    }

    #[tokio::test]
    async fn test_attach_twice_is_rejected() {
        let mut session = make_session(test_config(), MockLlm::new(), MockTts::new());
        session.attach(&test_start()).unwrap();
        assert!(session.attach(&test_start()).is_err());
    }

    #[tokio::test]
    async fn test_attach_after_end_is_rejected() {
        // A session ended before its media stream arrived (e.g. an external
        // end request during dialing) must reject the late transport instead
        // of coming back to life on an unaddressable id.
        let mut session = make_session(test_config(), MockLlm::new(), MockTts::new());
        session.end(EndReason::Requested("api request".to_string()));

        assert!(session.attach(&test_start()).is_err());
        assert_eq!(session.state(), CallState::Ended);
    }

    #[tokio::test]
    async fn test_single_flight_claim() {
        let mut session = make_session(test_config(), MockLlm::new(), MockTts::new());
        make_active(&mut session).await;

        session.on_transcript("hello there", true, 0.9);
        let first = session.begin_turn();
        assert!(first.is_some());
        assert!(session.is_generating());

        // A second trigger with new pending text must be a no-op while the
        // first turn is in flight.
        session.on_transcript("more words", true, 0.9);
        assert!(session.begin_turn().is_none());
    }

    #[tokio::test]
    async fn test_silence_with_empty_pending_never_dispatches() {
        let mut session = make_session(test_config(), MockLlm::new(), MockTts::new());
        make_active(&mut session).await;

        assert!(session.begin_turn().is_none());
        assert!(!session.is_generating());
    }

    #[tokio::test]
    async fn test_interim_transcripts_do_not_affect_state() {
        let mut session = make_session(test_config(), MockLlm::new(), MockTts::new());
        make_active(&mut session).await;

        session.on_transcript("hello th", false, 0.4);
        assert!(session.begin_turn().is_none());
        assert!(session.turn_messages().is_empty());
    }

    #[tokio::test]
    async fn test_goal_detection_on_turn_dispatch() {
        let mut session = make_session(test_config(), MockLlm::new(), MockTts::new());
        make_active(&mut session).await;

        session.on_transcript("Sure, let's do it", true, 0.95);
        session.begin_turn().unwrap();
        assert!(session.goal_achieved());
    }

    #[tokio::test]
    async fn test_no_goal_on_non_matching_speech() {
        let mut session = make_session(test_config(), MockLlm::new(), MockTts::new());
        make_active(&mut session).await;

        session.on_transcript("no thanks", true, 0.95);
        session.begin_turn().unwrap();
        assert!(!session.goal_achieved());
    }

    #[tokio::test]
    async fn test_empty_turn_outcome_clears_guard_without_speech() {
        let mut session = make_session(test_config(), MockLlm::new(), MockTts::new());
        make_active(&mut session).await;

        session.on_transcript("hello", true, 0.9);
        let ctx = session.begin_turn().unwrap();
        let frames = session.complete_turn(TurnOutcome {
            assistant_text: String::new(),
            audio: Bytes::new(),
            mark: ctx.mark,
        });

        assert!(frames.is_empty());
        assert!(!session.is_generating());
        // User entry only; no assistant entry was appended.
        assert_eq!(session.turn_messages().len(), 1);
    }

    #[tokio::test]
    async fn test_complete_turn_appends_and_encodes() {
        let mut session = make_session(test_config(), MockLlm::new(), MockTts::new());
        make_active(&mut session).await;

        session.on_transcript("hello", true, 0.9);
        let ctx = session.begin_turn().unwrap();
        let frames = session.complete_turn(TurnOutcome {
            assistant_text: "Hi! How can I help?".to_string(),
            audio: Bytes::from(vec![0u8; 160]),
            mark: ctx.mark,
        });

        assert_eq!(frames.len(), 2); // one media chunk + mark
        assert!(matches!(
            frames.last(),
            Some(OutboundFrame::Mark { mark, .. }) if mark.name == "turn-1"
        ));
        let roles: Vec<Role> = session.turn_messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
        assert!(!session.is_generating());
    }

    #[tokio::test]
    async fn test_transcript_is_append_only_across_turns() {
        let mut session = make_session(test_config(), MockLlm::new(), MockTts::new());
        make_active(&mut session).await;

        let mut last_len = 0;
        for i in 0..3 {
            session.on_transcript(&format!("utterance {}", i), true, 0.9);
            let ctx = session.begin_turn().unwrap();
            session.complete_turn(TurnOutcome {
                assistant_text: format!("reply {}", i),
                audio: Bytes::from(vec![0u8; 160]),
                mark: ctx.mark,
            });
            assert!(session.transcript_log().len() > last_len);
            last_len = session.transcript_log().len();
        }
        assert_eq!(session.transcript_log().len(), 6);
    }

    #[tokio::test]
    async fn test_end_is_idempotent() {
        let mut session = make_session(test_config(), MockLlm::new(), MockTts::new());
        make_active(&mut session).await;

        let event = session.end(EndReason::RemoteHangup);
        assert!(event.is_some());
        assert_eq!(session.state(), CallState::Ended);

        assert!(session.end(EndReason::Requested("api".to_string())).is_none());
    }

    #[tokio::test]
    async fn test_max_duration_end_carries_ceiling_message() {
        let mut session = make_session(test_config(), MockLlm::new(), MockTts::new());
        make_active(&mut session).await;

        let event = session.end(EndReason::MaxDurationReached).unwrap();
        assert_eq!(event.status, CallStatus::Failed);
        assert_eq!(
            event.error_message.as_deref(),
            Some("max call duration of 60s reached")
        );
        assert!(event.duration_seconds.is_some());
    }

    #[tokio::test]
    async fn test_late_turn_result_discarded_after_end() {
        let mut session = make_session(test_config(), MockLlm::new(), MockTts::new());
        make_active(&mut session).await;

        session.on_transcript("hello", true, 0.9);
        let ctx = session.begin_turn().unwrap();
        session.end(EndReason::RemoteHangup);

        let before = session.transcript_log().len();
        let frames = session.complete_turn(TurnOutcome {
            assistant_text: "too late".to_string(),
            audio: Bytes::from(vec![0u8; 160]),
            mark: ctx.mark,
        });

        assert!(frames.is_empty());
        assert_eq!(session.transcript_log().len(), before);
    }

    #[tokio::test]
    async fn test_dispatch_after_end_is_dropped() {
        let mut session = make_session(test_config(), MockLlm::new(), MockTts::new());
        make_active(&mut session).await;

        session.on_transcript("hello", true, 0.9);
        session.end(EndReason::RemoteHangup);
        assert!(session.begin_turn().is_none());
    }

    #[tokio::test]
    async fn test_run_turn_happy_path() {
        let mut llm = MockLlm::new();
        llm.expect_generate()
            .times(1)
            .returning(|_, _| Ok("Certainly!".to_string()));
        let mut tts = MockTts::new();
        tts.expect_synthesize_voice()
            .withf(|text, voice| text == "Certainly!" && voice == "custom-voice")
            .times(1)
            .returning(|_, _| Ok(Bytes::from(vec![1u8; 160])));
        let mut session = make_session(test_config(), llm, tts);
        make_active(&mut session).await;

        session.on_transcript("question", true, 0.9);
        let ctx = session.begin_turn().unwrap();
        let outcome = run_turn(ctx).await;

        assert_eq!(outcome.assistant_text, "Certainly!");
        assert_eq!(outcome.audio.len(), 160);
    }

    #[tokio::test]
    async fn test_run_turn_generation_failure_is_silent() {
        let mut llm = MockLlm::new();
        llm.expect_generate()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("provider timeout")));
        let mut tts = MockTts::new();
        tts.expect_synthesize_voice().times(0);
        let mut session = make_session(test_config(), llm, tts);
        make_active(&mut session).await;

        session.on_transcript("question", true, 0.9);
        let ctx = session.begin_turn().unwrap();
        let outcome = run_turn(ctx).await;

        assert!(outcome.assistant_text.is_empty());
        assert!(outcome.audio.is_empty());
    }

    #[tokio::test]
    async fn test_run_turn_synthesis_failure_skips_turn() {
        let mut llm = MockLlm::new();
        llm.expect_generate()
            .times(1)
            .returning(|_, _| Ok("Certainly!".to_string()));
        let mut tts = MockTts::new();
        // Rejection of both configured and fallback voice.
        tts.expect_synthesize_voice().times(2).returning(|_, voice| {
            Err(TtsError::VoiceRejected {
                voice: voice.to_string(),
                status: 403,
            })
        });
        let mut session = make_session(test_config(), llm, tts);
        make_active(&mut session).await;

        session.on_transcript("question", true, 0.9);
        let ctx = session.begin_turn().unwrap();
        let outcome = run_turn(ctx).await;

        assert!(outcome.assistant_text.is_empty());
    }
}
