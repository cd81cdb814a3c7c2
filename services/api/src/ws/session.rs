//! Manages the media-stream WebSocket lifecycle for a call session.
//!
//! One connection carries one call. The handler waits for the protocol's
//! `start` frame, routes the stream to its session by the `callId` parameter,
//! opens the recognition stream, and then runs the event loop that multiplexes
//! inbound audio, recognition events, turn results, timers, and external end
//! requests until the call is over.

use super::{
    call::{CallSession, EndReason, TurnOutcome, run_turn},
    protocol::{InboundFrame, OutboundFrame, StreamStart, decode_inbound},
};
use crate::{
    providers::deepgram::{Recognizer, SttEvent},
    state::AppState,
};
use anyhow::Result;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    sync::{Mutex, mpsc},
    time::Instant,
};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Quiet time on the inbound audio stream before the session's own silence
/// timer dispatches a turn. Slightly longer than the provider's
/// end-of-utterance window so the provider signal usually wins.
const SILENCE_WINDOW: Duration = Duration::from_millis(1500);

type SharedSession = Arc<Mutex<CallSession>>;

/// Axum handler to upgrade an HTTP connection to a media-stream WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Entry point for a new media-stream connection: handshake, session routing,
/// recognition setup, event loop, wind-down.
#[instrument(name = "media_stream", skip_all, fields(call_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("New media-stream connection. Awaiting start frame...");
    let (mut socket_tx, mut socket_rx) = socket.split();

    let Some(start) = await_start_frame(&mut socket_rx).await else {
        info!("Media stream closed before announcing itself");
        return;
    };

    // Route to the owning session via the callId parameter we attached when
    // placing the call. Unroutable streams are closed immediately.
    let call_id = start
        .custom_parameters
        .get("callId")
        .and_then(|raw| Uuid::parse_str(raw).ok());
    let Some(call_id) = call_id else {
        warn!(stream_sid = %start.stream_sid, "Start frame carried no routable callId; closing");
        let _ = socket_tx.close().await;
        return;
    };
    tracing::Span::current().record("call_id", call_id.to_string());

    let Some(session) = state.manager.get(&call_id) else {
        warn!("No session registered for this call id; closing");
        let _ = socket_tx.close().await;
        return;
    };

    // Register the end channel before doing anything slow. An external end
    // request arriving while providers are still connecting must reach this
    // loop; taking the registry's direct path at that point would strand a
    // live call behind a deregistered id.
    let (end_tx, end_rx) = mpsc::channel(4);
    state.manager.register_end_channel(&call_id, end_tx);

    // Attach and speak the opening line before any user input is consumed.
    let (opening_frames, stt_api_key) = {
        let mut guard = session.lock().await;
        if let Err(e) = guard.attach(&start) {
            warn!(error = %e, "Rejecting duplicate transport for live session");
            let _ = socket_tx.close().await;
            return;
        }
        let frames = guard.play_opening().await;
        (frames, guard.stt_api_key().to_string())
    };
    if send_frames(&mut socket_tx, &opening_frames).await.is_err() {
        wind_down(
            &state,
            &session,
            call_id,
            EndReason::TransportError("media stream send failed".to_string()),
        )
        .await;
        return;
    }

    // The recognition stream is mandatory: without it no user speech can ever
    // be heard, so a connection failure fails the call.
    let format = session.lock().await.format().clone();
    let recognizer = match Recognizer::start(&stt_api_key, &format).await {
        Ok(recognizer) => recognizer,
        Err(e) => {
            error!(error = ?e, "Failed to open recognition stream");
            wind_down(
                &state,
                &session,
                call_id,
                EndReason::TransportError("speech recognition unavailable".to_string()),
            )
            .await;
            let _ = socket_tx.close().await;
            return;
        }
    };

    let reason = run_call_session(&mut socket_tx, socket_rx, &session, recognizer, end_rx).await;

    // An externally requested end discards any audio the provider still has
    // buffered, so the callee is not left listening to a ghost.
    if matches!(reason, EndReason::Requested(_)) {
        let stream_ref = session.lock().await.stream_ref().map(str::to_string);
        if let Some(stream_sid) = stream_ref {
            let _ = send_frames(&mut socket_tx, &[OutboundFrame::Clear { stream_sid }]).await;
        }
    }

    wind_down(&state, &session, call_id, reason).await;
    let _ = socket_tx.close().await;
    info!("Media stream closed and call session terminated");
}

/// Reads frames until the protocol's `start` frame arrives. The `connected`
/// preamble and anything malformed is skipped.
async fn await_start_frame<R>(socket_rx: &mut R) -> Option<StreamStart>
where
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        match socket_rx.next().await {
            Some(Ok(Message::Text(text))) => match decode_inbound(&text) {
                Some(InboundFrame::Start { start }) => return Some(start),
                Some(InboundFrame::Stop) => return None,
                Some(InboundFrame::Connected)
                | Some(InboundFrame::Media { .. })
                | Some(InboundFrame::Mark { .. })
                | None => continue,
            },
            Some(Ok(Message::Close(_))) | None => return None,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                warn!(error = %e, "Media stream errored during handshake");
                return None;
            }
        }
    }
}

/// The main event loop for an active call. Returns the reason the call ended;
/// the caller applies it and deregisters the session.
async fn run_call_session<S, R>(
    socket_tx: &mut S,
    mut socket_rx: R,
    session: &SharedSession,
    mut recognizer: Recognizer,
    mut end_rx: mpsc::Receiver<EndReason>,
) -> EndReason
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let (turn_tx, mut turn_rx) = mpsc::channel::<TurnOutcome>(1);

    let max_duration = session.lock().await.max_duration();
    let silence = tokio::time::sleep(SILENCE_WINDOW);
    tokio::pin!(silence);
    let max_timer = tokio::time::sleep(max_duration);
    tokio::pin!(max_timer);

    // Losing recognition mid-call is not fatal: any in-flight turn still
    // completes and plays out, but no further turns can be triggered.
    let mut stt_alive = true;

    let reason = loop {
        tokio::select! {
            frame = socket_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => match decode_inbound(&text) {
                    Some(InboundFrame::Media { media }) => {
                        if let Some(audio) = media.decode() {
                            silence.as_mut().reset(Instant::now() + SILENCE_WINDOW);
                            if stt_alive {
                                recognizer.send_audio(Bytes::from(audio)).await;
                            }
                        }
                    }
                    Some(InboundFrame::Stop) => break EndReason::RemoteHangup,
                    Some(InboundFrame::Mark { mark }) => {
                        debug!(mark = %mark.name, "Playback completed");
                    }
                    Some(InboundFrame::Connected) | Some(InboundFrame::Start { .. }) | None => {}
                },
                Some(Ok(Message::Close(_))) | None => break EndReason::RemoteHangup,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    break EndReason::TransportError(format!("media stream receive failed: {}", e));
                }
            },
            event = recognizer.next_event(), if stt_alive => match event {
                Some(SttEvent::Transcript { text, is_final, confidence }) => {
                    session.lock().await.on_transcript(&text, is_final, confidence);
                }
                Some(SttEvent::UtteranceEnd) => {
                    dispatch_turn(session, &turn_tx).await;
                }
                Some(SttEvent::Closed) | None => {
                    warn!("Recognition stream closed; call continues without new turns");
                    stt_alive = false;
                }
            },
            () = &mut silence => {
                silence.as_mut().reset(Instant::now() + SILENCE_WINDOW);
                dispatch_turn(session, &turn_tx).await;
            },
            () = &mut max_timer => break EndReason::MaxDurationReached,
            Some(outcome) = turn_rx.recv() => {
                let frames = session.lock().await.complete_turn(outcome);
                if send_frames(socket_tx, &frames).await.is_err() {
                    break EndReason::TransportError("media stream send failed".to_string());
                }
            },
            Some(reason) = end_rx.recv() => break reason,
        }
    };

    recognizer.close();
    reason
}

/// Tries to claim a turn and, on success, runs its pipeline in a spawned task
/// so inbound audio keeps flowing while providers are awaited. Both triggers
/// (provider utterance-end and the silence timer) land here; the session's
/// single-flight claim makes the second one a no-op.
async fn dispatch_turn(session: &SharedSession, turn_tx: &mpsc::Sender<TurnOutcome>) {
    let ctx = session.lock().await.begin_turn();
    if let Some(ctx) = ctx {
        debug!(mark = %ctx.mark, "Dispatching conversation turn");
        let turn_tx = turn_tx.clone();
        tokio::spawn(async move {
            let outcome = run_turn(ctx).await;
            let _ = turn_tx.send(outcome).await;
        });
    }
}

/// Applies the end reason to the session and deregisters it. The session's
/// own idempotence makes this safe against racing end paths.
async fn wind_down(
    state: &Arc<AppState>,
    session: &SharedSession,
    call_id: Uuid,
    reason: EndReason,
) {
    session.lock().await.end(reason);
    state.manager.remove(&call_id);
}

/// Serializes and sends a batch of outbound frames.
async fn send_frames<S>(socket_tx: &mut S, frames: &[OutboundFrame]) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    for frame in frames {
        let serialized = serde_json::to_string(frame)?;
        socket_tx.send(Message::Text(serialized.into())).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MediaFormat;
    use crate::models::CallConfig;
    use crate::notify::LifecycleNotifier;
    use crate::providers::{SpeechSynthesizer, TtsError};
    use crate::ws::call::CallState;
    use aria_core::{LlmClient, TurnMessage};
    use async_trait::async_trait;
    use futures_util::{sink, stream};
    use std::collections::HashMap;

    struct NoopLlm;

    #[async_trait]
    impl LlmClient for NoopLlm {
        async fn generate(&self, _: &str, _: &[TurnMessage]) -> anyhow::Result<String> {
            Ok(String::new())
        }
    }

    struct NoopTts;

    #[async_trait]
    impl SpeechSynthesizer for NoopTts {
        async fn synthesize_voice(&self, _: &str, _: &str) -> Result<Bytes, TtsError> {
            Ok(Bytes::new())
        }
    }

    async fn make_active_session(max_duration_secs: u64) -> SharedSession {
        let mut session = CallSession::new(
            Uuid::new_v4(),
            "acme".to_string(),
            CallConfig {
                system_prompt: "You are Aria.".to_string(),
                goal_phrases: vec![],
                voice: None,
                opening_line: None,
                max_duration_secs,
                llm_provider: None,
                chat_model: None,
                tts_provider: None,
            },
            Arc::new(NoopLlm),
            Arc::new(NoopTts),
            "fallback".to_string(),
            "dg-test-key".to_string(),
            Arc::new(LifecycleNotifier::new(None)),
        );
        session
            .attach(&StreamStart {
                stream_sid: "MZ1".to_string(),
                call_sid: "CA1".to_string(),
                media_format: MediaFormat::default(),
                custom_parameters: HashMap::new(),
            })
            .unwrap();
        let _ = session.play_opening().await;
        Arc::new(Mutex::new(session))
    }

    fn channel_recognizer() -> (
        Recognizer,
        mpsc::Receiver<Bytes>,
        mpsc::Sender<SttEvent>,
    ) {
        let (audio_tx, audio_rx) = mpsc::channel(8);
        let (events_tx, events_rx) = mpsc::channel(8);
        (
            Recognizer::channel_backed(audio_tx, events_rx),
            audio_rx,
            events_tx,
        )
    }

    fn idle_socket() -> impl Stream<Item = Result<Message, axum::Error>> + Unpin {
        stream::pending()
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_end_request_breaks_loop_before_timers() {
        let session = make_active_session(60).await;
        let (recognizer, _audio_rx, _events_tx) = channel_recognizer();
        let (end_tx, end_rx) = mpsc::channel(4);
        end_tx
            .send(EndReason::Requested("api request".to_string()))
            .await
            .unwrap();

        let mut socket_tx = sink::drain();
        let reason =
            run_call_session(&mut socket_tx, idle_socket(), &session, recognizer, end_rx).await;

        assert!(matches!(reason, EndReason::Requested(_)));
        // Both timers were armed but never got to act: no turn was dispatched
        // and no generation is in flight.
        let guard = session.lock().await;
        assert!(guard.turn_messages().is_empty());
        assert!(!guard.is_generating());
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_duration_timer_ends_idle_call() {
        let session = make_active_session(60).await;
        let (recognizer, _audio_rx, _events_tx) = channel_recognizer();
        let (_end_tx, end_rx) = mpsc::channel(4);

        let mut socket_tx = sink::drain();
        let reason =
            run_call_session(&mut socket_tx, idle_socket(), &session, recognizer, end_rx).await;

        assert!(matches!(reason, EndReason::MaxDurationReached));
        // The silence timer fired repeatedly along the way with nothing
        // pending; no spurious turn came out of pure silence.
        assert!(session.lock().await.turn_messages().is_empty());
        assert_eq!(session.lock().await.state(), CallState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_stop_breaks_loop() {
        let session = make_active_session(60).await;
        let (recognizer, _audio_rx, _events_tx) = channel_recognizer();
        let (_end_tx, end_rx) = mpsc::channel(4);

        let mut socket_tx = sink::drain();
        let socket_rx = stream::iter(vec![Ok::<Message, axum::Error>(Message::Text(
            r#"{"event":"stop","streamSid":"MZ1"}"#.into(),
        ))])
        .chain(stream::pending());
        let reason =
            run_call_session(&mut socket_tx, socket_rx, &session, recognizer, end_rx).await;

        assert!(matches!(reason, EndReason::RemoteHangup));
    }
}
