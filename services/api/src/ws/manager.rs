//! In-memory registry of live call sessions.
//!
//! Sessions are ephemeral: they exist from call initiation until the final
//! lifecycle event has been produced, then vanish. There is no durable store;
//! the registry is also what graceful shutdown drains.

use crate::ws::call::{CallSession, EndReason};
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::{info, warn};
use uuid::Uuid;

/// How long a drain waits for event loops to process their end requests and
/// deregister before shutdown proceeds without them.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

const DRAIN_POLL: Duration = Duration::from_millis(50);

type SharedSession = std::sync::Arc<Mutex<CallSession>>;

struct SessionEntry {
    session: SharedSession,
    /// Present once a media-stream event loop has attached; sending a reason
    /// asks that loop to wind the call down and deregister.
    end_tx: Option<mpsc::Sender<EndReason>>,
}

#[derive(Default)]
pub struct SessionManager {
    sessions: StdMutex<HashMap<Uuid, SessionEntry>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly-created session under its call id.
    pub fn insert(&self, call_id: Uuid, session: CallSession) -> SharedSession {
        let session = std::sync::Arc::new(Mutex::new(session));
        self.sessions.lock().unwrap().insert(
            call_id,
            SessionEntry {
                session: session.clone(),
                end_tx: None,
            },
        );
        session
    }

    pub fn get(&self, call_id: &Uuid) -> Option<SharedSession> {
        self.sessions
            .lock()
            .unwrap()
            .get(call_id)
            .map(|e| e.session.clone())
    }

    /// Deregisters and returns the session, at most once per call id.
    pub fn remove(&self, call_id: &Uuid) -> Option<SharedSession> {
        self.sessions
            .lock()
            .unwrap()
            .remove(call_id)
            .map(|e| e.session)
    }

    pub fn active_ids(&self) -> Vec<Uuid> {
        self.sessions.lock().unwrap().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().unwrap().is_empty()
    }

    /// Called by the media-stream event loop once it owns a session, so
    /// external end requests can be routed to it. The first registration
    /// wins: a stray duplicate connection (whose attach will be rejected)
    /// must not hijack the live loop's channel.
    pub fn register_end_channel(&self, call_id: &Uuid, end_tx: mpsc::Sender<EndReason>) {
        if let Some(entry) = self.sessions.lock().unwrap().get_mut(call_id) {
            if entry.end_tx.is_none() {
                entry.end_tx = Some(end_tx);
            }
        }
    }

    /// Requests the end of a call. Returns false for unknown call ids.
    ///
    /// A session with a live event loop is asked to end itself so the loop
    /// can flush and close the transport; a session still waiting for its
    /// media stream is ended and deregistered directly.
    pub async fn end_session(&self, call_id: &Uuid, reason: EndReason) -> bool {
        let (session, end_tx) = {
            let sessions = self.sessions.lock().unwrap();
            match sessions.get(call_id) {
                Some(entry) => (entry.session.clone(), entry.end_tx.clone()),
                None => return false,
            }
        };

        if let Some(end_tx) = end_tx {
            if end_tx.send(reason.clone()).await.is_ok() {
                return true;
            }
            // Loop already gone; fall through and end directly.
            warn!(%call_id, "Event loop unreachable; ending session directly");
        }

        session.lock().await.end(reason);
        self.remove(call_id);
        true
    }

    /// Ends every registered session and waits for the corresponding event
    /// loops to wind down and deregister. Used when the service shuts down;
    /// an end request is only queued to its loop, so returning without
    /// waiting would tear the runtime down before final lifecycle events and
    /// socket closes go out.
    pub async fn drain(&self, reason: &str) {
        let ids = self.active_ids();
        if ids.is_empty() {
            return;
        }
        info!(count = ids.len(), "Draining active call sessions");
        for call_id in ids {
            self.end_session(&call_id, EndReason::Requested(reason.to_string()))
                .await;
        }

        let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
        while !self.is_empty() {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining = self.len(),
                    "Drain timed out with sessions still registered"
                );
                return;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
        info!("All call sessions drained");
    }
}
