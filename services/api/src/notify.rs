//! Best-effort delivery of lifecycle events to the owning system.
//!
//! The orchestrator holds no durable store; everything the owning system
//! should persist (status changes, transcript growth, goal achievement, final
//! call state) goes out through here. Delivery is a fire-and-forget POST:
//! failures are logged with the call id and never retried indefinitely, and
//! never block call processing.

use crate::models::LifecycleEvent;
use std::time::Duration;
use tracing::{debug, warn};

pub struct LifecycleNotifier {
    http: reqwest::Client,
    endpoint: Option<String>,
}

impl LifecycleNotifier {
    pub fn new(endpoint: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { http, endpoint }
    }

    /// Dispatches one event without waiting for delivery.
    pub fn notify(&self, event: LifecycleEvent) {
        let Some(endpoint) = self.endpoint.clone() else {
            debug!(call_id = %event.call_id, status = %event.status, "No lifecycle webhook configured; dropping event");
            return;
        };
        let http = self.http.clone();
        tokio::spawn(async move {
            match http.post(&endpoint).json(&event).send().await {
                Ok(response) if !response.status().is_success() => {
                    warn!(
                        call_id = %event.call_id,
                        status = %response.status(),
                        "Lifecycle webhook rejected event"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(call_id = %event.call_id, error = %e, "Failed to deliver lifecycle event");
                }
            }
        });
    }
}
