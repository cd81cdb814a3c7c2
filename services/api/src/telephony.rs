//! Outbound call placement via the telephony provider's REST API.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

/// Places outbound calls. Behind a trait so the initiation handler can be
/// exercised without touching the real provider.
#[async_trait]
pub trait OutboundDialer: Send + Sync {
    /// Places a call to `to_number` whose media is streamed back to this
    /// service tagged with `call_id`. Returns the provider's call reference.
    async fn place_call(&self, to_number: &str, call_id: Uuid) -> Result<String>;
}

/// Builds the call instruction document that connects the answered call to
/// our media-stream endpoint, carrying the session id as a stream parameter.
pub fn build_stream_twiml(stream_url: &str, call_id: Uuid) -> String {
    format!(
        r#"<Response><Connect><Stream url="{}"><Parameter name="callId" value="{}"/></Stream></Connect></Response>"#,
        stream_url, call_id
    )
}

#[derive(Deserialize)]
struct CallResource {
    sid: String,
}

/// Twilio implementation of [`OutboundDialer`].
pub struct TwilioDialer {
    http: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
    stream_url: String,
}

impl TwilioDialer {
    pub fn new(
        account_sid: String,
        auth_token: String,
        from_number: String,
        stream_url: String,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            account_sid,
            auth_token,
            from_number,
            stream_url,
        }
    }
}

#[async_trait]
impl OutboundDialer for TwilioDialer {
    async fn place_call(&self, to_number: &str, call_id: Uuid) -> Result<String> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Calls.json",
            self.account_sid
        );
        let twiml = build_stream_twiml(&self.stream_url, call_id);
        let params = [
            ("To", to_number),
            ("From", self.from_number.as_str()),
            ("Twiml", twiml.as_str()),
        ];

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await
            .context("Failed to reach the telephony provider")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "telephony provider refused the call (status {}): {}",
                status,
                body
            ));
        }

        let call: CallResource = response
            .json()
            .await
            .context("Telephony provider returned an unreadable call resource")?;
        Ok(call.sid)
    }
}
