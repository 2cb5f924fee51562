
// Best-effort lead notification via an HTTP email API. Dispatch failures
// are logged and swallowed; lead persistence is the primary operation and
// must succeed independently.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::database::sqlite::models::Lead;

const NOTIFY_API_KEY_ENV: &str = "BOTSMITH_EMAIL_API_KEY";
const NOTIFY_TO_ENV: &str = "BOTSMITH_NOTIFY_EMAIL";
const NOTIFY_FROM: &str = "notifications@botsmith.app";
const DEFAULT_EMAIL_API_URL: &str = "https://api.resend.com/emails";
const NOTIFY_TIMEOUT_SECONDS: u64 = 10;

/// A hung email API must not strand the fire-and-forget dispatch task.
fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

#[derive(Debug, Serialize)]
struct EmailPayload<'a> {
    from: &'a str,
    to: &'a [String],
    subject: String,
    text: String,
}

/// Sends lead-capture notifications. Unconfigured (no API key or
/// recipient in the environment) is a valid state; sends become no-ops.
#[derive(Debug, Clone)]
pub struct LeadNotifier {
    http: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    recipient: Option<String>,
}

impl LeadNotifier {
    #[inline]
    pub fn from_env() -> Self {
        Self {
            http: http_client(Duration::from_secs(NOTIFY_TIMEOUT_SECONDS)),
            api_url: DEFAULT_EMAIL_API_URL.to_string(),
            api_key: std::env::var(NOTIFY_API_KEY_ENV).ok().filter(|k| !k.is_empty()),
            recipient: std::env::var(NOTIFY_TO_ENV).ok().filter(|r| !r.is_empty()),
        }
    }

    #[cfg(test)]
    fn with_endpoint(api_url: String, api_key: &str, recipient: &str) -> Self {
        Self {
            http: http_client(Duration::from_secs(1)),
            api_url,
            api_key: Some(api_key.to_string()),
            recipient: Some(recipient.to_string()),
        }
    }

    /// Send a notification for a captured lead. Never fails the caller:
    /// every error path degrades to a log line.
    #[inline]
    pub async fn notify_lead(&self, bot_name: &str, lead: &Lead) {
        let (Some(api_key), Some(recipient)) = (&self.api_key, &self.recipient) else {
            debug!("Lead notification not configured, skipping");
            return;
        };

        let payload = EmailPayload {
            from: NOTIFY_FROM,
            to: std::slice::from_ref(recipient),
            subject: format!("New lead captured by {bot_name}"),
            text: format_lead_body(bot_name, lead),
        };

        let result = self
            .http
            .post(&self.api_url)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                info!("Lead notification sent for bot {}", lead.bot_id);
            }
            Ok(response) => {
                warn!(
                    "Lead notification rejected with status {} for bot {}",
                    response.status(),
                    lead.bot_id
                );
            }
            Err(e) => {
                warn!("Lead notification failed for bot {}: {}", lead.bot_id, e);
            }
        }
    }
}

fn format_lead_body(bot_name: &str, lead: &Lead) -> String {
    let mut body = format!("Your bot \"{bot_name}\" captured a new lead:\n\n");
    if let Some(name) = &lead.name {
        body.push_str(&format!("Name: {name}\n"));
    }
    if let Some(email) = &lead.email {
        body.push_str(&format!("Email: {email}\n"));
    }
    if let Some(phone) = &lead.phone {
        body.push_str(&format!("Phone: {phone}\n"));
    }
    body.push_str(&format!("\nCaptured at: {}\n", lead.created_at));
    body
}
