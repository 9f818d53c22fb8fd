//! Webhook delivery of finished presence reports.

use reqwest::Client;
use rollcall_core::PresenceReport;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Placeholder substituted with the (percent-encoded) attendance id.
pub const ATTENDANCE_ID_PLACEHOLDER: &str = "{attendanceId}";

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("webhook responded with status {status}")]
    Status { status: u16 },
    #[error("webhook transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Retry schedule for webhook delivery.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub retries: u32,
    /// Delay before the first retry; doubled after each failure.
    pub backoff: Duration,
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(1u32 << attempt.min(16))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookBody<'a> {
    attendance_id: &'a str,
    report: &'a PresenceReport,
}

/// Posts `{attendanceId, report}` to a URL templated on the attendance id.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url_template: String,
    retry: RetryPolicy,
}

impl WebhookNotifier {
    pub fn new(
        url_template: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url_template: url_template.into(),
            retry,
        })
    }

    pub fn url_for(&self, attendance_id: &str) -> String {
        self.url_template
            .replace(ATTENDANCE_ID_PLACEHOLDER, &urlencoding::encode(attendance_id))
    }

    /// Deliver `report`, retrying non-success responses and transport errors
    /// with exponential backoff. Returns the last failure if every attempt fails.
    pub async fn notify(
        &self,
        attendance_id: &str,
        report: &PresenceReport,
    ) -> Result<(), NotifyError> {
        let url = self.url_for(attendance_id);
        let body = WebhookBody {
            attendance_id,
            report,
        };

        let mut attempt = 0u32;
        loop {
            let outcome = match self.client.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => Ok(()),
                Ok(resp) => Err(NotifyError::Status {
                    status: resp.status().as_u16(),
                }),
                Err(e) => Err(NotifyError::Transport(e)),
            };

            match outcome {
                Ok(()) => {
                    tracing::info!(url = %url, attempt, "presence report delivered");
                    return Ok(());
                }
                Err(e) if attempt < self.retry.retries => {
                    let delay = self.retry.delay(attempt);
                    tracing::debug!(url = %url, attempt, error = %e, ?delay, "webhook delivery failed; retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
