//! Email transport

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

use super::{TransportError, redacted_target};

const CHANNEL: &str = "email";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), TransportError>;
}

/// Posts messages as JSON to a mail delivery API.
pub struct HttpEmailTransport {
    client: Client,
    endpoint: String,
    api_token: Option<String>,
    from: String,
    max_attempts: u32,
    retry_delay: Duration,
}

#[derive(Serialize)]
struct MailApiRequest<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

impl HttpEmailTransport {
    pub fn new(
        endpoint: impl Into<String>,
        api_token: Option<String>,
        from: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| TransportError::Request {
                channel: CHANNEL,
                details: err.to_string(),
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_token,
            from: from.into(),
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
        })
    }

    /// Override the initial delay between attempts (doubles after each failure).
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

#[async_trait]
impl EmailTransport for HttpEmailTransport {
    async fn send(&self, message: &EmailMessage) -> Result<(), TransportError> {
        let body = MailApiRequest {
            from: &self.from,
            to: &message.to,
            subject: &message.subject,
            html: &message.html,
            text: &message.text,
        };
        let target = redacted_target(&self.endpoint);
        let mut delay = self.retry_delay;
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            let mut request = self.client.post(&self.endpoint).json(&body);
            if let Some(token) = &self.api_token {
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    info!(
                        target = %target,
                        recipients = message.to.len(),
                        attempt,
                        "Email delivered"
                    );
                    return Ok(());
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    warn!(target = %target, status, attempt, "Mail API rejected message");
                    last_error = Some(TransportError::Status {
                        channel: CHANNEL,
                        status,
                    });
                }
                Err(err) => {
                    warn!(target = %target, attempt, error = %err, "Mail API request failed");
                    last_error = Some(TransportError::Request {
                        channel: CHANNEL,
                        details: err.to_string(),
                    });
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        Err(last_error.unwrap_or(TransportError::Request {
            channel: CHANNEL,
            details: "no delivery attempt was made".to_string(),
        }))
    }
}

/// Writes messages to the log instead of sending them. Used by local profiles.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEmailTransport;

#[async_trait]
impl EmailTransport for LogEmailTransport {
    async fn send(&self, message: &EmailMessage) -> Result<(), TransportError> {
        info!(
            to = ?message.to,
            subject = %message.subject,
            "Email transport disabled; message logged only"
        );
        Ok(())
    }
}
