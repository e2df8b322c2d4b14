//! Outbound transports
//!
//! Capability traits for the three channels a notification can travel on,
//! plus their HTTP and in-process implementations. Transport failures never
//! abort notification bookkeeping; callers log them and move on.

pub mod email;
pub mod push;
pub mod ticketing;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::config::NotificationConfig;

pub use email::{EmailMessage, EmailTransport, HttpEmailTransport, LogEmailTransport};
pub use push::{ChannelSink, PushHub, PushSink};
pub use ticketing::{HttpTicketingClient, LocalTicketingClient, TicketRequest, TicketingClient};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{channel} request failed: {details}")]
    Request {
        channel: &'static str,
        details: String,
    },
    #[error("{channel} endpoint returned status {status}")]
    Status { channel: &'static str, status: u16 },
    #[error("{channel} response was malformed: {details}")]
    InvalidResponse {
        channel: &'static str,
        details: String,
    },
    #[error("push sink '{client_id}' is closed")]
    SinkClosed { client_id: String },
}

impl TransportError {
    pub fn channel(&self) -> &'static str {
        match self {
            TransportError::Request { channel, .. }
            | TransportError::Status { channel, .. }
            | TransportError::InvalidResponse { channel, .. } => channel,
            TransportError::SinkClosed { .. } => "push",
        }
    }
}

/// The outbound channels handed to the notification service.
#[derive(Clone)]
pub struct Transports {
    pub email: Arc<dyn EmailTransport>,
    pub push: Arc<PushHub>,
    pub ticketing: Arc<dyn TicketingClient>,
}

impl Transports {
    /// HTTP transports where an endpoint is configured, log-only stand-ins
    /// otherwise.
    pub fn from_config(config: &NotificationConfig) -> Result<Self, TransportError> {
        let timeout = Duration::from_millis(config.transport_timeout_ms);

        let email: Arc<dyn EmailTransport> = match &config.email_api_url {
            Some(url) => Arc::new(HttpEmailTransport::new(
                url.clone(),
                config.email_api_token.clone(),
                config.email_from.clone(),
                timeout,
            )?),
            None => Arc::new(LogEmailTransport),
        };

        let ticketing: Arc<dyn TicketingClient> = match &config.crm_api_url {
            Some(url) => Arc::new(HttpTicketingClient::new(
                url.clone(),
                config.crm_api_token.clone(),
                timeout,
            )?),
            None => Arc::new(LocalTicketingClient),
        };

        Ok(Self {
            email,
            push: Arc::new(PushHub::new()),
            ticketing,
        })
    }
}

/// `scheme://host` of an endpoint, safe to log.
pub(crate) fn redacted_target(endpoint: &str) -> String {
    Url::parse(endpoint)
        .ok()
        .map(|parsed| {
            let host = parsed.host_str().unwrap_or("unknown");
            format!("{}://{}", parsed.scheme(), host)
        })
        .unwrap_or_else(|| "[invalid-url]".to_string())
}
