//! CRM ticketing

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::{TransportError, redacted_target};

const CHANNEL: &str = "ticketing";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicketRequest {
    pub notification_id: Uuid,
    pub project_id: Uuid,
    pub rule_id: Uuid,
    pub subject: String,
}

#[async_trait]
pub trait TicketingClient: Send + Sync {
    /// Open a ticket and return its reference.
    async fn create_ticket(&self, request: &TicketRequest) -> Result<String, TransportError>;
}

pub struct HttpTicketingClient {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

#[derive(Deserialize)]
struct TicketResponse {
    #[serde(alias = "id")]
    ticket_ref: String,
}

impl HttpTicketingClient {
    pub fn new(
        base_url: impl Into<String>,
        api_token: Option<String>,
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
            base_url: base_url.into(),
            api_token,
        })
    }
}

#[async_trait]
impl TicketingClient for HttpTicketingClient {
    async fn create_ticket(&self, request: &TicketRequest) -> Result<String, TransportError> {
        let endpoint = format!("{}/tickets", self.base_url.trim_end_matches('/'));
        let mut call = self.client.post(&endpoint).json(request);
        if let Some(token) = &self.api_token {
            call = call.bearer_auth(token);
        }

        let response = call.send().await.map_err(|err| TransportError::Request {
            channel: CHANNEL,
            details: err.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(TransportError::Status {
                channel: CHANNEL,
                status: response.status().as_u16(),
            });
        }

        let body: TicketResponse =
            response
                .json()
                .await
                .map_err(|err| TransportError::InvalidResponse {
                    channel: CHANNEL,
                    details: err.to_string(),
                })?;

        info!(
            target = %redacted_target(&endpoint),
            ticket_ref = %body.ticket_ref,
            notification_id = %request.notification_id,
            "CRM ticket created"
        );
        Ok(body.ticket_ref)
    }
}

/// Issues `LOCAL-xxxxxxxx` references without calling out. Used by local profiles.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTicketingClient;

#[async_trait]
impl TicketingClient for LocalTicketingClient {
    async fn create_ticket(&self, request: &TicketRequest) -> Result<String, TransportError> {
        let simple = Uuid::new_v4().simple().to_string();
        let ticket_ref = format!("LOCAL-{}", &simple[..8]);
        info!(
            ticket_ref = %ticket_ref,
            notification_id = %request.notification_id,
            "Ticketing disabled; issued local reference"
        );
        Ok(ticket_ref)
    }
}
