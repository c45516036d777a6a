//! NATS consumer for inbound input writes

use anyhow::Result;
use async_nats::{Client, Subscriber};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Body of a write request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PutRequest {
    pub value: f64,
}

/// Completion signal sent to the writer's reply subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PutReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PutReply {
    pub fn success() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    pub fn failure(error: impl ToString) -> Self {
        Self {
            ok: false,
            error: Some(error.to_string()),
        }
    }
}

/// Consumer for receiving input writes from NATS
pub struct PutConsumer {
    client: Client,
    subject: String,
}

impl PutConsumer {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Subscribe to every PV under the put subject
    pub async fn subscribe(&self) -> Result<Subscriber> {
        let wildcard = format!("{}.>", self.subject);
        let subscriber = self.client.subscribe(wildcard.clone()).await?;
        info!(subject = %wildcard, "Subscribed to put subject");
        Ok(subscriber)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// PV name addressed by a message subject, if it falls under this consumer
    pub fn pv_name<'a>(&self, subject: &'a str) -> Option<&'a str> {
        subject_pv_name(&self.subject, subject)
    }
}

/// Strip `{root}.` from a message subject, leaving the PV name
pub fn subject_pv_name<'a>(root: &str, subject: &'a str) -> Option<&'a str> {
    subject
        .strip_prefix(root)
        .and_then(|rest| rest.strip_prefix('.'))
        .filter(|name| !name.is_empty())
}

/// Parse a write body: either `{"value": x}` or a bare number
pub fn parse_put(payload: &[u8]) -> Result<PutRequest, serde_json::Error> {
    serde_json::from_slice::<PutRequest>(payload)
        .or_else(|_| serde_json::from_slice::<f64>(payload).map(|value| PutRequest { value }))
}
