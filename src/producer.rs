//! NATS-backed PV server: registrations and posts become JSON updates

use crate::error::{SurrogateError, SurrogateResult};
use crate::server::{PvDescriptor, PvHandle, PvRecord, PvServer};
use crate::types::{PvAttributes, PvValue, WireEntry};
use async_nats::Client;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// JSON form of a PV value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UpdateValue {
    Scalar(f64),
    Int(i64),
    IntArray(Vec<i64>),
    Waveform(Vec<f64>),
    NdArray { shape: [usize; 2], data: Vec<f64> },
}

impl From<PvValue> for UpdateValue {
    fn from(value: PvValue) -> Self {
        match value {
            PvValue::Scalar(v) => UpdateValue::Scalar(v),
            PvValue::Int(v) => UpdateValue::Int(v),
            PvValue::IntArray(v) => UpdateValue::IntArray(v),
            PvValue::Waveform(v) => UpdateValue::Waveform(v),
            PvValue::NdArray(array) => {
                let (rows, cols) = array.dim();
                UpdateValue::NdArray {
                    shape: [rows, cols],
                    data: array.iter().copied().collect(),
                }
            }
        }
    }
}

/// One message on `{pv_subject}.{pv}`
#[derive(Debug, Clone, Serialize)]
pub struct PvUpdate {
    pub pv: String,
    pub value: UpdateValue,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: PvAttributes,
    /// Present on the registration message only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<PvDescriptor>,
    pub timestamp: DateTime<Utc>,
}

impl PvUpdate {
    fn new(pv: &str, entry: WireEntry, descriptor: Option<PvDescriptor>) -> Self {
        Self {
            pv: pv.to_string(),
            value: entry.value.into(),
            attributes: entry.attributes,
            descriptor,
            timestamp: Utc::now(),
        }
    }
}

/// PV server whose handles queue updates for a background publisher
pub struct NatsPvServer {
    tx: mpsc::UnboundedSender<PvUpdate>,
    registered: Mutex<HashSet<String>>,
}

impl NatsPvServer {
    /// Server plus the receiving end of its update queue
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PvUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                registered: Mutex::new(HashSet::new()),
            },
            rx,
        )
    }

    /// Server with its publisher task already running on the current runtime
    pub fn start(client: Client, subject: &str) -> (Self, JoinHandle<()>) {
        let (server, rx) = Self::new();
        let task = tokio::spawn(run_publisher(client, subject.to_string(), rx));
        (server, task)
    }

    pub fn registered(&self) -> usize {
        self.registered.lock().len()
    }
}

impl PvServer for NatsPvServer {
    fn publish(&self, record: PvRecord) -> SurrogateResult<Arc<dyn PvHandle>> {
        if !self.registered.lock().insert(record.name.clone()) {
            return Err(SurrogateError::Publish(format!(
                "PV {} already registered",
                record.name
            )));
        }

        let handle = NatsHandle {
            name: record.name,
            tx: self.tx.clone(),
        };
        handle.send(PvUpdate::new(&handle.name, record.initial, Some(record.descriptor)))?;
        Ok(Arc::new(handle))
    }
}

struct NatsHandle {
    name: String,
    tx: mpsc::UnboundedSender<PvUpdate>,
}

impl NatsHandle {
    fn send(&self, update: PvUpdate) -> SurrogateResult<()> {
        self.tx.send(update).map_err(|_| {
            SurrogateError::Publish(format!("publisher for {} has stopped", self.name))
        })
    }
}

impl PvHandle for NatsHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn post(&self, entry: WireEntry) -> SurrogateResult<()> {
        self.send(PvUpdate::new(&self.name, entry, None))
    }
}

/// Drain the update queue onto NATS until every handle is dropped
pub async fn run_publisher(
    client: Client,
    subject: String,
    mut rx: mpsc::UnboundedReceiver<PvUpdate>,
) {
    info!(subject = %subject, "PV publisher started");

    while let Some(update) = rx.recv().await {
        let target = format!("{}.{}", subject, update.pv);
        let payload = match serde_json::to_vec(&update) {
            Ok(payload) => payload,
            Err(e) => {
                error!(pv = %update.pv, error = %e, "Failed to encode PV update");
                continue;
            }
        };

        if let Err(e) = client.publish(target, payload.into()).await {
            error!(pv = %update.pv, error = %e, "Failed to publish PV update");
        } else {
            debug!(pv = %update.pv, "Published PV update");
        }
    }

    info!("PV publisher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Image;

    fn record(name: &str) -> PvRecord {
        PvRecord::new(name, PvDescriptor::float(8), WireEntry::plain(PvValue::Scalar(1.5)))
    }

    #[test]
    fn test_registration_and_posts_are_queued() {
        let (server, mut rx) = NatsPvServer::new();
        let handle = server.publish(record("smvm:sigma_x")).unwrap();

        let registration = rx.try_recv().unwrap();
        assert_eq!(registration.pv, "smvm:sigma_x");
        assert_eq!(registration.value, UpdateValue::Scalar(1.5));
        assert!(registration.descriptor.is_some());

        handle.post(WireEntry::plain(PvValue::Scalar(2.5))).unwrap();
        let update = rx.try_recv().unwrap();
        assert_eq!(update.value, UpdateValue::Scalar(2.5));
        assert!(update.descriptor.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_duplicate_and_closed_queue_rejected() {
        let (server, rx) = NatsPvServer::new();
        let handle = server.publish(record("smvm:a")).unwrap();

        let err = server.publish(record("smvm:a")).err().unwrap();
        assert!(matches!(err, SurrogateError::Publish(_)));
        assert_eq!(server.registered(), 1);

        drop(rx);
        let err = handle.post(WireEntry::plain(PvValue::Scalar(0.0))).unwrap_err();
        assert!(matches!(err, SurrogateError::Publish(_)));
    }

    #[test]
    fn test_update_json_shape() {
        let attributes = PvAttributes::from([("dh".to_string(), 0.4), ("dw".to_string(), 0.6)]);
        let entry = WireEntry::with_attributes(
            PvValue::NdArray(Image::from_elem((2, 3), 1.0)),
            attributes,
        );
        let json = serde_json::to_value(PvUpdate::new("smvm:x:y", entry, None)).unwrap();

        assert_eq!(json["pv"], "smvm:x:y");
        assert_eq!(json["value"]["shape"], serde_json::json!([2, 3]));
        assert_eq!(json["value"]["data"].as_array().unwrap().len(), 6);
        assert_eq!(json["attributes"]["dw"], 0.6);
        assert!(json.get("descriptor").is_none());
        assert!(json["timestamp"].is_string());

        let scalar = serde_json::to_value(PvUpdate::new(
            "smvm:sigma_x",
            WireEntry::plain(PvValue::Scalar(3.0)),
            None,
        ))
        .unwrap();
        assert_eq!(scalar["value"], 3.0);
        assert!(scalar.get("attributes").is_none());
    }
}
