//! PV server abstraction and the input-change reactor

pub mod pvdb;
pub mod reactor;

pub use pvdb::{PvDescriptor, PvRecord, PvType};
pub use reactor::{InputReactor, PutReport, ReactorSettings};

use crate::error::{SurrogateError, SurrogateResult};
use crate::types::WireEntry;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// A registered PV that accepts new values
pub trait PvHandle: Send + Sync {
    fn name(&self) -> &str;

    /// Publish a new value (and its attributes) to subscribers
    fn post(&self, entry: WireEntry) -> SurrogateResult<()>;
}

/// Transport that registers PVs and hands back their handles
pub trait PvServer: Send + Sync {
    fn publish(&self, record: PvRecord) -> SurrogateResult<Arc<dyn PvHandle>>;
}

#[derive(Debug)]
struct LocalSlot {
    descriptor: PvDescriptor,
    latest: WireEntry,
    posts: u64,
}

/// In-process PV server keeping the latest value of every PV
#[derive(Debug, Default)]
pub struct LocalPvServer {
    pvs: Mutex<BTreeMap<String, Arc<Mutex<LocalSlot>>>>,
}

struct LocalHandle {
    name: String,
    slot: Arc<Mutex<LocalSlot>>,
}

impl PvHandle for LocalHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn post(&self, entry: WireEntry) -> SurrogateResult<()> {
        let mut slot = self.slot.lock();
        slot.latest = entry;
        slot.posts += 1;
        Ok(())
    }
}

impl LocalPvServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest value posted to `name`
    pub fn get(&self, name: &str) -> Option<WireEntry> {
        self.pvs.lock().get(name).map(|slot| slot.lock().latest.clone())
    }

    pub fn descriptor(&self, name: &str) -> Option<PvDescriptor> {
        self.pvs
            .lock()
            .get(name)
            .map(|slot| slot.lock().descriptor.clone())
    }

    /// Number of posts since registration
    pub fn post_count(&self, name: &str) -> u64 {
        self.pvs.lock().get(name).map_or(0, |slot| slot.lock().posts)
    }

    pub fn names(&self) -> Vec<String> {
        self.pvs.lock().keys().cloned().collect()
    }
}

impl PvServer for LocalPvServer {
    fn publish(&self, record: PvRecord) -> SurrogateResult<Arc<dyn PvHandle>> {
        let mut pvs = self.pvs.lock();
        if pvs.contains_key(&record.name) {
            return Err(SurrogateError::Publish(format!(
                "PV {} already registered",
                record.name
            )));
        }

        let slot = Arc::new(Mutex::new(LocalSlot {
            descriptor: record.descriptor,
            latest: record.initial,
            posts: 0,
        }));
        pvs.insert(record.name.clone(), slot.clone());
        debug!(pv = %record.name, "Registered local PV");

        Ok(Arc::new(LocalHandle {
            name: record.name,
            slot,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PvValue;

    fn record(name: &str, value: f64) -> PvRecord {
        PvRecord::new(name, PvDescriptor::float(8), WireEntry::plain(PvValue::Scalar(value)))
    }

    #[test]
    fn test_publish_and_post() {
        let server = LocalPvServer::new();
        let handle = server.publish(record("smvm:sigma_x", 1.0)).unwrap();

        assert_eq!(handle.name(), "smvm:sigma_x");
        assert_eq!(server.get("smvm:sigma_x").unwrap().value.as_scalar(), Some(1.0));
        assert_eq!(server.post_count("smvm:sigma_x"), 0);

        handle.post(WireEntry::plain(PvValue::Scalar(2.0))).unwrap();
        assert_eq!(server.get("smvm:sigma_x").unwrap().value.as_scalar(), Some(2.0));
        assert_eq!(server.post_count("smvm:sigma_x"), 1);
        assert_eq!(server.descriptor("smvm:sigma_x").unwrap().kind, PvType::Float);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let server = LocalPvServer::new();
        server.publish(record("smvm:a", 1.0)).unwrap();

        let err = server.publish(record("smvm:a", 2.0)).err().unwrap();
        assert!(matches!(err, SurrogateError::Publish(_)));
        assert_eq!(server.get("smvm:a").unwrap().value.as_scalar(), Some(1.0));
        assert_eq!(server.names(), vec!["smvm:a".to_string()]);
    }
}
