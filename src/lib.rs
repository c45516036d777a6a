//! Surrogate PV Server Library
//!
//! Serves a pretrained surrogate model as a set of process variables: writes
//! to input PVs rerun inference and republish every scalar and image output.

pub mod config;
pub mod consumer;
pub mod error;
pub mod formatter;
pub mod metrics;
pub mod models;
pub mod producer;
pub mod registry;
pub mod server;
pub mod store;
pub mod types;
pub mod workers;

#[cfg(test)]
pub(crate) mod testing;

pub use config::AppConfig;
pub use consumer::PutConsumer;
pub use error::{SurrogateError, SurrogateResult};
pub use formatter::{OutputFormatter, Protocol};
pub use models::{OnlineModelRunner, SurrogatePredictor};
pub use producer::NatsPvServer;
pub use registry::WorkerRegistry;
pub use server::{InputReactor, LocalPvServer, PvServer};
pub use store::InputStore;
pub use types::{ModelMetadata, PredictionOutput};
pub use workers::WorkerPool;
