//! Type definitions for the surrogate PV server

pub mod metadata;
pub mod pv;
pub mod state;

pub use metadata::{ModelInfo, ModelKind, ModelMetadata};
pub use pv::{PvAttributes, PvValue, WireEntry, WireOutput};
pub use state::{Image, InputState, OutputValue, PredictionOutput};
