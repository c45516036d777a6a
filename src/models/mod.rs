//! Surrogate model loading, scaling, and inference

pub mod inference;
pub mod loader;
pub mod runner;
pub mod scaling;

pub use inference::{InferenceContext, SurrogateModel, SurrogatePredictor};
pub use loader::{ModelArtifact, OrtLoader};
pub use runner::OnlineModelRunner;
pub use scaling::ScalingModel;
