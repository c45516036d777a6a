//! Error taxonomy for the inference-and-publish pipeline

use thiserror::Error;

/// Root error type for the serving core.
#[derive(Error, Debug)]
pub enum SurrogateError {
    /// Missing or invalid model artifact, metadata, or input state.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Declared dimensions do not match an actual buffer.
    #[error("shape error in {context}: expected {expected} elements, got {actual}")]
    Shape {
        context: String,
        expected: usize,
        actual: usize,
    },

    /// The computation context failed during the forward pass.
    #[error("inference error: {0}")]
    Inference(String),

    /// A write addressed a name that is not a published input PV.
    #[error("unknown input PV: {0}")]
    UnknownPv(String),

    /// The PV transport rejected a registration or post.
    #[error("publish error: {0}")]
    Publish(String),
}

impl SurrogateError {
    pub fn shape(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        SurrogateError::Shape {
            context: context.into(),
            expected,
            actual,
        }
    }
}

impl From<ort::Error> for SurrogateError {
    fn from(e: ort::Error) -> Self {
        SurrogateError::Inference(e.to_string())
    }
}

pub type SurrogateResult<T> = Result<T, SurrogateError>;
