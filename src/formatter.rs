//! Protocol-aware shaping of prediction outputs into publishable values.
//!
//! Two wire conventions are supported:
//! - **flattened**: image arrays are published flat under `{image}:ArrayData_RBV`
//!   and their extents as ordinary scalar PVs.
//! - **attributed-nd**: image arrays keep their 2-D shape and carry the extents
//!   as `dw`/`dh` attributes; the extents are not published on their own.

use crate::error::{SurrogateError, SurrogateResult};
use crate::types::{
    ModelMetadata, OutputValue, PredictionOutput, PvAttributes, PvValue, WireEntry, WireOutput,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Suffix of the flat array PV under the flattened protocol
pub const ARRAY_DATA_SUFFIX: &str = ":ArrayData_RBV";

/// Wire protocol, fixed for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    /// Channel-access style flat arrays
    #[serde(alias = "ca")]
    Flattened,
    /// PV-access style N-dimensional arrays with attributes
    #[default]
    #[serde(alias = "pva")]
    AttributedNd,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Flattened => write!(f, "flattened"),
            Protocol::AttributedNd => write!(f, "attributed-nd"),
        }
    }
}

/// An image output together with the keys of its derived extents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageKeys {
    pub image: String,
    pub width: String,
    pub height: String,
}

impl ImageKeys {
    pub fn for_image(image: &str) -> Self {
        Self {
            image: image.to_string(),
            width: format!("{}:dw", image),
            height: format!("{}:dh", image),
        }
    }

    /// Flat array key used by the flattened protocol
    pub fn array_data(&self) -> String {
        format!("{}{}", self.image, ARRAY_DATA_SUFFIX)
    }
}

/// Post-processing stage composed after prediction
#[derive(Debug, Clone)]
pub struct OutputFormatter {
    protocol: Protocol,
    images: Vec<ImageKeys>,
}

impl OutputFormatter {
    pub fn new(protocol: Protocol, images: Vec<ImageKeys>) -> Self {
        Self { protocol, images }
    }

    /// Formatter for the image outputs declared by a model
    pub fn for_metadata(protocol: Protocol, metadata: &ModelMetadata) -> Self {
        let images = if metadata.kind.has_image_output() {
            vec![ImageKeys::for_image(&metadata.image_output_name)]
        } else {
            Vec::new()
        };
        Self::new(protocol, images)
    }

    fn image(&self, key: &str) -> Option<&ImageKeys> {
        self.images.iter().find(|keys| keys.image == key)
    }

    fn is_extent(&self, key: &str) -> bool {
        self.images
            .iter()
            .any(|keys| keys.width == key || keys.height == key)
    }

    /// Reshape a prediction for publication
    pub fn format(&self, output: &PredictionOutput) -> SurrogateResult<WireOutput> {
        let mut wire = WireOutput::new();

        for (key, value) in output.iter() {
            if let Some(image) = self.image(key) {
                let array = value.as_image().ok_or_else(|| {
                    SurrogateError::Configuration(format!("image output {} holds a scalar", key))
                })?;
                match self.protocol {
                    Protocol::Flattened => {
                        let flat = array.iter().copied().collect();
                        let entry = WireEntry::plain(PvValue::Waveform(flat));
                        wire.insert(image.array_data(), entry);
                    }
                    Protocol::AttributedNd => {
                        let attributes = PvAttributes::from([
                            ("dw".to_string(), extent(output, &image.width)?),
                            ("dh".to_string(), extent(output, &image.height)?),
                        ]);
                        wire.insert(
                            key,
                            WireEntry::with_attributes(PvValue::NdArray(array.clone()), attributes),
                        );
                    }
                }
                continue;
            }

            if self.protocol == Protocol::AttributedNd && self.is_extent(key) {
                continue;
            }

            let entry = match value {
                OutputValue::Scalar(v) => PvValue::Scalar(*v),
                OutputValue::Image(array) => PvValue::NdArray(array.clone()),
            };
            wire.insert(key, WireEntry::plain(entry));
        }

        Ok(wire)
    }
}

fn extent(output: &PredictionOutput, key: &str) -> SurrogateResult<f64> {
    output
        .scalar(key)
        .ok_or_else(|| SurrogateError::Configuration(format!("image extent {} missing", key)))
}
