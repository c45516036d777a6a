//! Input snapshots and canonical prediction outputs

use ndarray::Array2;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// 2-D image buffer in physical units
pub type Image = Array2<f64>;

/// Point-in-time view of the model inputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputState {
    /// Scalar inputs keyed by (disambiguated) input name
    pub scalars: HashMap<String, f64>,
    /// Image input; predictors fall back to their stock image when absent
    pub image: Option<Arc<Image>>,
}

impl InputState {
    pub fn new(scalars: HashMap<String, f64>) -> Self {
        Self {
            scalars,
            image: None,
        }
    }

    /// Attach an image input
    pub fn with_image(mut self, image: Arc<Image>) -> Self {
        self.image = Some(image);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.scalars.get(name).copied()
    }
}

/// A single predicted value in physical units.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputValue {
    Scalar(f64),
    Image(Image),
}

impl OutputValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            OutputValue::Scalar(v) => Some(*v),
            OutputValue::Image(_) => None,
        }
    }

    pub fn as_image(&self) -> Option<&Image> {
        match self {
            OutputValue::Image(img) => Some(img),
            OutputValue::Scalar(_) => None,
        }
    }
}

/// Canonical mapping from output name to predicted value.
///
/// Keys iterate in sorted order so downstream shaping is deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictionOutput {
    values: BTreeMap<String, OutputValue>,
}

impl PredictionOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: OutputValue) {
        self.values.insert(name.into(), value);
    }

    pub fn insert_scalar(&mut self, name: impl Into<String>, value: f64) {
        self.insert(name, OutputValue::Scalar(value));
    }

    pub fn get(&self, name: &str) -> Option<&OutputValue> {
        self.values.get(name)
    }

    pub fn scalar(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(OutputValue::as_scalar)
    }

    pub fn image(&self, name: &str) -> Option<&Image> {
        self.get(name).and_then(OutputValue::as_image)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OutputValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Fold `other` into `self`; entries of `other` win on key conflicts.
    pub fn merge(&mut self, other: PredictionOutput) {
        self.values.extend(other.values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_later_entries_win() {
        let mut first = PredictionOutput::new();
        first.insert_scalar("sigma_x", 1.0);
        first.insert_scalar("sigma_y", 2.0);

        let mut second = PredictionOutput::new();
        second.insert_scalar("sigma_y", 3.0);
        second.insert(
            "x:y",
            OutputValue::Image(Image::zeros((2, 2))),
        );

        first.merge(second);

        assert_eq!(first.len(), 3);
        assert_eq!(first.scalar("sigma_x"), Some(1.0));
        assert_eq!(first.scalar("sigma_y"), Some(3.0));
        assert_eq!(first.image("x:y").map(|img| img.dim()), Some((2, 2)));
        assert_eq!(first.scalar("x:y"), None);
    }
}
