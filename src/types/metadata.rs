//! Model metadata as stored next to the ONNX graph, and its normalised form

use crate::error::{SurrogateError, SurrogateResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Which prediction branches a model carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Scalar inputs to scalar outputs
    Scalar,
    /// Scalar inputs to an image plus its extents
    Image,
    /// Image and scalar inputs to an image plus scalar outputs
    Both,
}

impl ModelKind {
    /// True when the model produces an image output
    pub fn has_image_output(self) -> bool {
        matches!(self, ModelKind::Image | ModelKind::Both)
    }

    /// True when the forward pass consumes an image input
    pub fn has_image_input(self) -> bool {
        matches!(self, ModelKind::Both)
    }
}

/// Optional ONNX tensor names. Unset names fall back to graph order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TensorNames {
    #[serde(default)]
    pub scalar_input: Option<String>,
    #[serde(default)]
    pub image_input: Option<String>,
    #[serde(default)]
    pub scalar_output: Option<String>,
    #[serde(default)]
    pub image_output: Option<String>,
}

fn default_image_output_name() -> String {
    "x:y".to_string()
}

fn default_image_units() -> String {
    "mm:mm".to_string()
}

/// Raw attribute document describing a trained model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    #[serde(rename = "type")]
    pub kind: ModelKind,
    pub input_names: Vec<String>,
    pub output_names: Vec<String>,
    /// Order in which inputs are fed to the network (defaults to `input_names`)
    #[serde(default)]
    pub input_ordering: Vec<String>,
    /// Order of the network's scalar outputs (defaults to `output_names`)
    #[serde(default)]
    pub output_ordering: Vec<String>,
    pub input_scales: Vec<f64>,
    pub input_offsets: Vec<f64>,
    pub output_scales: Vec<f64>,
    pub output_offsets: Vec<f64>,
    #[serde(default)]
    pub input_units: Vec<String>,
    #[serde(default)]
    pub output_units: Vec<String>,
    #[serde(default)]
    pub input_ranges: Vec<[f64; 2]>,
    /// Image bin counts per axis
    #[serde(default)]
    pub bins: Vec<usize>,
    /// Number of trailing scalar outputs holding the image extents
    #[serde(default)]
    pub ndim: usize,
    /// Shape of the stock image input (defaults to `bins`)
    #[serde(default)]
    pub input_image_shape: Option<[usize; 2]>,
    #[serde(default = "default_image_output_name")]
    pub image_output_name: String,
    #[serde(default = "default_image_units")]
    pub image_units: String,
    #[serde(default)]
    pub model_value_min: Option<f64>,
    #[serde(default)]
    pub model_value_max: Option<f64>,
    #[serde(default)]
    pub tensors: TensorNames,
    /// ONNX graph path, relative to the metadata file
    pub weights: String,
}

/// Prefix names that appear among both inputs and outputs.
///
/// Colliding inputs become `in_{name}` and colliding outputs `out_{name}`.
/// Renamed sets must hold unique names with no name on both sides, which makes
/// a second application a no-op. Sets that would break this are rejected.
pub fn disambiguate_orderings(
    inputs: &[String],
    outputs: &[String],
) -> SurrogateResult<(Vec<String>, Vec<String>)> {
    let output_set: BTreeSet<&str> = outputs.iter().map(String::as_str).collect();
    let shared: BTreeSet<&str> = inputs
        .iter()
        .map(String::as_str)
        .filter(|name| output_set.contains(name))
        .collect();

    let inputs = apply_prefix(inputs, &shared, "in");
    let outputs = apply_prefix(outputs, &shared, "out");

    let input_set = unique_names(&inputs, "input")?;
    let output_set = unique_names(&outputs, "output")?;
    if let Some(name) = input_set.intersection(&output_set).next() {
        return Err(config_err(format!(
            "{} is both an input and an output after renaming",
            name
        )));
    }

    Ok((inputs, outputs))
}

fn apply_prefix(ordering: &[String], shared: &BTreeSet<&str>, prefix: &str) -> Vec<String> {
    ordering
        .iter()
        .map(|name| {
            if shared.contains(name.as_str()) {
                format!("{}_{}", prefix, name)
            } else {
                name.clone()
            }
        })
        .collect()
}

fn unique_names<'a>(names: &'a [String], side: &str) -> SurrogateResult<BTreeSet<&'a str>> {
    let mut seen = BTreeSet::new();
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(config_err(format!("duplicate {} name {}", side, name)));
        }
    }
    Ok(seen)
}

/// Immutable metadata held by a loaded predictor.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelMetadata {
    pub kind: ModelKind,
    pub input_names: Vec<String>,
    pub output_names: Vec<String>,
    pub input_ordering: Vec<String>,
    pub output_ordering: Vec<String>,
    pub input_scales: Vec<f64>,
    pub input_offsets: Vec<f64>,
    /// Scalar output scales, with the image entry already split off
    pub output_scales: Vec<f64>,
    pub output_offsets: Vec<f64>,
    /// `(scale, offset)` of the image channel for image-bearing kinds
    pub image_scaling: Option<(f64, f64)>,
    pub input_units: Vec<String>,
    pub output_units: Vec<String>,
    pub input_ranges: Vec<[f64; 2]>,
    pub bins: Option<(usize, usize)>,
    pub ndim: usize,
    pub input_image_shape: Option<(usize, usize)>,
    pub image_output_name: String,
    pub image_units: String,
    pub model_value_min: f64,
    pub model_value_max: f64,
    pub tensors: TensorNames,
}

impl ModelMetadata {
    /// Validate a raw attribute document and fix its orderings.
    pub fn from_info(info: ModelInfo) -> SurrogateResult<Self> {
        let raw_input_ordering = if info.input_ordering.is_empty() {
            info.input_names.clone()
        } else {
            info.input_ordering.clone()
        };
        let raw_output_ordering = if info.output_ordering.is_empty() {
            info.output_names.clone()
        } else {
            info.output_ordering.clone()
        };

        if raw_input_ordering.is_empty() {
            return Err(config_err("model declares no inputs"));
        }

        let (input_ordering, output_ordering) =
            disambiguate_orderings(&raw_input_ordering, &raw_output_ordering)?;
        let (input_names, output_names) =
            disambiguate_orderings(&info.input_names, &info.output_names)?;

        let scalar_variables = input_ordering.len();
        if info.input_scales.len() < scalar_variables || info.input_offsets.len() < scalar_variables
        {
            return Err(config_err(format!(
                "{} inputs declared but only {} scales / {} offsets",
                scalar_variables,
                info.input_scales.len(),
                info.input_offsets.len()
            )));
        }
        if info.output_scales.len() != info.output_offsets.len() {
            return Err(config_err("output scales and offsets differ in length"));
        }
        if !info.input_ranges.is_empty() && info.input_ranges.len() != scalar_variables {
            return Err(config_err(format!(
                "{} input ranges for {} inputs",
                info.input_ranges.len(),
                scalar_variables
            )));
        }

        let model_value_min = info.model_value_min.unwrap_or(0.0);
        let model_value_max = info.model_value_max.unwrap_or(1.0);
        if model_value_max == model_value_min {
            return Err(config_err("model value range is empty"));
        }
        if info
            .input_scales
            .iter()
            .chain(info.output_scales.iter())
            .any(|&s| s == 0.0)
        {
            return Err(config_err("zero scale factor"));
        }

        let mut output_scales = info.output_scales;
        let mut output_offsets = info.output_offsets;
        let mut image_scaling = None;
        let mut bins = None;
        let mut input_image_shape = None;

        if info.kind.has_image_output() {
            let (scale, offset) = match (output_scales.pop(), output_offsets.pop()) {
                (Some(s), Some(o)) => (s, o),
                _ => return Err(config_err("image model declares no image scale")),
            };
            image_scaling = Some((scale, offset));

            let declared = match info.bins.as_slice() {
                [x, y] if *x > 0 && *y > 0 => (*x, *y),
                other => {
                    return Err(config_err(format!(
                        "image model requires two non-zero bin counts, got {:?}",
                        other
                    )))
                }
            };
            bins = Some(declared);

            if info.ndim < 4 {
                return Err(config_err(format!(
                    "image model needs at least 4 extent outputs, ndim = {}",
                    info.ndim
                )));
            }
            if info.ndim > output_scales.len() {
                return Err(config_err(format!(
                    "ndim {} exceeds {} scalar outputs",
                    info.ndim,
                    output_scales.len()
                )));
            }
        }

        if info.kind.has_image_input() {
            input_image_shape = Some(match info.input_image_shape {
                Some([x, y]) => (x, y),
                None => bins.unwrap_or((0, 0)),
            });
        }

        if output_ordering.len() > output_scales.len() {
            return Err(config_err(format!(
                "{} outputs ordered but only {} scalar output scales",
                output_ordering.len(),
                output_scales.len()
            )));
        }

        Ok(Self {
            kind: info.kind,
            input_names,
            output_names,
            input_ordering,
            output_ordering,
            input_scales: info.input_scales,
            input_offsets: info.input_offsets,
            output_scales,
            output_offsets,
            image_scaling,
            input_units: info.input_units,
            output_units: info.output_units,
            input_ranges: info.input_ranges,
            bins,
            ndim: info.ndim,
            input_image_shape,
            image_output_name: info.image_output_name,
            image_units: info.image_units,
            model_value_min,
            model_value_max,
            tensors: info.tensors,
        })
    }

    /// Number of leading input scale/offset entries that apply to scalar inputs
    pub fn scalar_variable_count(&self) -> usize {
        self.input_ordering.len()
    }

    /// Flattened size of the image output
    pub fn image_len(&self) -> Option<usize> {
        self.bins.map(|(x, y)| x * y)
    }

    /// Key of the derived width extent
    pub fn width_extent_name(&self) -> String {
        format!("{}:dw", self.image_output_name)
    }

    /// Key of the derived height extent
    pub fn height_extent_name(&self) -> String {
        format!("{}:dh", self.image_output_name)
    }

    /// Zip physical default values with the input ordering.
    ///
    /// With no values given, each input defaults to the centre of its range.
    pub fn default_inputs(&self, values: &[f64]) -> SurrogateResult<HashMap<String, f64>> {
        if values.is_empty() {
            if self.input_ranges.is_empty() {
                return Err(config_err("no default inputs and no input ranges"));
            }
            return Ok(self
                .input_ordering
                .iter()
                .zip(&self.input_ranges)
                .map(|(name, [lo, hi])| (name.clone(), (lo + hi) / 2.0))
                .collect());
        }

        if values.len() != self.input_ordering.len() {
            return Err(config_err(format!(
                "{} default values for {} inputs",
                values.len(),
                self.input_ordering.len()
            )));
        }

        Ok(self
            .input_ordering
            .iter()
            .cloned()
            .zip(values.iter().copied())
            .collect())
    }

    /// Sample every input uniformly within its declared range.
    pub fn random_input<R: Rng>(&self, rng: &mut R) -> SurrogateResult<HashMap<String, f64>> {
        if self.input_ranges.len() != self.input_ordering.len() {
            return Err(config_err("input ranges are required for random inputs"));
        }

        Ok(self
            .input_ordering
            .iter()
            .zip(&self.input_ranges)
            .map(|(name, &[lo, hi])| {
                let value = if hi > lo { rng.gen_range(lo..=hi) } else { lo };
                (name.clone(), value)
            })
            .collect())
    }
}

fn config_err(message: impl Into<String>) -> SurrogateError {
    SurrogateError::Configuration(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixture_info;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_shared_names_are_prefixed() {
        let inputs = names(&["charge", "xmin", "xmax"]);
        let outputs = names(&["sigma_x", "xmin", "xmax"]);

        let (inputs, outputs) = disambiguate_orderings(&inputs, &outputs).unwrap();

        assert_eq!(inputs, names(&["charge", "in_xmin", "in_xmax"]));
        assert_eq!(outputs, names(&["sigma_x", "out_xmin", "out_xmax"]));
    }

    #[test]
    fn test_disambiguation_is_idempotent() {
        let inputs = names(&["xmin", "phase", "ymax"]);
        let outputs = names(&["ymax", "xmin", "emit"]);

        let once = disambiguate_orderings(&inputs, &outputs).unwrap();
        let twice = disambiguate_orderings(&once.0, &once.1).unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_renamed_collision_rejected() {
        // `a` becomes `in_a`, which is already an output
        let err = disambiguate_orderings(&names(&["a"]), &names(&["a", "in_a"])).unwrap_err();
        assert!(matches!(err, SurrogateError::Configuration(_)));

        let err = disambiguate_orderings(&names(&["a", "in_a"]), &names(&["a"])).unwrap_err();
        assert!(matches!(err, SurrogateError::Configuration(_)));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = disambiguate_orderings(&names(&["a", "b", "a"]), &names(&["c"])).unwrap_err();
        assert!(matches!(err, SurrogateError::Configuration(_)));

        let err = disambiguate_orderings(&names(&["a"]), &names(&["c", "c"])).unwrap_err();
        assert!(matches!(err, SurrogateError::Configuration(_)));
    }

    #[test]
    fn test_ordering_duplicated_by_renaming_rejected() {
        // `xmin` is shared with the outputs, so it renames onto the existing `in_xmin`
        let mut info = fixture_info(ModelKind::Both);
        info.input_names[0] = "in_xmin".to_string();
        info.input_ordering = Vec::new();

        let err = ModelMetadata::from_info(info).unwrap_err();
        assert!(matches!(err, SurrogateError::Configuration(_)));
    }

    #[test]
    fn test_image_scale_split_off() {
        let metadata = ModelMetadata::from_info(fixture_info(ModelKind::Both)).unwrap();

        assert_eq!(metadata.output_scales.len(), metadata.output_ordering.len());
        assert_eq!(metadata.image_scaling, Some((2.0, 0.25)));
        assert_eq!(metadata.bins, Some((50, 50)));
        assert_eq!(metadata.image_len(), Some(2500));
        assert!(metadata.input_ordering.contains(&"in_xmin".to_string()));
        assert!(metadata.output_ordering.contains(&"out_ymax".to_string()));
    }

    #[test]
    fn test_scalar_model_keeps_all_output_scales() {
        let metadata = ModelMetadata::from_info(fixture_info(ModelKind::Scalar)).unwrap();

        assert_eq!(metadata.image_scaling, None);
        assert_eq!(metadata.bins, None);
        assert_eq!(metadata.output_scales.len(), metadata.output_ordering.len());
    }

    #[test]
    fn test_image_model_requires_bins() {
        let mut info = fixture_info(ModelKind::Both);
        info.bins = vec![50];

        let err = ModelMetadata::from_info(info).unwrap_err();
        assert!(matches!(err, SurrogateError::Configuration(_)));
    }

    #[test]
    fn test_default_inputs_from_values_and_ranges() {
        let metadata = ModelMetadata::from_info(fixture_info(ModelKind::Both)).unwrap();

        let values: Vec<f64> = (0..metadata.input_ordering.len()).map(|i| i as f64).collect();
        let defaults = metadata.default_inputs(&values).unwrap();
        assert_eq!(defaults[&metadata.input_ordering[3]], 3.0);

        let centred = metadata.default_inputs(&[]).unwrap();
        let [lo, hi] = metadata.input_ranges[0];
        assert_eq!(centred[&metadata.input_ordering[0]], (lo + hi) / 2.0);

        assert!(metadata.default_inputs(&[1.0]).is_err());
    }

    #[test]
    fn test_random_input_within_ranges() {
        let metadata = ModelMetadata::from_info(fixture_info(ModelKind::Both)).unwrap();
        let mut rng = rand::thread_rng();

        for _ in 0..20 {
            let sample = metadata.random_input(&mut rng).unwrap();
            for (name, [lo, hi]) in metadata.input_ordering.iter().zip(&metadata.input_ranges) {
                let value = sample[name];
                assert!(value >= *lo && value <= *hi, "{} = {} outside range", name, value);
            }
        }
    }
}
