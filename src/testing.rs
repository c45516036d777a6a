//! Fixtures shared by unit tests

use crate::error::{SurrogateError, SurrogateResult};
use crate::models::inference::{ForwardInputs, ForwardOutputs, InferenceContext};
use crate::models::SurrogatePredictor;
use crate::types::{Image, InputState, ModelInfo, ModelKind, ModelMetadata};
use std::sync::Arc;

/// Physical defaults for the fixture inputs, in input order
pub const DEFAULT_INPUT_VALUES: [f64; 8] = [
    0.348, 0.0403, -7.99, 141.6, -0.000354, 0.000344, -0.000348, 0.000346,
];

const INPUTS: [&str; 8] = [
    "distgen:r_dist:sigma_xy:value",
    "distgen:t_dist:length:value",
    "SOL1:solenoid_field_scale",
    "CQ01:b1_gradient",
    "xmin",
    "xmax",
    "ymin",
    "ymax",
];

const INPUT_RANGES: [[f64; 2]; 8] = [
    [0.2, 0.5],
    [0.01, 0.07],
    [-10.0, 10.0],
    [100.0, 200.0],
    [-0.0005, 0.0],
    [0.0, 0.0005],
    [-0.0005, 0.0],
    [0.0, 0.0005],
];

const OUTPUTS: [&str; 9] = [
    "sigma_x",
    "sigma_y",
    "sigma_z",
    "norm_emit_x",
    "norm_emit_y",
    "xmin",
    "xmax",
    "ymin",
    "ymax",
];

/// Normalised extents emitted by [`FakeContext`]: `[xmin, xmax, ymin, ymax]`
pub const FAKE_EXTENTS: [f32; 4] = [0.2, 0.8, 0.3, 0.7];

pub fn fixture_info(kind: ModelKind) -> ModelInfo {
    let mut output_scales = vec![1e-3, 1e-3, 1e-3, 1e-6, 1e-6, 1e-3, 1e-3, 1e-3, 1e-3];
    let mut output_offsets = vec![0.0, 0.0, 0.0, 0.0, 0.0, -5e-4, -5e-4, -5e-4, -5e-4];
    if kind.has_image_output() {
        output_scales.push(2.0);
        output_offsets.push(0.25);
    }

    ModelInfo {
        kind,
        input_names: INPUTS.iter().map(|s| s.to_string()).collect(),
        output_names: OUTPUTS.iter().map(|s| s.to_string()).collect(),
        input_ordering: Vec::new(),
        output_ordering: Vec::new(),
        input_scales: INPUT_RANGES.iter().map(|[lo, hi]| hi - lo).collect(),
        input_offsets: INPUT_RANGES.iter().map(|[lo, _]| *lo).collect(),
        output_scales,
        output_offsets,
        input_units: vec![
            "sigma_xy (mm)".to_string(),
            "length (ps)".to_string(),
            "(T)".to_string(),
            "kG/m".to_string(),
            "m".to_string(),
            "m".to_string(),
            "m".to_string(),
            "m".to_string(),
        ],
        output_units: vec!["mm".to_string(); OUTPUTS.len()],
        input_ranges: INPUT_RANGES.to_vec(),
        bins: if kind.has_image_output() { vec![50, 50] } else { Vec::new() },
        ndim: if kind.has_image_output() { 4 } else { 0 },
        input_image_shape: None,
        image_output_name: "x:y".to_string(),
        image_units: "mm:mm".to_string(),
        model_value_min: None,
        model_value_max: None,
        tensors: Default::default(),
        weights: "model.onnx".to_string(),
    }
}

pub fn fixture_metadata(kind: ModelKind) -> ModelMetadata {
    ModelMetadata::from_info(fixture_info(kind)).expect("fixture metadata is valid")
}

/// Fixture inputs keyed by the metadata's input ordering
pub fn default_state(metadata: &ModelMetadata) -> InputState {
    InputState::new(
        metadata
            .input_ordering
            .iter()
            .cloned()
            .zip(DEFAULT_INPUT_VALUES)
            .collect(),
    )
}

/// Stock image used by fixture predictors
pub fn stock_image() -> Arc<Image> {
    Arc::new(Image::from_shape_fn((50, 50), |(i, j)| {
        ((i as f64 - 25.0).powi(2) + (j as f64 - 25.0).powi(2)).sqrt() * 0.01
    }))
}

/// Deterministic stand-in for a trained network.
///
/// Keeps a scratch buffer between calls, so sharing one instance across
/// threads would show up as mixed outputs.
pub struct FakeContext {
    scalar_outputs: usize,
    image_len: Option<usize>,
    scratch: Vec<f32>,
}

impl FakeContext {
    pub fn for_metadata(metadata: &ModelMetadata) -> Self {
        Self {
            scalar_outputs: metadata.output_scales.len(),
            image_len: metadata.image_len(),
            scratch: Vec::new(),
        }
    }
}

impl InferenceContext for FakeContext {
    fn forward(&mut self, inputs: ForwardInputs) -> SurrogateResult<ForwardOutputs> {
        self.scratch.clear();
        self.scratch.extend_from_slice(&inputs.scalars);
        if let Some(image) = &inputs.image {
            let mean = image.data.iter().sum::<f32>() / image.data.len().max(1) as f32;
            self.scratch.push(mean);
        }
        let signal = self.scratch.iter().sum::<f32>() / self.scratch.len().max(1) as f32;

        let n = self.scalar_outputs;
        let extents_from = if self.image_len.is_some() { n.saturating_sub(4) } else { n };
        let scalars = (0..n)
            .map(|i| {
                if i >= extents_from {
                    FAKE_EXTENTS[i - extents_from]
                } else {
                    0.5 + 0.4 * (signal + i as f32).tanh()
                }
            })
            .collect();
        let image = self.image_len.map(|len| {
            (0..len)
                .map(|k| (signal + k as f32 * 1e-3).sin().abs())
                .collect()
        });

        Ok(ForwardOutputs {
            scalars: Some(scalars),
            image,
        })
    }
}

/// Returns an image that is too short for the declared bins
pub struct TruncatedImageContext(FakeContext);

impl TruncatedImageContext {
    pub fn for_metadata(metadata: &ModelMetadata) -> Self {
        Self(FakeContext::for_metadata(metadata))
    }
}

impl InferenceContext for TruncatedImageContext {
    fn forward(&mut self, inputs: ForwardInputs) -> SurrogateResult<ForwardOutputs> {
        let mut outputs = self.0.forward(inputs)?;
        if let Some(image) = outputs.image.as_mut() {
            image.truncate(100);
        }
        Ok(outputs)
    }
}

/// Fails every forward pass
pub struct FailingContext;

impl InferenceContext for FailingContext {
    fn forward(&mut self, _inputs: ForwardInputs) -> SurrogateResult<ForwardOutputs> {
        Err(SurrogateError::Inference("graph execution failed".to_string()))
    }
}

/// Loaded predictor over [`FakeContext`], with the stock image when the kind needs one
pub fn fake_predictor(kind: ModelKind) -> SurrogatePredictor {
    let metadata = Arc::new(fixture_metadata(kind));
    let stock = kind.has_image_input().then(stock_image);
    SurrogatePredictor::with_context(
        metadata.clone(),
        Box::new(FakeContext::for_metadata(&metadata)),
        stock,
    )
    .expect("fixture predictor loads")
}
