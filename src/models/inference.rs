//! Surrogate predictors: scaling, forward pass, and output assembly

use crate::error::{SurrogateError, SurrogateResult};
use crate::models::loader::{ModelArtifact, OrtLoader};
use crate::models::scaling::ScalingModel;
use crate::types::{Image, InputState, ModelKind, ModelMetadata, OutputValue, PredictionOutput};
use ndarray::{Array1, Array2};
use std::sync::Arc;
use tracing::{debug, info};

/// Normalised image input with the tensor shape the graph expects.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    pub shape: Vec<i64>,
    pub data: Vec<f32>,
}

/// Normalised tensors for a single forward pass
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardInputs {
    /// Scalar inputs, fed as shape `[1, n]`
    pub scalars: Vec<f32>,
    pub image: Option<ImageTensor>,
}

/// Raw normalised outputs of a forward pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForwardOutputs {
    pub scalars: Option<Vec<f32>>,
    pub image: Option<Vec<f32>>,
}

/// Computation context holding loaded weights.
///
/// Contexts are not safe to drive from two threads at once; every predictor
/// owns exactly one and drives it through `&mut self`.
pub trait InferenceContext: Send {
    fn forward(&mut self, inputs: ForwardInputs) -> SurrogateResult<ForwardOutputs>;
}

/// Anything that turns an input snapshot into canonical outputs.
pub trait SurrogateModel: Send {
    fn predict(&mut self, state: &InputState) -> SurrogateResult<PredictionOutput>;

    fn metadata(&self) -> &ModelMetadata;
}

/// Loaded predictor for a single model artifact
pub struct SurrogatePredictor {
    metadata: Arc<ModelMetadata>,
    scaling: ScalingModel,
    context: Box<dyn InferenceContext>,
    stock_image: Option<Arc<Image>>,
}

impl std::fmt::Debug for SurrogatePredictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurrogatePredictor")
            .field("kind", &self.metadata.kind)
            .field("inputs", &self.metadata.input_ordering)
            .field("outputs", &self.metadata.output_ordering)
            .finish()
    }
}

impl SurrogatePredictor {
    /// Load weights into a fresh ONNX session for this predictor alone
    pub fn load(
        artifact: &ModelArtifact,
        stock_image: Option<Arc<Image>>,
        loader: &OrtLoader,
    ) -> SurrogateResult<Self> {
        let context = loader.load_context(artifact)?;
        Self::with_context(artifact.metadata.clone(), Box::new(context), stock_image)
    }

    /// Wrap an already-loaded computation context
    pub fn with_context(
        metadata: Arc<ModelMetadata>,
        context: Box<dyn InferenceContext>,
        stock_image: Option<Arc<Image>>,
    ) -> SurrogateResult<Self> {
        if let (Some(expected), Some(image)) = (metadata.input_image_shape, stock_image.as_ref()) {
            if image.dim() != expected {
                return Err(SurrogateError::shape(
                    "stock image",
                    expected.0 * expected.1,
                    image.len(),
                ));
            }
        }

        info!(
            kind = ?metadata.kind,
            inputs = metadata.input_ordering.len(),
            outputs = metadata.output_ordering.len(),
            "Surrogate predictor loaded"
        );

        Ok(Self {
            scaling: ScalingModel::from_metadata(&metadata),
            metadata,
            context,
            stock_image,
        })
    }

    /// Evaluate the scalar branch only
    pub fn predict_scalars(&mut self, state: &InputState) -> SurrogateResult<PredictionOutput> {
        match self.metadata.kind {
            ModelKind::Scalar => self.run_scalar(state),
            ModelKind::Both => self.run_image(state),
            ModelKind::Image => Err(SurrogateError::Configuration(
                "image model has no scalar prediction path".to_string(),
            )),
        }
    }

    /// Evaluate a path that yields the image output
    pub fn predict_image(&mut self, state: &InputState) -> SurrogateResult<PredictionOutput> {
        if !self.metadata.kind.has_image_output() {
            return Err(SurrogateError::Configuration(
                "scalar model has no image prediction path".to_string(),
            ));
        }
        self.run_image(state)
    }

    fn input_vector(&self, state: &InputState) -> SurrogateResult<Array1<f64>> {
        self.metadata
            .input_ordering
            .iter()
            .map(|name| {
                state.get(name).ok_or_else(|| {
                    SurrogateError::Configuration(format!("missing input value for {}", name))
                })
            })
            .collect::<SurrogateResult<Vec<f64>>>()
            .map(Array1::from)
    }

    fn input_image(&self, state: &InputState) -> SurrogateResult<Arc<Image>> {
        state
            .image
            .clone()
            .or_else(|| self.stock_image.clone())
            .ok_or_else(|| {
                SurrogateError::Configuration("no image input and no stock image".to_string())
            })
    }

    fn scaled_scalars(&self, state: &InputState) -> SurrogateResult<Vec<f32>> {
        let raw = self.input_vector(state)?;
        let scaled = self.scaling.scale_inputs(raw.view())?;
        Ok(scaled.iter().map(|&v| v as f32).collect())
    }

    fn scaled_image(&self, state: &InputState) -> SurrogateResult<ImageTensor> {
        let image = self.input_image(state)?;
        let (rows, cols) = image.dim();
        if let Some(expected) = self.metadata.input_image_shape {
            if (rows, cols) != expected {
                return Err(SurrogateError::shape(
                    "image input",
                    expected.0 * expected.1,
                    image.len(),
                ));
            }
        }
        let scaled = self.scaling.scale_image(&image)?;
        Ok(ImageTensor {
            shape: vec![1, rows as i64, cols as i64, 1],
            data: scaled.iter().map(|&v| v as f32).collect(),
        })
    }

    fn unscaled_scalars(&self, outputs: &mut ForwardOutputs) -> SurrogateResult<Array1<f64>> {
        let raw = outputs.scalars.take().ok_or_else(|| {
            SurrogateError::Inference("forward pass returned no scalar output".to_string())
        })?;
        let normalised = Array1::from(raw.iter().map(|&v| v as f64).collect::<Vec<_>>());
        self.scaling.unscale_outputs(normalised.view())
    }

    fn insert_scalars(&self, output: &mut PredictionOutput, values: &Array1<f64>) {
        for (name, value) in self.metadata.output_ordering.iter().zip(values.iter()) {
            output.insert_scalar(name.clone(), *value);
        }
    }

    fn run_scalar(&mut self, state: &InputState) -> SurrogateResult<PredictionOutput> {
        let scalars = self.scaled_scalars(state)?;
        let mut raw = self.context.forward(ForwardInputs {
            scalars,
            image: None,
        })?;
        let values = self.unscaled_scalars(&mut raw)?;

        let mut output = PredictionOutput::new();
        self.insert_scalars(&mut output, &values);
        Ok(output)
    }

    fn run_image(&mut self, state: &InputState) -> SurrogateResult<PredictionOutput> {
        let scalars = self.scaled_scalars(state)?;
        let image = if self.metadata.kind.has_image_input() {
            Some(self.scaled_image(state)?)
        } else {
            None
        };

        let mut raw = self.context.forward(ForwardInputs { scalars, image })?;
        let values = self.unscaled_scalars(&mut raw)?;

        let (rows, cols) = self.metadata.bins.ok_or_else(|| {
            SurrogateError::Configuration("image model declares no bins".to_string())
        })?;
        let flat = raw.image.take().ok_or_else(|| {
            SurrogateError::Inference("forward pass returned no image output".to_string())
        })?;
        if flat.len() != rows * cols {
            return Err(SurrogateError::shape("image output", rows * cols, flat.len()));
        }
        let flat = Array1::from(flat.iter().map(|&v| v as f64).collect::<Vec<_>>());
        let unscaled = self.scaling.unscale_image_values(flat.view())?;
        let image = Array2::from_shape_vec((rows, cols), unscaled.to_vec())
            .map_err(|_| SurrogateError::shape("image reshape", rows * cols, unscaled.len()))?;

        // extents are ordered [xmin, xmax, ymin, ymax]
        let extents = values.slice(ndarray::s![values.len() - self.metadata.ndim..]);
        let width = extents[1] - extents[0];
        let height = extents[3] - extents[2];

        let mut output = PredictionOutput::new();
        self.insert_scalars(&mut output, &values);
        output.insert(self.metadata.image_output_name.clone(), OutputValue::Image(image));
        output.insert_scalar(self.metadata.width_extent_name(), width);
        output.insert_scalar(self.metadata.height_extent_name(), height);

        debug!(width = width, height = height, "Image prediction complete");
        Ok(output)
    }
}

impl SurrogateModel for SurrogatePredictor {
    fn predict(&mut self, state: &InputState) -> SurrogateResult<PredictionOutput> {
        match self.metadata.kind {
            ModelKind::Scalar => self.run_scalar(state),
            ModelKind::Image | ModelKind::Both => self.run_image(state),
        }
    }

    fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}
