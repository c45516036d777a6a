//! Model artifact loading and ONNX session construction

use crate::error::{SurrogateError, SurrogateResult};
use crate::models::inference::{ForwardInputs, ForwardOutputs, InferenceContext};
use crate::types::{Image, ModelInfo, ModelKind, ModelMetadata};
use ort::session::{builder::GraphOptimizationLevel, Session, SessionOutputs};
use ort::value::Tensor;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Model metadata plus the location of its weights
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub metadata: Arc<ModelMetadata>,
    pub weights: PathBuf,
}

impl ModelArtifact {
    /// Read the metadata document; the weights path is resolved against it.
    pub fn load<P: AsRef<Path>>(path: P) -> SurrogateResult<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            SurrogateError::Configuration(format!("cannot read model metadata {:?}: {}", path, e))
        })?;
        let info: ModelInfo = serde_json::from_str(&raw).map_err(|e| {
            SurrogateError::Configuration(format!("invalid model metadata {:?}: {}", path, e))
        })?;

        let weights = path
            .parent()
            .map(|dir| dir.join(&info.weights))
            .unwrap_or_else(|| PathBuf::from(&info.weights));
        let metadata = ModelMetadata::from_info(info)?;

        info!(
            path = %path.display(),
            kind = ?metadata.kind,
            weights = %weights.display(),
            "Loaded model metadata"
        );

        Ok(Self {
            metadata: Arc::new(metadata),
            weights,
        })
    }
}

/// Read a stock image stored as a JSON array of rows.
pub fn load_stock_image<P: AsRef<Path>>(path: P) -> SurrogateResult<Image> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|e| {
        SurrogateError::Configuration(format!("cannot read stock image {:?}: {}", path, e))
    })?;
    let rows: Vec<Vec<f64>> = serde_json::from_str(&raw).map_err(|e| {
        SurrogateError::Configuration(format!("invalid stock image {:?}: {}", path, e))
    })?;

    let height = rows.len();
    let width = rows.first().map(Vec::len).unwrap_or(0);
    if height == 0 || width == 0 {
        return Err(SurrogateError::Configuration(format!("stock image {:?} is empty", path)));
    }
    if let Some(row) = rows.iter().find(|row| row.len() != width) {
        return Err(SurrogateError::shape("stock image row", width, row.len()));
    }
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    let actual = flat.len();
    Image::from_shape_vec((height, width), flat)
        .map_err(|_| SurrogateError::shape("stock image rows", height * width, actual))
}

/// Creates ONNX sessions, one per predictor
pub struct OrtLoader {
    onnx_threads: usize,
}

impl OrtLoader {
    /// Initialise ONNX Runtime and create a loader using `onnx_threads` per session
    pub fn with_threads(onnx_threads: usize) -> SurrogateResult<Self> {
        ort::init().commit().map_err(|e| {
            SurrogateError::Configuration(format!("ONNX Runtime init failed: {}", e))
        })?;
        info!(onnx_threads = onnx_threads, "ONNX Runtime initialized");
        Ok(Self { onnx_threads })
    }

    /// Load the artifact's weights into a new, unshared session
    pub fn load_context(&self, artifact: &ModelArtifact) -> SurrogateResult<OrtContext> {
        let path = &artifact.weights;
        info!(path = %path.display(), threads = self.onnx_threads, "Loading ONNX graph");

        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(self.onnx_threads))
            .and_then(|b| b.commit_from_file(path))
            .map_err(|e| {
                let message = format!("failed to load model from {:?}: {}", path, e);
                SurrogateError::Configuration(message)
            })?;

        OrtContext::new(session, &artifact.metadata)
    }
}

/// One ONNX session plus the tensor names it is driven with
pub struct OrtContext {
    session: Session,
    scalar_input: String,
    image_input: Option<String>,
    scalar_output: String,
    image_output: Option<String>,
}

impl OrtContext {
    fn new(session: Session, metadata: &ModelMetadata) -> SurrogateResult<Self> {
        let inputs: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let outputs: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        let names = &metadata.tensors;

        // graph order: image first, scalars second, whenever both are present
        let (scalar_input, image_input) = match metadata.kind {
            ModelKind::Both => (
                pick(&names.scalar_input, &inputs, 1, "scalar input")?,
                Some(pick(&names.image_input, &inputs, 0, "image input")?),
            ),
            ModelKind::Scalar | ModelKind::Image => {
                (pick(&names.scalar_input, &inputs, 0, "scalar input")?, None)
            }
        };
        let (scalar_output, image_output) = match metadata.kind {
            ModelKind::Scalar => (pick(&names.scalar_output, &outputs, 0, "scalar output")?, None),
            ModelKind::Image | ModelKind::Both => (
                pick(&names.scalar_output, &outputs, 1, "scalar output")?,
                Some(pick(&names.image_output, &outputs, 0, "image output")?),
            ),
        };

        info!(
            scalar_input = %scalar_input,
            image_input = ?image_input,
            scalar_output = %scalar_output,
            image_output = ?image_output,
            "ONNX session bound"
        );

        Ok(Self {
            session,
            scalar_input,
            image_input,
            scalar_output,
            image_output,
        })
    }
}

fn pick(
    configured: &Option<String>,
    available: &[String],
    position: usize,
    role: &str,
) -> SurrogateResult<String> {
    match configured {
        Some(name) if available.contains(name) => Ok(name.clone()),
        Some(name) => Err(SurrogateError::Configuration(format!(
            "{} tensor {:?} not found in graph (has {:?})",
            role, name, available
        ))),
        None => available.get(position).cloned().ok_or_else(|| {
            SurrogateError::Configuration(format!(
                "graph has no {} at position {} (has {:?})",
                role, position, available
            ))
        }),
    }
}

fn extract(outputs: &SessionOutputs, name: &str) -> SurrogateResult<Vec<f32>> {
    let value = outputs
        .get(name)
        .ok_or_else(|| SurrogateError::Inference(format!("graph produced no output {:?}", name)))?;
    let (shape, data) = value.try_extract_tensor::<f32>()?;
    debug!(output = %name, shape = ?shape, "Extracted output tensor");
    Ok(data.to_vec())
}

impl InferenceContext for OrtContext {
    fn forward(&mut self, inputs: ForwardInputs) -> SurrogateResult<ForwardOutputs> {
        let scalar_shape = vec![1_i64, inputs.scalars.len() as i64];
        let scalar_tensor = Tensor::from_array((scalar_shape, inputs.scalars))?;

        let outputs = match (inputs.image, self.image_input.as_deref()) {
            (Some(image), Some(image_input)) => {
                let image_tensor = Tensor::from_array((image.shape, image.data))?;
                self.session.run(ort::inputs![
                    image_input => image_tensor,
                    self.scalar_input.as_str() => scalar_tensor
                ])?
            }
            (None, None) => self
                .session
                .run(ort::inputs![self.scalar_input.as_str() => scalar_tensor])?,
            (Some(_), None) => {
                return Err(SurrogateError::Configuration(
                    "image input given to a graph without an image input".to_string(),
                ))
            }
            (None, Some(name)) => {
                return Err(SurrogateError::Configuration(format!(
                    "graph input {:?} requires an image",
                    name
                )))
            }
        };

        let scalars = extract(&outputs, &self.scalar_output)?;
        let image = match self.image_output.as_deref() {
            Some(name) => Some(extract(&outputs, name)?),
            None => None,
        };

        Ok(ForwardOutputs {
            scalars: Some(scalars),
            image,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixture_info;
    use std::io::Write;

    #[test]
    fn test_artifact_load_resolves_weights() {
        let dir = tempfile::tempdir().unwrap();
        let meta_path = dir.path().join("model.json");
        let info = fixture_info(ModelKind::Both);
        fs::write(&meta_path, serde_json::to_string(&info).unwrap()).unwrap();

        let artifact = ModelArtifact::load(&meta_path).unwrap();

        assert_eq!(artifact.weights, dir.path().join("model.onnx"));
        assert_eq!(artifact.metadata.kind, ModelKind::Both);
        assert!(artifact.metadata.input_ordering.contains(&"in_xmax".to_string()));
    }

    #[test]
    fn test_missing_artifact_is_configuration_error() {
        let err = ModelArtifact::load("/nonexistent/model.json").unwrap_err();
        assert!(matches!(err, SurrogateError::Configuration(_)));
    }

    #[test]
    fn test_malformed_artifact_is_configuration_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"type\": \"both\"}}").unwrap();

        let err = ModelArtifact::load(file.path()).unwrap_err();
        assert!(matches!(err, SurrogateError::Configuration(_)));
    }

    #[test]
    fn test_stock_image_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]").unwrap();

        let image = load_stock_image(file.path()).unwrap();
        assert_eq!(image.dim(), (2, 3));
        assert_eq!(image[[1, 2]], 6.0);
    }

    #[test]
    fn test_ragged_stock_image_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[[1.0, 2.0], [3.0]]").unwrap();

        assert!(load_stock_image(file.path()).is_err());
    }

    #[test]
    fn test_pick_prefers_configured_name() {
        let available = vec!["image_in".to_string(), "scalars_in".to_string()];

        assert_eq!(
            pick(&Some("scalars_in".to_string()), &available, 0, "scalar input").unwrap(),
            "scalars_in"
        );
        assert_eq!(pick(&None, &available, 1, "scalar input").unwrap(), "scalars_in");
        assert!(pick(&Some("nope".to_string()), &available, 0, "scalar input").is_err());
        assert!(pick(&None, &available, 2, "scalar input").is_err());
    }
}
