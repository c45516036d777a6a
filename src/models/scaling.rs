//! Transforms between physical units and the network's normalised space
//!
//! Scalars use min-max normalisation with per-variable scale and offset:
//! `normalised = min + (raw - offset) * (max - min) / scale`.
//! The image channel follows its own training convention and ignores the
//! global min/max: `normalised = 2 * (raw / scale - offset)`.

use crate::error::{SurrogateError, SurrogateResult};
use crate::types::{Image, ModelMetadata};
use ndarray::{Array1, ArrayView1};

/// Scale/offset vectors fixed when a predictor is loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingModel {
    input_scales: Array1<f64>,
    input_offsets: Array1<f64>,
    output_scales: Array1<f64>,
    output_offsets: Array1<f64>,
    image: Option<(f64, f64)>,
    value_min: f64,
    value_max: f64,
}

impl ScalingModel {
    /// Build from metadata, keeping only the leading `scalar_variable_count`
    /// input entries; trailing ones belong to auxiliary outputs.
    pub fn from_metadata(metadata: &ModelMetadata) -> Self {
        let n = metadata.scalar_variable_count();
        Self {
            input_scales: Array1::from(metadata.input_scales[..n].to_vec()),
            input_offsets: Array1::from(metadata.input_offsets[..n].to_vec()),
            output_scales: Array1::from(metadata.output_scales.clone()),
            output_offsets: Array1::from(metadata.output_offsets.clone()),
            image: metadata.image_scaling,
            value_min: metadata.model_value_min,
            value_max: metadata.model_value_max,
        }
    }

    pub fn input_width(&self) -> usize {
        self.input_scales.len()
    }

    pub fn output_width(&self) -> usize {
        self.output_scales.len()
    }

    fn span(&self) -> f64 {
        self.value_max - self.value_min
    }

    /// Physical scalar inputs to normalised network inputs
    pub fn scale_inputs(&self, raw: ArrayView1<f64>) -> SurrogateResult<Array1<f64>> {
        check_width("scalar inputs", self.input_width(), raw.len())?;
        Ok((&raw - &self.input_offsets) * self.span() / &self.input_scales + self.value_min)
    }

    /// Normalised network inputs back to physical units
    pub fn unscale_inputs(&self, normalised: ArrayView1<f64>) -> SurrogateResult<Array1<f64>> {
        check_width("scalar inputs", self.input_width(), normalised.len())?;
        Ok((&normalised - self.value_min) * &self.input_scales / self.span() + &self.input_offsets)
    }

    /// Physical scalar outputs to normalised network space
    pub fn scale_outputs(&self, raw: ArrayView1<f64>) -> SurrogateResult<Array1<f64>> {
        check_width("scalar outputs", self.output_width(), raw.len())?;
        Ok((&raw - &self.output_offsets) * self.span() / &self.output_scales + self.value_min)
    }

    /// Normalised network outputs to physical units, over the full output vector
    pub fn unscale_outputs(&self, normalised: ArrayView1<f64>) -> SurrogateResult<Array1<f64>> {
        check_width("scalar outputs", self.output_width(), normalised.len())?;
        let physical = (&normalised - self.value_min) * &self.output_scales / self.span();
        Ok(physical + &self.output_offsets)
    }

    fn image_scaling(&self) -> SurrogateResult<(f64, f64)> {
        self.image.ok_or_else(|| {
            SurrogateError::Configuration("model declares no image channel scaling".to_string())
        })
    }

    /// Physical image to normalised network space
    pub fn scale_image(&self, raw: &Image) -> SurrogateResult<Image> {
        let (scale, offset) = self.image_scaling()?;
        Ok(raw.mapv(|v| 2.0 * (v / scale - offset)))
    }

    /// Normalised image back to physical units
    pub fn unscale_image(&self, normalised: &Image) -> SurrogateResult<Image> {
        let (scale, offset) = self.image_scaling()?;
        Ok(normalised.mapv(|v| (v / 2.0 + offset) * scale))
    }

    /// Same as [`unscale_image`](Self::unscale_image) for a flat buffer
    pub fn unscale_image_values(
        &self,
        normalised: ArrayView1<f64>,
    ) -> SurrogateResult<Array1<f64>> {
        let (scale, offset) = self.image_scaling()?;
        Ok(normalised.mapv(|v| (v / 2.0 + offset) * scale))
    }
}

fn check_width(context: &str, expected: usize, actual: usize) -> SurrogateResult<()> {
    if expected != actual {
        return Err(SurrogateError::shape(context, expected, actual));
    }
    Ok(())
}
