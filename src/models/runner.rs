//! Online model runner: composes predictors into one output mapping

use crate::error::SurrogateResult;
use crate::models::inference::SurrogateModel;
use crate::types::{InputState, PredictionOutput};
use rand::Rng;
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

/// Ordered list of predictors evaluated against the same input snapshot.
///
/// Outputs are right-folded: a later predictor overwrites keys produced by
/// an earlier one, so the order given to [`OnlineModelRunner::new`] matters.
pub struct OnlineModelRunner {
    models: Vec<Box<dyn SurrogateModel>>,
}

impl OnlineModelRunner {
    pub fn new(models: Vec<Box<dyn SurrogateModel>>) -> Self {
        Self { models }
    }

    /// Runner around a single predictor
    pub fn single(model: Box<dyn SurrogateModel>) -> Self {
        Self::new(vec![model])
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    /// Evaluate every predictor and merge their outputs
    pub fn run(&mut self, state: &InputState) -> SurrogateResult<PredictionOutput> {
        let start = Instant::now();
        let mut output = PredictionOutput::new();

        for model in self.models.iter_mut() {
            output.merge(model.predict(state)?);
        }

        debug!(
            models = self.models.len(),
            outputs = output.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "Model run complete"
        );

        Ok(output)
    }

    /// Evaluate once on inputs sampled within every model's declared ranges
    pub fn random_evaluate<R: Rng>(&mut self, rng: &mut R) -> SurrogateResult<PredictionOutput> {
        let mut scalars = HashMap::new();
        for model in &self.models {
            scalars.extend(model.metadata().random_input(rng)?);
        }
        self.run(&InputState::new(scalars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SurrogateError;
    use crate::testing::{default_state, fake_predictor, fixture_metadata};
    use crate::types::{ModelKind, ModelMetadata};

    /// Emits one constant scalar under a fixed name
    struct ConstantModel {
        metadata: ModelMetadata,
        name: &'static str,
        value: f64,
    }

    impl SurrogateModel for ConstantModel {
        fn predict(&mut self, _state: &InputState) -> SurrogateResult<PredictionOutput> {
            let mut output = PredictionOutput::new();
            output.insert_scalar(self.name, self.value);
            Ok(output)
        }

        fn metadata(&self) -> &ModelMetadata {
            &self.metadata
        }
    }

    struct BrokenModel(ModelMetadata);

    impl SurrogateModel for BrokenModel {
        fn predict(&mut self, _state: &InputState) -> SurrogateResult<PredictionOutput> {
            Err(SurrogateError::Inference("broken".to_string()))
        }

        fn metadata(&self) -> &ModelMetadata {
            &self.0
        }
    }

    fn constant(name: &'static str, value: f64) -> Box<dyn SurrogateModel> {
        Box::new(ConstantModel {
            metadata: fixture_metadata(ModelKind::Scalar),
            name,
            value,
        })
    }

    #[test]
    fn test_later_models_overwrite_earlier_keys() {
        let mut runner = OnlineModelRunner::new(vec![
            constant("sigma_x", 1.0),
            constant("sigma_x", 2.0),
            constant("sigma_y", 3.0),
        ]);

        let output = runner.run(&InputState::default()).unwrap();

        assert_eq!(output.len(), 2);
        assert_eq!(output.scalar("sigma_x"), Some(2.0));
        assert_eq!(output.scalar("sigma_y"), Some(3.0));
    }

    #[test]
    fn test_scalar_and_image_predictors_compose() {
        let scalar = fake_predictor(ModelKind::Scalar);
        let image = fake_predictor(ModelKind::Image);
        let state = default_state(&fixture_metadata(ModelKind::Both));
        let mut runner = OnlineModelRunner::new(vec![Box::new(scalar), Box::new(image)]);

        let output = runner.run(&state).unwrap();

        assert!(output.image("x:y").is_some());
        assert!(output.scalar("sigma_x").is_some());
        assert!(output.scalar("x:y:dw").is_some());
    }

    #[test]
    fn test_run_does_not_mutate_state() {
        let mut runner = OnlineModelRunner::single(Box::new(fake_predictor(ModelKind::Both)));
        let state = default_state(&fixture_metadata(ModelKind::Both));
        let before = state.clone();

        runner.run(&state).unwrap();

        assert_eq!(state, before);
    }

    #[test]
    fn test_random_evaluate_covers_every_output() {
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        let metadata = fixture_metadata(ModelKind::Both);
        let mut runner = OnlineModelRunner::single(Box::new(fake_predictor(ModelKind::Both)));
        let mut rng = StdRng::seed_from_u64(7);

        let output = runner.random_evaluate(&mut rng).unwrap();

        for name in &metadata.output_ordering {
            assert!(output.scalar(name).map_or(false, f64::is_finite), "{}", name);
        }
        assert_eq!(output.image("x:y").map(|img| img.dim()), Some((50, 50)));
    }

    #[test]
    fn test_failure_propagates() {
        let mut runner = OnlineModelRunner::new(vec![
            constant("sigma_x", 1.0),
            Box::new(BrokenModel(fixture_metadata(ModelKind::Scalar))),
        ]);

        let err = runner.run(&InputState::default()).unwrap_err();
        assert!(matches!(err, SurrogateError::Inference(_)));
    }
}
