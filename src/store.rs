//! Canonical input state shared by every worker

use crate::error::{SurrogateError, SurrogateResult};
use crate::types::{Image, InputState, ModelMetadata};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Process-wide store of the current physical input values.
///
/// Writers take the lock one at a time; readers get a consistent snapshot.
/// Overlapping writes to the same name resolve last-writer-wins.
#[derive(Debug)]
pub struct InputStore {
    state: RwLock<InputState>,
}

impl InputStore {
    /// Seed the store, requiring a value for every input the model consumes
    pub fn seeded(
        metadata: &ModelMetadata,
        scalars: HashMap<String, f64>,
        image: Option<Arc<Image>>,
    ) -> SurrogateResult<Self> {
        if let Some(missing) = metadata
            .input_ordering
            .iter()
            .find(|name| !scalars.contains_key(*name))
        {
            return Err(SurrogateError::Configuration(format!(
                "no initial value for input {}",
                missing
            )));
        }
        if metadata.kind.has_image_input() && image.is_none() {
            return Err(SurrogateError::Configuration(
                "image model requires an initial image input".to_string(),
            ));
        }

        Ok(Self {
            state: RwLock::new(InputState { scalars, image }),
        })
    }

    /// Record a new value; returns the one it replaced
    pub fn set(&self, name: &str, value: f64) -> Option<f64> {
        self.state.write().scalars.insert(name.to_string(), value)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.state.read().get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.read().scalars.contains_key(name)
    }

    /// Copy of the full input state at this instant
    pub fn snapshot(&self) -> InputState {
        self.state.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{default_state, fixture_metadata, stock_image};
    use crate::types::ModelKind;
    use std::thread;

    #[test]
    fn test_seeding_requires_every_input() {
        let metadata = fixture_metadata(ModelKind::Both);
        let mut scalars = default_state(&metadata).scalars;
        scalars.remove("CQ01:b1_gradient");

        let err = InputStore::seeded(&metadata, scalars, Some(stock_image())).unwrap_err();
        assert!(matches!(err, SurrogateError::Configuration(_)));
    }

    #[test]
    fn test_seeding_requires_image_for_image_input() {
        let metadata = fixture_metadata(ModelKind::Both);
        let scalars = default_state(&metadata).scalars;

        assert!(InputStore::seeded(&metadata, scalars.clone(), None).is_err());
        assert!(InputStore::seeded(&fixture_metadata(ModelKind::Scalar), scalars, None).is_ok());
    }

    #[test]
    fn test_set_and_snapshot() {
        let metadata = fixture_metadata(ModelKind::Both);
        let store =
            InputStore::seeded(&metadata, default_state(&metadata).scalars, Some(stock_image()))
                .unwrap();

        let previous = store.set("SOL1:solenoid_field_scale", -5.0);

        assert_eq!(previous, Some(-7.99));
        assert_eq!(store.get("SOL1:solenoid_field_scale"), Some(-5.0));
        let snapshot = store.snapshot();
        assert_eq!(snapshot.get("SOL1:solenoid_field_scale"), Some(-5.0));
        assert!(snapshot.image.is_some());
    }

    #[test]
    fn test_concurrent_writes_to_different_keys() {
        let metadata = fixture_metadata(ModelKind::Scalar);
        let store = Arc::new(
            InputStore::seeded(&metadata, default_state(&metadata).scalars, None).unwrap(),
        );
        let names = metadata.input_ordering.clone();
        let count = names.len();

        thread::scope(|s| {
            for (i, name) in names.iter().enumerate() {
                let store = store.clone();
                s.spawn(move || {
                    for step in 0..200 {
                        store.set(name, (i * 1000 + step) as f64);
                        let snapshot = store.snapshot();
                        assert_eq!(snapshot.scalars.len(), count);
                    }
                });
            }
        });

        for (i, name) in names.iter().enumerate() {
            assert_eq!(store.get(name), Some((i * 1000 + 199) as f64));
        }
    }
}
