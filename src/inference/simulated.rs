//! Simulated inference backend
//!
//! Stands in for a trained model so the decision policy and feedback loop can run
//! without one. Results are tagged `simulated` and carry no accuracy meaning.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{check_shape, Detection, InferenceBackend, InferenceSource};
use crate::config::SimulationConfig;
use crate::error::InferenceError;
use crate::vision::Tensor;

/// Confidence range of simulated detections
pub const SIMULATED_CONFIDENCE: (f32, f32) = (0.7, 0.95);

/// Picks a random catalog label with a fixed detection probability
pub struct SimulatedBackend {
    labels: Vec<String>,
    detection_probability: f64,
    input_size: u32,
    rng: Mutex<StdRng>,
}

impl SimulatedBackend {
    pub fn new(labels: Vec<String>, config: &SimulationConfig, input_size: u32) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            labels,
            detection_probability: config.detection_probability.clamp(0.0, 1.0),
            input_size,
            rng: Mutex::new(rng),
        }
    }
}

impl InferenceBackend for SimulatedBackend {
    fn infer(&self, tensor: &Tensor) -> Result<Vec<Detection>, InferenceError> {
        check_shape(tensor, self.input_size)?;

        if self.labels.is_empty() {
            return Ok(vec![]);
        }

        let mut rng = self.rng.lock();
        if !rng.gen_bool(self.detection_probability) {
            return Ok(vec![]);
        }

        let label = &self.labels[rng.gen_range(0..self.labels.len())];
        let (low, high) = SIMULATED_CONFIDENCE;
        let confidence = rng.gen_range(low..=high);

        Ok(vec![Detection::new(label.clone(), confidence)])
    }

    fn source(&self) -> InferenceSource {
        InferenceSource::Simulated
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    fn backend(probability: f64, seed: u64) -> SimulatedBackend {
        SimulatedBackend::new(
            vec!["Milk".to_string(), "Bread".to_string()],
            &SimulationConfig {
                detection_probability: probability,
                seed: Some(seed),
            },
            224,
        )
    }

    fn tensor() -> Tensor {
        Array4::<f32>::zeros((1, 3, 224, 224))
    }

    #[test]
    fn test_always_detects_with_probability_one() {
        let sim = backend(1.0, 1);
        for _ in 0..50 {
            let detections = sim.infer(&tensor()).unwrap();
            assert_eq!(detections.len(), 1);
            let d = &detections[0];
            assert!(d.label == "Milk" || d.label == "Bread");
            assert!(d.confidence >= 0.7 && d.confidence <= 0.95);
        }
    }

    #[test]
    fn test_never_detects_with_probability_zero() {
        let sim = backend(0.0, 1);
        for _ in 0..20 {
            assert!(sim.infer(&tensor()).unwrap().is_empty());
        }
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let a = backend(0.7, 42);
        let b = backend(0.7, 42);
        for _ in 0..20 {
            assert_eq!(a.infer(&tensor()).unwrap(), b.infer(&tensor()).unwrap());
        }
    }

    #[test]
    fn test_empty_catalog_yields_nothing() {
        let sim = SimulatedBackend::new(vec![], &SimulationConfig::default(), 224);
        assert!(sim.infer(&tensor()).unwrap().is_empty());
    }

    #[test]
    fn test_shape_mismatch() {
        let sim = backend(1.0, 1);
        let wrong = Array4::<f32>::zeros((1, 3, 640, 640));
        assert!(matches!(sim.infer(&wrong), Err(InferenceError::ShapeMismatch { .. })));
        assert_eq!(sim.source(), InferenceSource::Simulated);
    }
}
