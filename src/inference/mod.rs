//! Inference Engine
//!
//! Runs a normalized image through one of two backends:
//! - ONNX Runtime model (detector or classifier) when an artifact is installed
//! - Simulated detections when no usable artifact exists (degraded mode)
//!
//! The active backend lives in a single slot. Inference takes a snapshot of the
//! slot and runs without holding the lock; `reload` only locks for the swap.

pub mod models;
pub mod onnx;
pub mod simulated;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::InferenceConfig;
use crate::error::InferenceError;
use crate::vision::{self, ImageBuffer, Tensor};

pub use models::{ModelManager, ModelManifest};
pub use onnx::{ModelLoader, OnnxBackend};
pub use simulated::SimulatedBackend;

/// A candidate label produced by a backend, before catalog resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    /// Confidence (0.0 - 1.0)
    pub confidence: f32,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// Which backend produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceSource {
    /// A trained model artifact
    Model,
    /// Simulated detections, not a real prediction
    Simulated,
}

impl InferenceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            InferenceSource::Model => "model",
            InferenceSource::Simulated => "simulated",
        }
    }
}

/// Common contract for inference backends
pub trait InferenceBackend: Send + Sync {
    /// Run inference on a `[1, 3, S, S]` tensor where `S == input_size()`
    fn infer(&self, tensor: &Tensor) -> Result<Vec<Detection>, InferenceError>;

    /// Tag recorded on outcomes produced by this backend
    fn source(&self) -> InferenceSource;

    /// Square input size this backend expects
    fn input_size(&self) -> u32;
}

/// Reject tensors that do not match the backend input contract
pub fn check_shape(tensor: &Tensor, input_size: u32) -> Result<(), InferenceError> {
    let expected = vision::input_shape(input_size);
    if tensor.shape() != expected {
        return Err(InferenceError::ShapeMismatch {
            expected,
            actual: tensor.shape().to_vec(),
        });
    }
    Ok(())
}

/// Clamp confidences to [0, 1], drop empty signals and sort by descending confidence
pub fn sanitize(detections: Vec<Detection>) -> Vec<Detection> {
    let mut detections: Vec<Detection> = detections
        .into_iter()
        .filter(|d| d.confidence.is_finite() && d.confidence > 0.0)
        .map(|mut d| {
            d.confidence = d.confidence.min(1.0);
            d
        })
        .collect();

    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    detections
}

/// Detections plus the backend that produced them
#[derive(Debug, Clone)]
pub struct InferenceOutput {
    pub detections: Vec<Detection>,
    pub source: InferenceSource,
}

/// Owns the active backend slot
pub struct InferenceEngine {
    slot: RwLock<Arc<dyn InferenceBackend>>,
    loader: Option<ModelLoader>,
}

impl InferenceEngine {
    /// Create an engine around a fixed backend (no reload support)
    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        Self {
            slot: RwLock::new(backend),
            loader: None,
        }
    }

    /// Create an engine with a loader used for startup and later reloads
    pub fn with_loader(backend: Arc<dyn InferenceBackend>, loader: ModelLoader) -> Self {
        Self {
            slot: RwLock::new(backend),
            loader: Some(loader),
        }
    }

    /// Load the installed artifact, or fall back to simulated inference if it
    /// is missing or unusable.
    pub fn startup(config: &InferenceConfig, manager: ModelManager, catalog_labels: Vec<String>) -> Self {
        let loader = ModelLoader::new(manager, config);

        let backend: Arc<dyn InferenceBackend> = match loader.load() {
            Ok(backend) => {
                info!(
                    "Inference using {:?} model ({} labels)",
                    config.model_kind,
                    backend.label_count()
                );
                Arc::new(backend)
            }
            Err(e) => {
                warn!("Model unavailable ({}), falling back to simulated inference", e);
                Arc::new(SimulatedBackend::new(
                    catalog_labels,
                    &config.simulation,
                    config.model_kind.input_size(),
                ))
            }
        };

        Self::with_loader(backend, loader)
    }

    /// Snapshot of the active backend
    pub fn current(&self) -> Arc<dyn InferenceBackend> {
        self.slot.read().clone()
    }

    pub fn source(&self) -> InferenceSource {
        self.current().source()
    }

    /// Run a tensor through the active backend
    pub fn infer(&self, tensor: &Tensor) -> Result<InferenceOutput, InferenceError> {
        Self::infer_with(self.current().as_ref(), tensor)
    }

    /// Normalize an image to the active backend contract and run it.
    ///
    /// The same backend snapshot is used for sizing and inference, so a
    /// concurrent reload cannot cause a shape mismatch.
    pub fn run(&self, image: &ImageBuffer) -> Result<InferenceOutput, InferenceError> {
        let backend = self.current();
        let tensor = vision::normalize(image, backend.input_size());
        Self::infer_with(backend.as_ref(), &tensor)
    }

    fn infer_with(backend: &dyn InferenceBackend, tensor: &Tensor) -> Result<InferenceOutput, InferenceError> {
        let detections = sanitize(backend.infer(tensor)?);
        debug!("{:?} backend produced {} detections", backend.source(), detections.len());
        Ok(InferenceOutput {
            detections,
            source: backend.source(),
        })
    }

    /// Replace the active backend, returning the previous one
    pub fn swap(&self, backend: Arc<dyn InferenceBackend>) -> Arc<dyn InferenceBackend> {
        let mut slot = self.slot.write();
        std::mem::replace(&mut *slot, backend)
    }

    /// Load the installed artifact and swap it in.
    ///
    /// On failure the active backend is left untouched.
    pub fn reload(&self) -> Result<InferenceSource, InferenceError> {
        let loader = self
            .loader
            .as_ref()
            .ok_or_else(|| InferenceError::Load("engine has no model loader".to_string()))?;

        // Loading happens outside the lock; in-flight scans keep their snapshot
        let backend = loader.load()?;
        info!("Reloaded model artifact ({} labels)", backend.label_count());
        self.swap(Arc::new(backend));
        Ok(InferenceSource::Model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    struct FixedBackend {
        detections: Vec<Detection>,
        size: u32,
    }

    impl InferenceBackend for FixedBackend {
        fn infer(&self, tensor: &Tensor) -> Result<Vec<Detection>, InferenceError> {
            check_shape(tensor, self.size)?;
            Ok(self.detections.clone())
        }

        fn source(&self) -> InferenceSource {
            InferenceSource::Model
        }

        fn input_size(&self) -> u32 {
            self.size
        }
    }

    #[test]
    fn test_sanitize_orders_and_filters() {
        let cleaned = sanitize(vec![
            Detection::new("a", 0.2),
            Detection::new("b", 0.0),
            Detection::new("c", f32::NAN),
            Detection::new("d", 1.4),
            Detection::new("e", 0.6),
        ]);

        let labels: Vec<&str> = cleaned.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["d", "e", "a"]);
        assert_eq!(cleaned[0].confidence, 1.0);
    }

    #[test]
    fn test_check_shape() {
        let ok = Array4::<f32>::zeros((1, 3, 224, 224));
        assert!(check_shape(&ok, 224).is_ok());

        let wrong = Array4::<f32>::zeros((1, 3, 640, 640));
        let err = check_shape(&wrong, 224).unwrap_err();
        assert!(matches!(err, InferenceError::ShapeMismatch { expected: [1, 3, 224, 224], .. }));
    }

    #[test]
    fn test_swap_replaces_backend() {
        let engine = InferenceEngine::new(Arc::new(FixedBackend {
            detections: vec![],
            size: 224,
        }));
        let tensor = Array4::<f32>::zeros((1, 3, 224, 224));
        assert!(engine.infer(&tensor).unwrap().detections.is_empty());

        let snapshot = engine.current();
        engine.swap(Arc::new(FixedBackend {
            detections: vec![Detection::new("milk", 0.9)],
            size: 224,
        }));

        // The old snapshot is still usable after the swap
        assert!(snapshot.infer(&tensor).unwrap().is_empty());
        assert_eq!(engine.infer(&tensor).unwrap().detections.len(), 1);
    }

    #[test]
    fn test_run_normalizes_to_backend_size() {
        let engine = InferenceEngine::new(Arc::new(FixedBackend {
            detections: vec![Detection::new("milk", 0.9)],
            size: 640,
        }));
        let image = ImageBuffer::from_rgb(image::RgbImage::new(32, 16)).unwrap();
        let output = engine.run(&image).unwrap();
        assert_eq!(output.detections.len(), 1);
        assert_eq!(output.source, InferenceSource::Model);
    }

    #[test]
    fn test_shape_mismatch_is_fatal() {
        let engine = InferenceEngine::new(Arc::new(FixedBackend {
            detections: vec![],
            size: 224,
        }));
        let tensor = Array4::<f32>::zeros((1, 3, 10, 10));
        assert!(matches!(engine.infer(&tensor), Err(InferenceError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_reload_without_loader_fails() {
        let engine = InferenceEngine::new(Arc::new(FixedBackend {
            detections: vec![],
            size: 224,
        }));
        assert!(matches!(engine.reload(), Err(InferenceError::Load(_))));
        assert_eq!(engine.source(), InferenceSource::Model);
    }

    #[test]
    fn test_startup_falls_back_to_simulation() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf(), "best.onnx", "class_indices.json").unwrap();
        let engine = InferenceEngine::startup(&InferenceConfig::default(), manager, vec!["Milk".to_string()]);

        assert_eq!(engine.source(), InferenceSource::Simulated);
        assert_eq!(engine.current().input_size(), 640);

        // No artifact was installed, so reload fails and simulation stays active
        assert!(engine.reload().is_err());
        assert_eq!(engine.source(), InferenceSource::Simulated);
    }
}
