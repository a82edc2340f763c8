//! ONNX Runtime inference backend
//!
//! Runs either a YOLO-style detector (`[1, 4 + C, N]` output) or a whole-image
//! classifier (`[1, C]` output) and maps class indices to label names.

use ndarray::{ArrayViewD, Axis, Ix2, Ix3};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor as OrtTensor;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, info};

use super::models::ModelManager;
use super::{check_shape, Detection, InferenceBackend, InferenceSource};
use crate::config::{InferenceConfig, ModelKind};
use crate::error::InferenceError;
use crate::vision::Tensor;

/// Builds ONNX backends from the installed artifact
#[derive(Debug, Clone)]
pub struct ModelLoader {
    manager: ModelManager,
    kind: ModelKind,
    score_floor: f32,
    intra_threads: usize,
}

impl ModelLoader {
    pub fn new(manager: ModelManager, config: &InferenceConfig) -> Self {
        Self {
            manager,
            kind: config.model_kind,
            score_floor: config.score_floor,
            intra_threads: config.intra_threads.max(1),
        }
    }

    pub fn manager(&self) -> &ModelManager {
        &self.manager
    }

    /// Load the installed artifact and its labels
    pub fn load(&self) -> Result<OnnxBackend, InferenceError> {
        if !self.manager.is_artifact_available() {
            return Err(InferenceError::Load(format!(
                "artifact not found at {:?}",
                self.manager.artifact_path()
            )));
        }

        let labels = self
            .manager
            .load_labels()
            .map_err(|e| InferenceError::Load(format!("{:#}", e)))?;

        let path = self.manager.artifact_path();
        info!("Loading ONNX model from {:?}", path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.intra_threads)?
            .commit_from_file(&path)?;

        OnnxBackend::new(session, self.kind, labels, self.score_floor)
    }
}

/// ONNX Runtime session wrapper
pub struct OnnxBackend {
    /// ort needs exclusive access to run a session
    session: Mutex<Session>,
    input_name: String,
    kind: ModelKind,
    labels: Vec<String>,
    score_floor: f32,
}

impl OnnxBackend {
    pub fn new(
        session: Session,
        kind: ModelKind,
        labels: Vec<String>,
        score_floor: f32,
    ) -> Result<Self, InferenceError> {
        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| InferenceError::Load("model has no inputs".to_string()))?;

        let output_names: Vec<&str> = session.outputs.iter().map(|o| o.name.as_str()).collect();
        debug!("Model loaded. Input: {}, Outputs: {:?}", input_name, output_names);

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            kind,
            labels,
            score_floor,
        })
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }
}

impl InferenceBackend for OnnxBackend {
    fn infer(&self, tensor: &Tensor) -> Result<Vec<Detection>, InferenceError> {
        check_shape(tensor, self.input_size())?;

        let input = OrtTensor::from_array(tensor.clone())?;
        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![self.input_name.as_str() => input])?;
        let output = outputs[0].try_extract_array::<f32>()?;

        match self.kind {
            ModelKind::Detection => decode_detector_output(output, &self.labels, self.score_floor),
            ModelKind::Classification => decode_classifier_output(output, &self.labels),
        }
    }

    fn source(&self) -> InferenceSource {
        InferenceSource::Model
    }

    fn input_size(&self) -> u32 {
        self.kind.input_size()
    }
}

fn label_for(labels: &[String], class_id: usize) -> String {
    labels
        .get(class_id)
        .cloned()
        .unwrap_or_else(|| format!("class_{}", class_id))
}

/// Decode a YOLO detector head.
///
/// Each anchor contributes its best class if the score reaches `score_floor`;
/// boxes are irrelevant for checkout, so candidates collapse to one detection
/// per label carrying the best score.
pub fn decode_detector_output(
    output: ArrayViewD<'_, f32>,
    labels: &[String],
    score_floor: f32,
) -> Result<Vec<Detection>, InferenceError> {
    let shape = output.shape().to_vec();
    let output = output
        .into_dimensionality::<Ix3>()
        .map_err(|_| InferenceError::UnexpectedOutput(shape.clone()))?;

    if shape[0] != 1 {
        return Err(InferenceError::UnexpectedOutput(shape));
    }

    // Canonical layout is [1, 4 + C, N]; some exports transpose to [1, N, 4 + C]
    let rows = output.index_axis(Axis(0), 0);
    let transposed = shape[1] != labels.len() + 4 && shape[2] == labels.len() + 4;
    let rows = if transposed { rows.reversed_axes() } else { rows };

    if rows.nrows() <= 4 {
        return Err(InferenceError::UnexpectedOutput(shape));
    }
    let class_count = rows.nrows() - 4;
    let mut best: HashMap<usize, f32> = HashMap::new();

    for anchor in rows.columns() {
        let Some((class_id, score)) = anchor
            .iter()
            .skip(4)
            .take(class_count)
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
        else {
            continue;
        };

        if score >= score_floor {
            let entry = best.entry(class_id).or_insert(score);
            *entry = entry.max(score);
        }
    }

    Ok(best
        .into_iter()
        .map(|(class_id, score)| Detection::new(label_for(labels, class_id), score))
        .collect())
}

/// Decode a classifier head into its single best class.
///
/// Softmax is applied unless the row already looks like a probability
/// distribution.
pub fn decode_classifier_output(
    output: ArrayViewD<'_, f32>,
    labels: &[String],
) -> Result<Vec<Detection>, InferenceError> {
    let shape = output.shape().to_vec();
    let scores: Vec<f32> = match output.ndim() {
        1 => output.iter().copied().collect(),
        2 if shape[0] == 1 => output
            .into_dimensionality::<Ix2>()
            .map_err(|_| InferenceError::UnexpectedOutput(shape.clone()))?
            .row(0)
            .to_vec(),
        _ => return Err(InferenceError::UnexpectedOutput(shape)),
    };

    if scores.is_empty() {
        return Err(InferenceError::UnexpectedOutput(shape));
    }

    let sum: f32 = scores.iter().sum();
    let is_distribution = (sum - 1.0).abs() < 1e-3 && scores.iter().all(|s| (0.0..=1.0).contains(s));
    let probs = if is_distribution { scores } else { softmax(&scores) };

    let (class_id, confidence) = probs
        .iter()
        .copied()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .ok_or_else(|| InferenceError::UnexpectedOutput(shape.clone()))?;

    Ok(vec![Detection::new(label_for(labels, class_id), confidence)])
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / total).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};

    fn labels() -> Vec<String> {
        vec!["milk".to_string(), "bread".to_string()]
    }

    #[test]
    fn test_decode_detector_collapses_per_label() {
        // [1, 4 + 2 classes, 3 anchors]
        let mut out = Array3::<f32>::zeros((1, 6, 3));
        out[[0, 4, 0]] = 0.9; // anchor 0: milk
        out[[0, 4, 1]] = 0.6; // anchor 1: milk, weaker
        out[[0, 5, 2]] = 0.1; // anchor 2: bread, below floor

        let mut detections = decode_detector_output(out.into_dyn().view(), &labels(), 0.25).unwrap();
        detections.sort_by(|a, b| a.label.cmp(&b.label));

        assert_eq!(detections, vec![Detection::new("milk", 0.9)]);
    }

    #[test]
    fn test_decode_detector_transposed_layout() {
        // [1, 3 anchors, 4 + 2 classes]
        let mut out = Array3::<f32>::zeros((1, 3, 6));
        out[[0, 1, 5]] = 0.8;

        let detections = decode_detector_output(out.into_dyn().view(), &labels(), 0.25).unwrap();
        assert_eq!(detections, vec![Detection::new("bread", 0.8)]);
    }

    #[test]
    fn test_decode_detector_rejects_bad_shape() {
        let out = Array2::<f32>::zeros((1, 6));
        assert!(matches!(
            decode_detector_output(out.into_dyn().view(), &labels(), 0.25),
            Err(InferenceError::UnexpectedOutput(_))
        ));
    }

    #[test]
    fn test_decode_classifier_probabilities() {
        let out = Array2::from_shape_vec((1, 2), vec![0.2, 0.8]).unwrap();
        let detections = decode_classifier_output(out.into_dyn().view(), &labels()).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label, "bread");
        assert!((detections[0].confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_decode_classifier_applies_softmax_to_logits() {
        let out = Array2::from_shape_vec((1, 2), vec![2.0, 0.0]).unwrap();
        let detections = decode_classifier_output(out.into_dyn().view(), &labels()).unwrap();
        assert_eq!(detections[0].label, "milk");
        let expected = 1.0 / (1.0 + (-2.0f32).exp());
        assert!((detections[0].confidence - expected).abs() < 1e-5);
    }

    #[test]
    fn test_unknown_class_index_gets_placeholder_label() {
        let out = Array2::from_shape_vec((1, 3), vec![0.1, 0.1, 0.8]).unwrap();
        let detections = decode_classifier_output(out.into_dyn().view(), &labels()).unwrap();
        assert_eq!(detections[0].label, "class_2");
    }
}
