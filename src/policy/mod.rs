//! Decision Policy
//!
//! Turns the detections of one scan into exactly one outcome:
//! - no detections: `unknown_item`
//! - best detection resolved in the catalog with enough confidence: `success`
//! - any other detection signal: `low_confidence`

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::catalog::{CatalogIndex, MatchResult};
use crate::inference::{Detection, InferenceSource};

/// Default minimum confidence for a `success` outcome
pub const DEFAULT_SUCCESS_THRESHOLD: f32 = 0.5;

/// Scan result status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Success,
    LowConfidence,
    UnknownItem,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Success => "success",
            ScanStatus::LowConfidence => "low_confidence",
            ScanStatus::UnknownItem => "unknown_item",
            ScanStatus::Failed => "failed",
        }
    }
}

/// Outcome of one scan request. Fields are private so the status invariants
/// hold for every value; use the constructors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanOutcome {
    status: ScanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    product_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<InferenceSource>,
}

impl ScanOutcome {
    fn success(matched: &MatchResult<'_>, confidence: f32, source: InferenceSource) -> Self {
        Self {
            status: ScanStatus::Success,
            product_id: Some(matched.product.product_id.clone()),
            product_name: Some(matched.product.name.clone()),
            price: Some(matched.product.price),
            confidence: Some(confidence),
            message: None,
            source: Some(source),
        }
    }

    fn low_confidence(detection: &Detection, message: String, source: InferenceSource) -> Self {
        Self {
            status: ScanStatus::LowConfidence,
            product_id: None,
            product_name: Some(detection.label.clone()),
            price: None,
            confidence: Some(detection.confidence),
            message: Some(message),
            source: Some(source),
        }
    }

    fn unknown_item(source: InferenceSource) -> Self {
        Self {
            status: ScanStatus::UnknownItem,
            product_id: None,
            product_name: None,
            price: None,
            confidence: None,
            message: Some("No product detected".to_string()),
            source: Some(source),
        }
    }

    /// Outcome for input that never reached inference
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ScanStatus::Failed,
            product_id: None,
            product_name: None,
            price: None,
            confidence: None,
            message: Some(message.into()),
            source: None,
        }
    }

    pub fn status(&self) -> ScanStatus {
        self.status
    }

    pub fn product_id(&self) -> Option<&str> {
        self.product_id.as_deref()
    }

    /// Catalog name for `success`, raw detected label for `low_confidence`
    pub fn product_name(&self) -> Option<&str> {
        self.product_name.as_deref()
    }

    pub fn price(&self) -> Option<f64> {
        self.price
    }

    pub fn confidence(&self) -> Option<f32> {
        self.confidence
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn source(&self) -> Option<InferenceSource> {
        self.source
    }
}

/// Confidence-gated decision over catalog-resolved detections
#[derive(Debug, Clone)]
pub struct DecisionPolicy {
    success_threshold: f32,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_SUCCESS_THRESHOLD)
    }
}

/// A detection together with its catalog resolution
struct Candidate<'d, 'c> {
    detection: &'d Detection,
    matched: Option<MatchResult<'c>>,
}

impl Candidate<'_, '_> {
    fn match_score(&self) -> f64 {
        self.matched.as_ref().map(|m| m.score).unwrap_or(0.0)
    }

    fn product_id(&self) -> Option<&str> {
        self.matched.as_ref().map(|m| m.product.product_id.as_str())
    }
}

/// Higher confidence first, then higher match score, then lowest product_id
/// (resolved before unresolved)
fn rank(a: &Candidate<'_, '_>, b: &Candidate<'_, '_>) -> Ordering {
    b.detection
        .confidence
        .total_cmp(&a.detection.confidence)
        .then_with(|| b.match_score().total_cmp(&a.match_score()))
        .then_with(|| match (a.product_id(), b.product_id()) {
            (Some(a), Some(b)) => a.cmp(b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
}

impl DecisionPolicy {
    pub fn new(success_threshold: f32) -> Self {
        Self { success_threshold }
    }

    pub fn success_threshold(&self) -> f32 {
        self.success_threshold
    }

    /// Decide the outcome of one scan
    pub fn decide(
        &self,
        detections: &[Detection],
        source: InferenceSource,
        catalog: &CatalogIndex,
    ) -> ScanOutcome {
        // A zero-confidence detection carries no signal
        let signals = || detections.iter().filter(|d| d.confidence > 0.0);

        let top_confidence = signals()
            .map(|d| d.confidence)
            .fold(f32::NEG_INFINITY, f32::max);

        // Only detections tied for the top confidence need catalog resolution
        let best = signals()
            .filter(|d| d.confidence == top_confidence)
            .map(|detection| Candidate {
                detection,
                matched: catalog.resolve(&detection.label),
            })
            .min_by(rank);

        let Some(best) = best else {
            return ScanOutcome::unknown_item(source);
        };

        match best.matched {
            Some(matched) if best.detection.confidence >= self.success_threshold => {
                ScanOutcome::success(&matched, best.detection.confidence, source)
            }
            Some(matched) => ScanOutcome::low_confidence(
                best.detection,
                format!(
                    "Low confidence detection ({:.2} < {:.2}); closest product '{}'",
                    best.detection.confidence, self.success_threshold, matched.product.name
                ),
                source,
            ),
            None => ScanOutcome::low_confidence(
                best.detection,
                "Detected label does not match any catalog product".to_string(),
                source,
            ),
        }
    }
}
