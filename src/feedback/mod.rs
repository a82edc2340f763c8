//! Feedback & audit records
//!
//! Scan outcomes, user-labeled samples and training metrics are append-only
//! records. The store behind them is an external collaborator reached through
//! the `FeedbackStore` trait; scan-path writes go through `BestEffortSink`.

pub mod archive;
pub mod sink;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::StoreWriteError;
use crate::policy::ScanOutcome;

pub use archive::ImageArchive;
pub use sink::BestEffortSink;

/// Timestamps are stored in a fixed-width UTC form so they sort as text
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// A user confirmation or correction of a scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSample {
    /// Where the scanned image can be found
    pub image_reference: String,
    /// Correct product label
    pub label: String,
    /// True if the user confirmed the label, false if it is a correction
    pub user_confirmed: bool,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl FeedbackSample {
    pub fn new(image_reference: impl Into<String>, label: impl Into<String>, user_confirmed: bool) -> Self {
        Self {
            image_reference: image_reference.into(),
            label: label.into(),
            user_confirmed,
            submitted_at: Utc::now(),
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }
}

/// Training epoch count or an opaque version tag reported by the trainer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelVersion {
    Epoch(u64),
    Tag(String),
}

impl ModelVersion {
    /// Storage discriminator, kept alongside the `to_string` form
    pub fn kind(&self) -> &'static str {
        match self {
            ModelVersion::Epoch(_) => "epoch",
            ModelVersion::Tag(_) => "tag",
        }
    }

    /// Rebuild from `kind()` and `to_string()`; `None` if they disagree
    pub fn from_parts(kind: &str, text: &str) -> Option<Self> {
        match kind {
            "epoch" => text.parse().ok().map(ModelVersion::Epoch),
            "tag" => Some(ModelVersion::Tag(text.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelVersion::Epoch(epoch) => write!(f, "{}", epoch),
            ModelVersion::Tag(tag) => f.write_str(tag),
        }
    }
}

/// Evaluation metrics of one retraining run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub model_name: String,
    /// mAP at IoU 0.5
    pub map50: f64,
    /// mAP averaged over IoU 0.5-0.95
    pub map95: f64,
    #[serde(alias = "epoch")]
    pub epoch_or_version: ModelVersion,
    pub trained_at: DateTime<Utc>,
}

/// Feedback samples read in one pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedbackBatch {
    pub samples: Vec<FeedbackSample>,
    /// Store position of the newest sample in the batch, 0 if empty
    pub through: u64,
}

/// A persisted scan outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub outcome: ScanOutcome,
    pub image_reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only feedback/audit storage.
///
/// Implementations must accept concurrent appends without losing records.
pub trait FeedbackStore: Send + Sync {
    fn append_outcome(&self, record: &AuditRecord) -> Result<(), StoreWriteError>;

    fn append_feedback(&self, id: Uuid, sample: &FeedbackSample) -> Result<(), StoreWriteError>;

    /// Append a metrics record for a run that consumed samples up to and
    /// including position `samples_through`
    fn append_metrics(&self, metrics: &TrainingMetrics, samples_through: u64) -> Result<(), StoreWriteError>;

    /// All feedback samples in submission order
    fn feedback_samples(&self) -> Result<FeedbackBatch, StoreWriteError>;

    /// Samples appended after those consumed by the latest metrics record
    /// (all if there is none)
    fn count_pending_feedback(&self) -> Result<usize, StoreWriteError>;

    /// Most recent metrics record
    fn latest_metrics(&self) -> Result<Option<TrainingMetrics>, StoreWriteError>;

    /// Most recent audit records, newest first
    fn recent_outcomes(&self, limit: usize) -> Result<Vec<AuditRecord>, StoreWriteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_version_parts_round_trip() {
        for version in [
            ModelVersion::Epoch(50),
            ModelVersion::Tag("2024-06-v3".to_string()),
            ModelVersion::Tag("20251007202511".to_string()),
        ] {
            assert_eq!(ModelVersion::from_parts(version.kind(), &version.to_string()), Some(version));
        }
        assert_eq!(ModelVersion::from_parts("epoch", "v3"), None);
        assert_eq!(ModelVersion::from_parts("semver", "1.0"), None);
    }

    #[test]
    fn test_digit_tag_stays_a_tag_in_json() {
        let tag = ModelVersion::Tag("20251007202511".to_string());
        let json = serde_json::to_string(&tag).unwrap();
        assert_eq!(serde_json::from_str::<ModelVersion>(&json).unwrap(), tag);
    }

    #[test]
    fn test_metrics_accept_epoch_alias() {
        let metrics: TrainingMetrics = serde_json::from_str(
            r#"{"model_name": "bigbasket_yolo", "map50": 0.87, "map95": 0.65, "epoch": 50,
                "trained_at": "2025-10-07T20:25:11Z"}"#,
        )
        .unwrap();
        assert_eq!(metrics.epoch_or_version, ModelVersion::Epoch(50));
        assert_eq!(metrics.model_name, "bigbasket_yolo");
    }

    #[test]
    fn test_timestamps_sort_as_text() {
        let earlier = "2025-01-01T00:00:00.5Z".parse::<DateTime<Utc>>().unwrap();
        let later = "2025-01-01T00:00:01Z".parse::<DateTime<Utc>>().unwrap();
        assert!(format_timestamp(&earlier) < format_timestamp(&later));
    }
}
