//! Checkout scanner
//!
//! Entry point tying the pipeline together:
//! decode -> normalize -> infer -> decide -> record.
//! Shareable across threads behind an `Arc`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::{CatalogIndex, Product};
use crate::config::AppConfig;
use crate::error::{ImageDecodeError, InferenceError, RetrainError, StoreWriteError};
use crate::feedback::archive::{memory_reference, ArchiveKind};
use crate::feedback::{
    AuditRecord, BestEffortSink, FeedbackSample, FeedbackStore, ImageArchive, TrainingMetrics,
};
use crate::inference::{InferenceEngine, InferenceSource, ModelManager};
use crate::policy::{DecisionPolicy, ScanOutcome};
use crate::storage::SqliteStore;
use crate::training::{trainer_from_config, Retrainer};
use crate::vision::{self, ImageInput};

/// User feedback on a previous scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackSubmission {
    pub image_reference: String,
    pub label: String,
    /// True confirms the label, false marks it as a correction
    pub user_confirmed: bool,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Acknowledgement of a feedback submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackAck {
    /// Record id, `None` if the store was unavailable
    pub id: Option<Uuid>,
    pub image_reference: String,
    /// Enough samples are pending for an automatic retrain
    pub retrain_due: bool,
}

pub struct Scanner {
    catalog: Arc<CatalogIndex>,
    engine: Arc<InferenceEngine>,
    policy: DecisionPolicy,
    sink: BestEffortSink,
    archive: ImageArchive,
    retrainer: Option<Retrainer>,
}

impl Scanner {
    pub fn new(catalog: CatalogIndex, engine: Arc<InferenceEngine>, store: Arc<dyn FeedbackStore>) -> Self {
        Self {
            catalog: Arc::new(catalog),
            engine,
            policy: DecisionPolicy::default(),
            sink: BestEffortSink::new(store),
            archive: ImageArchive::disabled(),
            retrainer: None,
        }
    }

    pub fn with_policy(mut self, policy: DecisionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_archive(mut self, archive: ImageArchive) -> Self {
        self.archive = archive;
        self
    }

    pub fn with_retrainer(mut self, retrainer: Retrainer) -> Self {
        self.retrainer = Some(retrainer);
        self
    }

    /// Build the full pipeline from configuration.
    ///
    /// A bad catalog or an unusable store is fatal; a missing model is not
    /// (inference falls back to simulation).
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let catalog = CatalogIndex::load(&config.catalog.path)
            .with_context(|| format!("Failed to load catalog {:?}", config.catalog.path))?
            .with_fuzzy_threshold(config.catalog.fuzzy_threshold);

        let models = ModelManager::new(&config.inference)?;
        let engine = Arc::new(InferenceEngine::startup(
            &config.inference,
            models.clone(),
            catalog.labels(),
        ));

        let db_path = config.feedback.resolve_database_path()?;
        let store: Arc<dyn FeedbackStore> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open feedback store {:?}", db_path))?,
        );

        let trainer = trainer_from_config(&config.trainer, &models)?;
        let retrainer = Retrainer::new(
            trainer,
            store.clone(),
            engine.clone(),
            models,
            config.trainer.model_name.clone(),
        )
        .with_retrain_after(config.feedback.retrain_after_samples);

        Ok(Self::new(catalog, engine, store)
            .with_policy(DecisionPolicy::new(config.policy.success_threshold))
            .with_archive(ImageArchive::new(config.feedback.archive_dir.clone()))
            .with_retrainer(retrainer))
    }

    /// Identify the product in an image.
    ///
    /// Undecodable input yields a `failed` outcome rather than an error; only
    /// inference failures are returned as `Err`. The outcome is recorded
    /// best-effort either way.
    pub fn scan(&self, input: ImageInput, user_id: Option<&str>) -> Result<ScanOutcome, InferenceError> {
        let image = match vision::decode(&input) {
            Ok(image) => image,
            Err(e) => {
                warn!("Rejected scan input: {}", e);
                let outcome = ScanOutcome::failed(format!("Could not decode image: {}", e));
                self.sink.record_outcome(&outcome, &memory_reference(), user_id);
                return Ok(outcome);
            }
        };
        drop(input);

        let output = self.engine.run(&image)?;
        let image_reference = self.archive.store(&image, ArchiveKind::Scan);
        drop(image);

        let outcome = self.policy.decide(&output.detections, output.source, &self.catalog);
        info!(
            "Scan {}: {} ({:?}, {} detections)",
            outcome.status().as_str(),
            outcome.product_name().unwrap_or("-"),
            output.source,
            output.detections.len()
        );

        self.sink.record_outcome(&outcome, &image_reference, user_id);
        Ok(outcome)
    }

    /// Look up a product by barcode
    pub fn scan_barcode(&self, code: &str) -> Option<Product> {
        self.catalog.find_by_barcode(code).cloned()
    }

    /// Record a user confirmation or correction
    pub fn submit_feedback(&self, submission: FeedbackSubmission) -> FeedbackAck {
        let sample = FeedbackSample::new(
            submission.image_reference,
            submission.label,
            submission.user_confirmed,
        )
        .with_user(submission.user_id);

        self.ack(&sample)
    }

    /// Teach a new item: archive the image and record a confirmed sample
    pub fn add_training_item(
        &self,
        input: ImageInput,
        label: &str,
        user_id: Option<&str>,
    ) -> Result<FeedbackAck, ImageDecodeError> {
        let image = vision::decode(&input)?;
        let image_reference = self.archive.store(&image, ArchiveKind::Training);

        let sample = FeedbackSample::new(image_reference, label, true).with_user(user_id.map(str::to_string));
        info!("Added training item '{}'", label);
        Ok(self.ack(&sample))
    }

    fn ack(&self, sample: &FeedbackSample) -> FeedbackAck {
        let id = self.sink.record_feedback(sample);
        let retrain_due = match &self.retrainer {
            Some(retrainer) => retrainer.is_due().unwrap_or_else(|e| {
                warn!("Failed to check pending samples: {}", e);
                false
            }),
            None => false,
        };

        FeedbackAck {
            id,
            image_reference: sample.image_reference.clone(),
            retrain_due,
        }
    }

    /// Retrain on all collected feedback and swap in the new model
    pub fn retrain(&self) -> Result<TrainingMetrics, RetrainError> {
        self.retrainer
            .as_ref()
            .ok_or(RetrainError::NotConfigured)?
            .retrain()
    }

    /// Retrain only if enough feedback is pending
    pub fn retrain_if_due(&self) -> Result<Option<TrainingMetrics>, RetrainError> {
        match &self.retrainer {
            Some(retrainer) => retrainer.retrain_if_due(),
            None => Ok(None),
        }
    }

    pub fn products(&self) -> impl Iterator<Item = &Product> {
        self.catalog.products()
    }

    pub fn latest_metrics(&self) -> Result<Option<TrainingMetrics>, StoreWriteError> {
        self.sink.store().latest_metrics()
    }

    /// Most recent recorded scans, newest first
    pub fn recent_scans(&self, limit: usize) -> Result<Vec<AuditRecord>, StoreWriteError> {
        self.sink.store().recent_outcomes(limit)
    }

    pub fn inference_source(&self) -> InferenceSource {
        self.engine.source()
    }

    pub fn catalog(&self) -> &CatalogIndex {
        &self.catalog
    }

    pub fn engine(&self) -> &Arc<InferenceEngine> {
        &self.engine
    }
}
