//! Retraining
//!
//! Training itself happens outside this crate. A `Trainer` receives the
//! collected feedback samples and hands back a model artifact with its
//! evaluation metrics; the `Retrainer` installs the artifact and swaps it
//! into the inference engine.

pub mod command;
pub mod http;
pub mod retrainer;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{TrainerConfig, TrainerKind};
use crate::error::RetrainError;
use crate::feedback::{FeedbackSample, ModelVersion, TrainingMetrics};
use crate::inference::ModelManager;

pub use command::CommandTrainer;
pub use http::HttpTrainer;
pub use retrainer::Retrainer;

/// Input handed to a trainer
pub struct TrainingJob<'a> {
    pub samples: &'a [FeedbackSample],
    pub model_name: &'a str,
    /// Scratch directory owned by this job; removed after the retrain
    pub work_dir: &'a Path,
}

/// Metrics as reported by a trainer. Missing fields are filled in by the
/// retrainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedMetrics {
    #[serde(default)]
    pub model_name: Option<String>,
    pub map50: f64,
    pub map95: f64,
    #[serde(default, alias = "epoch")]
    pub epoch_or_version: Option<ModelVersion>,
}

impl ReportedMetrics {
    pub fn into_metrics(self, default_model_name: &str, trained_at: DateTime<Utc>) -> TrainingMetrics {
        TrainingMetrics {
            model_name: self
                .model_name
                .unwrap_or_else(|| default_model_name.to_string()),
            map50: self.map50,
            map95: self.map95,
            epoch_or_version: self
                .epoch_or_version
                .unwrap_or_else(|| ModelVersion::Tag(trained_at.format("%Y%m%d%H%M%S").to_string())),
            trained_at,
        }
    }
}

/// What a successful training run produced
#[derive(Debug, Clone)]
pub struct TrainerOutput {
    /// Local path of the new model artifact
    pub artifact: PathBuf,
    /// Local path of a new labels file, if the class set changed
    pub labels: Option<PathBuf>,
    pub metrics: ReportedMetrics,
}

/// External training collaborator. Runs synchronously.
pub trait Trainer: Send + Sync {
    fn train(&self, job: &TrainingJob<'_>) -> Result<TrainerOutput, RetrainError>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Build the configured trainer; `None` when retraining is disabled
pub fn trainer_from_config(config: &TrainerConfig, models: &ModelManager) -> Result<Option<Arc<dyn Trainer>>> {
    match config.kind {
        TrainerKind::None => Ok(None),
        TrainerKind::Command => {
            let Some(program) = &config.program else {
                bail!("trainer.kind = \"command\" requires trainer.program");
            };
            Ok(Some(Arc::new(CommandTrainer::new(program.clone(), config.args.clone()))))
        }
        TrainerKind::Http => {
            let Some(url) = &config.url else {
                bail!("trainer.kind = \"http\" requires trainer.url");
            };
            Ok(Some(Arc::new(HttpTrainer::new(
                url.clone(),
                Duration::from_secs(config.timeout_secs),
                models.clone(),
            ))))
        }
    }
}
