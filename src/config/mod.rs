//! Application Configuration
//!
//! Scanner settings stored in TOML format. Every section has defaults, so a
//! partial file (or no file at all) is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::catalog::DEFAULT_FUZZY_THRESHOLD;
use crate::policy::DEFAULT_SUCCESS_THRESHOLD;
use crate::storage;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Product catalog source
    pub catalog: CatalogConfig,
    /// Inference backend settings
    pub inference: InferenceConfig,
    /// Decision thresholds
    pub policy: PolicyConfig,
    /// Feedback/audit store settings
    pub feedback: FeedbackConfig,
    /// External trainer settings
    pub trainer: TrainerConfig,
}

/// Catalog settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// JSON file with an array of products
    pub path: PathBuf,
    /// Fuzzy acceptance threshold (0-100, exclusive)
    pub fuzzy_threshold: f64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/product_catalog.json"),
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
        }
    }
}

/// Kind of model artifact, which fixes its input contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// YOLO-style detector, 640x640 input
    #[default]
    Detection,
    /// Whole-image classifier, 224x224 input
    Classification,
}

impl ModelKind {
    /// Square input size the model expects
    pub fn input_size(&self) -> u32 {
        match self {
            ModelKind::Detection => crate::vision::DETECTION_INPUT_SIZE,
            ModelKind::Classification => crate::vision::CLASSIFICATION_INPUT_SIZE,
        }
    }
}

/// Inference settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Model kind of the artifact in the model directory
    pub model_kind: ModelKind,
    /// Model directory (defaults to `<data dir>/models`)
    pub model_dir: Option<PathBuf>,
    /// Artifact filename inside the model directory
    pub artifact_name: String,
    /// Class label filename inside the model directory
    pub labels_name: String,
    /// Minimum raw class score for a detector anchor to become a candidate
    pub score_floor: f32,
    /// ONNX Runtime intra-op threads
    pub intra_threads: usize,
    /// Simulated backend settings
    pub simulation: SimulationConfig,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            model_kind: ModelKind::Detection,
            model_dir: None,
            artifact_name: "best.onnx".to_string(),
            labels_name: "class_indices.json".to_string(),
            score_floor: 0.25,
            intra_threads: 4,
            simulation: SimulationConfig::default(),
        }
    }
}

impl InferenceConfig {
    /// Configured model directory or the default under the data directory
    pub fn resolve_model_dir(&self) -> Result<PathBuf> {
        match &self.model_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(storage::get_data_dir()?.join("models")),
        }
    }
}

/// Simulated backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Probability of emitting a detection (0.0 - 1.0)
    pub detection_probability: f64,
    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            detection_probability: 0.7,
            seed: None,
        }
    }
}

/// Decision policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Minimum confidence for a `success` outcome
    pub success_threshold: f32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
        }
    }
}

/// Feedback store settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// SQLite database file (defaults to `<data dir>/checkout.db`)
    pub database_path: Option<PathBuf>,
    /// Directory where scanned and taught images are archived; disabled if unset
    pub archive_dir: Option<PathBuf>,
    /// Retrain once this many samples arrived since the last retrain
    pub retrain_after_samples: Option<usize>,
}

impl FeedbackConfig {
    /// Configured database path or the default under the data directory
    pub fn resolve_database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(storage::get_data_dir()?.join("checkout.db")),
        }
    }
}

/// External trainer selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainerKind {
    /// Retraining disabled
    #[default]
    None,
    /// Run a local training program
    Command,
    /// Call a remote trainer service
    Http,
}

/// External trainer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub kind: TrainerKind,
    /// Program to run for `command` trainers
    pub program: Option<String>,
    /// Arguments passed to the program
    pub args: Vec<String>,
    /// Endpoint for `http` trainers
    pub url: Option<String>,
    /// Request timeout for `http` trainers
    pub timeout_secs: u64,
    /// Model name recorded when the trainer does not report one
    pub model_name: String,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            kind: TrainerKind::None,
            program: None,
            args: Vec::new(),
            url: None,
            timeout_secs: 3600,
            model_name: "bigbasket_yolo".to_string(),
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {:?}", path))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
