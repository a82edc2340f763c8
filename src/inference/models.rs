//! Model artifact management
//!
//! Tracks the installed model artifact and its class labels, installs new
//! artifacts produced by the trainer, and downloads remote artifacts.

use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::config::InferenceConfig;

/// Manifest tracking installed artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub installed_at: String,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            models: Vec::new(),
        }
    }
}

/// Class label file layouts accepted by `load_labels`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LabelFile {
    /// `["milk", "bread"]`
    List(Vec<String>),
    /// `{"names": ["milk", "bread"]}`
    Names { names: Vec<String> },
    /// `{"idx_to_class": {"0": "milk", "1": "bread"}}`
    IndexMap {
        idx_to_class: std::collections::BTreeMap<String, String>,
    },
}

/// Model manager for the installed artifact and its labels
#[derive(Debug, Clone)]
pub struct ModelManager {
    models_dir: PathBuf,
    artifact_name: String,
    labels_name: String,
}

impl ModelManager {
    /// Create a model manager from inference settings
    pub fn new(config: &InferenceConfig) -> Result<Self> {
        let models_dir = config.resolve_model_dir()?;
        Self::with_dir(models_dir, &config.artifact_name, &config.labels_name)
    }

    /// Create model manager with custom directory
    pub fn with_dir(models_dir: PathBuf, artifact_name: &str, labels_name: &str) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create model directory {:?}", models_dir))?;
        Ok(Self {
            models_dir,
            artifact_name: artifact_name.to_string(),
            labels_name: labels_name.to_string(),
        })
    }

    /// Get the models directory path
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.models_dir.join(&self.artifact_name)
    }

    pub fn labels_path(&self) -> PathBuf {
        self.models_dir.join(&self.labels_name)
    }

    /// Check that the artifact exists and is not empty
    pub fn is_artifact_available(&self) -> bool {
        std::fs::metadata(self.artifact_path())
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// Load class labels in index order
    pub fn load_labels(&self) -> Result<Vec<String>> {
        let path = self.labels_path();
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read labels {:?}", path))?;
        parse_labels(&content).with_context(|| format!("Invalid labels file {:?}", path))
    }

    /// Install a trained artifact and, if given, its labels.
    ///
    /// Labels are validated and both files are copied next to their
    /// destinations before either is renamed into place, so a bad labels file
    /// leaves the current model untouched and a concurrent loader never sees
    /// a partial file.
    pub fn install(&self, artifact: &Path, labels: Option<&Path>) -> Result<Vec<ModelInfo>> {
        if let Some(labels) = labels {
            let content = std::fs::read_to_string(labels)
                .with_context(|| format!("Failed to read labels {:?}", labels))?;
            parse_labels(&content)
                .with_context(|| format!("Refusing to install invalid labels {:?}", labels))?;
        }

        let mut staged = vec![StagedFile::copy(artifact, &self.models_dir, &self.artifact_name)?];
        if let Some(labels) = labels {
            staged.push(StagedFile::copy(labels, &self.models_dir, &self.labels_name)?);
        }

        let mut installed = Vec::with_capacity(staged.len());
        for file in staged {
            let info = file.commit()?;
            info!("Installed {} ({} bytes)", info.filename, info.size_bytes);
            installed.push(info);
        }

        for info in &installed {
            self.update_manifest(info.clone())?;
        }
        Ok(installed)
    }

    /// Download a file into the model directory staging area (blocking).
    /// Returns the staged path and its SHA-256.
    pub fn download(&self, url: &str, filename: &str, timeout: Duration) -> Result<(PathBuf, String)> {
        let dest = self.models_dir.join("incoming").join(filename);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Downloading {} from {}", filename, url);

        let rt = Runtime::new().context("Failed to create tokio runtime")?;
        let hash = rt.block_on(download_file_async(url, &dest, timeout))?;

        Ok((dest, hash))
    }

    /// Load the model manifest
    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let manifest_path = self.models_dir.join("manifest.json");
        if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)?;
            let manifest: ModelManifest = serde_json::from_str(&content)?;
            Ok(manifest)
        } else {
            Ok(ModelManifest::default())
        }
    }

    /// Save the model manifest
    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let manifest_path = self.models_dir.join("manifest.json");
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(manifest_path, content)?;
        Ok(())
    }

    fn update_manifest(&self, info: ModelInfo) -> Result<()> {
        let mut manifest = self.load_manifest().unwrap_or_default();

        if let Some(existing) = manifest.models.iter_mut().find(|m| m.filename == info.filename) {
            *existing = info;
        } else {
            manifest.models.push(info);
        }

        self.save_manifest(&manifest)
    }
}

/// A file copied into the model directory under a temporary name.
/// The copy is removed on drop unless committed.
struct StagedFile {
    filename: String,
    temp_path: PathBuf,
    dest: PathBuf,
    sha256: String,
    size_bytes: u64,
    committed: bool,
}

impl StagedFile {
    fn copy(source: &Path, models_dir: &Path, filename: &str) -> Result<Self> {
        let temp_path = models_dir.join(format!("{}.tmp", filename));
        std::fs::copy(source, &temp_path)
            .with_context(|| format!("Failed to copy {:?} into model directory", source))?;

        let mut staged = Self {
            filename: filename.to_string(),
            temp_path,
            dest: models_dir.join(filename),
            sha256: String::new(),
            size_bytes: 0,
            committed: false,
        };
        (staged.sha256, staged.size_bytes) = hash_file(&staged.temp_path)?;
        Ok(staged)
    }

    fn commit(mut self) -> Result<ModelInfo> {
        std::fs::rename(&self.temp_path, &self.dest)
            .context("Failed to move installed file to final location")?;
        self.committed = true;

        Ok(ModelInfo {
            filename: self.filename.clone(),
            size_bytes: self.size_bytes,
            sha256: self.sha256.clone(),
            installed_at: Utc::now().to_rfc3339(),
        })
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = std::fs::remove_file(&self.temp_path) {
                debug!("Failed to remove staged file {:?}: {}", self.temp_path, e);
            }
        }
    }
}

/// Parse any accepted label file layout
pub fn parse_labels(content: &str) -> Result<Vec<String>> {
    let labels = match serde_json::from_str::<LabelFile>(content)? {
        LabelFile::List(labels) | LabelFile::Names { names: labels } => labels,
        LabelFile::IndexMap { idx_to_class } => {
            let mut indexed = idx_to_class
                .into_iter()
                .map(|(idx, name)| {
                    idx.trim()
                        .parse::<usize>()
                        .map(|i| (i, name))
                        .with_context(|| format!("Invalid class index '{}'", idx))
                })
                .collect::<Result<Vec<_>>>()?;
            indexed.sort_by_key(|(i, _)| *i);

            if indexed.iter().enumerate().any(|(pos, (i, _))| pos != *i) {
                anyhow::bail!("Class indices must be contiguous from 0");
            }
            indexed.into_iter().map(|(_, name)| name).collect()
        }
    };

    if labels.is_empty() {
        anyhow::bail!("Label file contains no classes");
    }
    Ok(labels)
}

fn hash_file(path: &Path) -> Result<(String, u64)> {
    let data = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok((format!("{:x}", hasher.finalize()), data.len() as u64))
}

/// Stream a URL to disk, hashing as it goes
async fn download_file_async(url: &str, path: &Path, timeout: Duration) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .context("Failed to send download request")?;

    if !response.status().is_success() {
        anyhow::bail!("Download failed with status {}: {}", response.status(), url);
    }

    debug!("Download size: {:?} bytes", response.content_length());

    let temp_path = path.with_extension("tmp");
    let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

    let mut hasher = Sha256::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Error reading download stream")?;
        file.write_all(&chunk).context("Failed to write to temp file")?;
        hasher.update(&chunk);
    }

    file.flush().context("Failed to flush temp file")?;
    drop(file);

    std::fs::rename(&temp_path, path)
        .context("Failed to move downloaded file to final location")?;

    Ok(format!("{:x}", hasher.finalize()))
}
