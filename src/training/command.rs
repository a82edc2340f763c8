//! Local training program
//!
//! The program finds the samples through `CHECKOUT_TRAINING_SAMPLES` (a JSON
//! array file) and must print `{"artifact": ..., "metrics": {...}}` as the last
//! non-empty line of stdout. Relative paths are resolved against the job's
//! work directory.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

use super::{ReportedMetrics, Trainer, TrainerOutput, TrainingJob};
use crate::error::RetrainError;

pub const SAMPLES_ENV: &str = "CHECKOUT_TRAINING_SAMPLES";
pub const WORK_DIR_ENV: &str = "CHECKOUT_WORK_DIR";
pub const MODEL_NAME_ENV: &str = "CHECKOUT_MODEL_NAME";

#[derive(Debug, Deserialize)]
struct CommandReport {
    artifact: PathBuf,
    #[serde(default)]
    labels: Option<PathBuf>,
    metrics: ReportedMetrics,
}

pub struct CommandTrainer {
    program: String,
    args: Vec<String>,
}

impl CommandTrainer {
    pub fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }
}

fn resolve(work_dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        work_dir.join(path)
    }
}

/// Parse the report line printed by the training program
fn parse_report(stdout: &str, work_dir: &Path) -> Result<TrainerOutput, RetrainError> {
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| RetrainError::Trainer("training program printed no report".to_string()))?;

    let report: CommandReport = serde_json::from_str(line)
        .map_err(|e| RetrainError::Trainer(format!("invalid training report '{}': {}", line, e)))?;

    let artifact = resolve(work_dir, report.artifact);
    if !artifact.is_file() {
        return Err(RetrainError::Trainer(format!(
            "training program reported missing artifact {:?}",
            artifact
        )));
    }

    Ok(TrainerOutput {
        artifact,
        labels: report.labels.map(|p| resolve(work_dir, p)),
        metrics: report.metrics,
    })
}

impl Trainer for CommandTrainer {
    fn train(&self, job: &TrainingJob<'_>) -> Result<TrainerOutput, RetrainError> {
        let samples_path = job.work_dir.join("samples.json");
        let payload = serde_json::to_vec_pretty(job.samples)
            .map_err(|e| RetrainError::Trainer(format!("failed to encode samples: {}", e)))?;
        std::fs::write(&samples_path, payload)
            .map_err(|e| RetrainError::Trainer(format!("failed to write {:?}: {}", samples_path, e)))?;

        info!("Running training program '{}' on {} samples", self.program, job.samples.len());

        let output = Command::new(&self.program)
            .args(&self.args)
            .env(SAMPLES_ENV, &samples_path)
            .env(WORK_DIR_ENV, job.work_dir)
            .env(MODEL_NAME_ENV, job.model_name)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| RetrainError::Trainer(format!("failed to run '{}': {}", self.program, e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!("Training program stderr:\n{}", stderr.trim_end());
        }

        if !output.status.success() {
            let last_error = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
            return Err(RetrainError::Trainer(format!(
                "'{}' exited with {}: {}",
                self.program, output.status, last_error
            )));
        }

        parse_report(&String::from_utf8_lossy(&output.stdout), job.work_dir)
    }

    fn name(&self) -> &'static str {
        "command"
    }
}
