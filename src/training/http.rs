//! Remote trainer service
//!
//! Posts the samples to the service and downloads the artifact it reports.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::info;

use super::{ReportedMetrics, Trainer, TrainerOutput, TrainingJob};
use crate::error::RetrainError;
use crate::feedback::FeedbackSample;
use crate::inference::ModelManager;

#[derive(Debug, Serialize)]
struct TrainRequest<'a> {
    model_name: &'a str,
    samples: &'a [FeedbackSample],
}

#[derive(Debug, Deserialize)]
struct TrainResponse {
    artifact_url: String,
    #[serde(default)]
    labels_url: Option<String>,
    metrics: ReportedMetrics,
}

pub struct HttpTrainer {
    url: String,
    timeout: Duration,
    models: ModelManager,
}

impl HttpTrainer {
    pub fn new(url: String, timeout: Duration, models: ModelManager) -> Self {
        Self { url, timeout, models }
    }

    async fn request(&self, job: &TrainingJob<'_>) -> Result<TrainResponse, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(self.timeout).build()?;

        client
            .post(&self.url)
            .json(&TrainRequest {
                model_name: job.model_name,
                samples: job.samples,
            })
            .send()
            .await?
            .error_for_status()?
            .json::<TrainResponse>()
            .await
    }
}

impl Trainer for HttpTrainer {
    fn train(&self, job: &TrainingJob<'_>) -> Result<TrainerOutput, RetrainError> {
        info!("Requesting training from {} with {} samples", self.url, job.samples.len());

        let rt = Runtime::new()
            .map_err(|e| RetrainError::Trainer(format!("failed to create tokio runtime: {}", e)))?;
        let response = rt
            .block_on(self.request(job))
            .map_err(|e| RetrainError::Trainer(format!("trainer request failed: {}", e)))?;
        drop(rt);

        let download = |url: &str, filename: &str| {
            self.models
                .download(url, filename, self.timeout)
                .map_err(|e| RetrainError::Trainer(format!("{:#}", e)))
        };

        let (artifact, sha256) = download(&response.artifact_url, "artifact.onnx")?;
        info!("Downloaded trained artifact (sha256 {})", sha256);

        let labels = match &response.labels_url {
            Some(url) => Some(download(url, "labels.json")?.0),
            None => None,
        };

        Ok(TrainerOutput {
            artifact,
            labels,
            metrics: response.metrics,
        })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_format() {
        let response: TrainResponse = serde_json::from_str(
            r#"{"artifact_url": "https://trainer.local/runs/7/best.onnx",
                "metrics": {"map50": 0.87, "map95": 0.65, "epoch": 50}}"#,
        )
        .unwrap();

        assert!(response.labels_url.is_none());
        assert_eq!(response.metrics.map50, 0.87);
    }

    #[test]
    fn test_request_format() {
        let samples = vec![FeedbackSample::new("memory://a", "Milk", false)];
        let body = serde_json::to_value(TrainRequest {
            model_name: "bigbasket_yolo",
            samples: &samples,
        })
        .unwrap();

        assert_eq!(body["model_name"], "bigbasket_yolo");
        assert_eq!(body["samples"][0]["label"], "Milk");
        assert_eq!(body["samples"][0]["user_confirmed"], false);
    }
}
