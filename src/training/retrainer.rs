//! Retrain lifecycle: samples -> trainer -> install -> metrics -> reload

use chrono::Utc;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Trainer, TrainingJob};
use crate::error::{RetrainError, StoreWriteError};
use crate::feedback::{FeedbackStore, TrainingMetrics};
use crate::inference::{InferenceEngine, ModelManager};

pub struct Retrainer {
    trainer: Option<Arc<dyn Trainer>>,
    store: Arc<dyn FeedbackStore>,
    engine: Arc<InferenceEngine>,
    models: ModelManager,
    model_name: String,
    retrain_after: Option<usize>,
    /// Held for the duration of a retrain
    running: Mutex<()>,
}

impl Retrainer {
    pub fn new(
        trainer: Option<Arc<dyn Trainer>>,
        store: Arc<dyn FeedbackStore>,
        engine: Arc<InferenceEngine>,
        models: ModelManager,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            trainer,
            store,
            engine,
            models,
            model_name: model_name.into(),
            retrain_after: None,
            running: Mutex::new(()),
        }
    }

    /// Retrain automatically once this many samples are pending
    pub fn with_retrain_after(mut self, samples: Option<usize>) -> Self {
        self.retrain_after = samples.filter(|n| *n > 0);
        self
    }

    pub fn is_configured(&self) -> bool {
        self.trainer.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_locked()
    }

    /// Samples not yet consumed by a finished retrain
    pub fn pending_samples(&self) -> Result<usize, StoreWriteError> {
        self.store.count_pending_feedback()
    }

    /// True if an automatic retrain threshold is set and reached
    pub fn is_due(&self) -> Result<bool, StoreWriteError> {
        match self.retrain_after {
            Some(threshold) => Ok(self.pending_samples()? >= threshold),
            None => Ok(false),
        }
    }

    /// Retrain if due; `None` if nothing was done
    pub fn retrain_if_due(&self) -> Result<Option<TrainingMetrics>, RetrainError> {
        if !self.is_due().map_err(RetrainError::Samples)? {
            return Ok(None);
        }
        self.retrain().map(Some)
    }

    /// Run one retrain cycle.
    ///
    /// Scans keep using the current model throughout; the new one is swapped
    /// in at the end. If the reload fails the metrics are still returned and
    /// the previous backend stays active.
    pub fn retrain(&self) -> Result<TrainingMetrics, RetrainError> {
        let trainer = self.trainer.as_ref().ok_or(RetrainError::NotConfigured)?;
        let _running = self.running.try_lock().ok_or(RetrainError::AlreadyRunning)?;

        let batch = self.store.feedback_samples().map_err(RetrainError::Samples)?;
        info!("Starting {} retrain with {} feedback samples", trainer.name(), batch.samples.len());

        let work_dir = self.models.models_dir().join("staging").join(Uuid::new_v4().to_string());
        std::fs::create_dir_all(&work_dir)
            .map_err(|e| RetrainError::Trainer(format!("failed to create {:?}: {}", work_dir, e)))?;
        let _cleanup = WorkDirGuard(work_dir.clone());

        let output = trainer.train(&TrainingJob {
            samples: &batch.samples,
            model_name: &self.model_name,
            work_dir: &work_dir,
        })?;

        self.models
            .install(&output.artifact, output.labels.as_deref())
            .map_err(|e| RetrainError::Install(format!("{:#}", e)))?;

        let metrics = output.metrics.into_metrics(&self.model_name, Utc::now());
        // Samples added while training stay pending for the next run
        self.store
            .append_metrics(&metrics, batch.through)
            .map_err(RetrainError::Persist)?;
        info!(
            "Retrain finished: {} mAP50 {:.3} mAP50-95 {:.3} ({})",
            metrics.model_name, metrics.map50, metrics.map95, metrics.epoch_or_version
        );

        match self.engine.reload() {
            Ok(source) => info!("Inference now using {:?} backend", source),
            Err(e) => warn!("Installed new artifact but reload failed, keeping current backend: {}", e),
        }

        Ok(metrics)
    }
}

/// Removes a job work directory when dropped
struct WorkDirGuard(PathBuf);

impl Drop for WorkDirGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.0) {
            debug!("Failed to remove work directory {:?}: {}", self.0, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::{FeedbackSample, ModelVersion};
    use crate::inference::{Detection, InferenceBackend, InferenceSource};
    use crate::storage::SqliteStore;
    use crate::training::{ReportedMetrics, TrainerOutput};
    use crate::vision::Tensor;
    use std::sync::mpsc;

    struct NoopBackend;

    impl InferenceBackend for NoopBackend {
        fn infer(&self, _: &Tensor) -> Result<Vec<Detection>, crate::error::InferenceError> {
            Ok(vec![])
        }
        fn source(&self) -> InferenceSource {
            InferenceSource::Simulated
        }
        fn input_size(&self) -> u32 {
            640
        }
    }

    /// Writes a fake artifact and reports fixed metrics
    #[derive(Default)]
    struct ScriptedTrainer {
        fail: bool,
        /// Contents of a labels file to hand back with the artifact
        labels: Option<&'static str>,
    }

    impl Trainer for ScriptedTrainer {
        fn train(&self, job: &TrainingJob<'_>) -> Result<TrainerOutput, RetrainError> {
            if self.fail {
                return Err(RetrainError::Trainer("dataset too small".to_string()));
            }
            let artifact = job.work_dir.join("best.onnx");
            std::fs::write(&artifact, format!("{} samples", job.samples.len())).unwrap();
            let labels = self.labels.map(|content| {
                let path = job.work_dir.join("labels.json");
                std::fs::write(&path, content).unwrap();
                path
            });
            Ok(TrainerOutput {
                artifact,
                labels,
                metrics: ReportedMetrics {
                    model_name: None,
                    map50: 0.87,
                    map95: 0.65,
                    epoch_or_version: Some(ModelVersion::Epoch(50)),
                },
            })
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<SqliteStore>,
        models: ModelManager,
        engine: Arc<InferenceEngine>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let models = ModelManager::with_dir(dir.path().join("models"), "best.onnx", "labels.json").unwrap();
        Fixture {
            _dir: dir,
            store: Arc::new(SqliteStore::open_in_memory().unwrap()),
            models,
            engine: Arc::new(InferenceEngine::new(Arc::new(NoopBackend))),
        }
    }

    fn retrainer(f: &Fixture, trainer: Option<Arc<dyn Trainer>>) -> Retrainer {
        Retrainer::new(trainer, f.store.clone(), f.engine.clone(), f.models.clone(), "bigbasket_yolo")
    }

    fn add_samples(store: &SqliteStore, count: usize) {
        for _ in 0..count {
            store
                .append_feedback(Uuid::new_v4(), &FeedbackSample::new("memory://a", "Milk", true))
                .unwrap();
        }
    }

    #[test]
    fn test_not_configured() {
        let f = fixture();
        assert!(matches!(retrainer(&f, None).retrain(), Err(RetrainError::NotConfigured)));
    }

    #[test]
    fn test_retrain_installs_artifact_and_persists_metrics() {
        let f = fixture();
        add_samples(&f.store, 2);
        let retrainer = retrainer(&f, Some(Arc::new(ScriptedTrainer::default())));

        let metrics = retrainer.retrain().unwrap();

        assert_eq!(metrics.model_name, "bigbasket_yolo");
        assert_eq!(metrics.epoch_or_version, ModelVersion::Epoch(50));
        assert_eq!(std::fs::read_to_string(f.models.artifact_path()).unwrap(), "2 samples");
        let stored = f.store.latest_metrics().unwrap().unwrap();
        assert_eq!(stored.epoch_or_version, metrics.epoch_or_version);
        assert_eq!(stored.map50, 0.87);
        assert_eq!(f.models.load_manifest().unwrap().models.len(), 1);
        // The reload failed, so the previous backend is still active
        assert_eq!(f.engine.source(), InferenceSource::Simulated);
        assert!(!f.models.models_dir().join("staging").read_dir().unwrap().any(|_| true));
    }

    #[test]
    fn test_trainer_failure_is_surfaced() {
        let f = fixture();
        let retrainer = retrainer(&f, Some(Arc::new(ScriptedTrainer { fail: true, labels: None })));

        assert!(matches!(retrainer.retrain(), Err(RetrainError::Trainer(_))));
        assert!(f.store.latest_metrics().unwrap().is_none());
        assert!(!retrainer.is_running());
    }

    #[test]
    fn test_retrain_if_due() {
        let f = fixture();
        let retrainer = retrainer(&f, Some(Arc::new(ScriptedTrainer::default()))).with_retrain_after(Some(3));

        add_samples(&f.store, 2);
        assert!(retrainer.retrain_if_due().unwrap().is_none());

        add_samples(&f.store, 1);
        assert!(retrainer.retrain_if_due().unwrap().is_some());

        // Samples are consumed by the new metrics record
        assert_eq!(retrainer.pending_samples().unwrap(), 0);
        assert!(retrainer.retrain_if_due().unwrap().is_none());
    }

    #[test]
    fn test_retrain_if_due_without_threshold() {
        let f = fixture();
        add_samples(&f.store, 10);
        let retrainer = retrainer(&f, Some(Arc::new(ScriptedTrainer::default())));
        assert!(retrainer.retrain_if_due().unwrap().is_none());
    }

    #[test]
    fn test_invalid_labels_keep_previous_model() {
        let f = fixture();
        add_samples(&f.store, 2);
        let good = retrainer(&f, Some(Arc::new(ScriptedTrainer { fail: false, labels: Some(r#"["Milk"]"#) })));
        good.retrain().unwrap();

        add_samples(&f.store, 1);
        let bad = retrainer(&f, Some(Arc::new(ScriptedTrainer { fail: false, labels: Some("{}") })));

        assert!(matches!(bad.retrain(), Err(RetrainError::Install(_))));
        assert_eq!(std::fs::read_to_string(f.models.artifact_path()).unwrap(), "2 samples");
        assert_eq!(f.models.load_labels().unwrap(), vec!["Milk"]);
        assert_eq!(bad.pending_samples().unwrap(), 1);
    }

    /// Feedback that keeps arriving while the trainer runs
    struct BusyTrainer {
        store: Arc<SqliteStore>,
        arrivals: usize,
    }

    impl Trainer for BusyTrainer {
        fn train(&self, job: &TrainingJob<'_>) -> Result<TrainerOutput, RetrainError> {
            add_samples(&self.store, self.arrivals);
            ScriptedTrainer::default().train(job)
        }

        fn name(&self) -> &'static str {
            "busy"
        }
    }

    #[test]
    fn test_samples_added_during_training_stay_pending() {
        let f = fixture();
        add_samples(&f.store, 2);
        let trainer = BusyTrainer {
            store: f.store.clone(),
            arrivals: 3,
        };
        let retrainer = retrainer(&f, Some(Arc::new(trainer))).with_retrain_after(Some(3));

        retrainer.retrain().unwrap();

        assert_eq!(std::fs::read_to_string(f.models.artifact_path()).unwrap(), "2 samples");
        assert_eq!(retrainer.pending_samples().unwrap(), 3);
        assert!(retrainer.is_due().unwrap());
    }

    /// Blocks inside `train` until released
    struct GatedTrainer {
        started: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl Trainer for GatedTrainer {
        fn train(&self, job: &TrainingJob<'_>) -> Result<TrainerOutput, RetrainError> {
            self.started.lock().send(()).unwrap();
            self.release.lock().recv().unwrap();
            ScriptedTrainer::default().train(job)
        }

        fn name(&self) -> &'static str {
            "gated"
        }
    }

    #[test]
    fn test_concurrent_retrain_is_rejected() {
        let f = fixture();
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let trainer = GatedTrainer {
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
        };
        let retrainer = Arc::new(retrainer(&f, Some(Arc::new(trainer))));

        let background = {
            let retrainer = retrainer.clone();
            std::thread::spawn(move || retrainer.retrain())
        };

        started_rx.recv().unwrap();
        assert!(retrainer.is_running());
        assert!(matches!(retrainer.retrain(), Err(RetrainError::AlreadyRunning)));

        release_tx.send(()).unwrap();
        assert!(background.join().unwrap().is_ok());
    }
}
