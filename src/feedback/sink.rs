//! Best-effort writes to the feedback store
//!
//! Scan and feedback records must never fail the request that produced them.
//! This wrapper is the only place where store write errors are swallowed.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{AuditRecord, FeedbackSample, FeedbackStore};
use crate::policy::ScanOutcome;

/// Logs and counts store write failures instead of returning them
pub struct BestEffortSink {
    store: Arc<dyn FeedbackStore>,
    failed_writes: AtomicU64,
}

impl BestEffortSink {
    pub fn new(store: Arc<dyn FeedbackStore>) -> Self {
        Self {
            store,
            failed_writes: AtomicU64::new(0),
        }
    }

    /// The wrapped store, for reads and for writes that must surface errors
    pub fn store(&self) -> &Arc<dyn FeedbackStore> {
        &self.store
    }

    /// Number of writes dropped since startup
    pub fn failed_writes(&self) -> u64 {
        self.failed_writes.load(Ordering::Relaxed)
    }

    /// Append an audit record; returns its id if the write succeeded
    pub fn record_outcome(
        &self,
        outcome: &ScanOutcome,
        image_reference: &str,
        user_id: Option<&str>,
    ) -> Option<Uuid> {
        let record = AuditRecord {
            id: Uuid::new_v4(),
            outcome: outcome.clone(),
            image_reference: image_reference.to_string(),
            user_id: user_id.map(str::to_string),
            recorded_at: Utc::now(),
        };

        match self.store.append_outcome(&record) {
            Ok(()) => {
                debug!("Recorded {} scan {}", outcome.status().as_str(), record.id);
                Some(record.id)
            }
            Err(e) => {
                self.failed_writes.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to record scan outcome ({}): {}", outcome.status().as_str(), e);
                None
            }
        }
    }

    /// Append a feedback sample; returns its id if the write succeeded
    pub fn record_feedback(&self, sample: &FeedbackSample) -> Option<Uuid> {
        let id = Uuid::new_v4();

        match self.store.append_feedback(id, sample) {
            Ok(()) => {
                debug!("Recorded feedback {} for label '{}'", id, sample.label);
                Some(id)
            }
            Err(e) => {
                self.failed_writes.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to record feedback for label '{}': {}", sample.label, e);
                None
            }
        }
    }
}
