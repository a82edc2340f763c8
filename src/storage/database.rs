//! SQLite-backed feedback store

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreWriteError;
use crate::feedback::{
    format_timestamp, AuditRecord, FeedbackBatch, FeedbackSample, FeedbackStore, ModelVersion,
    TrainingMetrics,
};

const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Feedback store on a single SQLite connection.
///
/// The connection is serialized behind a mutex, so concurrent appends are
/// applied one at a time and none are lost.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at path
    pub fn open(path: &Path) -> Result<Self, StoreWriteError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreWriteError::Unavailable(format!("cannot create {:?}: {}", parent, e))
            })?;
        }

        let mut conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", true)?;
        run_migrations(&mut conn)?;

        info!("Opened feedback store at {:?}", path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreWriteError> {
        let mut conn = Connection::open_in_memory()?;
        run_migrations(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn run_migrations(conn: &mut Connection) -> Result<(), StoreWriteError> {
    let mut version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(StoreWriteError::Unavailable(format!(
            "database version ({}) is newer than supported schema ({})",
            version, CURRENT_SCHEMA_VERSION
        )));
    }

    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    while version < CURRENT_SCHEMA_VERSION {
        version += 1;
        match version {
            1 => tx.execute_batch(include_str!("schema_v1.sql"))?,
            _ => {
                return Err(StoreWriteError::Unavailable(format!(
                    "no migration for schema version {}",
                    version
                )))
            }
        }
        debug!("Applied schema migration v{}", version);
    }

    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    tx.commit()?;

    Ok(())
}

fn conversion_error(
    index: usize,
    error: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error))
}

fn timestamp_at(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(index)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(index, e))
}

fn row_to_sample(row: &Row<'_>) -> rusqlite::Result<FeedbackSample> {
    Ok(FeedbackSample {
        image_reference: row.get(0)?,
        label: row.get(1)?,
        user_confirmed: row.get(2)?,
        user_id: row.get(3)?,
        submitted_at: timestamp_at(row, 4)?,
    })
}

fn row_to_metrics(row: &Row<'_>) -> rusqlite::Result<TrainingMetrics> {
    let version: String = row.get(3)?;
    let kind: String = row.get(4)?;
    let epoch_or_version = ModelVersion::from_parts(&kind, &version).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            format!("invalid {} version {:?}", kind, version).into(),
        )
    })?;

    Ok(TrainingMetrics {
        model_name: row.get(0)?,
        map50: row.get(1)?,
        map95: row.get(2)?,
        epoch_or_version,
        trained_at: timestamp_at(row, 5)?,
    })
}

fn row_to_audit(row: &Row<'_>) -> rusqlite::Result<AuditRecord> {
    let id: String = row.get(0)?;
    let outcome_json: String = row.get(3)?;

    Ok(AuditRecord {
        id: Uuid::parse_str(&id).map_err(|e| conversion_error(0, e))?,
        image_reference: row.get(1)?,
        user_id: row.get(2)?,
        outcome: serde_json::from_str(&outcome_json).map_err(|e| conversion_error(3, e))?,
        recorded_at: timestamp_at(row, 4)?,
    })
}

impl FeedbackStore for SqliteStore {
    fn append_outcome(&self, record: &AuditRecord) -> Result<(), StoreWriteError> {
        let outcome = &record.outcome;
        let outcome_json = serde_json::to_string(outcome)?;

        self.conn.lock().execute(
            "INSERT INTO scans (id, status, product_id, product_name, price, confidence, source,
                                image_reference, user_id, outcome_json, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.id.to_string(),
                outcome.status().as_str(),
                outcome.product_id(),
                outcome.product_name(),
                outcome.price(),
                outcome.confidence().map(f64::from),
                outcome.source().map(|s| s.as_str()),
                record.image_reference,
                record.user_id,
                outcome_json,
                format_timestamp(&record.recorded_at),
            ],
        )?;
        Ok(())
    }

    fn append_feedback(&self, id: Uuid, sample: &FeedbackSample) -> Result<(), StoreWriteError> {
        self.conn.lock().execute(
            "INSERT INTO training_data (id, image_reference, label, user_confirmed, user_id, submitted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.to_string(),
                sample.image_reference,
                sample.label,
                sample.user_confirmed,
                sample.user_id,
                format_timestamp(&sample.submitted_at),
            ],
        )?;
        Ok(())
    }

    fn append_metrics(&self, metrics: &TrainingMetrics, samples_through: u64) -> Result<(), StoreWriteError> {
        let samples_through = i64::try_from(samples_through)
            .map_err(|_| StoreWriteError::Unavailable(format!("sample position {} out of range", samples_through)))?;

        self.conn.lock().execute(
            "INSERT INTO model_metrics (model_name, map50, map95, epoch_or_version, version_kind,
                                        samples_through, trained_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                metrics.model_name,
                metrics.map50,
                metrics.map95,
                metrics.epoch_or_version.to_string(),
                metrics.epoch_or_version.kind(),
                samples_through,
                format_timestamp(&metrics.trained_at),
            ],
        )?;
        Ok(())
    }

    fn feedback_samples(&self) -> Result<FeedbackBatch, StoreWriteError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT image_reference, label, user_confirmed, user_id, submitted_at, seq
             FROM training_data
             ORDER BY submitted_at ASC, seq ASC",
        )?;

        let mut batch = FeedbackBatch::default();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            batch.samples.push(row_to_sample(row)?);
            let seq: i64 = row.get(5)?;
            batch.through = batch.through.max(u64::try_from(seq).unwrap_or(0));
        }
        Ok(batch)
    }

    fn count_pending_feedback(&self) -> Result<usize, StoreWriteError> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM training_data
             WHERE seq > COALESCE(
                 (SELECT samples_through FROM model_metrics
                  ORDER BY trained_at DESC, id DESC
                  LIMIT 1),
                 0)",
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn latest_metrics(&self) -> Result<Option<TrainingMetrics>, StoreWriteError> {
        let metrics = self
            .conn
            .lock()
            .query_row(
                "SELECT model_name, map50, map95, epoch_or_version, version_kind, trained_at
                 FROM model_metrics
                 ORDER BY trained_at DESC, id DESC
                 LIMIT 1",
                [],
                row_to_metrics,
            )
            .optional()?;
        Ok(metrics)
    }

    fn recent_outcomes(&self, limit: usize) -> Result<Vec<AuditRecord>, StoreWriteError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, image_reference, user_id, outcome_json, recorded_at
             FROM scans
             ORDER BY recorded_at DESC, rowid DESC
             LIMIT ?1",
        )?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = stmt
            .query_map(params![limit], row_to_audit)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}
