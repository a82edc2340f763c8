//! Error taxonomy for the scan pipeline
//!
//! Errors caused by untrusted input degrade to typed scan outcomes; errors caused
//! by contract violations or operator actions propagate to the caller.

use std::path::PathBuf;
use thiserror::Error;

/// Image input could not be turned into a pixel buffer.
///
/// Recoverable: the scanner turns it into a `failed` outcome.
#[derive(Debug, Error)]
pub enum ImageDecodeError {
    #[error("No image provided")]
    Empty,

    #[error("Malformed data URL: {0}")]
    MalformedDataUrl(String),

    #[error("Invalid base64 image data: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("Invalid image data: {0}")]
    Undecodable(#[from] image::ImageError),

    #[error("Image has zero area ({width}x{height})")]
    ZeroArea { width: u32, height: u32 },
}

/// The product catalog could not be loaded. Fatal at startup.
#[derive(Debug, Error)]
pub enum CatalogLoadError {
    #[error("Failed to read catalog {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed catalog: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Catalog record {index} is missing required field `{field}`")]
    MissingField { index: usize, field: &'static str },

    #[error("Catalog record {index} ({product_id}) has invalid price {price}")]
    InvalidPrice {
        index: usize,
        product_id: String,
        price: f64,
    },

    #[error("Duplicate product_id `{0}` in catalog")]
    DuplicateId(String),
}

/// Inference failed. A shape mismatch means the normalizer and the backend
/// disagree on the input contract.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Tensor shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: [usize; 4],
        actual: Vec<usize>,
    },

    #[error("Model output has unexpected shape {0:?}")]
    UnexpectedOutput(Vec<usize>),

    #[error("ONNX Runtime error: {0}")]
    Runtime(#[from] ort::Error),

    #[error("Failed to load model artifact: {0}")]
    Load(String),
}

/// A write to the feedback/audit store failed. Never surfaced to scan callers.
#[derive(Debug, Error)]
pub enum StoreWriteError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// An explicit retrain request failed.
#[derive(Debug, Error)]
pub enum RetrainError {
    #[error("No trainer configured")]
    NotConfigured,

    #[error("A retrain is already running")]
    AlreadyRunning,

    #[error("Failed to read feedback samples: {0}")]
    Samples(#[source] StoreWriteError),

    #[error("Trainer failed: {0}")]
    Trainer(String),

    #[error("Failed to install model artifact: {0}")]
    Install(String),

    #[error("Failed to persist training metrics: {0}")]
    Persist(#[source] StoreWriteError),
}
