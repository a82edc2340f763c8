//! Checkout Vision - product recognition core for a smart checkout
//!
//! Identifies a grocery product from a single image, prices it from the
//! catalog, and collects user feedback to retrain the recognition model.

pub mod catalog;
pub mod config;
pub mod error;
pub mod feedback;
pub mod inference;
pub mod policy;
pub mod scanner;
pub mod storage;
pub mod training;
pub mod vision;

pub use catalog::{CatalogIndex, MatchResult, Product};
pub use config::AppConfig;
pub use error::{CatalogLoadError, ImageDecodeError, InferenceError, RetrainError, StoreWriteError};
pub use feedback::{FeedbackSample, FeedbackStore, TrainingMetrics};
pub use inference::{Detection, InferenceBackend, InferenceEngine, InferenceSource};
pub use policy::{DecisionPolicy, ScanOutcome, ScanStatus};
pub use scanner::{FeedbackAck, FeedbackSubmission, Scanner};
pub use vision::{ImageBuffer, ImageInput};
