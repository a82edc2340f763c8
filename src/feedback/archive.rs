//! Image archive for scanned and taught images
//!
//! Archived images become the `image_reference` of audit and feedback records.
//! With archiving disabled (or on write failure) the reference is a
//! `memory://<uuid>` placeholder.

use image::ImageFormat;
use std::path::PathBuf;
use tracing::warn;
use uuid::Uuid;

use crate::vision::ImageBuffer;

/// Where an archived image belongs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// Image submitted for a scan
    Scan,
    /// Image submitted to teach a new item
    Training,
}

impl ArchiveKind {
    fn dir_name(&self) -> &'static str {
        match self {
            ArchiveKind::Scan => "scans",
            ArchiveKind::Training => "training_data",
        }
    }
}

/// Placeholder reference for an image that was not written anywhere
pub fn memory_reference() -> String {
    format!("memory://{}", Uuid::new_v4())
}

#[derive(Debug, Clone, Default)]
pub struct ImageArchive {
    root: Option<PathBuf>,
}

impl ImageArchive {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    pub fn disabled() -> Self {
        Self { root: None }
    }

    /// Save the image as JPEG and return its reference
    pub fn store(&self, image: &ImageBuffer, kind: ArchiveKind) -> String {
        let Some(root) = &self.root else {
            return memory_reference();
        };

        let dir = root.join(kind.dir_name());
        let path = dir.join(format!("{}.jpg", Uuid::new_v4()));

        let result = std::fs::create_dir_all(&dir)
            .map_err(image::ImageError::IoError)
            .and_then(|_| image.pixels().save_with_format(&path, ImageFormat::Jpeg));

        match result {
            Ok(()) => path.to_string_lossy().into_owned(),
            Err(e) => {
                warn!("Failed to archive image to {:?}: {}", path, e);
                memory_reference()
            }
        }
    }
}
