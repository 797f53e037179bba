use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Shared handle to an item of the grid.
///
/// Handles are compared by reference (`Arc::ptr_eq`), never by index: the
/// index is only a position hint into a collection that may change.
pub type ItemRef = Arc<MediaItem>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Image,
    Other,
}

impl MediaType {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" | "png" | "webp" | "gif" | "bmp" | "tiff" | "tif" => Self::Image,
            _ => Self::Other,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Self::Other)
    }
}

#[derive(Debug, Clone)]
pub struct MediaItem {
    pub path: PathBuf,
    pub media_type: MediaType,
    pub mtime: i64,
    pub size: i64,
}

impl MediaItem {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let media_type = MediaType::from_path(&path);
        Self {
            path,
            media_type,
            mtime: 0,
            size: 0,
        }
    }

    pub fn with_metadata(mut self, mtime: i64, size: i64) -> Self {
        self.mtime = mtime;
        self.size = size;
        self
    }

    /// Wrap into a shared handle.
    pub fn into_ref(self) -> ItemRef {
        Arc::new(self)
    }

    pub fn is_image(&self) -> bool {
        self.media_type == MediaType::Image
    }
}
