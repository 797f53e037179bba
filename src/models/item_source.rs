//! Ordered, index-addressable item collections the grid reads from.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use parking_lot::RwLock;
use tracing::{debug, trace};
use walkdir::WalkDir;

use super::media_item::{ItemRef, MediaItem};

/// The collection backing a grid.
///
/// Called from the tile driver thread as well as the caller's thread, so
/// implementations must be internally synchronized.
pub trait ItemSource: Send + Sync {
    /// Number of items currently in the collection.
    fn count(&self) -> usize;

    /// Item at `index`, or `None` if out of range or not materialized yet.
    fn item_at(&self, index: usize) -> Option<ItemRef>;
}

/// Configuration for [`VecItemSource::scan_dir`].
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Whether to scan directories recursively.
    pub recursive: bool,
    /// Maximum directory depth (0 = unlimited).
    pub max_depth: usize,
    /// Whether to follow symbolic links.
    pub follow_symlinks: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            recursive: true,
            max_depth: 0,
            follow_symlinks: false,
        }
    }
}

/// In-memory item collection.
///
/// Mutations are not observed by a `TileCache` on their own; the owner must
/// follow them with a full refresh.
#[derive(Default)]
pub struct VecItemSource {
    items: RwLock<Vec<ItemRef>>,
}

impl VecItemSource {
    pub fn new(items: Vec<ItemRef>) -> Self {
        Self {
            items: RwLock::new(items),
        }
    }

    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self::new(
            paths
                .into_iter()
                .map(|p| MediaItem::new(p).into_ref())
                .collect(),
        )
    }

    /// Collect every image under `dir`, sorted by path.
    pub fn scan_dir(dir: &Path, config: &ScanConfig) -> Self {
        let mut walker = WalkDir::new(dir).follow_links(config.follow_symlinks);

        if !config.recursive {
            walker = walker.max_depth(1);
        } else if config.max_depth > 0 {
            walker = walker.max_depth(config.max_depth);
        }

        let mut items = Vec::new();

        for entry in walker.into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_dir() {
                continue;
            }

            let item = MediaItem::new(entry.path());
            if !item.is_image() {
                trace!(path = ?entry.path(), "Skipping non-image file");
                continue;
            }

            let item = match entry.metadata() {
                Ok(meta) => {
                    let mtime = meta
                        .modified()
                        .ok()
                        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                        .map(|d| d.as_secs() as i64)
                        .unwrap_or(0);
                    item.with_metadata(mtime, meta.len() as i64)
                }
                Err(_) => item,
            };

            items.push(item);
        }

        items.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(?dir, count = items.len(), "Scanned directory for images");

        Self::new(items.into_iter().map(Arc::new).collect())
    }

    pub fn push(&self, item: ItemRef) {
        self.items.write().push(item);
    }

    pub fn insert(&self, index: usize, item: ItemRef) {
        let mut items = self.items.write();
        let index = index.min(items.len());
        items.insert(index, item);
    }

    pub fn remove(&self, index: usize) -> Option<ItemRef> {
        let mut items = self.items.write();
        if index < items.len() {
            Some(items.remove(index))
        } else {
            None
        }
    }

    pub fn replace_all(&self, items: Vec<ItemRef>) {
        *self.items.write() = items;
    }
}

impl ItemSource for VecItemSource {
    fn count(&self) -> usize {
        self.items.read().len()
    }

    fn item_at(&self, index: usize) -> Option<ItemRef> {
        self.items.read().get(index).cloned()
    }
}
