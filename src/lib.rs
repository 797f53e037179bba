//! Thumbnail grid backend: a sliding window of decoded row-blocks over an
//! ordered image collection, fed by a small pool of decode workers.

pub mod error;
pub mod layout;
pub mod models;
pub mod thumbnails;
pub mod tiles;

#[cfg(test)]
mod test_support;

pub use error::{DecodeError, GridError};
pub use layout::GridLayout;
pub use models::{ItemRef, ItemSource, MediaItem, ScanConfig, VecItemSource};
pub use thumbnails::{
    CallbackExecutor, ChannelExecutor, DecodeQueue, DecodeQueueBuilder, ImageThumbnailDecoder,
    InlineExecutor, ThumbnailDecoder,
};
pub use tiles::{RepaintRegion, RepaintSink, ScrollSink, TileCache, TileCacheConfig};
