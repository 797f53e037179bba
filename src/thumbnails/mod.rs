//! Thumbnail decode pipeline.
//!
//! This module provides:
//! - `ThumbnailDecoder` - Turns an item into a small raster
//! - `CallbackExecutor` - Where results are delivered
//! - `DecodeQueue` - Worker queue for off-thread decoding

pub mod decoder;
pub mod executor;
pub mod queue;

pub use decoder::{ImageThumbnailDecoder, ThumbnailDecoder};
pub use executor::{CallbackExecutor, CallbackPump, ChannelExecutor, InlineExecutor};
pub use queue::{DecodeCallback, DecodeQueue, DecodeQueueBuilder, RequestOutcome};
