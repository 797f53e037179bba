//! Windowed tile cache for a scrollable thumbnail grid.

pub mod cache;
pub mod raster;
pub mod sinks;
pub mod tile;
pub mod window;

pub use cache::{TileCache, TileCacheConfig};
pub use raster::{CellHighlight, RasterTile};
pub use sinks::{NoopSink, RepaintRegion, RepaintSink, ScrollSink};
pub use tile::{Selection, TileSnapshot, TileState};
