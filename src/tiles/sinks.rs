//! Notifications the tile cache sends back to its owner.

/// What part of the grid needs to be redrawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepaintRegion {
    /// The whole viewport.
    All,
    /// One row-block.
    Block(usize),
    /// A single cell, by item index.
    Cell(usize),
}

/// Receives redraw requests; the owner decides when to actually draw.
///
/// Called from the decode worker or driver threads as well as the caller's
/// thread, and never while a cache lock is held.
pub trait RepaintSink: Send + Sync {
    fn invalidate(&self, region: RepaintRegion);
}

/// Informed when the first visible item changes, e.g. for keyboard navigation.
pub trait ScrollSink: Send + Sync {
    fn on_visible_index_changed(&self, index: usize);
}

/// Sink that drops every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl RepaintSink for NoopSink {
    fn invalidate(&self, _region: RepaintRegion) {}
}

impl ScrollSink for NoopSink {
    fn on_visible_index_changed(&self, _index: usize) {}
}

impl<F> RepaintSink for F
where
    F: Fn(RepaintRegion) + Send + Sync,
{
    fn invalidate(&self, region: RepaintRegion) {
        self(region)
    }
}
