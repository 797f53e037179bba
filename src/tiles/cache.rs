//! Windowed tile cache over an ordered item collection.
//!
//! A fixed ring of tile slots covers the row-blocks around the viewport
//! (`pre_cache_pages` above, `post_cache_pages` below). Scrolling remaps the
//! ring, cancelling pending decodes for blocks that leave it; a dedicated
//! driver thread requests decodes for blocks that are not complete yet.
//!
//! Lock order: window state, then a single tile, then the selection or the
//! decode queue. Sinks are never called with a lock held.

use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use image::RgbaImage;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace};

use super::raster::{RasterTile, BACKGROUND};
use super::sinks::{RepaintRegion, RepaintSink, ScrollSink};
use super::tile::{Selection, Tile, TileSnapshot};
use super::window::{plan_shift, VisibleBlocks, WindowDescriptor};
use crate::error::GridError;
use crate::layout::GridLayout;
use crate::models::ItemSource;
use crate::thumbnails::DecodeQueue;

/// Sizing and threading of a [`TileCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileCacheConfig {
    /// Row-blocks in one viewport page.
    pub rows_per_page: usize,
    /// Pages kept above the first visible row.
    pub pre_cache_pages: usize,
    /// Pages kept below the visible rows.
    pub post_cache_pages: usize,
    /// Decode worker threads started with the cache.
    pub decode_threads: usize,
    /// Deliver decode results through the queue's callback executor instead
    /// of on the worker thread.
    pub deliver_on_callback_thread: bool,
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            rows_per_page: 6,
            pre_cache_pages: 2,
            post_cache_pages: 2,
            decode_threads: 1,
            deliver_on_callback_thread: false,
        }
    }
}

impl TileCacheConfig {
    pub fn with_rows_per_page(mut self, rows: usize) -> Self {
        self.rows_per_page = rows;
        self
    }

    pub fn with_cache_pages(mut self, pre: usize, post: usize) -> Self {
        self.pre_cache_pages = pre;
        self.post_cache_pages = post;
        self
    }

    pub fn with_decode_threads(mut self, threads: usize) -> Self {
        self.decode_threads = threads;
        self
    }

    pub fn with_callback_thread(mut self, enabled: bool) -> Self {
        self.deliver_on_callback_thread = enabled;
        self
    }

    /// Number of tile slots in the ring.
    pub fn slot_count(&self) -> usize {
        self.rows_per_page * (self.pre_cache_pages + self.post_cache_pages + 1)
    }

    fn pre_cache_blocks(&self) -> usize {
        self.pre_cache_pages * self.rows_per_page
    }

    pub fn validate(&self) -> Result<(), GridError> {
        if self.rows_per_page == 0 {
            return Err(GridError::InvalidConfig(
                "rows_per_page must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

struct WindowState {
    layout: GridLayout,
    layout_epoch: u64,
    window: WindowDescriptor,
    scroll_y: i64,
    viewport_height: u32,
    last_reported_index: Option<usize>,
    /// Bumped whenever the driver may have new work.
    work_counter: u64,
    done: bool,
}

/// Identifies the cell a decode was requested for.
#[derive(Debug, Clone, Copy)]
struct CellTicket {
    slot: usize,
    block: usize,
    epoch: u64,
    col: u32,
    generation: u64,
    index: usize,
}

struct Inner {
    config: TileCacheConfig,
    state: Mutex<WindowState>,
    wake: Condvar,
    tiles: Vec<Mutex<Tile>>,
    selection: Mutex<Selection>,
    source: Arc<dyn ItemSource>,
    queue: DecodeQueue,
    repaint: Arc<dyn RepaintSink>,
    scroll: Arc<dyn ScrollSink>,
}

/// Sliding window of decoded row-blocks backing a scrollable thumbnail grid.
pub struct TileCache {
    inner: Arc<Inner>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl TileCache {
    /// Build the cache, start `queue` and the driver thread.
    ///
    /// The window starts at the top of the grid with nothing visible until
    /// the first [`on_window_changed`](Self::on_window_changed).
    pub fn new(
        config: TileCacheConfig,
        layout: GridLayout,
        source: Arc<dyn ItemSource>,
        queue: DecodeQueue,
        repaint: Arc<dyn RepaintSink>,
        scroll: Arc<dyn ScrollSink>,
    ) -> Result<Self, GridError> {
        config.validate()?;
        layout.validate()?;

        let slots = config.slot_count();
        let tiles = (0..slots).map(|_| Mutex::new(Tile::default())).collect();

        queue.start(config.decode_threads)?;

        let inner = Arc::new(Inner {
            config,
            state: Mutex::new(WindowState {
                layout,
                layout_epoch: 0,
                window: WindowDescriptor::default(),
                scroll_y: 0,
                viewport_height: 0,
                last_reported_index: None,
                work_counter: 0,
                done: false,
            }),
            wake: Condvar::new(),
            tiles,
            selection: Mutex::new(Selection::default()),
            source,
            queue,
            repaint,
            scroll,
        });

        {
            let mut state = inner.state.lock();
            inner.move_window(&mut state, true);
        }

        let driver_inner = Arc::clone(&inner);
        let driver = thread::Builder::new()
            .name("tile-driver".into())
            .spawn(move || driver_loop(driver_inner))
            .map_err(|source| {
                inner.queue.stop();
                GridError::Spawn {
                    name: "tile-driver".into(),
                    source,
                }
            })?;

        debug!(slots, columns = layout.columns, "Started tile cache");

        Ok(Self {
            inner,
            driver: Mutex::new(Some(driver)),
        })
    }

    /// React to a scroll or viewport resize.
    ///
    /// Slots sliding into the window are reassigned and their old requests
    /// cancelled; the rest keep their decoded content. Positions past the
    /// end of the grid are clamped to the last page.
    pub fn on_window_changed(
        &self,
        scroll_y: i64,
        viewport_height: u32,
        force_full_refresh: bool,
    ) -> Result<(), GridError> {
        let report = {
            let mut state = self.inner.lock_live()?;
            let max_scroll = state
                .layout
                .max_scroll(self.inner.source.count(), viewport_height);
            state.scroll_y = scroll_y.min(max_scroll);
            state.viewport_height = viewport_height;
            let changed = self.inner.move_window(&mut state, force_full_refresh);

            let first_index = self.inner.first_visible_index(&state);
            let report = (first_index != state.last_reported_index)
                .then_some(first_index)
                .flatten();
            state.last_reported_index = first_index;
            (changed, report)
        };

        let (changed, first_index) = report;
        if let Some(index) = first_index {
            self.inner.scroll.on_visible_index_changed(index);
        }
        if changed {
            self.inner.repaint.invalidate(RepaintRegion::All);
        }
        Ok(())
    }

    /// Change grid geometry. Every tile is invalidated since the column count
    /// decides which items belong to which block.
    pub fn on_layout_parameters_changed(
        &self,
        columns: u32,
        cell_size: (u32, u32),
        spacing: u32,
    ) -> Result<(), GridError> {
        self.set_layout(GridLayout::new(columns, cell_size.0, cell_size.1, spacing))
    }

    /// Like [`on_layout_parameters_changed`](Self::on_layout_parameters_changed)
    /// with a fully specified layout, e.g. from
    /// [`GridLayout::for_viewport_width`].
    pub fn set_layout(&self, layout: GridLayout) -> Result<(), GridError> {
        layout.validate()?;
        {
            let mut state = self.inner.lock_live()?;
            state.layout = layout;
            state.layout_epoch += 1;
            state.last_reported_index = None;
            self.inner.move_window(&mut state, true);
            debug!(
                columns = layout.columns,
                epoch = state.layout_epoch,
                "Grid layout changed"
            );
        }
        self.inner.repaint.invalidate(RepaintRegion::All);
        Ok(())
    }

    /// Repaint the selection frame of one cell without touching its decode state.
    pub fn repaint_selection(&self, index: usize) -> Result<(), GridError> {
        let painted = {
            let state = self.inner.lock_live()?;
            self.inner.repaint_selection_locked(&state, index)
        };
        if painted {
            self.inner.repaint.invalidate(RepaintRegion::Cell(index));
        }
        Ok(())
    }

    /// Move the selection, repainting the old and new cells.
    pub fn select(&self, index: Option<usize>, pressed: bool) -> Result<(), GridError> {
        let next = Selection { index, pressed };
        let previous = {
            let mut selection = self.inner.selection.lock();
            if *selection == next {
                return Ok(());
            }
            std::mem::replace(&mut *selection, next)
        };

        if let Some(old) = previous.index {
            self.repaint_selection(old)?;
        }
        if let Some(new) = index.filter(|&new| previous.index != Some(new)) {
            self.repaint_selection(new)?;
        }
        Ok(())
    }

    pub fn selection(&self) -> Selection {
        *self.inner.selection.lock()
    }

    /// Drop one cell's decoded content so it is decoded again.
    pub fn invalidate_item(&self, index: usize) -> Result<(), GridError> {
        let mut state = self.inner.lock_live()?;
        let layout = state.layout;
        let block = layout.block_of(index);
        let Some(slot) = state.window.slot_for_block(block, self.inner.tiles.len()) else {
            return Ok(());
        };

        let highlight = self.inner.selection.lock().highlight_for(index);
        {
            let mut tile = self.inner.tiles[slot].lock();
            if !tile.holds(block, state.layout_epoch) {
                return Ok(());
            }
            tile.reset_column(layout.column_of(index), highlight, &self.inner.queue);
        }
        trace!(index, block, "Invalidated item");
        Inner::bump(&self.inner.wake, &mut state);
        Ok(())
    }

    /// First and last item index of the visible run of tiles, or `None` if no
    /// tile is visible (e.g. while flinging past the cached window).
    pub fn get_visible_range(&self) -> Option<(usize, usize)> {
        let state = self.inner.state.lock();
        let count = self.inner.source.count();
        if count == 0 {
            return None;
        }
        let layout = state.layout;
        let block_count = layout.block_count(count);
        let slots = self.inner.tiles.len();

        let mut first: Option<usize> = None;
        let mut last: Option<usize> = None;
        for i in 0..slots {
            let slot = (state.window.start_offset + i) % slots;
            let tile = self.inner.tiles[slot].lock();
            let block = tile.block_number();
            let usable = tile.is_visible() && block >= 0 && (block as usize) < block_count;
            drop(tile);

            match (usable, first) {
                (true, None) => {
                    first = Some(block as usize);
                    last = Some(block as usize);
                }
                (true, Some(_)) => last = Some(block as usize),
                (false, Some(_)) => break,
                (false, None) => {}
            }
        }

        let (first, last) = (first?, last?);
        let first_index = layout.first_index_of(first);
        let last_index = (layout.first_index_of(last) + layout.columns as usize - 1).min(count - 1);
        Some((first_index, last_index))
    }

    /// Draw the tiles overlapping the viewport into `frame`.
    ///
    /// Rows outside the cached window stay background. Returns how many
    /// tiles were drawn.
    pub fn compose(&self, frame: &mut RgbaImage, scroll_y: i64) -> usize {
        for pixel in frame.pixels_mut() {
            *pixel = BACKGROUND;
        }

        let state = self.inner.state.lock();
        if state.done {
            return 0;
        }
        let bh = state.layout.block_height().max(1) as i64;
        let slots = self.inner.tiles.len();
        let bottom = scroll_y + frame.height() as i64;

        let mut drawn = 0;
        let mut block = scroll_y.div_euclid(bh);
        while block * bh < bottom {
            if block >= 0 {
                if let Some(slot) = state.window.slot_for_block(block as usize, slots) {
                    let tile = self.inner.tiles[slot].lock();
                    if let Some(surface) = tile
                        .surface()
                        .filter(|_| tile.holds(block as usize, state.layout_epoch))
                    {
                        RasterTile::blit_onto(surface, frame, 0, block * bh - scroll_y);
                        drawn += 1;
                    }
                }
            }
            block += 1;
        }
        drawn
    }

    /// `(start_offset, first_block)` of the ring.
    pub fn window(&self) -> (usize, usize) {
        let state = self.inner.state.lock();
        (state.window.start_offset, state.window.first_block)
    }

    pub fn layout(&self) -> GridLayout {
        self.inner.state.lock().layout
    }

    /// Bookkeeping of every slot, in window order.
    pub fn tile_snapshots(&self) -> Vec<TileSnapshot> {
        let state = self.inner.state.lock();
        let count = self.inner.source.count();
        let slots = self.inner.tiles.len();
        (0..slots)
            .map(|i| {
                let slot = (state.window.start_offset + i) % slots;
                self.inner.tiles[slot].lock().snapshot(count)
            })
            .collect()
    }

    /// Copy of the surface currently showing `block`.
    pub fn surface_for_block(&self, block: usize) -> Option<RasterTile> {
        let state = self.inner.state.lock();
        let slot = state.window.slot_for_block(block, self.inner.tiles.len())?;
        let tile = self.inner.tiles[slot].lock();
        if tile.holds(block, state.layout_epoch) {
            tile.surface().cloned()
        } else {
            None
        }
    }

    /// Decode requests waiting for a worker.
    pub fn pending_decodes(&self) -> usize {
        self.inner.queue.pending_count()
    }

    /// Whether any decode is pending or running.
    pub fn is_decoding(&self) -> bool {
        self.inner.queue.is_busy()
    }

    /// Whether the decode workers are running.
    pub fn workers_running(&self) -> bool {
        self.inner.queue.is_running()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.state.lock().done
    }

    /// Stop the driver and decode workers, cancel outstanding requests and
    /// release every surface. Safe to call more than once.
    pub fn shutdown(&self) {
        let driver = {
            let mut state = self.inner.state.lock();
            if !state.done {
                state.done = true;
                self.inner.wake.notify_all();
            }
            self.driver.lock().take()
        };

        let Some(handle) = driver else {
            return;
        };

        debug!("Shutting down tile cache");
        if handle.join().is_err() {
            error!("Tile driver thread panicked");
        }

        self.inner.queue.cancel_all();
        self.inner.queue.stop();

        for tile in &self.inner.tiles {
            tile.lock().release();
        }
        {
            let mut state = self.inner.state.lock();
            state.window = WindowDescriptor::default();
            state.last_reported_index = None;
        }
        debug!("Tile cache shutdown complete");
    }
}

impl Drop for TileCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn lock_live(&self) -> Result<parking_lot::MutexGuard<'_, WindowState>, GridError> {
        let state = self.state.lock();
        if state.done {
            error!("Tile cache used after shutdown");
            return Err(GridError::ShutDown);
        }
        Ok(state)
    }

    fn bump(wake: &Condvar, state: &mut WindowState) {
        state.work_counter = state.work_counter.wrapping_add(1);
        wake.notify_all();
    }

    fn visible_blocks(&self, state: &WindowState) -> VisibleBlocks {
        VisibleBlocks::compute(&state.layout, state.scroll_y, state.viewport_height)
    }

    fn first_visible_index(&self, state: &WindowState) -> Option<usize> {
        let visible = self.visible_blocks(state);
        if visible.is_empty() {
            return None;
        }
        let index = state.layout.first_index_of(visible.first as usize);
        (index < self.source.count()).then_some(index)
    }

    /// Recompute the window from the stored scroll position. Returns whether
    /// any slot was reassigned.
    fn move_window(&self, state: &mut WindowState, force: bool) -> bool {
        let slots = self.tiles.len();
        let visible = self.visible_blocks(state);
        let start_block = (visible.first - self.config.pre_cache_blocks() as i64).max(0) as usize;

        let plan = plan_shift(state.window, start_block, slots, force);
        state.window = plan.window;

        let count = self.source.count();
        let selection = *self.selection.lock();
        for &(slot, block) in &plan.assignments {
            self.tiles[slot].lock().reassign(
                block,
                state.layout,
                state.layout_epoch,
                count,
                selection,
                &self.queue,
                force,
            );
        }

        let mut promoted = 0;
        for tile in &self.tiles {
            let mut tile = tile.lock();
            let visible_now = visible.contains(tile.block_number());
            if tile.set_visible(visible_now) && visible_now {
                for item in tile.pending_items() {
                    if self.queue.promote(item) {
                        promoted += 1;
                    }
                }
            }
        }
        if promoted > 0 {
            trace!(promoted, "Promoted requests of newly visible tiles");
        }

        let changed = !plan.assignments.is_empty();
        if changed {
            trace!(
                start_block,
                reassigned = plan.assignments.len(),
                "Moved tile window"
            );
            Self::bump(&self.wake, state);
        }
        changed
    }

    fn repaint_selection_locked(&self, state: &WindowState, index: usize) -> bool {
        if index >= self.source.count() {
            return false;
        }
        let layout = state.layout;
        let block = layout.block_of(index);
        let Some(slot) = state.window.slot_for_block(block, self.tiles.len()) else {
            return false;
        };

        let mut tile = self.tiles[slot].lock();
        if !tile.holds(block, state.layout_epoch) {
            return false;
        }
        let highlight = self.selection.lock().highlight_for(index);
        tile.paint_frame(layout.column_of(index), highlight);
        true
    }

    /// One driver pass: request every open column, visible blocks first.
    /// Returns how many requests were accepted by the queue.
    fn load_next(self: &Arc<Self>) -> usize {
        let state = self.state.lock();
        if state.done {
            return 0;
        }

        let slots = self.tiles.len();
        let count = self.source.count();
        let visible = self.visible_blocks(&state);
        let first_slot = state
            .window
            .slot_for_block(visible.first as usize, slots)
            .unwrap_or(state.window.start_offset);

        let mut issued = 0;
        for i in 0..slots {
            let slot = (first_slot + i) % slots;
            let mut tile = self.tiles[slot].lock();
            let block = tile.block_number();
            if block < 0 || tile.epoch() != state.layout_epoch {
                continue;
            }
            let block = block as usize;
            let layout = *tile.layout();

            for col in tile.columns_to_request(count) {
                let index = layout.first_index_of(block) + col as usize;
                let Some(item) = self.source.item_at(index) else {
                    continue;
                };

                let ticket = CellTicket {
                    slot,
                    block,
                    epoch: state.layout_epoch,
                    col,
                    generation: tile.column_generation(col),
                    index,
                };
                let weak: Weak<Inner> = Arc::downgrade(self);
                let callback = Box::new(move |result: Option<RasterTile>| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_decoded(ticket, result);
                    }
                });

                let outcome = self.queue.request_decode(
                    item.clone(),
                    index,
                    callback,
                    tile.is_visible(),
                    self.config.deliver_on_callback_thread,
                );
                if outcome.accepted() {
                    tile.mark_requested(col, item);
                    issued += 1;
                }
            }
        }

        if issued > 0 {
            trace!(issued, "Requested decodes");
        }
        issued
    }

    /// Decode completion for the cell named by `ticket`.
    ///
    /// A result for a tile that moved on, or for a column invalidated after
    /// the request, is dropped and the driver is woken to request again.
    fn on_decoded(&self, ticket: CellTicket, result: Option<RasterTile>) {
        let CellTicket {
            slot,
            block,
            epoch,
            col,
            generation,
            index,
        } = ticket;

        let (repaint, more) = {
            let mut tile = self.tiles[slot].lock();
            if !tile.accepts(block, epoch, col, generation) {
                trace!(slot, block, col, "Discarding stale decode");
                (false, true)
            } else {
                let highlight = self.selection.lock().highlight_for(index);
                tile.complete(col, result.as_ref(), highlight);
                (tile.is_visible(), tile.requested_mask() == 0)
            }
        };

        if repaint {
            self.repaint.invalidate(RepaintRegion::Block(block));
        }
        if more {
            let mut state = self.state.lock();
            Self::bump(&self.wake, &mut state);
        }
    }
}

fn driver_loop(inner: Arc<Inner>) {
    debug!("Tile driver started");

    loop {
        let counter = {
            let state = inner.state.lock();
            if state.done {
                break;
            }
            state.work_counter
        };

        inner.load_next();

        let mut state = inner.state.lock();
        if state.done {
            break;
        }
        if state.work_counter == counter {
            inner.wake.wait(&mut state);
        }
    }

    debug!("Tile driver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VecItemSource;
    use crate::test_support::{wait_until, ScriptedDecoder, DECODED};
    use crate::thumbnails::{ChannelExecutor, InlineExecutor};
    use crate::tiles::raster::{CellHighlight, BROKEN_CELL};
    use crate::tiles::sinks::NoopSink;
    use crate::tiles::tile::TileState;
    use image::Rgba;
    use std::path::PathBuf;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(10);
    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    /// 4 columns of 8x8 cells, 2px spacing: blocks are 10px tall.
    fn layout() -> GridLayout {
        GridLayout::new(4, 8, 8, 2)
    }

    fn path(index: usize) -> PathBuf {
        PathBuf::from(format!("/grid/{:04}.png", index))
    }

    fn source(count: usize) -> Arc<VecItemSource> {
        Arc::new(VecItemSource::from_paths((0..count).map(path)))
    }

    fn index_of(p: &std::path::Path) -> usize {
        p.file_stem().unwrap().to_str().unwrap().parse().unwrap()
    }

    struct Harness {
        cache: TileCache,
        decoder: Arc<ScriptedDecoder>,
        regions: flume::Receiver<RepaintRegion>,
        scrolled: Arc<Mutex<Vec<usize>>>,
        count: usize,
    }

    struct RecordingScroll(Arc<Mutex<Vec<usize>>>);

    impl ScrollSink for RecordingScroll {
        fn on_visible_index_changed(&self, index: usize) {
            self.0.lock().push(index);
        }
    }

    fn harness_with(count: usize, decoder: Arc<ScriptedDecoder>, layout: GridLayout) -> Harness {
        let queue = DecodeQueue::new(decoder.clone(), Arc::new(InlineExecutor));
        let (tx, regions) = flume::unbounded();
        let repaint: Arc<dyn RepaintSink> = Arc::new(move |region: RepaintRegion| {
            let _ = tx.send(region);
        });
        let scrolled = Arc::new(Mutex::new(Vec::new()));
        let cache = TileCache::new(
            TileCacheConfig::default(),
            layout,
            source(count),
            queue,
            repaint,
            Arc::new(RecordingScroll(Arc::clone(&scrolled))),
        )
        .unwrap();
        Harness {
            cache,
            decoder,
            regions,
            scrolled,
            count,
        }
    }

    fn harness(count: usize) -> Harness {
        harness_with(count, ScriptedDecoder::new(), layout())
    }

    impl Harness {
        /// Scroll so `block` is the first visible row, with one page visible.
        fn scroll_to_block(&self, block: i64) {
            let l = self.cache.layout();
            let scroll = block * l.block_height() as i64 + l.spacing as i64;
            self.cache
                .on_window_changed(scroll, 6 * l.block_height(), false)
                .unwrap();
        }

        fn window_blocks(&self) -> Vec<i64> {
            let block_count = self.cache.layout().block_count(self.count) as i64;
            let mut blocks: Vec<i64> = self
                .cache
                .tile_snapshots()
                .iter()
                .map(|t| t.block_number)
                .filter(|&b| b < block_count)
                .collect();
            blocks.sort_unstable();
            blocks
        }

        fn all_complete(&self) -> bool {
            let block_count = self.cache.layout().block_count(self.count) as i64;
            self.cache
                .tile_snapshots()
                .iter()
                .filter(|t| t.block_number >= 0 && t.block_number < block_count)
                .all(|t| t.state == TileState::Complete)
        }

        fn wait_settled(&self) {
            assert!(wait_until(TIMEOUT, || self.all_complete()
                && !self.cache.is_decoding()));
        }
    }

    fn cell_center(l: &GridLayout, col: u32) -> (u32, u32) {
        let (x, y) = l.cell_origin(col);
        (x + l.cell_width / 2, y + l.cell_height / 2)
    }

    #[test]
    fn test_config_slot_count() {
        let config = TileCacheConfig::default();
        assert_eq!(config.slot_count(), 30);
        assert_eq!(config.with_cache_pages(1, 0).slot_count(), 12);
        assert!(config.with_rows_per_page(0).validate().is_err());
    }

    #[test]
    fn test_initial_window_decodes_everything() {
        let h = harness(1000);
        h.scroll_to_block(0);
        h.wait_settled();

        assert_eq!(h.window_blocks(), (0..30).collect::<Vec<_>>());
        assert_eq!(h.decoder.calls().len(), 120);
        assert_eq!(h.cache.pending_decodes(), 0);
        assert!(!h.cache.is_decoding());
        assert!(h.cache.workers_running());

        let surface = h.cache.surface_for_block(0).unwrap();
        let (x, y) = cell_center(&layout(), 0);
        assert_eq!(surface.pixel(x, y), Some(DECODED));
    }

    #[test]
    fn test_scroll_through_cancels_pending_requests() {
        let decoder = ScriptedDecoder::new();
        decoder.hold_all();
        let h = harness_with(1000, decoder, layout());
        h.scroll_to_block(0);

        let first = h.decoder.wait_started(TIMEOUT).unwrap();
        h.scroll_to_block(50);

        assert_eq!(h.cache.window().1, 38);
        assert_eq!(h.window_blocks(), (38..68).collect::<Vec<_>>());

        h.decoder.release_all();
        h.wait_settled();

        let calls = h.decoder.calls();
        assert_eq!(calls[0], first);
        for call in &calls[1..] {
            let index = index_of(call);
            assert!(
                (38 * 4..68 * 4).contains(&index),
                "decoded item {} outside the window",
                index
            );
        }
        assert_eq!(calls.len(), 1 + 120);
        assert_eq!(h.cache.get_visible_range(), Some((200, 227)));
        assert_eq!(h.scrolled.lock().last().copied(), Some(200));
    }

    #[test]
    fn test_small_scroll_only_reassigns_entering_tiles() {
        let h = harness(1000);
        h.scroll_to_block(0);
        h.wait_settled();
        assert_eq!(h.decoder.calls().len(), 120);

        // first visible 17 -> window starts at 5
        h.scroll_to_block(17);
        assert_eq!(h.window_blocks(), (5..35).collect::<Vec<_>>());
        h.wait_settled();
        assert_eq!(h.decoder.calls().len(), 140);

        // back to start at 2: blocks 2..5 re-enter
        h.scroll_to_block(14);
        assert_eq!(h.window_blocks(), (2..32).collect::<Vec<_>>());
        h.wait_settled();
        assert_eq!(h.decoder.calls().len(), 152);

        let snapshots = h.cache.tile_snapshots();
        assert_eq!(snapshots[0].block_number, 2);
        assert!(snapshots.iter().all(|t| t.completed_mask == 0b1111));
    }

    #[test]
    fn test_stale_decode_does_not_paint_reassigned_tile() {
        let decoder = ScriptedDecoder::new();
        decoder.hold(&path(0));
        decoder.set_color(&path(0), RED);
        let h = harness_with(1000, decoder, layout());

        // Nothing is visible yet, so requests go out in window order
        assert_eq!(h.decoder.wait_started(TIMEOUT), Some(path(0)));

        // Jump far enough that every slot is reassigned while item 0 is in flight
        h.scroll_to_block(100);
        assert!(h.cache.surface_for_block(0).is_none());
        h.decoder.release(&path(0));
        h.wait_settled();

        assert_eq!(h.decoder.call_count(&path(0)), 1);
        for block in 88..118 {
            let surface = h.cache.surface_for_block(block).unwrap();
            assert!(
                !surface.as_image().pixels().any(|p| *p == RED),
                "block {} shows a stale result",
                block
            );
        }
    }

    #[test]
    fn test_failed_decode_shows_placeholder_once() {
        let decoder = ScriptedDecoder::new();
        decoder.fail(&path(7));
        let grid = GridLayout::new(4, 16, 16, 2);
        let h = harness_with(100, decoder, grid);
        h.scroll_to_block(0);
        h.wait_settled();

        let snapshot = h.cache.tile_snapshots()[1];
        assert_eq!(snapshot.block_number, 1);
        assert_ne!(snapshot.completed_mask & 0b1000, 0);

        let surface = h.cache.surface_for_block(1).unwrap();
        let (x, y) = grid.cell_origin(3);
        assert_eq!(surface.pixel(x + 3, y + 8), Some(BROKEN_CELL));

        // Another pass over the same block does not retry the broken item
        h.cache.invalidate_item(6).unwrap();
        assert!(wait_until(TIMEOUT, || h.decoder.call_count(&path(6)) == 2));
        h.wait_settled();
        assert_eq!(h.decoder.call_count(&path(7)), 1);
    }

    #[test]
    fn test_visible_range_edges() {
        let h = harness(10);
        assert_eq!(h.cache.get_visible_range(), None);

        h.cache.on_window_changed(0, 1000, false).unwrap();
        assert_eq!(h.cache.get_visible_range(), Some((0, 9)));

        let empty = harness(0);
        empty.cache.on_window_changed(0, 1000, false).unwrap();
        assert_eq!(empty.cache.get_visible_range(), None);
    }

    #[test]
    fn test_selection_repaints_frames() {
        let h = harness(100);
        h.scroll_to_block(0);
        h.wait_settled();

        let l = layout();
        let frame_pixel = |block: usize, col: u32| {
            let (x, y) = l.cell_origin(col);
            h.cache.surface_for_block(block).unwrap().pixel(x, y).unwrap()
        };

        h.cache.select(Some(5), false).unwrap();
        assert_eq!(frame_pixel(1, 1), CellHighlight::Selected.color());
        assert!(h.regions.try_iter().any(|r| r == RepaintRegion::Cell(5)));

        h.cache.select(Some(5), true).unwrap();
        assert_eq!(frame_pixel(1, 1), CellHighlight::Pressed.color());

        h.cache.select(Some(6), false).unwrap();
        assert_eq!(frame_pixel(1, 1), CellHighlight::None.color());
        assert_eq!(frame_pixel(1, 2), CellHighlight::Selected.color());

        // Decoded content survives the repaint
        let (x, y) = cell_center(&l, 2);
        assert_eq!(h.cache.surface_for_block(1).unwrap().pixel(x, y), Some(DECODED));

        h.cache.select(None, false).unwrap();
        assert_eq!(h.cache.selection(), Selection::default());
        assert_eq!(frame_pixel(1, 2), CellHighlight::None.color());
    }

    #[test]
    fn test_invalidate_item_decodes_again() {
        let h = harness(100);
        h.scroll_to_block(0);
        h.wait_settled();
        assert_eq!(h.decoder.call_count(&path(5)), 1);

        h.cache.invalidate_item(5).unwrap();
        assert!(wait_until(TIMEOUT, || h.decoder.call_count(&path(5)) == 2));
        h.wait_settled();
    }

    #[test]
    fn test_invalidate_while_in_flight_decodes_again() {
        let h = harness(100);
        h.scroll_to_block(0);
        h.wait_settled();

        h.decoder.hold(&path(5));
        h.cache.invalidate_item(5).unwrap();
        assert!(wait_until(TIMEOUT, || h.decoder.call_count(&path(5)) == 2));

        // The re-decode is in flight and can no longer be cancelled
        h.cache.invalidate_item(5).unwrap();
        h.decoder.release(&path(5));

        assert!(wait_until(TIMEOUT, || h.decoder.call_count(&path(5)) == 3));
        h.wait_settled();
        assert_eq!(h.decoder.call_count(&path(5)), 3);
        assert_eq!(h.cache.tile_snapshots()[1].completed_mask, 0b1111);
    }

    #[test]
    fn test_scroll_past_end_is_clamped() {
        let h = harness(1000);
        h.cache.on_window_changed(i64::MAX, 60, false).unwrap();

        // Last page: 2 + 250 * 10 - 60 = 2442, first visible block 244
        assert_eq!(h.cache.window().1, 232);
        assert_eq!(h.cache.get_visible_range(), Some((976, 999)));
        assert_eq!(h.scrolled.lock().last().copied(), Some(976));

        h.cache.on_window_changed(i64::MIN, u32::MAX, false).unwrap();
        assert_eq!(h.cache.window().1, 0);
    }

    #[test]
    fn test_layout_change_invalidates_all_tiles() {
        let h = harness(100);
        h.scroll_to_block(0);
        h.wait_settled();

        assert!(matches!(
            h.cache.on_layout_parameters_changed(0, (8, 8), 2),
            Err(GridError::InvalidLayout(_))
        ));
        assert!(matches!(
            h.cache
                .on_layout_parameters_changed(4, (u32::MAX, u32::MAX), u32::MAX),
            Err(GridError::InvalidLayout(_))
        ));
        assert_eq!(h.cache.layout(), layout());

        h.cache.on_layout_parameters_changed(2, (8, 8), 2).unwrap();
        assert_eq!(h.cache.layout().columns, 2);
        h.wait_settled();

        let surface = h.cache.surface_for_block(0).unwrap();
        assert_eq!(surface.width(), h.cache.layout().width);
        // Items 0..60 under the new layout, each decoded once before and once now
        assert_eq!(h.decoder.call_count(&path(0)), 2);
        assert_eq!(h.decoder.call_count(&path(59)), 2);
    }

    #[test]
    fn test_compose_draws_visible_tiles() {
        let h = harness(100);
        h.scroll_to_block(0);
        h.wait_settled();

        let l = layout();
        let mut frame = RgbaImage::new(l.width, 30);
        let drawn = h.cache.compose(&mut frame, 0);
        assert_eq!(drawn, 3);
        let (x, y) = cell_center(&l, 1);
        assert_eq!(*frame.get_pixel(x, y), DECODED);

        // Scrolled above the top: the first rows are background
        let drawn = h.cache.compose(&mut frame, -20);
        assert_eq!(drawn, 1);
        assert_eq!(*frame.get_pixel(x, y), BACKGROUND);
    }

    #[test]
    fn test_callback_thread_delivery() {
        let decoder = ScriptedDecoder::new();
        let (executor, pump) = ChannelExecutor::new();
        let queue = DecodeQueue::new(decoder.clone(), Arc::new(executor));
        let cache = TileCache::new(
            TileCacheConfig::default().with_callback_thread(true),
            layout(),
            source(8),
            queue,
            Arc::new(NoopSink),
            Arc::new(NoopSink),
        )
        .unwrap();
        cache.on_window_changed(0, 100, false).unwrap();

        assert!(wait_until(TIMEOUT, || !cache.is_decoding()
            && decoder.calls().len() == 8));
        assert!(cache
            .tile_snapshots()
            .iter()
            .all(|t| t.completed_mask == 0));

        assert!(wait_until(TIMEOUT, || {
            pump.run_pending();
            cache.tile_snapshots()[..2]
                .iter()
                .all(|t| t.state == TileState::Complete)
        }));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let decoder = ScriptedDecoder::new();
        decoder.hold_all();
        let h = harness_with(1000, decoder, layout());
        h.scroll_to_block(0);
        assert!(h.decoder.wait_started(TIMEOUT).is_some());

        let releaser = {
            let decoder = h.decoder.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(30));
                decoder.release_all();
            })
        };
        h.cache.shutdown();
        releaser.join().unwrap();

        let repaints = h.regions.len();
        h.cache.shutdown();
        assert!(h.cache.is_shut_down());
        assert!(!h.cache.workers_running());
        assert_eq!(h.cache.pending_decodes(), 0);
        assert_eq!(h.decoder.calls().len(), 1);
        assert!(h
            .cache
            .tile_snapshots()
            .iter()
            .all(|t| t.state == TileState::Unassigned));

        assert!(matches!(
            h.cache.on_window_changed(0, 60, false),
            Err(GridError::ShutDown)
        ));
        assert!(matches!(
            h.cache.select(Some(1), false),
            Err(GridError::ShutDown)
        ));
        assert_eq!(h.regions.len(), repaints);
    }

    #[test]
    fn test_shutdown_without_work() {
        let h = harness(0);
        h.cache.shutdown();
        h.cache.shutdown();
        assert_eq!(h.decoder.calls().len(), 0);
    }

    #[test]
    fn test_scroll_sink_reports_first_visible_index() {
        let h = harness(1000);
        h.scroll_to_block(3);
        h.scroll_to_block(3);
        h.scroll_to_block(10);
        assert_eq!(*h.scrolled.lock(), vec![12, 40]);
    }

    #[test]
    fn test_drop_releases_threads() {
        let decoder = ScriptedDecoder::new();
        {
            let h = harness_with(100, decoder.clone(), layout());
            h.scroll_to_block(0);
            h.wait_settled();
        }
        // Workers and driver are joined, nothing else holds the decoder
        assert_eq!(Arc::strong_count(&decoder), 1);
    }
}
