use tracing::trace;

use super::raster::{CellHighlight, RasterTile, BACKGROUND, BLANK_CELL};
use crate::layout::GridLayout;
use crate::models::ItemRef;
use crate::thumbnails::DecodeQueue;

/// Block number of a slot that holds nothing.
pub const UNASSIGNED: i64 = -1;

/// Current selection, shared by every tile when painting cell frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Selection {
    pub index: Option<usize>,
    pub pressed: bool,
}

impl Selection {
    pub fn highlight_for(&self, index: usize) -> CellHighlight {
        match self.index {
            Some(sel) if sel == index && self.pressed => CellHighlight::Pressed,
            Some(sel) if sel == index => CellHighlight::Selected,
            _ => CellHighlight::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileState {
    Unassigned,
    Loading,
    Complete,
}

/// Read-only copy of a tile's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSnapshot {
    pub block_number: i64,
    pub requested_mask: u64,
    pub completed_mask: u64,
    pub visible: bool,
    pub state: TileState,
}

/// One slot of the circular window: a row-block's surface and per-column
/// request state.
///
/// A column is never requested twice while its request is outstanding, and
/// every reassignment clears both masks after cancelling what is still
/// pending for the previous block.
pub struct Tile {
    block_number: i64,
    /// Bumped when the layout changes, so equal block numbers under
    /// different layouts are told apart.
    epoch: u64,
    layout: GridLayout,
    requested_mask: u64,
    completed_mask: u64,
    visible: bool,
    surface: Option<RasterTile>,
    requested_items: Vec<Option<ItemRef>>,
    /// Per-column stamp; results requested under an older stamp are dropped.
    column_generations: Vec<u64>,
    generation: u64,
}

impl Default for Tile {
    fn default() -> Self {
        Self {
            block_number: UNASSIGNED,
            epoch: 0,
            layout: GridLayout::default(),
            requested_mask: 0,
            completed_mask: 0,
            visible: false,
            surface: None,
            requested_items: Vec::new(),
            column_generations: Vec::new(),
            generation: 0,
        }
    }
}

impl Tile {
    pub fn block_number(&self) -> i64 {
        self.block_number
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn requested_mask(&self) -> u64 {
        self.requested_mask
    }

    pub fn completed_mask(&self) -> u64 {
        self.completed_mask
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Returns whether the flag changed.
    pub fn set_visible(&mut self, visible: bool) -> bool {
        let changed = self.visible != visible;
        self.visible = visible;
        changed
    }

    pub fn surface(&self) -> Option<&RasterTile> {
        self.surface.as_ref()
    }

    /// Whether this tile currently shows `block` under layout `epoch`.
    pub fn holds(&self, block: usize, epoch: u64) -> bool {
        self.block_number == block as i64 && self.epoch == epoch && self.surface.is_some()
    }

    /// Stamp a request for `col` must carry to be accepted.
    pub fn column_generation(&self, col: u32) -> u64 {
        self.column_generations
            .get(col as usize)
            .copied()
            .unwrap_or(0)
    }

    /// Whether a result for `col`, requested as `(block, epoch, generation)`,
    /// still belongs in this tile.
    pub fn accepts(&self, block: usize, epoch: u64, col: u32, generation: u64) -> bool {
        self.holds(block, epoch) && self.column_generation(col) == generation
    }

    /// Columns of this block that map to an existing item.
    pub fn expected_mask(&self, item_count: usize) -> u64 {
        if self.block_number < 0 {
            return 0;
        }
        let base = self.layout.first_index_of(self.block_number as usize);
        let present = item_count.saturating_sub(base).min(self.layout.columns as usize);
        if present >= 64 {
            u64::MAX
        } else {
            (1u64 << present) - 1
        }
    }

    pub fn state(&self, item_count: usize) -> TileState {
        if self.block_number < 0 {
            TileState::Unassigned
        } else if self.completed_mask & self.expected_mask(item_count)
            == self.expected_mask(item_count)
        {
            TileState::Complete
        } else {
            TileState::Loading
        }
    }

    pub fn snapshot(&self, item_count: usize) -> TileSnapshot {
        TileSnapshot {
            block_number: self.block_number,
            requested_mask: self.requested_mask,
            completed_mask: self.completed_mask,
            visible: self.visible,
            state: self.state(item_count),
        }
    }

    /// Point this slot at a new block and redraw it as blank placeholders.
    ///
    /// Pending requests for the old content are cancelled first. Returns
    /// false if the slot already showed `block` and `force` was not set.
    pub fn reassign(
        &mut self,
        block: usize,
        layout: GridLayout,
        epoch: u64,
        item_count: usize,
        selection: Selection,
        queue: &DecodeQueue,
        force: bool,
    ) -> bool {
        if !force && self.block_number == block as i64 && self.epoch == epoch {
            return false;
        }

        self.cancel_existing_requests(queue);

        self.block_number = block as i64;
        self.epoch = epoch;
        self.layout = layout;
        self.requested_mask = 0;
        self.completed_mask = 0;
        self.requested_items = vec![None; layout.columns as usize];
        self.generation += 1;
        self.column_generations = vec![self.generation; layout.columns as usize];

        let (w, h) = (layout.width, layout.block_height());
        match self.surface.as_mut() {
            Some(surface) if surface.dimensions() == (w, h) => {
                surface.fill_rect(0, 0, w, h, BACKGROUND);
            }
            _ => self.surface = Some(RasterTile::new(w, h)),
        }

        let base = layout.first_index_of(block);
        for col in 0..layout.columns {
            let index = base + col as usize;
            if index >= item_count {
                break;
            }
            self.paint_blank(col);
            self.paint_frame(col, selection.highlight_for(index));
        }
        true
    }

    /// Cancel every still-pending request this tile issued.
    ///
    /// Requests already in flight cannot be cancelled; their results are
    /// rejected later by the block/epoch check.
    pub fn cancel_existing_requests(&mut self, queue: &DecodeQueue) {
        for (col, slot) in self.requested_items.iter_mut().enumerate() {
            if let Some(item) = slot.take() {
                if queue.cancel(&item) {
                    trace!(block = self.block_number, col, "Cancelled stale request");
                }
            }
        }
        self.requested_mask = 0;
    }

    /// Columns that are neither decoded nor waiting on a request.
    pub fn columns_to_request(&self, item_count: usize) -> Vec<u32> {
        let open = self.expected_mask(item_count) & !(self.completed_mask | self.requested_mask);
        (0..self.layout.columns)
            .filter(|col| open & (1u64 << col) != 0)
            .collect()
    }

    /// Items with a request still outstanding.
    pub fn pending_items(&self) -> impl Iterator<Item = &ItemRef> {
        self.requested_items.iter().flatten()
    }

    pub fn mark_requested(&mut self, col: u32, item: ItemRef) {
        self.requested_mask |= 1u64 << col;
        if let Some(slot) = self.requested_items.get_mut(col as usize) {
            *slot = Some(item);
        }
    }

    /// Paint a finished decode. `None` paints the broken-image placeholder;
    /// the column counts as complete either way.
    pub fn complete(&mut self, col: u32, raster: Option<&RasterTile>, highlight: CellHighlight) {
        let (x, y) = self.layout.cell_origin(col);
        let (w, h) = (self.layout.cell_width, self.layout.cell_height);
        if let Some(surface) = self.surface.as_mut() {
            match raster {
                Some(raster) => surface.draw_fitted(raster, x, y, w, h),
                None => surface.draw_fitted(&RasterTile::broken(w, h), x, y, w, h),
            }
        }
        self.paint_frame(col, highlight);

        let mask = 1u64 << col;
        self.requested_mask &= !mask;
        self.completed_mask |= mask;
        if let Some(slot) = self.requested_items.get_mut(col as usize) {
            *slot = None;
        }
    }

    /// Forget a column's decoded content so it is requested again.
    ///
    /// A decode of the column already in flight cannot be cancelled; its
    /// result is rejected by [`accepts`](Self::accepts).
    pub fn reset_column(&mut self, col: u32, highlight: CellHighlight, queue: &DecodeQueue) {
        if let Some(item) = self
            .requested_items
            .get_mut(col as usize)
            .and_then(|slot| slot.take())
        {
            queue.cancel(&item);
        }
        self.generation += 1;
        if let Some(stamp) = self.column_generations.get_mut(col as usize) {
            *stamp = self.generation;
        }
        let mask = 1u64 << col;
        self.requested_mask &= !mask;
        self.completed_mask &= !mask;
        self.paint_blank(col);
        self.paint_frame(col, highlight);
    }

    /// Redraw just the selection frame of a column.
    pub fn paint_frame(&mut self, col: u32, highlight: CellHighlight) {
        let (x, y) = self.layout.cell_origin(col);
        let (w, h) = (self.layout.cell_width, self.layout.cell_height);
        if let Some(surface) = self.surface.as_mut() {
            surface.frame_rect(x, y, w, h, highlight.color());
        }
    }

    fn paint_blank(&mut self, col: u32) {
        let (x, y) = self.layout.cell_origin(col);
        let (w, h) = (self.layout.cell_width, self.layout.cell_height);
        if let Some(surface) = self.surface.as_mut() {
            surface.fill_rect(x, y, w, h, BLANK_CELL);
        }
    }

    /// Drop the surface and return to the unassigned state.
    pub fn release(&mut self) {
        self.block_number = UNASSIGNED;
        self.requested_mask = 0;
        self.completed_mask = 0;
        self.visible = false;
        self.surface = None;
        self.requested_items.clear();
        self.column_generations.clear();
    }
}
