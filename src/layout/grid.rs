use crate::error::GridError;

/// Upper bound on columns; per-column request state is kept in a `u64` mask.
pub const MAX_COLUMNS: u32 = 64;

/// Geometry of a uniform thumbnail grid.
///
/// The grid is split into row-blocks of `columns` items. Each block is
/// `spacing + cell_height` pixels tall with the cell starting `spacing`
/// pixels below the block's top edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    pub columns: u32,
    pub cell_width: u32,
    pub cell_height: u32,
    pub spacing: u32,
    pub left_padding: u32,
    /// Full width of a block surface in pixels.
    pub width: u32,
}

impl Default for GridLayout {
    fn default() -> Self {
        Self::new(4, 128, 128, 6)
    }
}

impl GridLayout {
    /// Explicit column count with `spacing` used as the edge padding.
    pub fn new(columns: u32, cell_width: u32, cell_height: u32, spacing: u32) -> Self {
        let columns = columns.min(MAX_COLUMNS);
        let content = content_width(columns, cell_width, spacing).unwrap_or(u32::MAX);
        Self {
            columns,
            cell_width,
            cell_height,
            spacing,
            left_padding: spacing,
            width: content.saturating_add(spacing.saturating_mul(2)),
        }
    }

    /// Fit as many columns as the viewport allows and center them.
    pub fn for_viewport_width(width: u32, cell_width: u32, cell_height: u32, spacing: u32) -> Self {
        let stride = cell_width.saturating_add(spacing);
        let columns = if width > cell_width && stride > 0 {
            1 + (width - cell_width) / stride
        } else {
            1
        };
        let columns = columns.min(MAX_COLUMNS);
        let content = content_width(columns, cell_width, spacing).unwrap_or(u32::MAX);
        Self {
            columns,
            cell_width,
            cell_height,
            spacing,
            left_padding: width.saturating_sub(content) / 2,
            width: width.max(content),
        }
    }

    pub fn validate(&self) -> Result<(), GridError> {
        if self.columns == 0 || self.columns > MAX_COLUMNS {
            return Err(GridError::InvalidLayout(format!(
                "columns must be in 1..={}, got {}",
                MAX_COLUMNS, self.columns
            )));
        }
        if self.cell_width == 0 || self.cell_height == 0 {
            return Err(GridError::InvalidLayout(format!(
                "cell size must be non-zero, got {}x{}",
                self.cell_width, self.cell_height
            )));
        }
        let width = content_width(self.columns, self.cell_width, self.spacing)
            .and_then(|content| content.checked_add(self.left_padding))
            .and_then(|width| width.checked_add(self.left_padding));
        if width.is_none() || self.spacing.checked_add(self.cell_height).is_none() {
            return Err(GridError::InvalidLayout(format!(
                "grid of {} columns of {}x{} cells with spacing {} is too large",
                self.columns, self.cell_width, self.cell_height, self.spacing
            )));
        }
        Ok(())
    }

    pub fn block_height(&self) -> u32 {
        self.spacing.saturating_add(self.cell_height)
    }

    /// Mask with one bit set for every column.
    pub fn full_mask(&self) -> u64 {
        if self.columns >= 64 {
            u64::MAX
        } else {
            (1u64 << self.columns) - 1
        }
    }

    pub fn block_of(&self, index: usize) -> usize {
        index / self.columns as usize
    }

    pub fn column_of(&self, index: usize) -> u32 {
        (index % self.columns as usize) as u32
    }

    pub fn first_index_of(&self, block: usize) -> usize {
        block * self.columns as usize
    }

    pub fn block_count(&self, item_count: usize) -> usize {
        item_count.div_ceil(self.columns as usize)
    }

    /// Top-left corner of a cell inside its block surface.
    pub fn cell_origin(&self, column: u32) -> (u32, u32) {
        (
            self.left_padding + column * (self.cell_width + self.spacing),
            self.spacing,
        )
    }

    /// Largest useful scroll offset for `item_count` items.
    pub fn max_scroll(&self, item_count: usize, viewport_height: u32) -> i64 {
        let rows = self.block_count(item_count) as i64;
        let total = self.spacing as i64 + rows * self.block_height() as i64;
        (total - viewport_height as i64).max(0)
    }

    /// Item index under a point in content coordinates, if it hits a cell.
    pub fn index_at(&self, x: u32, y: i64, item_count: usize) -> Option<usize> {
        let bh = self.block_height() as i64;
        if y < 0 || bh == 0 {
            return None;
        }
        let block = (y / bh) as usize;
        let y_in_block = (y % bh) as u32;
        if y_in_block < self.spacing {
            return None;
        }

        let x = x.checked_sub(self.left_padding)?;
        let stride = self.cell_width + self.spacing;
        let column = x / stride;
        if column >= self.columns || x % stride >= self.cell_width {
            return None;
        }

        let index = self.first_index_of(block) + column as usize;
        (index < item_count).then_some(index)
    }
}

/// Width of `columns` cells and the gaps between them, if it fits in `u32`.
fn content_width(columns: u32, cell_width: u32, spacing: u32) -> Option<u32> {
    columns
        .checked_mul(cell_width)?
        .checked_add(columns.saturating_sub(1).checked_mul(spacing)?)
}
