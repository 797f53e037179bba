//! Arithmetic for the circular window of tile slots.
//!
//! Slot `(start_offset + i) % n` holds block `first_block + i`.

use crate::layout::GridLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowDescriptor {
    pub start_offset: usize,
    pub first_block: usize,
}

impl WindowDescriptor {
    /// Slot currently holding `block`, if the block is inside the window.
    pub fn slot_for_block(&self, block: usize, slots: usize) -> Option<usize> {
        let delta = block.checked_sub(self.first_block)?;
        (delta < slots).then(|| (self.start_offset + delta) % slots)
    }

    /// Block held by `slot`.
    pub fn block_for_slot(&self, slot: usize, slots: usize) -> usize {
        let delta = (slot + slots - self.start_offset % slots) % slots;
        self.first_block + delta
    }
}

/// Inclusive range of row-blocks intersecting the viewport.
///
/// `last < first` means nothing is visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibleBlocks {
    pub first: i64,
    pub last: i64,
}

impl VisibleBlocks {
    pub fn compute(layout: &GridLayout, scroll_y: i64, viewport_height: u32) -> Self {
        let bh = layout.block_height().max(1) as i64;
        let top = scroll_y.saturating_sub(layout.spacing as i64);
        Self {
            first: top.div_euclid(bh).max(0),
            last: top.saturating_add(viewport_height as i64).div_euclid(bh),
        }
    }

    pub fn contains(&self, block: i64) -> bool {
        block >= self.first && block <= self.last
    }

    pub fn is_empty(&self) -> bool {
        self.last < self.first
    }
}

/// Result of moving the window: the new descriptor and the slots that must
/// be reassigned, as `(slot, new_block)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftPlan {
    pub window: WindowDescriptor,
    pub assignments: Vec<(usize, usize)>,
}

/// Move the window so it starts at `new_first`.
///
/// Slots whose block stays inside the window keep it; only slots sliding in
/// are reassigned. A forced refresh, or a jump further than the window
/// length, reassigns every slot.
pub fn plan_shift(
    current: WindowDescriptor,
    new_first: usize,
    slots: usize,
    force: bool,
) -> ShiftPlan {
    if slots == 0 {
        return ShiftPlan {
            window: WindowDescriptor {
                start_offset: 0,
                first_block: new_first,
            },
            assignments: Vec::new(),
        };
    }

    let delta = new_first as i64 - current.first_block as i64;
    let n = slots as i64;

    if force || delta.abs() > n {
        return ShiftPlan {
            window: WindowDescriptor {
                start_offset: 0,
                first_block: new_first,
            },
            assignments: (0..slots).map(|i| (i, new_first + i)).collect(),
        };
    }

    let mut start = current.start_offset as i64;
    let mut assignments = Vec::with_capacity(delta.unsigned_abs() as usize);

    if delta > 0 {
        start = (start + delta).rem_euclid(n);
        for i in (1..=delta).rev() {
            let slot = (start + n - i).rem_euclid(n) as usize;
            let block = new_first + slots - i as usize;
            assignments.push((slot, block));
        }
    } else if delta < 0 {
        start = (start + delta).rem_euclid(n);
        for i in 0..-delta {
            let slot = (start + i).rem_euclid(n) as usize;
            let block = new_first + i as usize;
            assignments.push((slot, block));
        }
    }

    ShiftPlan {
        window: WindowDescriptor {
            start_offset: start as usize,
            first_block: new_first,
        },
        assignments,
    }
}
