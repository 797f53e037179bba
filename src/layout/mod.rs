pub mod grid;

pub use grid::{GridLayout, MAX_COLUMNS};
