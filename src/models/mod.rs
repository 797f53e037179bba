pub mod item_source;
pub mod media_item;

pub use item_source::*;
pub use media_item::*;
