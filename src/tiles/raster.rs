//! RGBA raster used both for decoded thumbnails and for tile surfaces.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

/// Background behind every block surface.
pub const BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Cell fill while the thumbnail is still loading.
pub const BLANK_CELL: Rgba<u8> = Rgba([0xDD, 0xDD, 0xDD, 255]);

/// Fill of the "broken image" placeholder.
pub const BROKEN_CELL: Rgba<u8> = Rgba([0x5A, 0x10, 0x10, 255]);

/// Cross drawn over the broken placeholder.
pub const BROKEN_MARK: Rgba<u8> = Rgba([0xE0, 0x40, 0x40, 255]);

/// Width of the selection frame around each cell.
pub const FRAME_WIDTH: u32 = 2;

/// Selection state of a cell, drawn as its frame colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellHighlight {
    None,
    Selected,
    Pressed,
}

impl CellHighlight {
    pub fn color(self) -> Rgba<u8> {
        match self {
            CellHighlight::None => Rgba([0x80, 0x80, 0x80, 255]),
            CellHighlight::Selected => Rgba([0xFF, 0x8C, 0x00, 255]),
            CellHighlight::Pressed => Rgba([0xFF, 0xD7, 0x00, 255]),
        }
    }
}

/// An owned RGBA raster.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterTile {
    image: RgbaImage,
}

impl RasterTile {
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, BACKGROUND)
    }

    pub fn filled(width: u32, height: u32, color: Rgba<u8>) -> Self {
        Self {
            image: RgbaImage::from_pixel(width, height, color),
        }
    }

    pub fn from_image(image: RgbaImage) -> Self {
        Self { image }
    }

    /// Placeholder shown for items whose decode failed.
    pub fn broken(width: u32, height: u32) -> Self {
        let mut tile = Self::filled(width, height, BROKEN_CELL);
        let n = width.min(height);
        for i in 0..n {
            let x = i * width / n.max(1);
            let y = i * height / n.max(1);
            tile.image.put_pixel(x, y, BROKEN_MARK);
            tile.image.put_pixel(width - 1 - x, y, BROKEN_MARK);
        }
        tile
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn as_image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba<u8>> {
        (x < self.width() && y < self.height()).then(|| *self.image.get_pixel(x, y))
    }

    /// Fill a rectangle, clipped to the raster.
    pub fn fill_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: Rgba<u8>) {
        let x_end = x.saturating_add(w).min(self.width());
        let y_end = y.saturating_add(h).min(self.height());
        for py in y.min(y_end)..y_end {
            for px in x.min(x_end)..x_end {
                self.image.put_pixel(px, py, color);
            }
        }
    }

    /// Draw a `FRAME_WIDTH` border just inside the rectangle.
    pub fn frame_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: Rgba<u8>) {
        let t = FRAME_WIDTH.min(w / 2).min(h / 2);
        if t == 0 {
            return;
        }
        self.fill_rect(x, y, w, t, color);
        self.fill_rect(x, y + h - t, w, t, color);
        self.fill_rect(x, y, t, h, color);
        self.fill_rect(x + w - t, y, t, h, color);
    }

    /// Draw `src` scaled to fit inside the rectangle, centred, over a blank fill.
    ///
    /// Sources smaller than the cell are never upscaled.
    pub fn draw_fitted(&mut self, src: &RasterTile, x: u32, y: u32, w: u32, h: u32) {
        self.fill_rect(x, y, w, h, BLANK_CELL);

        let (sw, sh) = src.dimensions();
        if sw == 0 || sh == 0 || w == 0 || h == 0 {
            return;
        }

        let (fw, fh) = fit_within(sw, sh, w, h);
        let dx = x as i64 + ((w - fw) / 2) as i64;
        let dy = y as i64 + ((h - fh) / 2) as i64;

        if (fw, fh) == (sw, sh) {
            imageops::replace(&mut self.image, &src.image, dx, dy);
        } else {
            let scaled = imageops::resize(&src.image, fw, fh, FilterType::Triangle);
            imageops::replace(&mut self.image, &scaled, dx, dy);
        }
    }

    /// Copy `src` with its top-left corner at `(x, y)`; negative offsets clip.
    pub fn blit_onto(src: &RasterTile, dst: &mut RgbaImage, x: i64, y: i64) {
        imageops::replace(dst, &src.image, x, y);
    }
}

/// Largest size with the source aspect ratio that fits the box, without upscaling.
pub fn fit_within(src_w: u32, src_h: u32, box_w: u32, box_h: u32) -> (u32, u32) {
    if src_w <= box_w && src_h <= box_h {
        return (src_w, src_h);
    }
    let scale = (box_w as f64 / src_w as f64).min(box_h as f64 / src_h as f64);
    let w = ((src_w as f64 * scale).round() as u32).clamp(1, box_w.max(1));
    let h = ((src_h as f64 * scale).round() as u32).clamp(1, box_h.max(1));
    (w, h)
}
