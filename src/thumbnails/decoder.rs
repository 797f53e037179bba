//! Thumbnail decoding using the image crate.
//!
//! Produces a small raster that fits the grid cell while preserving aspect
//! ratio. Nothing is cached here: every call decodes from the source.

use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use tracing::{debug, trace};

use crate::error::DecodeError;
use crate::models::MediaItem;
use crate::tiles::raster::{fit_within, RasterTile};

/// Default bounding box for decoded thumbnails in pixels.
pub const DEFAULT_THUMB_SIZE: u32 = 256;

/// Turns an item into a displayable raster.
///
/// May be slow (disk I/O) and is called concurrently from several decode
/// workers for different items.
pub trait ThumbnailDecoder: Send + Sync {
    fn decode(&self, item: &MediaItem) -> Result<RasterTile, DecodeError>;
}

impl<F> ThumbnailDecoder for F
where
    F: Fn(&MediaItem) -> Result<RasterTile, DecodeError> + Send + Sync,
{
    fn decode(&self, item: &MediaItem) -> Result<RasterTile, DecodeError> {
        self(item)
    }
}

/// Decoder backed by files on disk.
#[derive(Debug, Clone, Copy)]
pub struct ImageThumbnailDecoder {
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for ImageThumbnailDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_THUMB_SIZE, DEFAULT_THUMB_SIZE)
    }
}

impl ImageThumbnailDecoder {
    pub fn new(max_width: u32, max_height: u32) -> Self {
        Self {
            max_width: max_width.max(1),
            max_height: max_height.max(1),
        }
    }

    /// Check if a source file can be processed as an image.
    pub fn can_decode(path: &Path) -> bool {
        Self::format_from_extension(path).is_some()
    }

    /// Determine image format from file extension.
    fn format_from_extension(path: &Path) -> Option<ImageFormat> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            "png" => Some(ImageFormat::Png),
            "webp" => Some(ImageFormat::WebP),
            "gif" => Some(ImageFormat::Gif),
            "bmp" => Some(ImageFormat::Bmp),
            "tiff" | "tif" => Some(ImageFormat::Tiff),
            _ => None,
        }
    }

    fn load_image(path: &Path) -> Result<DynamicImage, DecodeError> {
        let bytes = std::fs::read(path).map_err(|source| DecodeError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let decoded = match image::guess_format(&bytes) {
            Ok(fmt) => image::load_from_memory_with_format(&bytes, fmt),
            Err(_) => image::load_from_memory(&bytes),
        };
        decoded.map_err(|source| DecodeError::Image {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl ThumbnailDecoder for ImageThumbnailDecoder {
    fn decode(&self, item: &MediaItem) -> Result<RasterTile, DecodeError> {
        if !Self::can_decode(&item.path) {
            return Err(DecodeError::Unsupported(item.path.clone()));
        }

        let img = Self::load_image(&item.path)?;
        let (src_width, src_height) = img.dimensions();
        let (thumb_width, thumb_height) =
            fit_within(src_width, src_height, self.max_width, self.max_height);

        trace!(
            path = ?item.path,
            src_width,
            src_height,
            thumb_width,
            thumb_height,
            "Decoding thumbnail"
        );

        let thumbnail = if (thumb_width, thumb_height) == (src_width, src_height) {
            img
        } else {
            // CatmullRom provides good quality/speed balance for downscaling
            img.resize_exact(thumb_width, thumb_height, FilterType::CatmullRom)
        };

        debug!(path = ?item.path, thumb_width, thumb_height, "Decoded thumbnail");
        Ok(RasterTile::from_image(thumbnail.to_rgba8()))
    }
}
