use std::io::Cursor;
use std::sync::Arc;

use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageFormat};

use crate::hash::ContentHash;
use crate::{AvatarError, Result};

/// Longest edge of avatar bytes kept on disk or published.
pub const MAX_STORED_EDGE: u32 = 96;
/// Longest edge of a decoded [`RasterImage`].
pub const MAX_DISPLAY_EDGE: u32 = 64;

/// Turns raw bytes into pixels, or reports that the bytes are not an
/// image it understands.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage>;
}

/// Decoder backed by the formats compiled into the [`image`] crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardDecoder;

impl ImageDecoder for StandardDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(AvatarError::Decode("empty data".to_owned()));
        }
        Ok(image::load_from_memory(bytes)?)
    }
}

/// Decoded, bounded-size avatar.
///
/// Cheap to clone. Two rasters are equal when they were produced from the
/// same content, as identified by their fingerprint.
#[derive(Clone)]
pub struct RasterImage {
    image: Arc<DynamicImage>,
    fingerprint: ContentHash,
}

impl RasterImage {
    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Content hash for hash-addressed sources, digest of the content
    /// itself for local ones.
    pub fn fingerprint(&self) -> &ContentHash {
        &self.fingerprint
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

impl PartialEq for RasterImage {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl Eq for RasterImage {}

impl std::fmt::Debug for RasterImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterImage")
            .field("fingerprint", &self.fingerprint)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// Decoding and scaling rules shared by every channel.
#[derive(Clone)]
pub struct Rasterizer {
    decoder: Arc<dyn ImageDecoder>,
    max_stored_edge: u32,
    max_display_edge: u32,
}

impl Rasterizer {
    pub fn new(
        decoder: Arc<dyn ImageDecoder>,
        max_stored_edge: u32,
        max_display_edge: u32,
    ) -> Self {
        Self {
            decoder,
            max_stored_edge: max_stored_edge.max(1),
            max_display_edge: max_display_edge.max(1),
        }
    }

    /// Decode `bytes` into a raster no larger than the display edge.
    pub fn rasterize(
        &self,
        bytes: &[u8],
        fingerprint: ContentHash,
    ) -> Result<RasterImage> {
        let decoded = self.decoder.decode(bytes)?;
        let image = fit(decoded, self.max_display_edge);
        Ok(RasterImage {
            image: Arc::new(image),
            fingerprint,
        })
    }

    /// Bytes to persist for an imported or published avatar.
    ///
    /// Images within the stored edge keep their original encoding; larger
    /// ones are scaled down and re-encoded as PNG.
    pub fn scale_for_storage(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let decoded = self.decoder.decode(bytes)?;
        let (width, height) = decoded.dimensions();
        if width <= self.max_stored_edge && height <= self.max_stored_edge {
            return Ok(bytes.to_vec());
        }

        log::debug!(
            "Scaling {}x{} avatar down to {} px",
            width,
            height,
            self.max_stored_edge
        );
        let scaled = fit(decoded, self.max_stored_edge);
        let mut output = Cursor::new(Vec::new());
        scaled
            .write_to(&mut output, image::ImageOutputFormat::Png)
            .map_err(|err| AvatarError::Decode(err.to_string()))?;
        Ok(output.into_inner())
    }

    /// Decode for validation only and report the pixel dimensions.
    pub fn dimensions(&self, bytes: &[u8]) -> Result<(u32, u32)> {
        Ok(self.decoder.decode(bytes)?.dimensions())
    }
}

impl Default for Rasterizer {
    fn default() -> Self {
        Self::new(Arc::new(StandardDecoder), MAX_STORED_EDGE, MAX_DISPLAY_EDGE)
    }
}

fn fit(image: DynamicImage, max_edge: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    let (target_width, target_height) =
        calculate_target_size(width, height, max_edge);
    if target_width == width && target_height == height {
        image
    } else {
        image.resize_exact(target_width, target_height, FilterType::Triangle)
    }
}

fn calculate_target_size(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    if width <= max_edge && height <= max_edge {
        return (width, height);
    }

    if width >= height {
        let scaled_height =
            ((height as f64) * (max_edge as f64) / (width as f64)).round() as u32;
        (max_edge, scaled_height.max(1))
    } else {
        let scaled_width =
            ((width as f64) * (max_edge as f64) / (height as f64)).round() as u32;
        (scaled_width.max(1), max_edge)
    }
}

/// MIME label of encoded image bytes, sniffed from their signature.
pub fn image_type(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => "image/png",
        Ok(ImageFormat::Jpeg) => "image/jpeg",
        Ok(ImageFormat::Gif) => "image/gif",
        Ok(ImageFormat::WebP) => "image/webp",
        Ok(ImageFormat::Bmp) => "image/bmp",
        Ok(ImageFormat::Tiff) => "image/tiff",
        Ok(ImageFormat::Ico) => "image/x-icon",
        _ => "application/octet-stream",
    }
}
