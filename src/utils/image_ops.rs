use image::{imageops, DynamicImage, RgbaImage};
use std::sync::Arc;
use tracing::trace;

use crate::core::errors::ImageError;
use crate::core::region::PixelRegion;

/// Immutable RGBA raster shared cheaply between region tasks.
///
/// Cloning shares the pixel buffer; [`RasterImage::crop`] always produces an
/// independent copy.
#[derive(Clone)]
pub struct RasterImage {
    pixels: Arc<RgbaImage>,
}

impl std::fmt::Debug for RasterImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

impl RasterImage {
    pub fn from_rgba_image(pixels: RgbaImage) -> Result<Self, ImageError> {
        let (width, height) = pixels.dimensions();
        if width == 0 || height == 0 {
            return Err(ImageError::InvalidDimensions { width, height });
        }
        Ok(Self {
            pixels: Arc::new(pixels),
        })
    }

    pub fn from_dynamic(image: DynamicImage) -> Result<Self, ImageError> {
        Self::from_rgba_image(image.into_rgba8())
    }

    /// Wrap a tightly packed RGBA8 buffer
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self, ImageError> {
        let required = width as usize * height as usize * 4;
        let provided = data.len();
        let pixels = RgbaImage::from_raw(width, height, data).ok_or(ImageError::BufferSize {
            width,
            height,
            provided,
            required,
        })?;
        Self::from_rgba_image(pixels)
    }

    /// Decode PNG/JPEG/WebP bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, ImageError> {
        Self::from_dynamic(image::load_from_memory(bytes)?)
    }

    /// Single-color image, mostly useful for tests and warm-up
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Result<Self, ImageError> {
        Self::from_rgba_image(RgbaImage::from_pixel(width, height, image::Rgba(rgba)))
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn as_rgba(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Copy out the pixels covered by `region`, rounded outward and clamped
    /// to the image bounds.
    pub fn crop(&self, region: &PixelRegion) -> Result<RasterImage, ImageError> {
        let (width, height) = self.dimensions();
        let (x, y, w, h) = region
            .crop_window(width, height)
            .ok_or_else(|| ImageError::EmptyCrop {
                region: region.0.to_string(),
                width,
                height,
            })?;

        trace!("Cropping {} → ({}, {}, {}x{})", region.0, x, y, w, h);
        let cropped = imageops::crop_imm(self.pixels.as_ref(), x, y, w, h).to_image();
        Self::from_rgba_image(cropped)
    }

    /// Square resize to `size` × `size` (bilinear)
    pub fn resize_square(&self, size: u32) -> RgbaImage {
        imageops::resize(self.pixels.as_ref(), size, size, imageops::FilterType::Triangle)
    }
}

/// Crop on the blocking pool so large captures never stall the async runtime.
pub async fn crop_image_async(
    image: RasterImage,
    region: PixelRegion,
) -> Result<Result<RasterImage, ImageError>, tokio::task::JoinError> {
    tokio::task::spawn_blocking(move || image.crop(&region)).await
}
