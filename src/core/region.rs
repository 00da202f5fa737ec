//! Region types for the three coordinate conventions used by the pipeline.
//!
//! Each convention is its own type so a region can never cross a component
//! boundary without stating how it is measured:
//!
//! - [`ModelRegion`]: normalized to [0, 1], bottom-left origin, y grows upward.
//!   Emitted by the detection model.
//! - [`PixelRegion`]: image pixels, top-left origin, y grows downward. Used
//!   for cropping.
//! - [`UiRegion`]: normalized to [0, 1], top-left origin, y grows downward.
//!   Used for overlay placement.
//!
//! All conversions are pure functions of the region and the image size.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Plain axis-aligned rectangle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }

    /// Component-wise comparison within `tolerance`
    pub fn approx_eq(&self, other: &Rect, tolerance: f64) -> bool {
        (self.x - other.x).abs() <= tolerance
            && (self.y - other.y).abs() <= tolerance
            && (self.width - other.width).abs() <= tolerance
            && (self.height - other.height).abs() <= tolerance
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[x={:.2}, y={:.2}, w={:.2}, h={:.2}]",
            self.x, self.y, self.width, self.height
        )
    }
}

/// Detector-native box: normalized, bottom-left origin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelRegion(pub Rect);

/// Pixel box: top-left origin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelRegion(pub Rect);

/// Overlay box: normalized, top-left origin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UiRegion(pub Rect);

impl ModelRegion {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self(Rect::new(x, y, width, height))
    }

    /// Flip the vertical axis and scale to pixels.
    ///
    /// `pixel.y = (1 - norm.y - norm.height) * image_height`
    pub fn to_pixel(&self, image_width: u32, image_height: u32) -> PixelRegion {
        let w = image_width as f64;
        let h = image_height as f64;
        let r = self.0;
        PixelRegion(Rect {
            x: r.x * w,
            y: (1.0 - r.y - r.height) * h,
            width: r.width * w,
            height: r.height * h,
        })
    }
}

impl PixelRegion {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self(Rect::new(x, y, width, height))
    }

    /// Scale into UI-normalized space. Both conventions share the top-left
    /// origin, so there is no flip.
    pub fn to_ui(&self, image_width: u32, image_height: u32) -> UiRegion {
        let w = image_width as f64;
        let h = image_height as f64;
        let r = self.0;
        UiRegion(Rect {
            x: r.x / w,
            y: r.y / h,
            width: r.width / w,
            height: r.height / h,
        })
    }

    /// Integer crop window `(x, y, width, height)` covering this region,
    /// rounded outward and clamped to the image. `None` when the clamped
    /// window is empty or the region is not finite.
    pub fn crop_window(&self, image_width: u32, image_height: u32) -> Option<(u32, u32, u32, u32)> {
        let r = self.0;
        if !r.is_finite() {
            return None;
        }

        let x0 = r.x.floor().max(0.0);
        let y0 = r.y.floor().max(0.0);
        let x1 = (r.x + r.width).ceil().min(image_width as f64);
        let y1 = (r.y + r.height).ceil().min(image_height as f64);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

impl UiRegion {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self(Rect::new(x, y, width, height))
    }

    pub fn to_pixel(&self, image_width: u32, image_height: u32) -> PixelRegion {
        let w = image_width as f64;
        let h = image_height as f64;
        let r = self.0;
        PixelRegion(Rect {
            x: r.x * w,
            y: r.y * h,
            width: r.width * w,
            height: r.height * h,
        })
    }
}
