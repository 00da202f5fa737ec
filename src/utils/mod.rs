pub mod image_ops;
pub mod metrics;

// Re-export commonly used items
pub use image_ops::{crop_image_async, RasterImage};
pub use metrics::{Metrics, MetricsSnapshot};
