pub mod cancel;
pub mod config;
pub mod errors;
pub mod region;
pub mod types;

// Re-export commonly used items for convenience
pub use cancel::{CancelFlag, CancelOnDrop};
pub use config::Config;
pub use errors::{
    ConfigError, DetectionError, ImageError, InferenceError, PipelineError, RecognitionError, RegionFailure,
    TranslationError,
};
pub use region::{ModelRegion, PixelRegion, Rect, UiRegion};
pub use types::{
    ComputeProfile, DropReason, NormalizationMode, ProcessReport, RecognizedText,
    RegionDiagnostic, TranslatedEntry,
};
