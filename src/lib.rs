// Screenshot → text regions → recognized text → translated overlay entries

pub mod core;
pub mod middleware;
pub mod orchestration;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use crate::core::{
    cancel::CancelFlag,
    config::Config,
    errors::{
        ConfigError, DetectionError, ImageError, InferenceError, PipelineError, RecognitionError,
        RegionFailure, TranslationError,
    },
    region::{ModelRegion, PixelRegion, Rect, UiRegion},
    types::{
        ComputeProfile, DropReason, NormalizationMode, ProcessReport, RecognizedText,
        RegionDiagnostic, TranslatedEntry,
    },
};

pub use middleware::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

pub use orchestration::PipelineOrchestrator;

pub use services::{
    CachedGateway, DetectionModel, GenerationModel, HttpTranslationGateway, RegionDetector,
    SequenceRecognizer, TextRecognizer, TextRegionDetector, TranslationGateway, Vocabulary,
};

pub use utils::{crop_image_async, Metrics, RasterImage};
