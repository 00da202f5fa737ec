// Error types for the recognition and translation pipeline
//
// Construction failures surface once at engine startup. Everything raised
// while handling a single capture is scoped to that capture or one region.

use thiserror::Error;

/// Region detector errors
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Detection model could not be loaded: {0}")]
    ModelLoad(String),

    #[error("Image could not be presented to the detection model: {0}")]
    ImageConversion(String),

    #[error("Detection model invocation failed: {0}")]
    Prediction(String),

    #[error("Unexpected detection model output: {0}")]
    UnexpectedModelOutput(String),
}

/// Failure of a single model invocation, before it is attributed to a stage
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference backend error: {0}")]
    Backend(String),

    #[error("model output '{0}' is missing")]
    MissingOutput(String),

    #[error("session pool is closed")]
    PoolClosed,
}

impl From<ort::Error> for InferenceError {
    fn from(e: ort::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Sequence recognizer errors
#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("Generation model could not be loaded: {0}")]
    ModelLoad(String),

    #[error("Failed to load vocabulary from {path}: {source}")]
    VocabularyLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Vocabulary is empty")]
    EmptyVocabulary,

    #[error("Image could not be presented to the generation model: {0}")]
    ImageConversion(String),

    #[error("Generation model invocation failed at step {step}: {message}")]
    Prediction { step: usize, message: String },

    #[error("Unexpected generation model output: {0}")]
    UnexpectedModelOutput(String),

    #[error("Recognition cancelled after {steps} decode steps")]
    Cancelled { steps: usize },
}

/// Translation gateway errors
#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("Translation gateway is not ready: {0}")]
    Unavailable(String),

    #[error("Translation request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Translation service returned {status}: {body}")]
    ServiceError { status: u16, body: String },

    #[error("Invalid translation response: {0}")]
    InvalidResponse(String),

    #[error("Translation failed: {0}")]
    Other(String),
}

/// Raster image handling errors
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Pixel buffer of {provided} bytes does not match {width}x{height} RGBA ({required} bytes)")]
    BufferSize {
        width: u32,
        height: u32,
        provided: usize,
        required: usize,
    },

    #[error("Invalid image dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Crop rectangle {region} does not intersect the {width}x{height} image")]
    EmptyCrop {
        region: String,
        width: u32,
        height: u32,
    },
}

/// Failure of a single region's crop → recognize → translate chain.
/// Never aborts a batch; the region is dropped and reported.
#[derive(Debug, Error)]
pub enum RegionFailure {
    #[error("crop failed: {0}")]
    Crop(#[source] ImageError),

    #[error("recognition failed: {0}")]
    Recognition(#[source] RecognitionError),

    #[error("translation failed: {0}")]
    Translation(#[source] TranslationError),

    #[error("region task failed: {0}")]
    Task(String),
}

impl RegionFailure {
    /// Short label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Crop(_) => "crop",
            Self::Recognition(_) => "recognition",
            Self::Translation(_) => "translation",
            Self::Task(_) => "task",
        }
    }
}

/// Pipeline orchestration errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Region detection failed: {0}")]
    DetectionFailed(#[from] DetectionError),

    #[error("Translation gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Task join failed: {0}")]
    TaskJoinFailed(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid model config: {0}")]
    InvalidModelConfig(String),

    #[error("Invalid detection config: {0}")]
    InvalidDetectionConfig(String),

    #[error("Invalid recognition config: {0}")]
    InvalidRecognitionConfig(String),

    #[error("Invalid translation config: {0}")]
    InvalidTranslationConfig(String),

    #[error("Max concurrent regions must be > 0, got {0}")]
    InvalidConcurrency(usize),

    #[error("Unknown compute profile '{0}' (expected accelerator, mixed or cpu)")]
    UnknownComputeProfile(String),

    #[error("Unknown normalization mode '{0}' (expected zero_to_one or minus_one_to_one)")]
    UnknownNormalization(String),
}

pub type DetectionResult<T> = Result<T, DetectionError>;
pub type RecognitionResult<T> = Result<T, RecognitionError>;
pub type TranslationResult<T> = Result<T, TranslationError>;
pub type PipelineResult<T> = Result<T, PipelineError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
