pub mod detection;
pub mod inference;
pub mod onnx_builder; // Shared ONNX session construction and pooling
pub mod recognition;
pub mod translation;

// Re-export commonly used services
pub use detection::{RegionDetector, TextRegionDetector};
pub use inference::{DetectionModel, DetectorOutputs, GenerationModel, Tensor};
pub use recognition::{SequenceRecognizer, TextRecognizer, Vocabulary};
pub use translation::{CachedGateway, HttpTranslationGateway, TranslationGateway};
