use crate::core::errors::ConfigError;
use crate::core::types::{ComputeProfile, NormalizationMode};
use std::env;
use std::str::FromStr;
use tracing::Level;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 1420,
            host: "127.0.0.1".to_string(),
            log_level: Level::INFO,
        }
    }
}

/// Model artifact locations and execution backend
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub detector_model_path: String,
    pub recognizer_model_path: String,
    pub vocab_path: String,
    pub compute_profile: ComputeProfile,
    /// Number of ONNX sessions per model (1 serializes inference on that model)
    pub onnx_pool_size: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            detector_model_path: "models/detector.onnx".to_string(),
            recognizer_model_path: "models/recognizer.onnx".to_string(),
            vocab_path: "models/vocab.txt".to_string(),
            compute_profile: ComputeProfile::Mixed,
            onnx_pool_size: 2,
        }
    }
}

/// Region detector configuration
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Square side the page is resized to before inference
    pub input_size: u32,
    /// Extra score floor; 0.0 keeps everything the model returns
    pub min_confidence: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            input_size: 640,
            min_confidence: 0.0,
        }
    }
}

/// Sequence recognizer configuration
#[derive(Debug, Clone)]
pub struct RecognitionConfig {
    pub input_size: u32,
    pub max_length: usize,
    pub normalization: NormalizationMode,
    /// Collapse crops to luminance before building the RGB tensor
    pub grayscale: bool,
    pub continuation_marker: String,
    pub bos_token: String,
    pub eos_token: String,
    pub pad_token: String,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            input_size: 224,
            max_length: 300,
            normalization: NormalizationMode::MinusOneToOne,
            grayscale: true,
            continuation_marker: "##".to_string(),
            bos_token: "[CLS]".to_string(),
            eos_token: "[SEP]".to_string(),
            pad_token: "[PAD]".to_string(),
        }
    }
}

/// Translation gateway configuration
#[derive(Debug, Clone)]
pub struct TranslationConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Language names as they should read in the translation prompt
    pub source_language: String,
    pub target_language: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// First retry backoff; doubles per attempt up to 10s
    pub retry_initial_delay_ms: u64,
    /// LRU capacity of the translation cache (0 disables caching)
    pub cache_entries: usize,
    /// Consecutive failed calls before the gateway reports not ready
    pub breaker_failure_threshold: usize,
    pub breaker_cooldown_secs: u64,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.cerebras.ai/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-oss-120b".to_string(),
            source_language: "Japanese".to_string(),
            target_language: "English".to_string(),
            timeout_secs: 30,
            max_retries: 3,
            retry_initial_delay_ms: 1000,
            cache_entries: 2048,
            breaker_failure_threshold: 5,
            breaker_cooldown_secs: 60,
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound on region tasks doing work at the same time
    pub max_concurrent_regions: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_regions: num_cpus::get().max(1),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub models: ModelConfig,
    pub detection: DetectionConfig,
    pub recognition: RecognitionConfig,
    pub translation: TranslationConfig,
    pub pipeline: PipelineConfig,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_env() -> Result<Self, ConfigError> {
        let server_defaults = ServerConfig::default();
        let model_defaults = ModelConfig::default();
        let detection_defaults = DetectionConfig::default();
        let recognition_defaults = RecognitionConfig::default();
        let translation_defaults = TranslationConfig::default();

        let log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        let compute_profile = match env::var("COMPUTE_PROFILE") {
            Ok(raw) if !raw.trim().is_empty() => raw.parse()?,
            _ => model_defaults.compute_profile,
        };

        let normalization = match env::var("NORMALIZATION_MODE") {
            Ok(raw) if !raw.trim().is_empty() => raw.parse()?,
            _ => recognition_defaults.normalization,
        };

        Ok(Self {
            server: ServerConfig {
                port: env_or("SERVER_PORT", server_defaults.port),
                host: env_string("SERVER_HOST", &server_defaults.host),
                log_level,
            },
            models: ModelConfig {
                detector_model_path: env_string(
                    "DETECTOR_MODEL_PATH",
                    &model_defaults.detector_model_path,
                ),
                recognizer_model_path: env_string(
                    "RECOGNIZER_MODEL_PATH",
                    &model_defaults.recognizer_model_path,
                ),
                vocab_path: env_string("VOCAB_PATH", &model_defaults.vocab_path),
                compute_profile,
                onnx_pool_size: env_or("ONNX_POOL_SIZE", model_defaults.onnx_pool_size),
            },
            detection: DetectionConfig {
                input_size: env_or("DETECTION_INPUT_SIZE", detection_defaults.input_size),
                min_confidence: env_or("MIN_CONFIDENCE", detection_defaults.min_confidence),
            },
            recognition: RecognitionConfig {
                input_size: env_or("RECOGNITION_INPUT_SIZE", recognition_defaults.input_size),
                max_length: env_or("MAX_DECODE_LENGTH", recognition_defaults.max_length),
                normalization,
                grayscale: env_or("RECOGNITION_GRAYSCALE", recognition_defaults.grayscale),
                continuation_marker: env_string(
                    "CONTINUATION_MARKER",
                    &recognition_defaults.continuation_marker,
                ),
                bos_token: env_string("BOS_TOKEN", &recognition_defaults.bos_token),
                eos_token: env_string("EOS_TOKEN", &recognition_defaults.eos_token),
                pad_token: env_string("PAD_TOKEN", &recognition_defaults.pad_token),
            },
            translation: TranslationConfig {
                api_url: env_string("TRANSLATION_API_URL", &translation_defaults.api_url),
                api_key: env::var("TRANSLATION_API_KEY")
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
                model: env_string("TRANSLATION_MODEL", &translation_defaults.model),
                source_language: env_string(
                    "SOURCE_LANGUAGE",
                    &translation_defaults.source_language,
                ),
                target_language: env_string(
                    "TARGET_LANGUAGE",
                    &translation_defaults.target_language,
                ),
                timeout_secs: env_or("TRANSLATION_TIMEOUT_SECS", translation_defaults.timeout_secs),
                max_retries: env_or("MAX_RETRIES", translation_defaults.max_retries),
                retry_initial_delay_ms: env_or(
                    "TRANSLATION_RETRY_DELAY_MS",
                    translation_defaults.retry_initial_delay_ms,
                ),
                cache_entries: env_or("TRANSLATION_CACHE_ENTRIES", translation_defaults.cache_entries),
                breaker_failure_threshold: env_or(
                    "CIRCUIT_FAILURE_THRESHOLD",
                    translation_defaults.breaker_failure_threshold,
                ),
                breaker_cooldown_secs: env_or(
                    "CIRCUIT_COOLDOWN_SECS",
                    translation_defaults.breaker_cooldown_secs,
                ),
            },
            pipeline: PipelineConfig {
                max_concurrent_regions: env_or(
                    "MAX_CONCURRENT_REGIONS",
                    PipelineConfig::default().max_concurrent_regions,
                ),
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.models.onnx_pool_size == 0 {
            return Err(ConfigError::InvalidModelConfig(
                "onnx_pool_size must be > 0".to_string(),
            ));
        }

        if !(32..=4096).contains(&self.detection.input_size) {
            return Err(ConfigError::InvalidDetectionConfig(format!(
                "input_size must be between 32 and 4096, got {}",
                self.detection.input_size
            )));
        }

        if !(0.0..=1.0).contains(&self.detection.min_confidence) {
            return Err(ConfigError::InvalidDetectionConfig(format!(
                "min_confidence must be in [0.0, 1.0], got {}",
                self.detection.min_confidence
            )));
        }

        if self.recognition.input_size == 0 {
            return Err(ConfigError::InvalidRecognitionConfig(
                "input_size must be > 0".to_string(),
            ));
        }

        if self.recognition.max_length == 0 {
            return Err(ConfigError::InvalidRecognitionConfig(
                "max_length must be > 0".to_string(),
            ));
        }

        if self.recognition.continuation_marker.is_empty() {
            return Err(ConfigError::InvalidRecognitionConfig(
                "continuation_marker must not be empty".to_string(),
            ));
        }

        if self.translation.target_language.is_empty() {
            return Err(ConfigError::InvalidTranslationConfig(
                "target_language must not be empty".to_string(),
            ));
        }

        if self.translation.breaker_failure_threshold == 0 {
            return Err(ConfigError::InvalidTranslationConfig(
                "breaker_failure_threshold must be > 0".to_string(),
            ));
        }

        if self.pipeline.max_concurrent_regions == 0 {
            return Err(ConfigError::InvalidConcurrency(
                self.pipeline.max_concurrent_regions,
            ));
        }

        Ok(())
    }

    pub fn server_port(&self) -> u16 {
        self.server.port
    }

    pub fn server_host(&self) -> &str {
        &self.server.host
    }

    pub fn log_level(&self) -> Level {
        self.server.log_level
    }

    pub fn compute_profile(&self) -> ComputeProfile {
        self.models.compute_profile
    }

    pub fn onnx_pool_size(&self) -> usize {
        self.models.onnx_pool_size
    }

    pub fn target_language(&self) -> &str {
        &self.translation.target_language
    }

    pub fn max_concurrent_regions(&self) -> usize {
        self.pipeline.max_concurrent_regions
    }
}
