// Sequence recognizer: greedy autoregressive decoding over an
// image-conditioned generation model.

pub mod vocab;

pub use vocab::Vocabulary;

use crate::core::cancel::CancelFlag;
use crate::core::config::{Config, RecognitionConfig};
use crate::core::errors::{InferenceError, RecognitionError, RecognitionResult};
use crate::core::types::{ComputeProfile, NormalizationMode};
use crate::services::inference::{GenerationModel, OnnxGenerationModel, Tensor};
use crate::utils::image_ops::RasterImage;
use image::Pixel;
use ndarray::Array4;
use std::path::Path;
use tracing::{debug, info, instrument, trace};

/// Rendered in place of ids the vocabulary does not know
const UNKNOWN_PIECE: &str = "\u{FFFD}";

const FALLBACK_PAD_ID: usize = 0;
const FALLBACK_BOS_ID: usize = 2;
const FALLBACK_EOS_ID: usize = 3;

/// Turns a cropped text region into a string
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, crop: &RasterImage) -> RecognitionResult<String>;

    /// Like `recognize`, giving up with `Cancelled` once `cancel` is set.
    /// Implementations with long loops should poll the flag between steps.
    fn recognize_cancellable(
        &self,
        crop: &RasterImage,
        cancel: &CancelFlag,
    ) -> RecognitionResult<String> {
        if cancel.is_cancelled() {
            return Err(RecognitionError::Cancelled { steps: 0 });
        }
        self.recognize(crop)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialTokens {
    pub bos: usize,
    pub eos: usize,
    pub pad: usize,
}

impl SpecialTokens {
    /// Look the sentinels up by name, accepting both BERT-style and
    /// BOS/EOS-style spellings.
    pub fn resolve(vocab: &Vocabulary, config: &RecognitionConfig) -> Self {
        Self {
            bos: vocab.resolve(
                &[config.bos_token.as_str(), "[BOS]", "[CLS]", "<s>"],
                FALLBACK_BOS_ID,
            ),
            eos: vocab.resolve(
                &[config.eos_token.as_str(), "[EOS]", "[SEP]", "</s>"],
                FALLBACK_EOS_ID,
            ),
            pad: vocab.resolve(&[config.pad_token.as_str(), "[PAD]", "<pad>"], FALLBACK_PAD_ID),
        }
    }
}

pub struct SequenceRecognizer {
    model: Box<dyn GenerationModel>,
    vocab: Vocabulary,
    special: SpecialTokens,
    config: RecognitionConfig,
    backend: String,
}

impl SequenceRecognizer {
    /// Load vocabulary and generation model once
    pub fn new(config: &Config, profile: ComputeProfile) -> RecognitionResult<Self> {
        let vocab = Vocabulary::from_file(Path::new(&config.models.vocab_path))?;

        let model_path = Path::new(&config.models.recognizer_model_path);
        info!("Loading generation model from {}", model_path.display());
        let model = OnnxGenerationModel::load(model_path, profile, config.models.onnx_pool_size)
            .map_err(|e| RecognitionError::ModelLoad(format!("{:#}", e)))?;
        let backend = model.backend().to_string();

        let mut recognizer = Self::with_model(Box::new(model), vocab, config.recognition.clone());
        recognizer.backend = backend;
        Ok(recognizer)
    }

    pub fn with_model(
        model: Box<dyn GenerationModel>,
        vocab: Vocabulary,
        config: RecognitionConfig,
    ) -> Self {
        let special = SpecialTokens::resolve(&vocab, &config);
        debug!(
            "Recognizer ready: vocab_size={}, bos={}, eos={}, pad={}",
            vocab.len(),
            special.bos,
            special.eos,
            special.pad
        );
        Self {
            model,
            vocab,
            special,
            config,
            backend: "custom".to_string(),
        }
    }

    pub fn device_type(&self) -> &str {
        &self.backend
    }

    pub fn special_tokens(&self) -> SpecialTokens {
        self.special
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    /// Recognize with an explicit normalization, overriding the configured one
    #[instrument(skip(self, crop), fields(width = crop.width(), height = crop.height()))]
    pub fn recognize_with(
        &self,
        crop: &RasterImage,
        mode: NormalizationMode,
    ) -> RecognitionResult<String> {
        self.run(crop, mode, &CancelFlag::new())
    }

    fn run(
        &self,
        crop: &RasterImage,
        mode: NormalizationMode,
        cancel: &CancelFlag,
    ) -> RecognitionResult<String> {
        let start = std::time::Instant::now();
        let pixels = self.preprocess(crop, mode)?;
        let ids = self.generate(&pixels, cancel)?;
        let text = self.detokenize(&ids);

        debug!(
            "Recognized {} tokens in {:.2}ms: {:?}",
            ids.len(),
            start.elapsed().as_secs_f64() * 1000.0,
            text
        );
        Ok(text)
    }

    fn preprocess(&self, crop: &RasterImage, mode: NormalizationMode) -> RecognitionResult<Array4<f32>> {
        let size = self.config.input_size;
        if size == 0 {
            return Err(RecognitionError::ImageConversion(
                "recognizer input size is zero".to_string(),
            ));
        }

        let resized = crop.resize_square(size);
        let side = size as usize;
        let mut array = Array4::<f32>::zeros((1, 3, side, side));

        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            let rgb = if self.config.grayscale {
                let luma = pixel.to_luma()[0];
                [luma, luma, luma]
            } else {
                [pixel[0], pixel[1], pixel[2]]
            };
            for (c, value) in rgb.into_iter().enumerate() {
                array[[0, c, y, x]] = mode.apply(value);
            }
        }

        Ok(array)
    }

    /// Greedy loop: feed the whole sequence, keep the argmax of the last
    /// position, stop on EOS, after `max_length` generated tokens, or once
    /// `cancel` is set.
    fn generate(&self, pixels: &Array4<f32>, cancel: &CancelFlag) -> RecognitionResult<Vec<usize>> {
        let mut sequence: Vec<i64> = vec![self.special.bos as i64];

        for step in 0..self.config.max_length {
            if cancel.is_cancelled() {
                debug!("Decoding cancelled at step {}", step);
                return Err(RecognitionError::Cancelled { steps: step });
            }

            let logits = self.model.infer(pixels, &sequence).map_err(|e| match e {
                InferenceError::MissingOutput(name) => RecognitionError::UnexpectedModelOutput(
                    format!("missing output '{}'", name),
                ),
                other => RecognitionError::Prediction {
                    step,
                    message: other.to_string(),
                },
            })?;

            let next = next_token(&logits)?;
            trace!("step {}: token {}", step, next);
            if next == self.special.eos {
                break;
            }
            sequence.push(next as i64);
        }

        Ok(sequence.into_iter().map(|id| id as usize).collect())
    }

    pub fn detokenize(&self, ids: &[usize]) -> String {
        let marker = self.config.continuation_marker.as_str();
        let mut text = String::new();

        for &id in ids {
            if id == self.special.bos || id == self.special.eos || id == self.special.pad {
                continue;
            }
            match self.vocab.get(id) {
                Some(piece) => match piece.strip_prefix(marker) {
                    Some(rest) if !marker.is_empty() => text.push_str(rest),
                    _ => text.push_str(piece),
                },
                None => text.push_str(UNKNOWN_PIECE),
            }
        }

        text
    }
}

impl TextRecognizer for SequenceRecognizer {
    fn recognize(&self, crop: &RasterImage) -> RecognitionResult<String> {
        self.recognize_with(crop, self.config.normalization)
    }

    fn recognize_cancellable(
        &self,
        crop: &RasterImage,
        cancel: &CancelFlag,
    ) -> RecognitionResult<String> {
        self.run(crop, self.config.normalization, cancel)
    }
}

/// Argmax over the final position's distribution. Ties go to the lowest id.
fn next_token(logits: &Tensor) -> RecognitionResult<usize> {
    if logits.data.len() != logits.element_count() {
        return Err(RecognitionError::UnexpectedModelOutput(format!(
            "logits shape {:?} does not match {} values",
            logits.shape,
            logits.data.len()
        )));
    }

    let last = match logits.shape.as_slice() {
        [1, n, v] if *n > 0 && *v > 0 => &logits.data[(n - 1) * v..n * v],
        [1, v] if *v > 0 => &logits.data[..],
        other => {
            return Err(RecognitionError::UnexpectedModelOutput(format!(
                "logits must be [1,N,V] or [1,V], got {:?}",
                other
            )))
        }
    };

    let mut best = 0;
    let mut best_score = f32::NEG_INFINITY;
    for (id, &score) in last.iter().enumerate() {
        if score > best_score {
            best = id;
            best_score = score;
        }
    }
    Ok(best)
}
