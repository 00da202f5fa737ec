// Model seams: the detector and recognizer only see these traits, so any
// runtime can stand behind them. ONNX Runtime is the bundled backend.

use ndarray::{Array2, Array4};
use ort::value::Value;
use std::path::Path;
use tracing::trace;

use crate::core::errors::InferenceError;
use crate::core::types::ComputeProfile;
use crate::services::onnx_builder::SessionPool;

/// Dense f32 tensor copied out of a model run
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self { shape, data }
    }

    /// Number of elements the shape describes
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Raw detector output: `boxes [1,N,4]` and `scores [1,N]`
#[derive(Debug, Clone)]
pub struct DetectorOutputs {
    pub boxes: Tensor,
    pub scores: Option<Tensor>,
}

/// One forward pass of a region detection model
pub trait DetectionModel: Send + Sync {
    fn infer(&self, images: Array4<f32>) -> Result<DetectorOutputs, InferenceError>;
}

/// One decoding step of an image-conditioned generation model.
///
/// Returns logits shaped `[1,N,V]` or `[1,V]` for the `N` ids given.
pub trait GenerationModel: Send + Sync {
    fn infer(&self, pixels: &Array4<f32>, token_ids: &[i64]) -> Result<Tensor, InferenceError>;
}

const DETECTOR_INPUT: &str = "images";
const DETECTOR_BOXES: &str = "boxes";
const DETECTOR_SCORES: &str = "scores";

const GENERATOR_PIXELS: &str = "pixel_values";
const GENERATOR_IDS: &str = "input_ids";
const GENERATOR_LOGITS: &str = "logits";

fn shape_of(dims: &[i64]) -> Vec<usize> {
    dims.iter().map(|&d| d.max(0) as usize).collect()
}

/// Detection graph served from a session pool
pub struct OnnxDetectionModel {
    pool: SessionPool,
}

impl OnnxDetectionModel {
    pub fn load(model_path: &Path, profile: ComputeProfile, pool_size: usize) -> anyhow::Result<Self> {
        let pool = SessionPool::build(model_path, "detector", profile, pool_size)?;
        Ok(Self { pool })
    }

    pub fn backend(&self) -> &str {
        self.pool.backend()
    }
}

impl DetectionModel for OnnxDetectionModel {
    fn infer(&self, images: Array4<f32>) -> Result<DetectorOutputs, InferenceError> {
        let input = Value::from_array(images)?;

        let mut session = self.pool.acquire().map_err(|_| InferenceError::PoolClosed)?;
        let outputs = session.run(ort::inputs![DETECTOR_INPUT => input])?;

        let boxes = {
            let value = outputs
                .get(DETECTOR_BOXES)
                .ok_or_else(|| InferenceError::MissingOutput(DETECTOR_BOXES.to_string()))?;
            let (shape, data) = value.try_extract_tensor::<f32>()?;
            Tensor::new(shape_of(shape), data.to_vec())
        };

        let scores = match outputs.get(DETECTOR_SCORES) {
            Some(value) => {
                let (shape, data) = value.try_extract_tensor::<f32>()?;
                Some(Tensor::new(shape_of(shape), data.to_vec()))
            }
            None => None,
        };

        trace!("Detector returned boxes {:?}", boxes.shape);
        Ok(DetectorOutputs { boxes, scores })
    }
}

/// Generation graph served from a session pool
pub struct OnnxGenerationModel {
    pool: SessionPool,
}

impl OnnxGenerationModel {
    pub fn load(model_path: &Path, profile: ComputeProfile, pool_size: usize) -> anyhow::Result<Self> {
        let pool = SessionPool::build(model_path, "recognizer", profile, pool_size)?;
        Ok(Self { pool })
    }

    pub fn backend(&self) -> &str {
        self.pool.backend()
    }
}

impl GenerationModel for OnnxGenerationModel {
    fn infer(&self, pixels: &Array4<f32>, token_ids: &[i64]) -> Result<Tensor, InferenceError> {
        let ids = Array2::from_shape_vec((1, token_ids.len()), token_ids.to_vec())
            .map_err(|e| InferenceError::Backend(e.to_string()))?;

        let pixel_value = Value::from_array(pixels.clone())?;
        let ids_value = Value::from_array(ids)?;

        let mut session = self.pool.acquire().map_err(|_| InferenceError::PoolClosed)?;
        let outputs = session.run(ort::inputs![
            GENERATOR_PIXELS => pixel_value,
            GENERATOR_IDS => ids_value
        ])?;

        // Exported decoders do not always name their output "logits"
        let value = match outputs.get(GENERATOR_LOGITS) {
            Some(value) => value,
            None => {
                let first = outputs
                    .keys()
                    .next()
                    .ok_or_else(|| InferenceError::MissingOutput(GENERATOR_LOGITS.to_string()))?;
                &outputs[first]
            }
        };

        let (shape, data) = value.try_extract_tensor::<f32>()?;
        Ok(Tensor::new(shape_of(shape), data.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tensor_element_count() {
        let t = Tensor::new(vec![1, 3, 5], vec![0.0; 15]);
        assert_eq!(t.element_count(), 15);
    }

    #[test]
    fn negative_dims_clamp_to_zero() {
        assert_eq!(shape_of(&[1, -1, 4]), vec![1, 0, 4]);
    }
}
