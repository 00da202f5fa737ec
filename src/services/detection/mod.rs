use crate::core::config::{Config, DetectionConfig};
use crate::core::errors::{DetectionError, DetectionResult, InferenceError};
use crate::core::region::{ModelRegion, PixelRegion};
use crate::core::types::ComputeProfile;
use crate::services::inference::{DetectionModel, DetectorOutputs, OnnxDetectionModel};
use crate::utils::image_ops::RasterImage;
use ndarray::Array4;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, instrument, trace, warn};

/// Finds text blocks on a page
pub trait TextRegionDetector: Send + Sync {
    fn detect(&self, image: &RasterImage) -> DetectionResult<Vec<PixelRegion>>;
}

pub struct RegionDetector {
    model: Box<dyn DetectionModel>,
    config: DetectionConfig,
    backend: String,
    /// Set once the "floor without scores" warning has been logged
    missing_scores_warned: AtomicBool,
}

impl RegionDetector {
    /// Load the detection model from `config.models.detector_model_path`
    pub fn new(config: &Config, profile: ComputeProfile) -> DetectionResult<Self> {
        let path = Path::new(&config.models.detector_model_path);
        info!("Loading detection model from {}", path.display());

        let model = OnnxDetectionModel::load(path, profile, config.models.onnx_pool_size)
            .map_err(|e| DetectionError::ModelLoad(format!("{:#}", e)))?;
        let backend = model.backend().to_string();

        let mut detector = Self::with_model(Box::new(model), config.detection.clone());
        detector.backend = backend;
        Ok(detector)
    }

    /// Wrap an already-loaded model
    pub fn with_model(model: Box<dyn DetectionModel>, config: DetectionConfig) -> Self {
        Self {
            model,
            config,
            backend: "custom".to_string(),
            missing_scores_warned: AtomicBool::new(false),
        }
    }

    pub fn device_type(&self) -> &str {
        &self.backend
    }

    fn preprocess_image(&self, image: &RasterImage) -> DetectionResult<Array4<f32>> {
        let target_size = self.config.input_size;
        if target_size == 0 {
            return Err(DetectionError::ImageConversion(
                "detector input size is zero".to_string(),
            ));
        }
        trace!(
            "Preprocessing image: {}x{} → {}x{}",
            image.width(),
            image.height(),
            target_size,
            target_size
        );

        let resized = image.resize_square(target_size);

        let target = target_size as usize;
        let mut array = Array4::<f32>::zeros((1, 3, target, target));

        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            array[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
            array[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
            array[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
        }

        Ok(array)
    }

    /// Turn raw model tensors into model-space regions, applying the
    /// optional confidence floor.
    fn parse_outputs(&self, outputs: &DetectorOutputs) -> DetectionResult<Vec<ModelRegion>> {
        let boxes = &outputs.boxes;
        let count = match boxes.shape.as_slice() {
            [1, n, 4] | [n, 4] => *n,
            other => {
                return Err(DetectionError::UnexpectedModelOutput(format!(
                    "boxes must be [1,N,4] or [N,4], got {:?}",
                    other
                )))
            }
        };

        if boxes.data.len() != count * 4 {
            return Err(DetectionError::UnexpectedModelOutput(format!(
                "boxes shape {:?} does not match {} values",
                boxes.shape,
                boxes.data.len()
            )));
        }

        let scores = match &outputs.scores {
            Some(scores) => {
                if scores.data.len() != count || scores.element_count() != count {
                    return Err(DetectionError::UnexpectedModelOutput(format!(
                        "scores shape {:?} does not match {} boxes",
                        scores.shape, count
                    )));
                }
                Some(scores.data.as_slice())
            }
            None => None,
        };

        let min_confidence = self.config.min_confidence;
        if min_confidence > 0.0
            && scores.is_none()
            && !self.missing_scores_warned.swap(true, Ordering::Relaxed)
        {
            warn!(
                "Detection model returns no scores; confidence floor {:.2} is not applied",
                min_confidence
            );
        }

        let mut regions = Vec::with_capacity(count);

        for (i, b) in boxes.data.chunks_exact(4).enumerate() {
            if min_confidence > 0.0 {
                if let Some(scores) = scores {
                    if scores[i] < min_confidence {
                        trace!("Box {} below confidence floor ({:.3})", i, scores[i]);
                        continue;
                    }
                }
            }
            regions.push(ModelRegion::new(b[0] as f64, b[1] as f64, b[2] as f64, b[3] as f64));
        }

        Ok(regions)
    }
}

impl TextRegionDetector for RegionDetector {
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    fn detect(&self, image: &RasterImage) -> DetectionResult<Vec<PixelRegion>> {
        let detection_start = std::time::Instant::now();
        let (width, height) = image.dimensions();

        let input = self.preprocess_image(image)?;
        let outputs = self.model.infer(input).map_err(|e| match e {
            InferenceError::MissingOutput(name) => {
                DetectionError::UnexpectedModelOutput(format!("missing output '{}'", name))
            }
            other => DetectionError::Prediction(other.to_string()),
        })?;

        let regions: Vec<PixelRegion> = self
            .parse_outputs(&outputs)?
            .into_iter()
            .map(|r| r.to_pixel(width, height))
            .collect();

        debug!(
            "✓ Detection completed in {:.2}ms: {} regions",
            detection_start.elapsed().as_secs_f64() * 1000.0,
            regions.len()
        );
        Ok(regions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::inference::Tensor;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct StubDetector {
        outputs: DetectorOutputs,
        seen_shape: Mutex<Option<Vec<usize>>>,
        seen_max: Mutex<f32>,
    }

    impl StubDetector {
        fn new(boxes: Tensor, scores: Option<Tensor>) -> Self {
            Self {
                outputs: DetectorOutputs { boxes, scores },
                seen_shape: Mutex::new(None),
                seen_max: Mutex::new(0.0),
            }
        }
    }

    impl DetectionModel for StubDetector {
        fn infer(&self, images: Array4<f32>) -> Result<DetectorOutputs, InferenceError> {
            *self.seen_shape.lock() = Some(images.shape().to_vec());
            *self.seen_max.lock() = images.iter().cloned().fold(0.0, f32::max);
            Ok(self.outputs.clone())
        }
    }

    impl DetectionModel for Arc<StubDetector> {
        fn infer(&self, images: Array4<f32>) -> Result<DetectorOutputs, InferenceError> {
            self.as_ref().infer(images)
        }
    }

    struct FailingDetector;

    impl DetectionModel for FailingDetector {
        fn infer(&self, _images: Array4<f32>) -> Result<DetectorOutputs, InferenceError> {
            Err(InferenceError::Backend("device lost".to_string()))
        }
    }

    fn config(min_confidence: f32) -> DetectionConfig {
        DetectionConfig {
            input_size: 64,
            min_confidence,
        }
    }

    #[test]
    fn full_frame_box_maps_to_whole_image() {
        let stub = StubDetector::new(
            Tensor::new(vec![1, 1, 4], vec![0.0, 0.0, 1.0, 1.0]),
            Some(Tensor::new(vec![1, 1], vec![0.9])),
        );
        let detector = RegionDetector::with_model(Box::new(stub), config(0.0));
        let image = RasterImage::filled(400, 300, [255, 255, 255, 255]).unwrap();

        let regions = detector.detect(&image).unwrap();
        assert_eq!(regions, vec![PixelRegion::new(0.0, 0.0, 400.0, 300.0)]);
    }

    #[test]
    fn boxes_are_flipped_into_top_left_pixels() {
        let stub = StubDetector::new(
            Tensor::new(vec![1, 1, 4], vec![0.25, 0.5, 0.5, 0.25]),
            None,
        );
        let detector = RegionDetector::with_model(Box::new(stub), config(0.0));
        let image = RasterImage::filled(200, 100, [0, 0, 0, 255]).unwrap();

        let regions = detector.detect(&image).unwrap();
        assert_eq!(regions.len(), 1);
        assert!(regions[0].0.approx_eq(&PixelRegion::new(50.0, 25.0, 100.0, 25.0).0, 1e-9));
    }

    #[test]
    fn input_is_square_planar_and_unit_scaled() {
        let stub = Arc::new(StubDetector::new(Tensor::new(vec![1, 0, 4], vec![]), None));
        let detector = RegionDetector::with_model(Box::new(stub.clone()), config(0.0));
        let image = RasterImage::filled(30, 10, [255, 255, 255, 255]).unwrap();

        let regions = detector.detect(&image).unwrap();
        assert!(regions.is_empty());

        assert_eq!(stub.seen_shape.lock().clone(), Some(vec![1, 3, 64, 64]));
        assert_eq!(*stub.seen_max.lock(), 1.0);
    }

    #[test]
    fn confidence_floor_is_opt_in() {
        let boxes = Tensor::new(
            vec![1, 2, 4],
            vec![0.0, 0.0, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5],
        );
        let scores = Some(Tensor::new(vec![1, 2], vec![0.2, 0.8]));
        let image = RasterImage::filled(10, 10, [0, 0, 0, 255]).unwrap();

        let keep_all = RegionDetector::with_model(
            Box::new(StubDetector::new(boxes.clone(), scores.clone())),
            config(0.0),
        );
        assert_eq!(keep_all.detect(&image).unwrap().len(), 2);

        let filtered =
            RegionDetector::with_model(Box::new(StubDetector::new(boxes, scores)), config(0.5));
        assert_eq!(filtered.detect(&image).unwrap().len(), 1);
    }

    #[test]
    fn confidence_floor_without_scores_keeps_boxes_and_warns_once() {
        let boxes = Tensor::new(
            vec![1, 2, 4],
            vec![0.0, 0.0, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5],
        );
        let detector =
            RegionDetector::with_model(Box::new(StubDetector::new(boxes, None)), config(0.5));
        let image = RasterImage::filled(10, 10, [0, 0, 0, 255]).unwrap();

        assert!(!detector.missing_scores_warned.load(Ordering::Relaxed));
        assert_eq!(detector.detect(&image).unwrap().len(), 2);
        assert!(detector.missing_scores_warned.load(Ordering::Relaxed));
        assert_eq!(detector.detect(&image).unwrap().len(), 2);
    }

    #[test]
    fn malformed_boxes_are_rejected() {
        let stub = StubDetector::new(Tensor::new(vec![1, 2, 3], vec![0.0; 6]), None);
        let detector = RegionDetector::with_model(Box::new(stub), config(0.0));
        let image = RasterImage::filled(10, 10, [0, 0, 0, 255]).unwrap();

        assert!(matches!(
            detector.detect(&image),
            Err(DetectionError::UnexpectedModelOutput(_))
        ));
    }

    #[test]
    fn mismatched_scores_are_rejected() {
        let stub = StubDetector::new(
            Tensor::new(vec![1, 1, 4], vec![0.0, 0.0, 1.0, 1.0]),
            Some(Tensor::new(vec![1, 3], vec![0.1, 0.2, 0.3])),
        );
        let detector = RegionDetector::with_model(Box::new(stub), config(0.0));
        let image = RasterImage::filled(10, 10, [0, 0, 0, 255]).unwrap();

        assert!(matches!(
            detector.detect(&image),
            Err(DetectionError::UnexpectedModelOutput(_))
        ));
    }

    #[test]
    fn model_failure_is_a_prediction_error() {
        let detector = RegionDetector::with_model(Box::new(FailingDetector), config(0.0));
        let image = RasterImage::filled(10, 10, [0, 0, 0, 255]).unwrap();

        assert!(matches!(
            detector.detect(&image),
            Err(DetectionError::Prediction(_))
        ));
    }
}
