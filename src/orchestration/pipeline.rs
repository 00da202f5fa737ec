// Capture pipeline: detect → (crop → recognize → translate → normalize) per region

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::core::cancel::CancelFlag;
use crate::core::config::Config;
use crate::core::errors::{PipelineError, PipelineResult, RegionFailure};
use crate::core::region::PixelRegion;
use crate::core::types::{
    DropReason, ProcessReport, RecognizedText, RegionDiagnostic, TranslatedEntry,
};
use crate::services::detection::{RegionDetector, TextRegionDetector};
use crate::services::recognition::{SequenceRecognizer, TextRecognizer};
use crate::services::translation::TranslationGateway;
use crate::utils::image_ops::{crop_image_async, RasterImage};
use crate::utils::Metrics;

/// Everything a region task needs, cloned once per task
#[derive(Clone)]
struct RegionContext {
    image: RasterImage,
    recognizer: Arc<dyn TextRecognizer>,
    gateway: Arc<dyn TranslationGateway>,
    semaphore: Arc<Semaphore>,
    metrics: Metrics,
    cancel: CancelFlag,
}

/// What one region task hands back
enum RegionOutcome {
    Entry(TranslatedEntry),
    EmptyText,
    Failed(RegionFailure),
}

pub struct PipelineOrchestrator {
    detector: Arc<dyn TextRegionDetector>,
    recognizer: Arc<dyn TextRecognizer>,
    region_semaphore: Arc<Semaphore>,
    metrics: Metrics,
    backend_type: String,
}

impl PipelineOrchestrator {
    /// Load both models as configured
    #[instrument(skip(config, metrics))]
    pub fn from_config(config: &Config, metrics: Metrics) -> anyhow::Result<Self> {
        info!("Initializing models (compute profile: {})...", config.compute_profile());

        let detector = RegionDetector::new(config, config.compute_profile())?;
        let recognizer = SequenceRecognizer::new(config, config.compute_profile())?;
        let backend_type = format!(
            "detector={}, recognizer={}",
            detector.device_type(),
            recognizer.device_type()
        );

        info!(
            "✓ Ready ({}, regions: {}, ONNX pool: {} sessions)",
            backend_type,
            config.max_concurrent_regions(),
            config.onnx_pool_size()
        );

        let mut orchestrator = Self::new(
            Arc::new(detector),
            Arc::new(recognizer),
            config.max_concurrent_regions(),
            metrics,
        );
        orchestrator.backend_type = backend_type;
        Ok(orchestrator)
    }

    pub fn new(
        detector: Arc<dyn TextRegionDetector>,
        recognizer: Arc<dyn TextRecognizer>,
        max_concurrent_regions: usize,
        metrics: Metrics,
    ) -> Self {
        Self {
            detector,
            recognizer,
            region_semaphore: Arc::new(Semaphore::new(max_concurrent_regions.max(1))),
            metrics,
            backend_type: "custom".to_string(),
        }
    }

    pub fn backend_type(&self) -> &str {
        &self.backend_type
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Translated entries in detector order
    pub async fn process(
        &self,
        image: RasterImage,
        gateway: Arc<dyn TranslationGateway>,
    ) -> PipelineResult<Vec<TranslatedEntry>> {
        Ok(self.process_detailed(image, gateway).await?.entries)
    }

    /// Like [`process`](Self::process), also reporting the regions that were dropped
    #[instrument(skip(self, image, gateway), fields(width = image.width(), height = image.height()))]
    pub async fn process_detailed(
        &self,
        image: RasterImage,
        gateway: Arc<dyn TranslationGateway>,
    ) -> PipelineResult<ProcessReport> {
        if !gateway.is_ready() {
            return Err(PipelineError::GatewayUnavailable(format!(
                "gateway for '{}' is not ready",
                gateway.target_language()
            )));
        }

        let capture_start = Instant::now();
        let (width, height) = image.dimensions();

        let regions = self.detect(image.clone()).await?;
        let mut report = ProcessReport {
            image_width: width,
            image_height: height,
            regions_detected: regions.len(),
            ..ProcessReport::default()
        };

        if regions.is_empty() {
            debug!("No text regions detected");
            self.metrics.record_capture(0, 0, capture_start.elapsed());
            return Ok(report);
        }

        // Dropping this future aborts the task set; the guard also stops decoding
        // already handed to the blocking pool, which abort cannot reach.
        let cancel = CancelFlag::new();
        let _cancel_guard = cancel.cancel_on_drop();

        let ctx = RegionContext {
            image,
            recognizer: Arc::clone(&self.recognizer),
            gateway,
            semaphore: Arc::clone(&self.region_semaphore),
            metrics: self.metrics.clone(),
            cancel,
        };

        let mut tasks = JoinSet::new();
        for (index, region) in regions.iter().copied().enumerate() {
            let ctx = ctx.clone();
            tasks.spawn(async move { (index, process_region(region, ctx).await) });
        }

        let mut outcomes: Vec<Option<RegionOutcome>> = Vec::with_capacity(regions.len());
        outcomes.resize_with(regions.len(), || None);

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => warn!("Region task ended abnormally: {}", e),
            }
        }

        for (index, outcome) in outcomes.into_iter().enumerate() {
            let region = regions[index];
            let outcome = outcome.unwrap_or_else(|| {
                RegionOutcome::Failed(RegionFailure::Task("task did not complete".to_string()))
            });

            match outcome {
                RegionOutcome::Entry(entry) => report.entries.push(entry),
                RegionOutcome::EmptyText => {
                    debug!(region_index = index, "No text recognized, region dropped");
                    self.metrics.record_region_dropped("empty_text");
                    report.dropped.push(RegionDiagnostic {
                        region_index: index,
                        region,
                        reason: DropReason::EmptyText,
                        message: "no text recognized".to_string(),
                    });
                }
                RegionOutcome::Failed(failure) => {
                    warn!(
                        region_index = index,
                        reason = failure.kind(),
                        "Region dropped: {}",
                        failure
                    );
                    self.metrics.record_region_dropped(failure.kind());
                    report.dropped.push(RegionDiagnostic {
                        region_index: index,
                        region,
                        reason: drop_reason(&failure),
                        message: failure.to_string(),
                    });
                }
            }
        }

        self.metrics
            .record_capture(report.regions_detected, report.entries.len(), capture_start.elapsed());
        info!(
            "✓ Capture processed in {:.2}ms: {} regions → {} entries ({} dropped)",
            capture_start.elapsed().as_secs_f64() * 1000.0,
            report.regions_detected,
            report.entries.len(),
            report.dropped.len()
        );

        Ok(report)
    }

    async fn detect(&self, image: RasterImage) -> PipelineResult<Vec<PixelRegion>> {
        let detector = Arc::clone(&self.detector);
        let start = Instant::now();

        let detected = tokio::task::spawn_blocking(move || detector.detect(&image))
            .await
            .map_err(|e| {
                self.metrics.record_capture_failed();
                PipelineError::TaskJoinFailed(e.to_string())
            })?;
        self.metrics.record_detection_duration(start.elapsed());

        detected.map_err(|e| {
            self.metrics.record_capture_failed();
            warn!("Detection failed: {}", e);
            PipelineError::DetectionFailed(e)
        })
    }
}

fn drop_reason(failure: &RegionFailure) -> DropReason {
    match failure {
        RegionFailure::Crop(_) => DropReason::Crop,
        RegionFailure::Recognition(_) => DropReason::Recognition,
        RegionFailure::Translation(_) => DropReason::Translation,
        RegionFailure::Task(_) => DropReason::Task,
    }
}

async fn process_region(region: PixelRegion, ctx: RegionContext) -> RegionOutcome {
    match run_region(region, ctx).await {
        Ok(Some(entry)) => RegionOutcome::Entry(entry),
        Ok(None) => RegionOutcome::EmptyText,
        Err(failure) => RegionOutcome::Failed(failure),
    }
}

async fn run_region(
    region: PixelRegion,
    ctx: RegionContext,
) -> Result<Option<TranslatedEntry>, RegionFailure> {
    // The cap guards the models; translation runs outside it
    let permit = ctx
        .semaphore
        .acquire_owned()
        .await
        .map_err(|e| RegionFailure::Task(e.to_string()))?;

    let (width, height) = ctx.image.dimensions();

    let crop = crop_image_async(ctx.image, region)
        .await
        .map_err(|e| RegionFailure::Task(e.to_string()))?
        .map_err(RegionFailure::Crop)?;

    let recognizer = ctx.recognizer;
    let cancel = ctx.cancel;
    let start = Instant::now();
    let text = tokio::task::spawn_blocking(move || recognizer.recognize_cancellable(&crop, &cancel))
        .await
        .map_err(|e| RegionFailure::Task(e.to_string()))?
        .map_err(RegionFailure::Recognition)?;
    ctx.metrics.record_recognition_duration(start.elapsed());
    drop(permit);

    let recognized = RecognizedText {
        text,
        source_region: region,
    };
    if recognized.is_blank() {
        return Ok(None);
    }

    let translated = ctx
        .gateway
        .translate(&recognized.text)
        .await
        .map_err(RegionFailure::Translation)?;

    Ok(Some(TranslatedEntry::new(
        translated,
        recognized.source_region.to_ui(width, height),
    )))
}
