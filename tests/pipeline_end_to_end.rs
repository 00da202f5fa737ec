use async_trait::async_trait;
use ndarray::Array4;
use page_overlay::core::config::RecognitionConfig;
use page_overlay::core::errors::{DetectionResult, RecognitionResult, TranslationResult};
use page_overlay::services::Tensor;
use page_overlay::{
    DetectionError, DropReason, GenerationModel, InferenceError, Metrics, PipelineError,
    PipelineOrchestrator, PixelRegion, RasterImage, RecognitionError, SequenceRecognizer,
    TextRecognizer, TextRegionDetector, TranslationError, TranslationGateway, UiRegion,
    Vocabulary,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct FixedDetector {
    regions: Vec<PixelRegion>,
    fail: bool,
    calls: AtomicUsize,
}

impl FixedDetector {
    fn new(regions: Vec<PixelRegion>) -> Self {
        Self {
            regions,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            regions: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }
}

impl TextRegionDetector for FixedDetector {
    fn detect(&self, _image: &RasterImage) -> DetectionResult<Vec<PixelRegion>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(DetectionError::Prediction("model crashed".to_string()));
        }
        Ok(self.regions.clone())
    }
}

/// Recognizes text by the crop's dimensions
struct SizeKeyedRecognizer {
    texts: HashMap<(u32, u32), &'static str>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl TextRecognizer for SizeKeyedRecognizer {
    fn recognize(&self, crop: &RasterImage) -> RecognitionResult<String> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.texts.get(&crop.dimensions()) {
            Some(text) => Ok(text.to_string()),
            None => Err(RecognitionError::Prediction {
                step: 0,
                message: format!("no script for {:?}", crop.dimensions()),
            }),
        }
    }
}

struct DictionaryGateway {
    ready: AtomicBool,
    dictionary: HashMap<&'static str, &'static str>,
    failing: Option<&'static str>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl DictionaryGateway {
    fn new() -> Self {
        Self {
            ready: AtomicBool::new(true),
            dictionary: HashMap::from([
                ("こんにちは", "HELLO"),
                ("ありがとう", "THANK YOU"),
                ("さようなら", "GOODBYE"),
            ]),
            failing: None,
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TranslationGateway for DictionaryGateway {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn target_language(&self) -> &str {
        "en"
    }

    async fn translate(&self, text: &str) -> TranslationResult<String> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing == Some(text) {
            return Err(TranslationError::ServiceError {
                status: 502,
                body: "upstream unavailable".to_string(),
            });
        }
        self.dictionary
            .get(text)
            .map(|t| t.to_string())
            .ok_or_else(|| TranslationError::Other(format!("unknown text {}", text)))
    }
}

fn page() -> RasterImage {
    RasterImage::filled(400, 300, [255, 255, 255, 255]).unwrap()
}

fn greeting_regions() -> Vec<PixelRegion> {
    vec![
        PixelRegion::new(10.0, 20.0, 100.0, 30.0),
        PixelRegion::new(50.0, 200.0, 120.0, 40.0),
    ]
}

fn greeting_recognizer() -> SizeKeyedRecognizer {
    SizeKeyedRecognizer {
        texts: HashMap::from([
            ((100, 30), "こんにちは"),
            ((120, 40), "ありがとう"),
            ((60, 20), "さようなら"),
            ((20, 20), "   "),
        ]),
        delay: Duration::ZERO,
        in_flight: AtomicUsize::new(0),
        max_in_flight: AtomicUsize::new(0),
    }
}

const TOKENS: [&str; 6] = ["[PAD]", "[UNK]", "[BOS]", "[EOS]", "ab", "##cd"];

/// Generation model that never emits EOS and takes `step` per call
struct EndlessModel {
    step: Duration,
    calls: Arc<AtomicUsize>,
}

impl GenerationModel for EndlessModel {
    fn infer(&self, _pixels: &Array4<f32>, token_ids: &[i64]) -> Result<Tensor, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.step);

        let (n, v) = (token_ids.len(), TOKENS.len());
        let mut data = vec![0.0; n * v];
        data[(n - 1) * v + 4] = 1.0;
        Ok(Tensor::new(vec![1, n, v], data))
    }
}

fn orchestrator(detector: FixedDetector, max_concurrent: usize) -> PipelineOrchestrator {
    PipelineOrchestrator::new(
        Arc::new(detector),
        Arc::new(greeting_recognizer()),
        max_concurrent,
        Metrics::new(),
    )
}

fn assert_box(actual: UiRegion, expected: [f64; 4]) {
    let r = actual.0;
    let got = [r.x, r.y, r.width, r.height];
    for (g, e) in got.iter().zip(expected.iter()) {
        assert!((g - e).abs() < 1e-3, "expected {:?}, got {:?}", expected, got);
    }
}

#[tokio::test]
async fn translates_and_normalizes_two_regions() {
    let pipeline = orchestrator(FixedDetector::new(greeting_regions()), 4);

    let entries = pipeline
        .process(page(), Arc::new(DictionaryGateway::new()))
        .await
        .unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].translated_text(), "HELLO");
    assert_box(entries[0].bounding_box(), [0.025, 0.0667, 0.25, 0.1]);
    assert_eq!(entries[1].translated_text(), "THANK YOU");
    assert_box(entries[1].bounding_box(), [0.125, 0.667, 0.3, 0.133]);
}

#[tokio::test]
async fn failed_translation_drops_only_that_region() {
    let mut regions = greeting_regions();
    regions.push(PixelRegion::new(300.0, 100.0, 60.0, 20.0));
    let pipeline = orchestrator(FixedDetector::new(regions), 4);

    let mut gateway = DictionaryGateway::new();
    gateway.failing = Some("ありがとう");

    let report = pipeline
        .process_detailed(page(), Arc::new(gateway))
        .await
        .unwrap();

    assert_eq!(report.regions_detected, 3);
    let texts: Vec<&str> = report.entries.iter().map(|e| e.translated_text()).collect();
    assert_eq!(texts, vec!["HELLO", "GOODBYE"]);

    assert_eq!(report.dropped.len(), 1);
    assert_eq!(report.dropped[0].region_index, 1);
    assert_eq!(report.dropped[0].reason, DropReason::Translation);

    let snapshot = pipeline.metrics().snapshot();
    assert_eq!(snapshot.regions_dropped.get("translation"), Some(&1));
    assert_eq!(snapshot.entries_produced, 2);
}

#[tokio::test]
async fn no_regions_means_no_entries() {
    let pipeline = orchestrator(FixedDetector::new(Vec::new()), 4);
    let entries = pipeline
        .process(page(), Arc::new(DictionaryGateway::new()))
        .await
        .unwrap();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn detection_failure_fails_the_call() {
    let pipeline = orchestrator(FixedDetector::failing(), 4);
    let result = pipeline
        .process(page(), Arc::new(DictionaryGateway::new()))
        .await;
    assert!(matches!(result, Err(PipelineError::DetectionFailed(_))));
    assert_eq!(pipeline.metrics().snapshot().captures_failed, 1);
}

#[tokio::test]
async fn unready_gateway_is_refused_before_detection() {
    let detector = Arc::new(FixedDetector::new(greeting_regions()));
    let pipeline = PipelineOrchestrator::new(
        detector.clone(),
        Arc::new(greeting_recognizer()),
        4,
        Metrics::new(),
    );

    let gateway = DictionaryGateway::new();
    gateway.ready.store(false, Ordering::SeqCst);

    let result = pipeline.process(page(), Arc::new(gateway)).await;
    assert!(matches!(result, Err(PipelineError::GatewayUnavailable(_))));
    assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn crop_outside_the_image_is_skipped() {
    let mut regions = greeting_regions();
    regions.insert(0, PixelRegion::new(500.0, 500.0, 10.0, 10.0));
    let pipeline = orchestrator(FixedDetector::new(regions), 4);

    let report = pipeline
        .process_detailed(page(), Arc::new(DictionaryGateway::new()))
        .await
        .unwrap();

    assert_eq!(report.entries.len(), 2);
    assert_eq!(report.dropped.len(), 1);
    assert_eq!(report.dropped[0].region_index, 0);
    assert_eq!(report.dropped[0].reason, DropReason::Crop);
}

#[tokio::test]
async fn blank_text_and_recognition_errors_are_dropped() {
    let mut regions = greeting_regions();
    // 20x20 recognizes as whitespace, 33x33 has no script and errors
    regions.push(PixelRegion::new(0.0, 0.0, 20.0, 20.0));
    regions.push(PixelRegion::new(200.0, 0.0, 33.0, 33.0));
    let pipeline = orchestrator(FixedDetector::new(regions), 4);

    let report = pipeline
        .process_detailed(page(), Arc::new(DictionaryGateway::new()))
        .await
        .unwrap();

    assert_eq!(report.entries.len(), 2);
    let reasons: Vec<DropReason> = report.dropped.iter().map(|d| d.reason.clone()).collect();
    assert_eq!(reasons, vec![DropReason::EmptyText, DropReason::Recognition]);
}

fn four_regions() -> Vec<PixelRegion> {
    vec![
        PixelRegion::new(10.0, 20.0, 100.0, 30.0),
        PixelRegion::new(50.0, 200.0, 120.0, 40.0),
        PixelRegion::new(150.0, 20.0, 100.0, 30.0),
        PixelRegion::new(250.0, 200.0, 120.0, 40.0),
    ]
}

#[tokio::test]
async fn recognition_respects_the_concurrency_cap() {
    let mut recognizer = greeting_recognizer();
    recognizer.delay = Duration::from_millis(10);
    let recognizer = Arc::new(recognizer);
    let pipeline = PipelineOrchestrator::new(
        Arc::new(FixedDetector::new(four_regions())),
        recognizer.clone(),
        1,
        Metrics::new(),
    );

    let entries = pipeline
        .process(page(), Arc::new(DictionaryGateway::new()))
        .await
        .unwrap();

    assert_eq!(entries.len(), 4);
    assert_eq!(recognizer.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn slow_translation_does_not_hold_the_recognition_slot() {
    let mut recognizer = greeting_recognizer();
    recognizer.delay = Duration::from_millis(5);
    let recognizer = Arc::new(recognizer);
    let pipeline = PipelineOrchestrator::new(
        Arc::new(FixedDetector::new(four_regions())),
        recognizer.clone(),
        1,
        Metrics::new(),
    );

    let mut gateway = DictionaryGateway::new();
    gateway.delay = Duration::from_millis(200);
    let gateway = Arc::new(gateway);

    let started = std::time::Instant::now();
    let entries = pipeline.process(page(), gateway.clone()).await.unwrap();

    assert_eq!(entries.len(), 4);
    assert_eq!(recognizer.max_in_flight.load(Ordering::SeqCst), 1);
    // Recognitions finish well inside the first translation, so translations overlap
    assert!(gateway.max_in_flight.load(Ordering::SeqCst) > 1);
    assert!(started.elapsed() < Duration::from_millis(4 * 200));
}

#[tokio::test]
async fn dropping_the_capture_stops_decoding() {
    let calls = Arc::new(AtomicUsize::new(0));
    let recognizer = SequenceRecognizer::with_model(
        Box::new(EndlessModel {
            step: Duration::from_millis(20),
            calls: calls.clone(),
        }),
        Vocabulary::from_tokens(TOKENS).unwrap(),
        RecognitionConfig {
            input_size: 16,
            max_length: 50,
            ..RecognitionConfig::default()
        },
    );
    let pipeline = PipelineOrchestrator::new(
        Arc::new(FixedDetector::new(vec![PixelRegion::new(10.0, 20.0, 100.0, 30.0)])),
        Arc::new(recognizer),
        4,
        Metrics::new(),
    );

    let result = tokio::time::timeout(
        Duration::from_millis(100),
        pipeline.process(page(), Arc::new(DictionaryGateway::new())),
    )
    .await;
    assert!(result.is_err(), "decoding 50 steps should outlast the timeout");

    let at_cancel = calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(300)).await;
    let later = calls.load(Ordering::SeqCst);

    // At most the step already running when the caller gave up
    assert!(later <= at_cancel + 1, "calls kept rising: {} -> {}", at_cancel, later);
    assert!(later < 50);
}
