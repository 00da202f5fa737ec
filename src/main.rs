// HTTP entry point: POST a screenshot, get back positioned translations

use page_overlay::{
    core::Config,
    services::translation::{CachedGateway, HttpTranslationGateway, TranslationGateway},
    utils::Metrics,
    PipelineError, PipelineOrchestrator, RasterImage,
};

use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<PipelineOrchestrator>,
    http_gateway: Arc<HttpTranslationGateway>,
    gateway: Arc<dyn TranslationGateway>,
    metrics: Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(Config::new().context("Failed to load configuration")?);

    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(format!(
        "page_overlay={},ort=off",
        match config.log_level() {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== PAGE OVERLAY ===");
    info!(
        "Config: profile={} target={} regions={} pool={}",
        config.compute_profile(),
        config.target_language(),
        config.max_concurrent_regions(),
        config.onnx_pool_size()
    );

    let metrics = Metrics::new();

    // Session construction is blocking and can take a while on accelerators
    let orchestrator = {
        let config = Arc::clone(&config);
        let metrics = metrics.clone();
        tokio::task::spawn_blocking(move || PipelineOrchestrator::from_config(&config, metrics))
            .await
            .context("Model initialization task failed")??
    };

    let http_gateway = Arc::new(
        HttpTranslationGateway::new(&config.translation)
            .context("Failed to create translation client")?
            .with_metrics(metrics.clone()),
    );
    let gateway = CachedGateway::wrap(
        http_gateway.clone(),
        config.translation.cache_entries,
        Some(metrics.clone()),
    );

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        http_gateway,
        gateway,
        metrics,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/stats", get(stats_endpoint))
        .route("/process", post(process_capture))
        .with_state(state)
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024))
        .layer(cors);

    let addr = format!("{}:{}", config.server_host(), config.server_port());
    info!("{}", "=".repeat(70));
    info!("Server starting on http://{}", addr);
    info!("{}", "-".repeat(70));
    info!("Endpoints:");
    info!("  GET  /         - Root endpoint");
    info!("  GET  /health   - Health check and gateway readiness");
    info!("  GET  /metrics  - Prometheus metrics");
    info!("  GET  /stats    - Detailed statistics");
    info!("  POST /process  - Translate one capture (multipart field \"image\")");
    info!("{}", "=".repeat(70));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn root() -> &'static str {
    "Page overlay translation service"
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.metrics.record_endpoint_request("/health");
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.orchestrator.backend_type(),
        "translation_ready": state.gateway.is_ready(),
        "target_language": state.gateway.target_language(),
    }))
}

/// Prometheus metrics endpoint
async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.record_endpoint_request("/metrics");
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Detailed statistics endpoint (JSON)
async fn stats_endpoint(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.metrics.record_endpoint_request("/stats");
    Json(serde_json::json!({
        "metrics": state.metrics.snapshot(),
        "circuit_breaker": state.http_gateway.breaker().stats(),
    }))
}

#[derive(Debug, Default, Deserialize)]
struct ProcessParams {
    /// Include dropped-region diagnostics in the response
    #[serde(default)]
    detailed: bool,
}

/// Process one capture
///
/// # Request Format:
/// - multipart/form-data
/// - Field "image": PNG/JPEG/WebP screenshot
/// - Query "detailed=true" (optional): return the full report
///
/// # Response:
/// - JSON array of `{translatedText, boundingBox}` in detector order
async fn process_capture(
    State(state): State<AppState>,
    Query(params): Query<ProcessParams>,
    mut multipart: Multipart,
) -> Result<Response, (StatusCode, String)> {
    state.metrics.record_endpoint_request("/process");
    let start_time = std::time::Instant::now();

    let mut image = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e)))?
    {
        if field.name() != Some("image") {
            continue;
        }

        let data = field
            .bytes()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("Read error: {}", e)))?;

        let decoded = tokio::task::spawn_blocking(move || RasterImage::decode(&data))
            .await
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Decode task failed: {}", e)))?
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid image: {}", e)))?;
        image = Some(decoded);
    }

    let image = image.ok_or_else(|| (StatusCode::BAD_REQUEST, "No image provided".to_string()))?;
    info!("Received capture {}x{}", image.width(), image.height());

    let report = state
        .orchestrator
        .process_detailed(image, Arc::clone(&state.gateway))
        .await
        .map_err(|e| {
            error!("Capture processing failed: {}", e);
            let status = match e {
                PipelineError::GatewayUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, format!("Processing failed: {}", e))
        })?;

    info!(
        "Request completed in {:.2}s: {} entries",
        start_time.elapsed().as_secs_f64(),
        report.entries.len()
    );

    if params.detailed {
        Ok(Json(report).into_response())
    } else {
        Ok(Json(report.entries).into_response())
    }
}
