//! Run the sequence recognizer alone on one cropped text image
//! Run with: cargo run --release --bin recognize_crop -- <image_path> [zero_to_one|minus_one_to_one]

use anyhow::{Context, Result};
use page_overlay::{core::Config, NormalizationMode, RasterImage, SequenceRecognizer};
use std::path::Path;
use tracing::info;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("page_overlay::services::recognition=debug")
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let sample_path = args.get(1).cloned().unwrap_or_else(|| "test_sample.png".to_string());

    if !Path::new(&sample_path).exists() {
        eprintln!("Image not found: {}", sample_path);
        std::process::exit(1);
    }

    let config = Config::new().context("Failed to load configuration")?;
    let mode: NormalizationMode = match args.get(2) {
        Some(raw) => raw.parse()?,
        None => config.recognition.normalization,
    };

    info!("Loading image: {}", sample_path);
    let bytes = std::fs::read(&sample_path)?;
    let image = RasterImage::decode(&bytes)?;
    info!("Image dimensions: {}x{}", image.width(), image.height());

    info!(
        "Initializing recognizer from {} (vocab {})",
        config.models.recognizer_model_path, config.models.vocab_path
    );
    let recognizer = SequenceRecognizer::new(&config, config.compute_profile())?;

    let start = std::time::Instant::now();
    let text = recognizer.recognize_with(&image, mode)?;

    println!("\n=== Results ===");
    println!("Backend: {}", recognizer.device_type());
    println!("Normalization: {:?}", mode);
    println!("Elapsed: {:.2}ms", start.elapsed().as_secs_f64() * 1000.0);
    println!("Text:");
    if text.is_empty() {
        println!("  (empty)");
    } else {
        println!("  {}", text);
    }

    Ok(())
}
