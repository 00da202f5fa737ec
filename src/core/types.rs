// Shared data types for the recognition and translation pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::errors::ConfigError;
use crate::core::region::{PixelRegion, UiRegion};

/// Preferred execution backend for model inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComputeProfile {
    /// Hardware accelerators only; construction fails if none can be registered
    AcceleratorOnly,
    /// Accelerators first, CPU fallback
    #[default]
    Mixed,
    /// General-purpose CPU only
    CpuOnly,
}

impl FromStr for ComputeProfile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "accelerator" | "accelerator_only" | "gpu" => Ok(Self::AcceleratorOnly),
            "mixed" | "auto" | "all" => Ok(Self::Mixed),
            "cpu" | "cpu_only" => Ok(Self::CpuOnly),
            other => Err(ConfigError::UnknownComputeProfile(other.to_string())),
        }
    }
}

impl fmt::Display for ComputeProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AcceleratorOnly => "accelerator",
            Self::Mixed => "mixed",
            Self::CpuOnly => "cpu",
        };
        f.write_str(name)
    }
}

/// Pixel intensity normalization applied before recognition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMode {
    /// `v / 255`
    ZeroToOne,
    /// `v / 127.5 - 1`
    #[default]
    MinusOneToOne,
}

impl NormalizationMode {
    #[inline]
    pub fn apply(self, value: u8) -> f32 {
        match self {
            Self::ZeroToOne => value as f32 / 255.0,
            Self::MinusOneToOne => value as f32 / 127.5 - 1.0,
        }
    }
}

impl FromStr for NormalizationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "zero_to_one" | "0_1" | "unit" => Ok(Self::ZeroToOne),
            "minus_one_to_one" | "-1_1" | "symmetric" => Ok(Self::MinusOneToOne),
            other => Err(ConfigError::UnknownNormalization(other.to_string())),
        }
    }
}

/// Text decoded from one region. Blank text means "nothing recognized".
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedText {
    pub text: String,
    pub source_region: PixelRegion,
}

impl RecognizedText {
    /// True for empty and whitespace-only text; such regions are not translated
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Terminal artifact handed to the overlay renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslatedEntry {
    translated_text: String,
    bounding_box: BoundingBox,
}

/// Serialized form of a [`UiRegion`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl TranslatedEntry {
    pub fn new(translated_text: String, bounding_box: UiRegion) -> Self {
        let r = bounding_box.0;
        Self {
            translated_text,
            bounding_box: BoundingBox {
                x: r.x,
                y: r.y,
                width: r.width,
                height: r.height,
            },
        }
    }

    pub fn translated_text(&self) -> &str {
        &self.translated_text
    }

    pub fn bounding_box(&self) -> UiRegion {
        let b = self.bounding_box;
        UiRegion::new(b.x, b.y, b.width, b.height)
    }
}

/// Why a detected region produced no entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    EmptyText,
    Crop,
    Recognition,
    Translation,
    Task,
}

/// Diagnostic for a dropped region
#[derive(Debug, Clone, Serialize)]
pub struct RegionDiagnostic {
    pub region_index: usize,
    pub region: PixelRegion,
    pub reason: DropReason,
    pub message: String,
}

/// Full outcome of one capture: entries in detector order plus drops
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessReport {
    pub image_width: u32,
    pub image_height: u32,
    pub regions_detected: usize,
    pub entries: Vec<TranslatedEntry>,
    pub dropped: Vec<RegionDiagnostic>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_profile_parsing() {
        assert_eq!("CPU".parse::<ComputeProfile>().unwrap(), ComputeProfile::CpuOnly);
        assert_eq!("auto".parse::<ComputeProfile>().unwrap(), ComputeProfile::Mixed);
        assert_eq!(
            "accelerator".parse::<ComputeProfile>().unwrap(),
            ComputeProfile::AcceleratorOnly
        );
        assert!("tpu-cluster".parse::<ComputeProfile>().is_err());
    }

    #[test]
    fn whitespace_only_text_is_blank() {
        let region = PixelRegion::new(0.0, 0.0, 10.0, 10.0);
        let text = |t: &str| RecognizedText {
            text: t.to_string(),
            source_region: region,
        };
        assert!(text("").is_blank());
        assert!(text(" \t\n").is_blank());
        assert!(!text(" ab ").is_blank());
    }

    #[test]
    fn normalization_ranges() {
        assert_eq!(NormalizationMode::ZeroToOne.apply(0), 0.0);
        assert_eq!(NormalizationMode::ZeroToOne.apply(255), 1.0);
        assert_eq!(NormalizationMode::MinusOneToOne.apply(0), -1.0);
        assert_eq!(NormalizationMode::MinusOneToOne.apply(255), 1.0);
    }

    #[test]
    fn translated_entry_serializes_camel_case() {
        let entry = TranslatedEntry::new("HELLO".to_string(), UiRegion::new(0.5, 0.25, 0.1, 0.2));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["translatedText"], "HELLO");
        assert_eq!(json["boundingBox"]["x"], 0.5);
        assert_eq!(json["boundingBox"]["height"], 0.2);
    }
}
