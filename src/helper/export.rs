use std::fmt::Write as _;

use anyhow::Error;
use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::helper::expression::ExpressionMetrics;
use crate::utils::coordinate::{LandmarkRecord, LandmarkSet};

pub const CSV_HEADER: &str = "rostro_id,landmark_id,x,y,z,x_normalizado,y_normalizado,visibilidad";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDimensions {
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkMetadata {
    pub export_timestamp: String,
    pub total_landmarks: usize,
    pub image_dimensions: ImageDimensions,
    pub landmark_format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkDocument {
    pub metadata: LandmarkMetadata,
    pub landmarks: Vec<LandmarkRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionMetadata {
    pub export_timestamp: String,
    pub analysis_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionDocument {
    pub metadata: ExpressionMetadata,
    pub expressions: ExpressionMetrics,
}

/// Local time, ISO-8601 with microseconds.
fn export_timestamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// export_landmarks_json serializes every point of every face with image metadata.
///
/// # Arguments
/// * `landmarks` - &LandmarkSet
///
/// # Returns
/// * `Result<String, Error>` - pretty-printed JSON
pub fn export_landmarks_json(landmarks: &LandmarkSet) -> Result<String, Error> {
    let document = LandmarkDocument {
        metadata: LandmarkMetadata {
            export_timestamp: export_timestamp(),
            total_landmarks: landmarks.total_points(),
            image_dimensions: ImageDimensions { width: landmarks.width, height: landmarks.height },
            landmark_format: landmarks.backend.landmark_format().to_string(),
        },
        landmarks: landmarks.records(),
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

/// export_landmarks_csv writes one row per point under [`CSV_HEADER`].
///
/// # Arguments
/// * `landmarks` - &LandmarkSet
///
/// # Returns
/// * `String`
pub fn export_landmarks_csv(landmarks: &LandmarkSet) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for r in landmarks.records() {
        // writing into a String cannot fail
        let _ = writeln!(
            out,
            "{},{},{},{},{:.6},{:.6},{:.6},{:.3}",
            r.rostro_id, r.landmark_id, r.x, r.y, r.z, r.x_normalizado, r.y_normalizado, r.visibilidad
        );
    }
    out
}

pub fn export_landmarks(landmarks: &LandmarkSet, format: ExportFormat) -> Result<String, Error> {
    match format {
        ExportFormat::Json => export_landmarks_json(landmarks),
        ExportFormat::Csv => Ok(export_landmarks_csv(landmarks)),
    }
}

/// export_expressions_json wraps the first face's metrics with export metadata.
///
/// # Arguments
/// * `metrics` - &ExpressionMetrics
///
/// # Returns
/// * `Result<String, Error>` - pretty-printed JSON
pub fn export_expressions_json(metrics: &ExpressionMetrics) -> Result<String, Error> {
    let document = ExpressionDocument {
        metadata: ExpressionMetadata {
            export_timestamp: export_timestamp(),
            analysis_type: "facial_expressions".to_string(),
        },
        expressions: *metrics,
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

/// `<prefix>_YYYYmmdd_HHMMSS.<ext>` stamped with the local time.
pub fn suggested_filename(prefix: &str, ext: &str) -> String {
    format!("{}_{}.{}", prefix, Local::now().format("%Y%m%d_%H%M%S"), ext)
}
