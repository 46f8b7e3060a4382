use std::fs;
use std::path::Path;

use anyhow::{Context, Error};
use serde::{Deserialize, Serialize};

use crate::error::LandmarkError;
use crate::utils::coordinate::{BackendKind, CoordinateUnit};

/// Color in OpenCV channel order.
pub type Bgr = (u8, u8, u8);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FaceMeshConfig {
    pub static_image_mode: bool,
    pub max_num_faces: usize,
    pub min_detection_confidence: f32,
    pub min_tracking_confidence: f32,
}

impl FaceMeshConfig {
    pub fn new() -> Self {
        FaceMeshConfig {
            static_image_mode: true,
            max_num_faces: 5,
            min_detection_confidence: 0.5,
            min_tracking_confidence: 0.5,
        }
    }
}

impl Default for FaceMeshConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CascadeConfig {
    pub model_path: String,
    pub scale_factor: f64,
    pub min_neighbors: i32,
    pub min_face_size: i32,
    pub max_num_faces: usize,
}

impl CascadeConfig {
    pub fn new() -> Self {
        CascadeConfig {
            model_path: "haarcascade_frontalface_default.xml".to_string(),
            scale_factor: 1.1,
            min_neighbors: 5,
            min_face_size: 30,
            max_num_faces: 5,
        }
    }
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegressionConfig {
    /// Face locator the regression library runs first ("hog" or "cnn").
    pub model: String,
    pub upsample: u32,
    pub max_num_faces: usize,
    pub min_confidence: f32,
}

impl RegressionConfig {
    pub fn new() -> Self {
        RegressionConfig {
            model: "hog".to_string(),
            upsample: 1,
            max_num_faces: 5,
            min_confidence: 0.5,
        }
    }
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Explicit backend selection together with that backend's parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum DetectorConfig {
    FaceMesh(FaceMeshConfig),
    Cascade(CascadeConfig),
    Regression(RegressionConfig),
}

impl DetectorConfig {
    pub fn backend(&self) -> BackendKind {
        match self {
            DetectorConfig::FaceMesh(_) => BackendKind::FaceMesh,
            DetectorConfig::Cascade(_) => BackendKind::Cascade,
            DetectorConfig::Regression(_) => BackendKind::Regression,
        }
    }

    fn validate(&self) -> Result<(), LandmarkError> {
        let (max_faces, confidences) = match self {
            DetectorConfig::FaceMesh(c) => (
                c.max_num_faces,
                vec![c.min_detection_confidence, c.min_tracking_confidence],
            ),
            DetectorConfig::Cascade(c) => {
                if c.scale_factor <= 1.0 {
                    return Err(LandmarkError::Config(format!(
                        "cascade scale_factor must be greater than 1, got {}",
                        c.scale_factor
                    )));
                }
                if c.min_neighbors < 0 || c.min_face_size < 0 {
                    return Err(LandmarkError::Config(
                        "cascade min_neighbors and min_face_size must not be negative".to_string(),
                    ));
                }
                (c.max_num_faces, vec![])
            }
            DetectorConfig::Regression(c) => {
                if c.model != "hog" && c.model != "cnn" {
                    return Err(LandmarkError::Config(format!("unknown regression model {:?}", c.model)));
                }
                (c.max_num_faces, vec![c.min_confidence])
            }
        };
        if max_faces == 0 {
            return Err(LandmarkError::Config("max_num_faces must be at least 1".to_string()));
        }
        if let Some(c) = confidences.iter().find(|c| !(0.0..=1.0).contains(*c)) {
            return Err(LandmarkError::Config(format!("confidence {} outside [0, 1]", c)));
        }
        Ok(())
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig::FaceMesh(FaceMeshConfig::new())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DrawConfig {
    pub landmark_color: Bgr,
    pub landmark_radius: i32,
    /// Negative draws filled markers.
    pub landmark_thickness: i32,
    pub mesh_color: Bgr,
    pub mesh_thickness: i32,
    pub contour_color: Bgr,
    pub contour_thickness: i32,
    pub heatmap_radius: i32,
    /// Gaussian kernel side, must be odd.
    pub heatmap_kernel: i32,
    /// Weight of the original image in the heatmap blend; the heat layer gets the rest.
    pub heatmap_image_weight: f64,
}

impl DrawConfig {
    pub fn new() -> Self {
        DrawConfig {
            landmark_color: (0, 255, 0),
            landmark_radius: 2,
            landmark_thickness: -1,
            mesh_color: (192, 192, 192),
            mesh_thickness: 1,
            contour_color: (255, 255, 255),
            contour_thickness: 1,
            heatmap_radius: 10,
            heatmap_kernel: 21,
            heatmap_image_weight: 0.7,
        }
    }

    fn validate(&self) -> Result<(), LandmarkError> {
        if self.landmark_radius < 0 || self.heatmap_radius < 0 {
            return Err(LandmarkError::Config("radii must not be negative".to_string()));
        }
        if self.heatmap_kernel <= 0 || self.heatmap_kernel % 2 == 0 {
            return Err(LandmarkError::Config(format!(
                "heatmap_kernel must be a positive odd number, got {}",
                self.heatmap_kernel
            )));
        }
        if !(0.0..=1.0).contains(&self.heatmap_image_weight) {
            return Err(LandmarkError::Config(format!(
                "heatmap_image_weight {} outside [0, 1]",
                self.heatmap_image_weight
            )));
        }
        Ok(())
    }
}

impl Default for DrawConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed classification thresholds, expressed in the unit the backend's
/// metrics are measured in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ExpressionThresholds {
    pub unit: CoordinateUnit,
    pub mouth_open: f32,
    pub eyes_closed: f32,
    pub head_tilt_degrees: f32,
}

impl ExpressionThresholds {
    pub const PIXELS: ExpressionThresholds = ExpressionThresholds {
        unit: CoordinateUnit::Pixel,
        mouth_open: 20.0,
        eyes_closed: 5.0,
        head_tilt_degrees: 15.0,
    };

    pub const NORMALIZED: ExpressionThresholds = ExpressionThresholds {
        unit: CoordinateUnit::Normalized,
        mouth_open: 0.05,
        eyes_closed: 0.015,
        head_tilt_degrees: 15.0,
    };

    pub fn for_backend(backend: BackendKind) -> Self {
        match backend {
            BackendKind::FaceMesh | BackendKind::Cascade => Self::PIXELS,
            BackendKind::Regression => Self::NORMALIZED,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub detector: DetectorConfig,
    pub draw: DrawConfig,
}

impl AppConfig {
    pub fn new(detector: DetectorConfig) -> Self {
        AppConfig { detector, draw: DrawConfig::new() }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, Error> {
        let config: AppConfig = serde_json::from_str(raw).context("failed to parse app config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), LandmarkError> {
        self.detector.validate()?;
        self.draw.validate()
    }

    pub fn thresholds(&self) -> ExpressionThresholds {
        ExpressionThresholds::for_backend(self.detector.backend())
    }
}
