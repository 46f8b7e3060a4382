use std::fmt;
use std::ops::Range;

use anyhow::Error;
use nalgebra::Vector2;
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::config::ExpressionThresholds;
use crate::modules::{cascade, face_mesh};
use crate::utils::coordinate::{BackendKind, CoordinateUnit, FaceLandmarks, FeatureGroup, LandmarkSet};
use crate::utils::image::face_to_ndarray;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expression {
    #[serde(rename = "neutral")]
    Neutral,
    #[serde(rename = "boca_abierta")]
    MouthOpen,
    #[serde(rename = "ojos_cerrados")]
    EyesClosed,
    #[serde(rename = "cabeza_inclinada")]
    HeadTilted,
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Expression::Neutral => "neutral",
            Expression::MouthOpen => "mouth open",
            Expression::EyesClosed => "eyes closed",
            Expression::HeadTilted => "head tilted",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EyeOpening {
    #[serde(rename = "izquierdo")]
    pub left: f32,
    #[serde(rename = "derecho")]
    pub right: f32,
    #[serde(rename = "promedio")]
    pub average: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSummary {
    pub boca_abierta_umbral: f32,
    pub ojos_cerrados_umbral: f32,
    pub cabeza_inclinada_umbral: f32,
}

impl From<ExpressionThresholds> for ThresholdSummary {
    fn from(t: ExpressionThresholds) -> Self {
        ThresholdSummary {
            boca_abierta_umbral: t.mouth_open,
            ojos_cerrados_umbral: t.eyes_closed,
            cabeza_inclinada_umbral: t.head_tilt_degrees,
        }
    }
}

/// Geometric expression measurements for one face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpressionMetrics {
    #[serde(rename = "expresion_detectada")]
    pub expression: Expression,
    #[serde(rename = "apertura_boca")]
    pub mouth_opening: f32,
    #[serde(rename = "apertura_ojos")]
    pub eye_opening: EyeOpening,
    /// Degrees, positive is clockwise in image coordinates.
    #[serde(rename = "inclinacion_cabeza")]
    pub head_tilt: f32,
    #[serde(rename = "unidad")]
    pub unit: CoordinateUnit,
    #[serde(rename = "metricas")]
    pub thresholds: ThresholdSummary,
}

/// Points whose connecting vector measures head tilt.
enum TiltAxis {
    /// Runs top to bottom; an upright face reads 90 degrees before correction.
    Vertical(usize, usize),
    /// Runs left to right; an upright face reads 0 degrees.
    Horizontal(usize, usize),
}

#[derive(Debug, Clone)]
pub struct FacialExpressionAnalyzer {
    backend: BackendKind,
    thresholds: ExpressionThresholds,
}

impl FacialExpressionAnalyzer {
    pub fn new(backend: BackendKind) -> Self {
        FacialExpressionAnalyzer { backend, thresholds: ExpressionThresholds::for_backend(backend) }
    }

    pub fn thresholds(&self) -> ExpressionThresholds {
        self.thresholds
    }

    fn coords(&self, face: &FaceLandmarks) -> Result<Array2<f32>, Error> {
        face_to_ndarray(face, self.thresholds.unit)
    }

    /// Vertical distance between the lips, `None` when the backend has no lip points.
    pub fn mouth_opening(&self, face: &FaceLandmarks) -> Option<f32> {
        let coords = self.coords(face).ok()?;
        match self.backend {
            BackendKind::FaceMesh => {
                vertical_gap(&coords, face_mesh::UPPER_LIP, face_mesh::LOWER_LIP)
            }
            BackendKind::Regression => {
                let top = group_mean_y(&coords, face.group_range(FeatureGroup::TopLip)?)?;
                let bottom = group_mean_y(&coords, face.group_range(FeatureGroup::BottomLip)?)?;
                Some((bottom - top).abs())
            }
            BackendKind::Cascade => None,
        }
    }

    /// Per-eye vertical opening; an eye that cannot be measured counts as 0.
    pub fn eye_opening(&self, face: &FaceLandmarks) -> Option<EyeOpening> {
        let coords = self.coords(face).ok()?;
        let (left, right) = match self.backend {
            BackendKind::FaceMesh => (
                vertical_gap(&coords, face_mesh::LEFT_EYE_TOP, face_mesh::LEFT_EYE_BOTTOM),
                vertical_gap(&coords, face_mesh::RIGHT_EYE_TOP, face_mesh::RIGHT_EYE_BOTTOM),
            ),
            BackendKind::Regression => (
                face.group_range(FeatureGroup::LeftEye).and_then(|r| group_span_y(&coords, r)),
                face.group_range(FeatureGroup::RightEye).and_then(|r| group_span_y(&coords, r)),
            ),
            BackendKind::Cascade => (None, None),
        };
        if left.is_none() && right.is_none() {
            return None;
        }
        let (left, right) = (left.unwrap_or(0.0), right.unwrap_or(0.0));
        Some(EyeOpening { left, right, average: (left + right) / 2.0 })
    }

    pub fn head_tilt(&self, face: &FaceLandmarks) -> Option<f32> {
        let coords = self.coords(face).ok()?;
        let axis = match self.backend {
            BackendKind::FaceMesh => TiltAxis::Vertical(face_mesh::FOREHEAD, face_mesh::NOSE_TIP),
            BackendKind::Cascade => TiltAxis::Horizontal(cascade::LEFT_EYE, cascade::RIGHT_EYE),
            BackendKind::Regression => {
                let bridge = face.group_range(FeatureGroup::NoseBridge)?;
                if bridge.len() < 2 {
                    return None;
                }
                TiltAxis::Vertical(bridge.start, bridge.end - 1)
            }
        };
        let (from, to, reference) = match axis {
            TiltAxis::Vertical(top, bottom) => (top, bottom, 90.0),
            TiltAxis::Horizontal(left, right) => (left, right, 0.0),
        };
        let v = point(&coords, to)? - point(&coords, from)?;
        if v.norm() == 0.0 {
            return Some(0.0);
        }
        let mut degrees = v.y.atan2(v.x).to_degrees() - reference;
        if degrees <= -180.0 {
            degrees += 360.0;
        }
        Some(degrees)
    }

    /// Fixed priority: mouth open, eyes closed, head tilted, neutral. A metric
    /// the backend cannot measure never triggers its class.
    pub fn classify(&self, mouth: Option<f32>, eyes: Option<f32>, tilt: Option<f32>) -> Expression {
        if mouth.is_some_and(|m| m > self.thresholds.mouth_open) {
            Expression::MouthOpen
        } else if eyes.is_some_and(|e| e < self.thresholds.eyes_closed) {
            Expression::EyesClosed
        } else if tilt.is_some_and(|t| t.abs() > self.thresholds.head_tilt_degrees) {
            Expression::HeadTilted
        } else {
            Expression::Neutral
        }
    }

    pub fn analyze_face(&self, face: &FaceLandmarks) -> ExpressionMetrics {
        let mouth = self.mouth_opening(face);
        let eyes = self.eye_opening(face);
        let tilt = self.head_tilt(face);
        let expression = self.classify(mouth, eyes.map(|e| e.average), tilt);
        debug!(backend = %self.backend, ?mouth, ?eyes, ?tilt, %expression, "expression analyzed");

        ExpressionMetrics {
            expression,
            mouth_opening: mouth.unwrap_or(0.0),
            eye_opening: eyes.unwrap_or_default(),
            head_tilt: tilt.unwrap_or(0.0),
            unit: self.thresholds.unit,
            thresholds: self.thresholds.into(),
        }
    }

    /// Analyzes the first face only; `None` when nothing was detected.
    pub fn analyze(&self, landmarks: &LandmarkSet) -> Option<ExpressionMetrics> {
        if landmarks.backend != self.backend {
            warn!(analyzer = %self.backend, landmarks = %landmarks.backend, "backend mismatch, skipping analysis");
            return None;
        }
        let face = landmarks.first_face().filter(|face| !face.is_empty())?;
        Some(self.analyze_face(face))
    }
}

fn point(coords: &Array2<f32>, idx: usize) -> Option<Vector2<f32>> {
    if idx >= coords.nrows() {
        return None;
    }
    Some(Vector2::new(coords[[idx, 0]], coords[[idx, 1]]))
}

fn vertical_gap(coords: &Array2<f32>, top: usize, bottom: usize) -> Option<f32> {
    Some((point(coords, bottom)?.y - point(coords, top)?.y).abs())
}

fn group_mean_y(coords: &Array2<f32>, range: Range<usize>) -> Option<f32> {
    if range.is_empty() || range.end > coords.nrows() {
        return None;
    }
    coords.slice(s![range, 1]).mean()
}

fn group_span_y(coords: &Array2<f32>, range: Range<usize>) -> Option<f32> {
    if range.len() < 2 || range.end > coords.nrows() {
        return None;
    }
    let ys = coords.slice(s![range, 1]);
    let max = ys.fold(f32::MIN, |acc, &y| acc.max(y));
    let min = ys.fold(f32::MAX, |acc, &y| acc.min(y));
    Some(max - min)
}
