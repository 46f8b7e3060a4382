//! Landmark-regression backend: points grouped by named facial feature,
//! reported in pixels.

use anyhow::Error;
use opencv::core::Mat;
use tracing::debug;

use crate::config::config::{DrawConfig, RegressionConfig};
use crate::error::LandmarkError;
use crate::helper::normalize::normalize_landmarks;
use crate::modules::detector::{finish_detection, Detection, LandmarkDetector};
use crate::utils::coordinate::{BackendKind, FaceLandmarks, FeatureGroup, RawFace, RawPoint};
use crate::utils::image::{bgr_to_rgb, ensure_bgr, image_size, polyline_edges};

/// Group order and nominal size of the 72-point layout.
pub const GROUP_LAYOUT: [(FeatureGroup, usize); 9] = [
    (FeatureGroup::Chin, 17),
    (FeatureGroup::LeftEyebrow, 5),
    (FeatureGroup::RightEyebrow, 5),
    (FeatureGroup::NoseBridge, 4),
    (FeatureGroup::NoseTip, 5),
    (FeatureGroup::LeftEye, 6),
    (FeatureGroup::RightEye, 6),
    (FeatureGroup::TopLip, 12),
    (FeatureGroup::BottomLip, 12),
];

/// One face as returned by the regression library.
#[derive(Debug, Clone, PartialEq)]
pub struct RegressedFace {
    pub groups: Vec<(FeatureGroup, Vec<(f32, f32)>)>,
    /// Not every library scores its faces.
    pub confidence: Option<f32>,
}

/// Opaque landmark-regression library. Receives RGB images.
pub trait LandmarkRegressor {
    fn face_landmarks(&mut self, rgb: &Mat, config: &RegressionConfig) -> Result<Vec<RegressedFace>, Error>;

    fn close(&mut self);
}

pub struct RegressionDetector {
    model: Option<Box<dyn LandmarkRegressor>>,
    config: RegressionConfig,
    draw: DrawConfig,
}

impl RegressionDetector {
    /// new wraps a landmark-regression library in a detector.
    ///
    /// # Arguments
    /// * `model` - any LandmarkRegressor
    /// * `config` - RegressionConfig
    /// * `draw` - marker style for the annotated preview
    ///
    /// # Returns
    /// * `Self`
    pub fn new(model: Box<dyn LandmarkRegressor>, config: RegressionConfig, draw: DrawConfig) -> Self {
        RegressionDetector { model: Some(model), config, draw }
    }
}

impl LandmarkDetector for RegressionDetector {
    fn backend(&self) -> BackendKind {
        BackendKind::Regression
    }

    /// detect regresses grouped landmarks on the RGB image. Faces scored below
    /// `min_confidence` are dropped; unscored faces are kept.
    ///
    /// # Arguments
    /// * `img` - BGR OpenCV matrix
    ///
    /// # Returns
    /// * `Result<Detection, Error>`
    fn detect(&mut self, img: &Mat) -> Result<Detection, Error> {
        ensure_bgr(img)?;
        let model = self.model.as_mut().ok_or(LandmarkError::Released(BackendKind::Regression))?;

        let rgb = bgr_to_rgb(img)?;
        let found = model.face_landmarks(&rgb, &self.config)?;

        let faces: Vec<RawFace> = found
            .into_iter()
            .filter(|face| match face.confidence {
                Some(score) if score < self.config.min_confidence => {
                    debug!(score, "dropping low-confidence regression face");
                    false
                }
                _ => true,
            })
            .take(self.config.max_num_faces)
            .map(|face| {
                RawFace::Grouped(
                    face.groups
                        .into_iter()
                        .map(|(group, points)| (group, points.into_iter().map(|(x, y)| RawPoint::new(x, y)).collect()))
                        .collect(),
                )
            })
            .collect();

        let (width, height) = image_size(img);
        let landmarks = normalize_landmarks(BackendKind::Regression, faces, width, height);
        finish_detection(img, landmarks, &self.draw)
    }

    fn release(&mut self) {
        if let Some(mut model) = self.model.take() {
            model.close();
        }
    }

    fn is_released(&self) -> bool {
        self.model.is_none()
    }
}

fn is_closed_outline(group: FeatureGroup) -> bool {
    matches!(
        group,
        FeatureGroup::LeftEye | FeatureGroup::RightEye | FeatureGroup::TopLip | FeatureGroup::BottomLip
    )
}

fn group_edges(face: &FaceLandmarks, groups: &[FeatureGroup]) -> Vec<(usize, usize)> {
    let mut edges = vec![];
    for (group, range) in &face.groups {
        if !groups.contains(group) {
            continue;
        }
        let indices: Vec<usize> = range.clone().collect();
        edges.extend(polyline_edges(&indices, is_closed_outline(*group)));
    }
    edges
}

/// Every feature group drawn as a polyline.
pub fn mesh_edges(face: &FaceLandmarks) -> Vec<(usize, usize)> {
    let all: Vec<FeatureGroup> = GROUP_LAYOUT.iter().map(|(group, _)| *group).collect();
    group_edges(face, &all)
}

/// Jaw line, eye outlines and lip outlines.
pub fn contour_edges(face: &FaceLandmarks) -> Vec<(usize, usize)> {
    group_edges(
        face,
        &[
            FeatureGroup::Chin,
            FeatureGroup::LeftEye,
            FeatureGroup::RightEye,
            FeatureGroup::TopLip,
            FeatureGroup::BottomLip,
        ],
    )
}

#[cfg(test)]
mod tests {
    use opencv::core::{Scalar, CV_8UC3};

    use super::*;
    use crate::modules::testing::{frontal_regressed_face, CloseCounter, FakeRegressor};

    fn blank(w: i32, h: i32) -> Mat {
        Mat::new_rows_cols_with_default(h, w, CV_8UC3, Scalar::all(0.0)).unwrap()
    }

    #[test]
    fn test_detect_flattens_groups() {
        let counter = CloseCounter::default();
        let model = FakeRegressor::new(vec![frontal_regressed_face(None)], counter.clone());
        let mut det = RegressionDetector::new(Box::new(model), RegressionConfig::new(), DrawConfig::new());

        let detection = det.detect(&blank(300, 300)).unwrap();
        let face = detection.landmarks.first_face().unwrap();
        assert_eq!(face.len(), 72);
        assert_eq!(face.groups.len(), GROUP_LAYOUT.len());
        for (group, size) in GROUP_LAYOUT {
            assert_eq!(face.group(group).map(|g| g.len()), Some(size));
        }
        det.release();
        det.release();
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn test_scored_faces_below_minimum_are_dropped() {
        let faces = vec![frontal_regressed_face(Some(0.3)), frontal_regressed_face(Some(0.9)), frontal_regressed_face(None)];
        let model = FakeRegressor::new(faces, CloseCounter::default());
        let mut det = RegressionDetector::new(Box::new(model), RegressionConfig::new(), DrawConfig::new());
        let detection = det.detect(&blank(300, 300)).unwrap();
        assert_eq!(detection.summary.faces_detected, 2);
        assert_eq!(detection.summary.total_landmarks, 144);
    }

    #[test]
    fn test_contours_skip_eyebrows_and_nose() {
        let model = FakeRegressor::new(vec![frontal_regressed_face(None)], CloseCounter::default());
        let mut det = RegressionDetector::new(Box::new(model), RegressionConfig::new(), DrawConfig::new());
        let detection = det.detect(&blank(300, 300)).unwrap();
        let face = detection.landmarks.first_face().unwrap();

        let brow = face.group_range(FeatureGroup::LeftEyebrow).unwrap();
        let contours = contour_edges(face);
        assert!(contours.iter().all(|(a, b)| !brow.contains(a) && !brow.contains(b)));
        // chin 16 segments, eyes 6 + 6, lips 12 + 12
        assert_eq!(contours.len(), 16 + 6 + 6 + 12 + 12);
        assert!(mesh_edges(face).len() > contours.len());
    }
}
