//! Dense 478-point face mesh backend.
//!
//! The mesh model reports points as fractions of the image size together with
//! a relative depth. Point indices follow the canonical face mesh topology:
//!
//! - 1: nose tip, 10: forehead center
//! - 13 / 14: inner upper / lower lip center
//! - 159 / 145: right eye upper / lower lid, 386 / 374: left eye upper / lower lid
//! - 468..478: iris refinement points

use anyhow::Error;
use opencv::core::{Mat, Point, Point2f, Rect, Vec4f, Vector};
use opencv::imgproc::Subdiv2D;
use opencv::prelude::*;
use tracing::{debug, warn};

use crate::config::config::{DrawConfig, FaceMeshConfig};
use crate::error::LandmarkError;
use crate::helper::normalize::normalize_landmarks;
use crate::modules::detector::{finish_detection, Detection, LandmarkDetector};
use crate::utils::coordinate::{BackendKind, FaceLandmarks, RawFace, RawPoint};
use crate::utils::image::{bgr_to_rgb, ensure_bgr, image_size, polyline_edges};

pub const MESH_POINTS: usize = 478;

pub const NOSE_TIP: usize = 1;
pub const FOREHEAD: usize = 10;
pub const UPPER_LIP: usize = 13;
pub const LOWER_LIP: usize = 14;
pub const RIGHT_EYE_TOP: usize = 159;
pub const RIGHT_EYE_BOTTOM: usize = 145;
pub const LEFT_EYE_TOP: usize = 386;
pub const LEFT_EYE_BOTTOM: usize = 374;

pub const FACE_OVAL: &[usize] = &[
    10, 338, 297, 332, 284, 251, 389, 356, 454, 323, 361, 288, 397, 365, 379, 378, 400, 377, 152, 148, 176, 149,
    150, 136, 172, 58, 132, 93, 234, 127, 162, 21, 54, 103, 67, 109,
];

// Eye and lip outlines as open polylines corner to corner; upper and lower
// halves together close the loop.
pub const LEFT_EYE_UPPER: &[usize] = &[263, 466, 388, 387, 386, 385, 384, 398, 362];
pub const LEFT_EYE_LOWER: &[usize] = &[263, 249, 390, 373, 374, 380, 381, 382, 362];
pub const RIGHT_EYE_UPPER: &[usize] = &[33, 246, 161, 160, 159, 158, 157, 173, 133];
pub const RIGHT_EYE_LOWER: &[usize] = &[33, 7, 163, 144, 145, 153, 154, 155, 133];
pub const LIPS_OUTER_UPPER: &[usize] = &[61, 185, 40, 39, 37, 0, 267, 269, 270, 409, 291];
pub const LIPS_OUTER_LOWER: &[usize] = &[61, 146, 91, 181, 84, 17, 314, 405, 321, 375, 291];
pub const LIPS_INNER_UPPER: &[usize] = &[78, 191, 80, 81, 82, 13, 312, 311, 310, 415, 308];
pub const LIPS_INNER_LOWER: &[usize] = &[78, 95, 88, 178, 87, 14, 317, 402, 318, 324, 308];

/// One face as returned by the mesh model.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshFace {
    pub points: Vec<RawPoint>,
    pub score: f32,
}

/// Opaque dense-mesh model. Receives RGB images.
pub trait FaceMeshModel {
    fn process(&mut self, rgb: &Mat, config: &FaceMeshConfig) -> Result<Vec<MeshFace>, Error>;

    fn close(&mut self);
}

pub struct FaceMeshDetector {
    model: Option<Box<dyn FaceMeshModel>>,
    config: FaceMeshConfig,
    draw: DrawConfig,
}

impl FaceMeshDetector {
    /// new wraps a dense mesh model in a detector.
    ///
    /// # Arguments
    /// * `model` - any FaceMeshModel
    /// * `config` - FaceMeshConfig
    /// * `draw` - marker style for the annotated preview
    ///
    /// # Returns
    /// * `Self`
    pub fn new(model: Box<dyn FaceMeshModel>, config: FaceMeshConfig, draw: DrawConfig) -> Self {
        FaceMeshDetector { model: Some(model), config, draw }
    }
}

impl LandmarkDetector for FaceMeshDetector {
    fn backend(&self) -> BackendKind {
        BackendKind::FaceMesh
    }

    fn detect(&mut self, img: &Mat) -> Result<Detection, Error> {
        ensure_bgr(img)?;
        let model = self.model.as_mut().ok_or(LandmarkError::Released(BackendKind::FaceMesh))?;

        let rgb = bgr_to_rgb(img)?;
        let found = model.process(&rgb, &self.config)?;
        let reported = found.len();

        let mut faces: Vec<RawFace> = Vec::with_capacity(reported.min(self.config.max_num_faces));
        for (idx, face) in found.into_iter().enumerate() {
            if face.score < self.config.min_detection_confidence {
                debug!(face = idx, score = face.score, "dropping low-confidence mesh face");
                continue;
            }
            if faces.len() == self.config.max_num_faces {
                warn!(reported, max = self.config.max_num_faces, "mesh model reported more faces than allowed");
                break;
            }
            if face.points.len() != MESH_POINTS {
                return Err(LandmarkError::UnexpectedPointCount {
                    backend: BackendKind::FaceMesh,
                    face: idx,
                    found: face.points.len(),
                    expected: MESH_POINTS,
                }
                .into());
            }
            faces.push(RawFace::Indexed(face.points));
        }

        let (width, height) = image_size(img);
        let landmarks = normalize_landmarks(BackendKind::FaceMesh, faces, width, height);
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

/// Face oval, both eye outlines and the lip outlines.
pub fn contour_edges() -> Vec<(usize, usize)> {
    let mut edges = polyline_edges(FACE_OVAL, true);
    for line in [
        LEFT_EYE_UPPER,
        LEFT_EYE_LOWER,
        RIGHT_EYE_UPPER,
        RIGHT_EYE_LOWER,
        LIPS_OUTER_UPPER,
        LIPS_OUTER_LOWER,
        LIPS_INNER_UPPER,
        LIPS_INNER_LOWER,
    ] {
        edges.extend(polyline_edges(line, false));
    }
    edges
}

/// Delaunay triangulation over the face's in-bounds points, as pixel segments.
pub fn triangulation_segments(face: &FaceLandmarks, width: i32, height: i32) -> Result<Vec<(Point, Point)>, Error> {
    if width <= 0 || height <= 0 {
        return Ok(vec![]);
    }
    let inside = |x: f32, y: f32| x >= 0.0 && y >= 0.0 && x < width as f32 && y < height as f32;

    let mut subdiv = Subdiv2D::new(Rect::new(0, 0, width, height))?;
    let mut inserted = 0;
    for lm in &face.points {
        let (x, y) = (lm.x as f32, lm.y as f32);
        if inside(x, y) {
            subdiv.insert(Point2f::new(x, y))?;
            inserted += 1;
        }
    }
    if inserted < 2 {
        return Ok(vec![]);
    }

    let mut edge_list = Vector::<Vec4f>::new();
    subdiv.get_edge_list(&mut edge_list)?;

    // Edges touching the virtual outer vertices fall outside the image.
    let segments = edge_list
        .iter()
        .filter(|e| inside(e[0], e[1]) && inside(e[2], e[3]))
        .map(|e| {
            (
                Point::new(e[0].round() as i32, e[1].round() as i32),
                Point::new(e[2].round() as i32, e[3].round() as i32),
            )
        })
        .collect();
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use opencv::core::{Scalar, CV_8UC3};

    use super::*;
    use crate::modules::testing::{frontal_mesh_face, CloseCounter, FakeMeshModel};

    fn blank(w: i32, h: i32) -> Mat {
        Mat::new_rows_cols_with_default(h, w, CV_8UC3, Scalar::all(0.0)).unwrap()
    }

    fn detector(faces: Vec<MeshFace>, config: FaceMeshConfig) -> FaceMeshDetector {
        FaceMeshDetector::new(Box::new(FakeMeshModel::new(faces, CloseCounter::default())), config, DrawConfig::new())
    }

    #[test]
    fn test_detect_normalizes_fractional_points() {
        let face = frontal_mesh_face(0.9);
        let expected = face.points.clone();
        let mut det = detector(vec![face], FaceMeshConfig::new());

        let detection = det.detect(&blank(320, 240)).unwrap();
        assert!(detection.summary.success);
        assert_eq!(detection.summary.faces_detected, 1);
        assert_eq!(detection.summary.total_landmarks, MESH_POINTS);

        for (i, raw) in expected.iter().enumerate() {
            let lm = detection.landmarks.get(0, i).unwrap();
            assert_eq!(lm.x, (raw.x as f64 * 320.0).round() as i32);
            assert_eq!(lm.y, (raw.y as f64 * 240.0).round() as i32);
        }
    }

    #[test]
    fn test_confidence_and_face_limit() {
        let faces = vec![frontal_mesh_face(0.2), frontal_mesh_face(0.8), frontal_mesh_face(0.9), frontal_mesh_face(0.7)];
        let config = FaceMeshConfig { max_num_faces: 2, ..FaceMeshConfig::new() };
        let mut det = detector(faces, config);

        let detection = det.detect(&blank(100, 100)).unwrap();
        assert_eq!(detection.summary.faces_detected, 2);
        assert_eq!(detection.summary.total_landmarks, 2 * MESH_POINTS);
    }

    #[test]
    fn test_wrong_point_count_is_an_error() {
        let mut face = frontal_mesh_face(0.9);
        face.points.truncate(468);
        let mut det = detector(vec![face], FaceMeshConfig::new());
        let err = det.detect(&blank(100, 100)).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<LandmarkError>(),
            Some(LandmarkError::UnexpectedPointCount { found: 468, expected: 478, .. })
        ));
    }

    #[test]
    fn test_contour_edges_reference_valid_indices() {
        let edges = contour_edges();
        assert_eq!(edges.iter().filter(|(a, _)| FACE_OVAL.contains(a)).count(), FACE_OVAL.len());
        assert!(edges.iter().all(|&(a, b)| a < MESH_POINTS && b < MESH_POINTS));
    }

    #[test]
    fn test_triangulation_stays_inside_image() {
        let mut det = detector(vec![frontal_mesh_face(0.9)], FaceMeshConfig::new());
        let detection = det.detect(&blank(200, 200)).unwrap();
        let face = detection.landmarks.first_face().unwrap();

        let segments = triangulation_segments(face, 200, 200).unwrap();
        assert!(segments.len() > MESH_POINTS);
        assert!(segments
            .iter()
            .all(|(a, b)| (0..200).contains(&a.x) && (0..200).contains(&a.y) && (0..200).contains(&b.x) && (0..200).contains(&b.y)));
    }
}
