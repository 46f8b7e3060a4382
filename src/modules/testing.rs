//! In-memory stand-ins for the opaque detection models.

use std::cell::Cell;
use std::f32::consts::PI;
use std::rc::Rc;

use anyhow::Error;
use opencv::core::{Mat, Rect};

use crate::config::config::{CascadeConfig, FaceMeshConfig, RegressionConfig};
use crate::modules::cascade::FaceBoxSource;
use crate::modules::face_mesh::{self, FaceMeshModel, MeshFace, MESH_POINTS};
use crate::modules::regression::{LandmarkRegressor, RegressedFace, GROUP_LAYOUT};
use crate::utils::coordinate::{FeatureGroup, RawPoint};

/// Counts how many times a fake model was closed.
#[derive(Debug, Clone, Default)]
pub struct CloseCounter(Rc<Cell<usize>>);

impl CloseCounter {
    pub fn hit(&self) {
        self.0.set(self.0.get() + 1);
    }

    pub fn count(&self) -> usize {
        self.0.get()
    }
}

pub struct FakeMeshModel {
    faces: Vec<MeshFace>,
    closes: CloseCounter,
}

impl FakeMeshModel {
    pub fn new(faces: Vec<MeshFace>, closes: CloseCounter) -> Self {
        FakeMeshModel { faces, closes }
    }
}

impl FaceMeshModel for FakeMeshModel {
    fn process(&mut self, _rgb: &Mat, _config: &FaceMeshConfig) -> Result<Vec<MeshFace>, Error> {
        Ok(self.faces.clone())
    }

    fn close(&mut self) {
        self.closes.hit();
    }
}

pub struct FakeBoxSource {
    boxes: Vec<Rect>,
    closes: CloseCounter,
}

impl FakeBoxSource {
    pub fn new(boxes: Vec<Rect>, closes: CloseCounter) -> Self {
        FakeBoxSource { boxes, closes }
    }
}

impl FaceBoxSource for FakeBoxSource {
    fn detect_boxes(&mut self, _gray: &Mat, _config: &CascadeConfig) -> Result<Vec<Rect>, Error> {
        Ok(self.boxes.clone())
    }

    fn close(&mut self) {
        self.closes.hit();
    }
}

pub struct FakeRegressor {
    faces: Vec<RegressedFace>,
    closes: CloseCounter,
}

impl FakeRegressor {
    pub fn new(faces: Vec<RegressedFace>, closes: CloseCounter) -> Self {
        FakeRegressor { faces, closes }
    }
}

impl LandmarkRegressor for FakeRegressor {
    fn face_landmarks(&mut self, _rgb: &Mat, _config: &RegressionConfig) -> Result<Vec<RegressedFace>, Error> {
        Ok(self.faces.clone())
    }

    fn close(&mut self) {
        self.closes.hit();
    }
}

/// An upright, neutral 478-point face spread over the middle of the image.
pub fn frontal_mesh_face(score: f32) -> MeshFace {
    let mut points: Vec<RawPoint> = (0..MESH_POINTS)
        .map(|i| {
            let t = i as f32 / MESH_POINTS as f32;
            let angle = i as f32 * 2.399_963;
            let r = 0.35 * t.sqrt();
            RawPoint::new(0.5 + r * angle.cos(), 0.5 + r * angle.sin()).with_depth(-0.01 * t)
        })
        .collect();

    let anchors = [
        (face_mesh::FOREHEAD, 0.5, 0.2),
        (face_mesh::NOSE_TIP, 0.5, 0.55),
        (face_mesh::UPPER_LIP, 0.5, 0.66),
        (face_mesh::LOWER_LIP, 0.5, 0.68),
        (face_mesh::RIGHT_EYE_TOP, 0.4, 0.40),
        (face_mesh::RIGHT_EYE_BOTTOM, 0.4, 0.43),
        (face_mesh::LEFT_EYE_TOP, 0.6, 0.40),
        (face_mesh::LEFT_EYE_BOTTOM, 0.6, 0.43),
    ];
    for (idx, x, y) in anchors {
        points[idx] = RawPoint::new(x, y).with_depth(0.0);
    }
    MeshFace { points, score }
}

/// An upright, neutral 72-point grouped face laid out for a 300x300 image.
pub fn frontal_regressed_face(confidence: Option<f32>) -> RegressedFace {
    let eye = |cx: f32, cy: f32| -> Vec<(f32, f32)> {
        [(-10.0, 0.0), (-5.0, -4.0), (5.0, -4.0), (10.0, 0.0), (5.0, 4.0), (-5.0, 4.0)]
            .iter()
            .map(|(dx, dy)| (cx + dx, cy + dy))
            .collect()
    };

    let groups = GROUP_LAYOUT
        .iter()
        .map(|&(group, size)| {
            let points: Vec<(f32, f32)> = match group {
                FeatureGroup::Chin => (0..size)
                    .map(|i| (90.0 + i as f32 * 7.5, 150.0 + 60.0 * (PI * i as f32 / 16.0).sin()))
                    .collect(),
                FeatureGroup::LeftEyebrow => (0..size).map(|i| (100.0 + i as f32 * 10.0, 110.0)).collect(),
                FeatureGroup::RightEyebrow => (0..size).map(|i| (160.0 + i as f32 * 10.0, 110.0)).collect(),
                FeatureGroup::NoseBridge => (0..size).map(|i| (150.0, 120.0 + i as f32 * 10.0)).collect(),
                FeatureGroup::NoseTip => (0..size).map(|i| (130.0 + i as f32 * 10.0, 165.0)).collect(),
                FeatureGroup::LeftEye => eye(115.0, 130.0),
                FeatureGroup::RightEye => eye(185.0, 130.0),
                FeatureGroup::TopLip => (0..size).map(|i| (120.0 + i as f32 * 5.0, 190.0)).collect(),
                FeatureGroup::BottomLip => (0..size).map(|i| (175.0 - i as f32 * 5.0, 202.0)).collect(),
            };
            (group, points)
        })
        .collect();

    RegressedFace { groups, confidence }
}
