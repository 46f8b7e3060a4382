use anyhow::Error;
use opencv::core::{Mat, MatTraitConst};
use tracing::{debug, info};

use crate::config::config::{DetectorConfig, DrawConfig};
use crate::error::LandmarkError;
use crate::modules::cascade::{CascadeDetector, FaceBoxSource};
use crate::modules::face_mesh::{FaceMeshDetector, FaceMeshModel};
use crate::modules::regression::{LandmarkRegressor, RegressionDetector};
use crate::utils::coordinate::{BackendKind, DetectionSummary, LandmarkSet};
use crate::utils::image::stamp_points;

/// Everything one detection call produces.
#[derive(Debug)]
pub struct Detection {
    /// Copy of the input with every raw point stamped on it.
    pub annotated: Mat,
    pub landmarks: LandmarkSet,
    pub summary: DetectionSummary,
}

/// A face-landmark backend holding a loaded model handle.
///
/// Finding no face is not an error: it comes back as a [`Detection`] whose
/// summary has `success == false`.
pub trait LandmarkDetector {
    fn backend(&self) -> BackendKind;

    fn detect(&mut self, img: &Mat) -> Result<Detection, Error>;

    /// Frees the model handle. Calling it again is a no-op; detecting
    /// afterwards fails with [`LandmarkError::Released`].
    fn release(&mut self);

    fn is_released(&self) -> bool;
}

/// The opaque model a backend adapter wraps.
pub enum BackendModel {
    FaceMesh(Box<dyn FaceMeshModel>),
    Cascade(Box<dyn FaceBoxSource>),
    Regression(Box<dyn LandmarkRegressor>),
}

impl BackendModel {
    pub fn backend(&self) -> BackendKind {
        match self {
            BackendModel::FaceMesh(_) => BackendKind::FaceMesh,
            BackendModel::Cascade(_) => BackendKind::Cascade,
            BackendModel::Regression(_) => BackendKind::Regression,
        }
    }

    /// Closes the wrapped model without building a detector around it.
    pub fn close(self) {
        match self {
            BackendModel::FaceMesh(mut m) => m.close(),
            BackendModel::Cascade(mut m) => m.close(),
            BackendModel::Regression(mut m) => m.close(),
        }
    }
}

/// build_detector pairs the configured backend with its model.
///
/// # Arguments
/// * `config` - explicit backend selection and its parameters
/// * `draw` - marker style for the annotated preview
/// * `model` - the loaded model, which must belong to the configured backend
///
/// # Returns
/// * `Result<Box<dyn LandmarkDetector>, Error>`
pub fn build_detector(
    config: &DetectorConfig,
    draw: &DrawConfig,
    model: BackendModel,
) -> Result<Box<dyn LandmarkDetector>, Error> {
    let detector: Box<dyn LandmarkDetector> = match (config, model) {
        (DetectorConfig::FaceMesh(c), BackendModel::FaceMesh(m)) => {
            Box::new(FaceMeshDetector::new(m, c.clone(), draw.clone()))
        }
        (DetectorConfig::Cascade(c), BackendModel::Cascade(m)) => {
            Box::new(CascadeDetector::new(m, c.clone(), draw.clone()))
        }
        (DetectorConfig::Regression(c), BackendModel::Regression(m)) => {
            Box::new(RegressionDetector::new(m, c.clone(), draw.clone()))
        }
        (config, model) => {
            let supplied = model.backend();
            model.close();
            return Err(LandmarkError::BackendMismatch { configured: config.backend(), supplied }.into());
        }
    };
    Ok(detector)
}

/// Builds the [`Detection`] every backend returns once its points are normalized.
pub(crate) fn finish_detection(img: &Mat, landmarks: LandmarkSet, draw: &DrawConfig) -> Result<Detection, Error> {
    let mut annotated = img.try_clone()?;
    for face in &landmarks.faces {
        stamp_points(
            &mut annotated,
            &face.points,
            draw.landmark_color,
            draw.landmark_radius,
            draw.landmark_thickness,
        )?;
    }
    let summary = landmarks.summary();
    debug!(
        backend = %landmarks.backend,
        faces = summary.faces_detected,
        points = summary.total_landmarks,
        "detection finished"
    );
    Ok(Detection { annotated, landmarks, summary })
}

/// Scoped ownership of a detector: the model handle is released exactly once,
/// either by [`DetectorSession::close`] or when the session is dropped.
pub struct DetectorSession {
    detector: Box<dyn LandmarkDetector>,
    closed: bool,
}

impl DetectorSession {
    pub fn open(config: &DetectorConfig, draw: &DrawConfig, model: BackendModel) -> Result<Self, Error> {
        let detector = build_detector(config, draw, model)?;
        info!(backend = %detector.backend(), "detector session opened");
        Ok(Self::from_detector(detector))
    }

    pub fn from_detector(detector: Box<dyn LandmarkDetector>) -> Self {
        DetectorSession { detector, closed: false }
    }

    pub fn backend(&self) -> BackendKind {
        self.detector.backend()
    }

    pub fn detect(&mut self, img: &Mat) -> Result<Detection, Error> {
        if self.closed {
            return Err(LandmarkError::Released(self.backend()).into());
        }
        self.detector.detect(img)
    }

    pub fn close(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.detector.release();
        debug!(backend = %self.detector.backend(), "detector session closed");
    }
}

impl Drop for DetectorSession {
    fn drop(&mut self) {
        self.release_once();
    }
}

#[cfg(test)]
mod tests {
    use opencv::core::{MatTraitConstManual, Scalar, CV_8UC3};

    use super::*;
    use crate::config::config::{CascadeConfig, FaceMeshConfig};
    use crate::modules::testing::{frontal_mesh_face, CloseCounter, FakeMeshModel};

    fn blank(w: i32, h: i32) -> Mat {
        Mat::new_rows_cols_with_default(h, w, CV_8UC3, Scalar::all(40.0)).unwrap()
    }

    fn mesh_config() -> DetectorConfig {
        DetectorConfig::FaceMesh(FaceMeshConfig::new())
    }

    #[test]
    fn test_mismatched_model_is_rejected() {
        let counter = CloseCounter::default();
        let model = BackendModel::FaceMesh(Box::new(FakeMeshModel::new(vec![], counter.clone())));
        let config = DetectorConfig::Cascade(CascadeConfig::new());
        let err = build_detector(&config, &DrawConfig::new(), model).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<LandmarkError>(),
            Some(LandmarkError::BackendMismatch { configured: BackendKind::Cascade, supplied: BackendKind::FaceMesh })
        ));
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn test_session_releases_once_on_zero_faces() {
        let counter = CloseCounter::default();
        let model = BackendModel::FaceMesh(Box::new(FakeMeshModel::new(vec![], counter.clone())));
        let mut session = DetectorSession::open(&mesh_config(), &DrawConfig::new(), model).unwrap();

        let img = blank(64, 48);
        let detection = session.detect(&img).unwrap();
        assert!(!detection.summary.success);
        assert_eq!(detection.summary.faces_detected, 0);
        assert_eq!(detection.annotated.data_bytes().unwrap(), img.data_bytes().unwrap());

        session.close();
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn test_session_releases_on_drop() {
        let counter = CloseCounter::default();
        {
            let model = BackendModel::FaceMesh(Box::new(FakeMeshModel::new(
                vec![frontal_mesh_face(0.9)],
                counter.clone(),
            )));
            let mut session = DetectorSession::open(&mesh_config(), &DrawConfig::new(), model).unwrap();
            let detection = session.detect(&blank(200, 200)).unwrap();
            assert!(detection.summary.success);
        }
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn test_released_detector_refuses_to_detect() {
        let counter = CloseCounter::default();
        let model = BackendModel::FaceMesh(Box::new(FakeMeshModel::new(vec![], counter.clone())));
        let mut detector = build_detector(&mesh_config(), &DrawConfig::new(), model).unwrap();
        detector.release();
        detector.release();
        assert!(detector.is_released());
        assert_eq!(counter.count(), 1);
        let err = detector.detect(&blank(10, 10)).err().unwrap();
        assert!(matches!(err.downcast_ref::<LandmarkError>(), Some(LandmarkError::Released(_))));
    }
}
