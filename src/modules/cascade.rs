//! Classical cascade backend.
//!
//! A Haar cascade only yields face rectangles, so a fixed set of anchor points
//! is estimated from each rectangle's proportions. "Left" and "right" are image
//! sides here.

use std::cmp::Reverse;

use anyhow::Error;
use opencv::core::{Mat, Rect, Size, Vector};
use opencv::objdetect::CascadeClassifier;
use opencv::prelude::*;
use tracing::{debug, info};

use crate::config::config::{CascadeConfig, DrawConfig};
use crate::error::LandmarkError;
use crate::helper::normalize::normalize_landmarks;
use crate::modules::detector::{finish_detection, Detection, LandmarkDetector};
use crate::utils::coordinate::{BackendKind, RawFace, RawPoint};
use crate::utils::image::{bgr_to_equalized_gray, ensure_bgr, image_size};

pub const CENTER: usize = 0;
pub const LEFT_EDGE: usize = 1;
pub const RIGHT_EDGE: usize = 2;
pub const TOP_EDGE: usize = 3;
pub const BOTTOM_EDGE: usize = 4;
pub const LEFT_EYE: usize = 5;
pub const RIGHT_EYE: usize = 6;
pub const NOSE: usize = 7;
pub const MOUTH: usize = 8;

pub const ANCHOR_COUNT: usize = 9;

/// Anchor positions as (x, y) fractions of the face rectangle, in index order.
const ANCHOR_LAYOUT: [(f32, f32); ANCHOR_COUNT] = [
    (0.5, 0.5),
    (0.0, 0.5),
    (1.0, 0.5),
    (0.5, 0.0),
    (0.5, 1.0),
    (0.3, 0.4),
    (0.7, 0.4),
    (0.5, 0.6),
    (0.5, 0.8),
];

/// Segments joining the anchors for the connected style.
pub const MESH_EDGES: &[(usize, usize)] = &[
    (LEFT_EYE, RIGHT_EYE),
    (LEFT_EYE, NOSE),
    (RIGHT_EYE, NOSE),
    (NOSE, MOUTH),
    (CENTER, NOSE),
    (TOP_EDGE, RIGHT_EDGE),
    (RIGHT_EDGE, BOTTOM_EDGE),
    (BOTTOM_EDGE, LEFT_EDGE),
    (LEFT_EDGE, TOP_EDGE),
];

/// Outline through the edge midpoints; the cascade has no eye or lip contour.
pub const CONTOUR_EDGES: &[(usize, usize)] = &[
    (TOP_EDGE, RIGHT_EDGE),
    (RIGHT_EDGE, BOTTOM_EDGE),
    (BOTTOM_EDGE, LEFT_EDGE),
    (LEFT_EDGE, TOP_EDGE),
];

/// Opaque face-rectangle source. Receives equalized grayscale images.
pub trait FaceBoxSource {
    fn detect_boxes(&mut self, gray: &Mat, config: &CascadeConfig) -> Result<Vec<Rect>, Error>;

    fn close(&mut self);
}

/// [`FaceBoxSource`] backed by an OpenCV Haar cascade file.
pub struct HaarCascade {
    classifier: Option<CascadeClassifier>,
}

impl HaarCascade {
    /// load reads a Haar cascade XML file.
    ///
    /// # Arguments
    /// * `path` - path to the cascade file
    ///
    /// # Returns
    /// * `Result<Self, Error>`
    pub fn load(path: &str) -> Result<Self, Error> {
        let classifier = CascadeClassifier::new(path).map_err(|e| LandmarkError::ModelLoad {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        if classifier.empty()? {
            return Err(LandmarkError::ModelLoad {
                path: path.to_string(),
                reason: "cascade file contains no classifier".to_string(),
            }
            .into());
        }
        info!(path, "haar cascade loaded");
        Ok(HaarCascade { classifier: Some(classifier) })
    }
}

impl FaceBoxSource for HaarCascade {
    fn detect_boxes(&mut self, gray: &Mat, config: &CascadeConfig) -> Result<Vec<Rect>, Error> {
        let classifier = self.classifier.as_mut().ok_or(LandmarkError::Released(BackendKind::Cascade))?;
        let mut faces = Vector::<Rect>::new();
        classifier.detect_multi_scale(
            gray,
            &mut faces,
            config.scale_factor,
            config.min_neighbors,
            0,
            Size::new(config.min_face_size, config.min_face_size),
            Size::default(),
        )?;
        Ok(faces.to_vec())
    }

    fn close(&mut self) {
        self.classifier = None;
    }
}

/// Estimates the anchor points for one face rectangle, in pixels.
pub fn anchors_from_box(rect: &Rect) -> Vec<RawPoint> {
    let (x, y) = (rect.x as f32, rect.y as f32);
    let (w, h) = (rect.width as f32, rect.height as f32);
    ANCHOR_LAYOUT
        .iter()
        .map(|&(fx, fy)| RawPoint::new(x + fx * w, y + fy * h))
        .collect()
}

pub struct CascadeDetector {
    source: Option<Box<dyn FaceBoxSource>>,
    config: CascadeConfig,
    draw: DrawConfig,
}

impl CascadeDetector {
    /// new wraps a face-rectangle source in a cascade detector.
    ///
    /// # Arguments
    /// * `source` - any FaceBoxSource, usually a loaded HaarCascade
    /// * `config` - CascadeConfig
    /// * `draw` - marker style for the annotated preview
    ///
    /// # Returns
    /// * `Self`
    pub fn new(source: Box<dyn FaceBoxSource>, config: CascadeConfig, draw: DrawConfig) -> Self {
        CascadeDetector { source: Some(source), config, draw }
    }

    /// from_config loads the Haar cascade named in the config.
    ///
    /// # Arguments
    /// * `config` - CascadeConfig, `model_path` must point at a cascade XML file
    /// * `draw` - marker style for the annotated preview
    ///
    /// # Returns
    /// * `Result<Self, Error>` - `LandmarkError::ModelLoad` if the file is missing or empty
    pub fn from_config(config: CascadeConfig, draw: DrawConfig) -> Result<Self, Error> {
        let source = HaarCascade::load(&config.model_path)?;
        Ok(Self::new(Box::new(source), config, draw))
    }
}

impl LandmarkDetector for CascadeDetector {
    fn backend(&self) -> BackendKind {
        BackendKind::Cascade
    }

    /// detect runs the cascade on the equalized grayscale image and derives
    /// nine anchors per box, largest boxes first.
    ///
    /// # Arguments
    /// * `img` - BGR OpenCV matrix
    ///
    /// # Returns
    /// * `Result<Detection, Error>`
    fn detect(&mut self, img: &Mat) -> Result<Detection, Error> {
        ensure_bgr(img)?;
        let source = self.source.as_mut().ok_or(LandmarkError::Released(BackendKind::Cascade))?;

        let gray = bgr_to_equalized_gray(img)?;
        let mut boxes = source.detect_boxes(&gray, &self.config)?;
        boxes.retain(|r| r.width > 0 && r.height > 0);
        boxes.sort_by_key(|r| Reverse(r.width * r.height));
        if boxes.len() > self.config.max_num_faces {
            debug!(found = boxes.len(), max = self.config.max_num_faces, "keeping largest cascade boxes");
            boxes.truncate(self.config.max_num_faces);
        }

        let faces: Vec<RawFace> = boxes.iter().map(|r| RawFace::Indexed(anchors_from_box(r))).collect();
        let (width, height) = image_size(img);
        let landmarks = normalize_landmarks(BackendKind::Cascade, faces, width, height);
        finish_detection(img, landmarks, &self.draw)
    }

    fn release(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
        }
    }

    fn is_released(&self) -> bool {
        self.source.is_none()
    }
}
