use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Detection backend a landmark set was produced by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    FaceMesh,
    Cascade,
    Regression,
}

impl BackendKind {
    /// Nominal number of points a single face carries on this backend.
    pub fn points_per_face(&self) -> usize {
        match self {
            BackendKind::FaceMesh => 478,
            BackendKind::Cascade => 9,
            BackendKind::Regression => 72,
        }
    }

    /// Unit the backend reports its raw coordinates in.
    pub fn raw_unit(&self) -> CoordinateUnit {
        match self {
            BackendKind::FaceMesh => CoordinateUnit::Normalized,
            BackendKind::Cascade | BackendKind::Regression => CoordinateUnit::Pixel,
        }
    }

    pub fn landmark_format(&self) -> &'static str {
        match self {
            BackendKind::FaceMesh => "Face Mesh 478 points",
            BackendKind::Cascade => "Cascade bounding-box estimate 9 points",
            BackendKind::Regression => "Feature-group regression 72 points",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::FaceMesh => "face_mesh",
            BackendKind::Cascade => "cascade",
            BackendKind::Regression => "regression",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateUnit {
    /// Fraction of image width / height, nominally in [0, 1].
    Normalized,
    /// Absolute pixel position.
    Pixel,
}

/// Named facial feature a group of regression points belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureGroup {
    Chin,
    LeftEyebrow,
    RightEyebrow,
    NoseBridge,
    NoseTip,
    LeftEye,
    RightEye,
    TopLip,
    BottomLip,
}

/// A point exactly as a backend reported it, before normalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPoint {
    pub x: f32,
    pub y: f32,
    pub z: Option<f32>,
    pub visibility: Option<f32>,
}

impl RawPoint {
    pub const fn new(x: f32, y: f32) -> Self {
        RawPoint { x, y, z: None, visibility: None }
    }

    pub const fn with_depth(mut self, z: f32) -> Self {
        self.z = Some(z);
        self
    }

    pub const fn with_visibility(mut self, visibility: f32) -> Self {
        self.visibility = Some(visibility);
        self
    }
}

/// Backend-specific shape of one face's points.
#[derive(Debug, Clone, PartialEq)]
pub enum RawFace {
    /// Plain ordered list addressed by index.
    Indexed(Vec<RawPoint>),
    /// Points grouped by named feature, in backend order.
    Grouped(Vec<(FeatureGroup, Vec<RawPoint>)>),
}

/// Either one face object or a collection of them.
#[derive(Debug, Clone, PartialEq)]
pub enum RawFaces {
    Single(RawFace),
    Multiple(Vec<RawFace>),
}

impl RawFaces {
    pub fn into_vec(self) -> Vec<RawFace> {
        match self {
            RawFaces::Single(face) => vec![face],
            RawFaces::Multiple(faces) => faces,
        }
    }
}

impl From<RawFace> for RawFaces {
    fn from(face: RawFace) -> Self {
        RawFaces::Single(face)
    }
}

impl From<Vec<RawFace>> for RawFaces {
    fn from(faces: Vec<RawFace>) -> Self {
        RawFaces::Multiple(faces)
    }
}

/// A normalized landmark carrying both pixel and fractional coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub x: i32,
    pub y: i32,
    pub z: f32,
    pub x_norm: f32,
    pub y_norm: f32,
    pub visibility: f32,
}

impl Landmark {
    /// Coordinates in the requested unit.
    pub fn position(&self, unit: CoordinateUnit) -> (f32, f32) {
        match unit {
            CoordinateUnit::Pixel => (self.x as f32, self.y as f32),
            CoordinateUnit::Normalized => (self.x_norm, self.y_norm),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FaceLandmarks {
    pub points: Vec<Landmark>,
    /// Index ranges into `points` for backends that label their points.
    pub groups: Vec<(FeatureGroup, Range<usize>)>,
}

impl FaceLandmarks {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, index: usize) -> Option<&Landmark> {
        self.points.get(index)
    }

    pub fn group(&self, group: FeatureGroup) -> Option<&[Landmark]> {
        self.groups
            .iter()
            .find(|(g, _)| *g == group)
            .and_then(|(_, range)| self.points.get(range.clone()))
    }

    pub fn group_range(&self, group: FeatureGroup) -> Option<Range<usize>> {
        self.groups.iter().find(|(g, _)| *g == group).map(|(_, range)| range.clone())
    }
}

/// Every face found in one image, in one addressable coordinate scheme.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    pub backend: BackendKind,
    pub width: i32,
    pub height: i32,
    pub faces: Vec<FaceLandmarks>,
}

impl LandmarkSet {
    pub fn empty(backend: BackendKind, width: i32, height: i32) -> Self {
        LandmarkSet { backend, width, height, faces: vec![] }
    }

    pub fn is_empty(&self) -> bool {
        self.faces.iter().all(|face| face.is_empty())
    }

    pub fn total_points(&self) -> usize {
        self.faces.iter().map(|face| face.len()).sum()
    }

    pub fn get(&self, face_index: usize, point_index: usize) -> Option<&Landmark> {
        self.faces.get(face_index).and_then(|face| face.point(point_index))
    }

    pub fn first_face(&self) -> Option<&FaceLandmarks> {
        self.faces.first()
    }

    pub fn summary(&self) -> DetectionSummary {
        DetectionSummary::from_faces(&self.faces)
    }

    /// Flattens the set into one export row per point.
    pub fn records(&self) -> Vec<LandmarkRecord> {
        self.faces
            .iter()
            .enumerate()
            .flat_map(|(face_idx, face)| {
                face.points.iter().enumerate().map(move |(point_idx, lm)| LandmarkRecord {
                    rostro_id: face_idx,
                    landmark_id: point_idx,
                    x: lm.x,
                    y: lm.y,
                    z: lm.z,
                    x_normalizado: lm.x_norm,
                    y_normalizado: lm.y_norm,
                    visibilidad: lm.visibility,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkRecord {
    pub rostro_id: usize,
    pub landmark_id: usize,
    pub x: i32,
    pub y: i32,
    pub z: f32,
    pub x_normalizado: f32,
    pub y_normalizado: f32,
    pub visibilidad: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionSummary {
    #[serde(rename = "rostros_detectados")]
    pub faces_detected: usize,
    pub total_landmarks: usize,
    #[serde(rename = "deteccion_exitosa")]
    pub success: bool,
}

impl DetectionSummary {
    pub fn from_faces(faces: &[FaceLandmarks]) -> Self {
        let faces_detected = faces.len();
        DetectionSummary {
            faces_detected,
            total_landmarks: faces.iter().map(|face| face.len()).sum(),
            success: faces_detected > 0,
        }
    }

    /// Detected points as a percentage of what the backend nominally yields
    /// for the faces found.
    pub fn coverage_percent(&self, backend: BackendKind) -> f32 {
        let expected = self.faces_detected * backend.points_per_face();
        if expected == 0 {
            return 0.0;
        }
        self.total_landmarks as f32 / expected as f32 * 100.0
    }
}
