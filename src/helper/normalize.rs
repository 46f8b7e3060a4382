use crate::utils::coordinate::{
    BackendKind, CoordinateUnit, FaceLandmarks, Landmark, LandmarkSet, RawFace, RawFaces, RawPoint,
};

const DEFAULT_DEPTH: f32 = 0.0;
const DEFAULT_VISIBILITY: f32 = 1.0;

fn to_pixel(fraction: f32, dimension: i32) -> i32 {
    (fraction as f64 * dimension as f64).round() as i32
}

fn to_fraction(pixel: f32, dimension: i32) -> f32 {
    if dimension <= 0 {
        return 0.0;
    }
    (pixel as f64 / dimension as f64) as f32
}

/// Resolves one raw point into both pixel and fractional coordinates.
pub fn normalize_point(point: &RawPoint, unit: CoordinateUnit, width: i32, height: i32) -> Landmark {
    let (x, y, x_norm, y_norm) = match unit {
        CoordinateUnit::Normalized => (to_pixel(point.x, width), to_pixel(point.y, height), point.x, point.y),
        CoordinateUnit::Pixel => (
            point.x.round() as i32,
            point.y.round() as i32,
            to_fraction(point.x, width),
            to_fraction(point.y, height),
        ),
    };
    Landmark {
        x,
        y,
        z: point.z.unwrap_or(DEFAULT_DEPTH),
        x_norm,
        y_norm,
        visibility: point.visibility.unwrap_or(DEFAULT_VISIBILITY),
    }
}

pub fn normalize_face(face: &RawFace, unit: CoordinateUnit, width: i32, height: i32) -> FaceLandmarks {
    match face {
        RawFace::Indexed(points) => FaceLandmarks {
            points: points.iter().map(|p| normalize_point(p, unit, width, height)).collect(),
            groups: vec![],
        },
        RawFace::Grouped(groups) => {
            let mut out = FaceLandmarks::default();
            for (group, points) in groups {
                let start = out.points.len();
                out.points.extend(points.iter().map(|p| normalize_point(p, unit, width, height)));
                out.groups.push((*group, start..out.points.len()));
            }
            out
        }
    }
}

/// Turns whatever shape a backend produced into a [`LandmarkSet`], using the
/// coordinate unit the backend declares.
pub fn normalize_landmarks<R>(backend: BackendKind, raw: R, width: i32, height: i32) -> LandmarkSet
where
    R: Into<RawFaces>,
{
    let unit = backend.raw_unit();
    let faces = raw
        .into()
        .into_vec()
        .iter()
        .map(|face| normalize_face(face, unit, width, height))
        .collect();
    LandmarkSet { backend, width, height, faces }
}
