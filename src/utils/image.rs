use anyhow::Error;
use ndarray::Array2;
use opencv::core::{Mat, MatTraitConst, Point, Scalar, CV_8UC3};
use opencv::imgproc::{self, COLOR_BGR2GRAY, COLOR_BGR2RGB, LINE_8, LINE_AA};

use crate::config::config::Bgr;
use crate::error::LandmarkError;
use crate::utils::coordinate::{CoordinateUnit, FaceLandmarks, Landmark};

/// Rejects inputs that are not a non-empty 8-bit BGR image.
pub fn ensure_bgr(img: &Mat) -> Result<(), Error> {
    if img.empty() {
        return Err(LandmarkError::InvalidImage("image is empty".to_string()).into());
    }
    if img.typ() != CV_8UC3 {
        return Err(LandmarkError::InvalidImage(format!(
            "expected 8-bit 3-channel BGR image, got type {}",
            img.typ()
        ))
        .into());
    }
    Ok(())
}

/// Returns `(width, height)`.
pub fn image_size(img: &Mat) -> (i32, i32) {
    (img.cols(), img.rows())
}

pub fn bgr_to_rgb(img: &Mat) -> Result<Mat, Error> {
    let mut rgb = Mat::default();
    imgproc::cvt_color_def(img, &mut rgb, COLOR_BGR2RGB)?;
    Ok(rgb)
}

/// Grayscale with equalized histogram, the input cascade classifiers expect.
pub fn bgr_to_equalized_gray(img: &Mat) -> Result<Mat, Error> {
    let mut gray = Mat::default();
    imgproc::cvt_color_def(img, &mut gray, COLOR_BGR2GRAY)?;
    let mut equalized = Mat::default();
    imgproc::equalize_hist(&gray, &mut equalized)?;
    Ok(equalized)
}

pub fn bgr_scalar(color: Bgr) -> Scalar {
    Scalar::new(color.0 as f64, color.1 as f64, color.2 as f64, 0.0)
}

pub fn landmark_point(lm: &Landmark) -> Point {
    Point::new(lm.x, lm.y)
}

/// Stamps a circle at every landmark. Negative thickness fills it.
pub fn stamp_points<'a, I>(canvas: &mut Mat, points: I, color: Bgr, radius: i32, thickness: i32) -> Result<(), Error>
where
    I: IntoIterator<Item = &'a Landmark>,
{
    let color = bgr_scalar(color);
    for lm in points {
        imgproc::circle(canvas, landmark_point(lm), radius, color, thickness, LINE_8, 0)?;
    }
    Ok(())
}

/// Draws a segment for every `(from, to)` index pair; pairs that point past
/// the face's points are skipped.
pub fn draw_edges(
    canvas: &mut Mat,
    face: &FaceLandmarks,
    edges: &[(usize, usize)],
    color: Bgr,
    thickness: i32,
) -> Result<(), Error> {
    let color = bgr_scalar(color);
    for &(from, to) in edges {
        let (Some(a), Some(b)) = (face.point(from), face.point(to)) else {
            continue;
        };
        imgproc::line(canvas, landmark_point(a), landmark_point(b), color, thickness, LINE_AA, 0)?;
    }
    Ok(())
}

/// Consecutive index pairs along `indices`, closing the loop when asked.
pub fn polyline_edges(indices: &[usize], closed: bool) -> Vec<(usize, usize)> {
    let mut edges: Vec<(usize, usize)> = indices.windows(2).map(|w| (w[0], w[1])).collect();
    if closed && indices.len() > 2 {
        edges.push((indices[indices.len() - 1], indices[0]));
    }
    edges
}

/// Packs a face's coordinates into an `(n, 2)` matrix of `[x, y]` rows.
pub fn face_to_ndarray(face: &FaceLandmarks, unit: CoordinateUnit) -> Result<Array2<f32>, Error> {
    let mut result: Vec<f32> = Vec::with_capacity(face.len() * 2);
    for lm in &face.points {
        let (x, y) = lm.position(unit);
        result.extend_from_slice(&[x, y]);
    }
    let arr = Array2::from_shape_vec((face.len(), 2), result)?;
    Ok(arr)
}
