use anyhow::Error;
use opencv::core::{self, Mat, Scalar, Size, CV_32FC1, CV_8U, NORM_MINMAX};
use opencv::imgproc::{self, COLORMAP_JET, FILLED, LINE_8, LINE_AA};
use opencv::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::config::DrawConfig;
use crate::modules::{cascade, face_mesh, regression};
use crate::utils::coordinate::{BackendKind, FaceLandmarks, LandmarkSet};
use crate::utils::image::{bgr_scalar, draw_edges, image_size, landmark_point, stamp_points};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderStyle {
    Points,
    Mesh,
    Contours,
    Heatmap,
}

#[derive(Debug, Clone)]
pub struct FaceLandmarkVisualizer {
    draw: DrawConfig,
}

impl FaceLandmarkVisualizer {
    pub fn new(draw: DrawConfig) -> Self {
        FaceLandmarkVisualizer { draw }
    }

    /// Renders `landmarks` over a copy of `img`. Without landmarks the copy
    /// comes back unchanged.
    pub fn render(&self, img: &Mat, landmarks: Option<&LandmarkSet>, style: RenderStyle) -> Result<Mat, Error> {
        let Some(landmarks) = landmarks.filter(|set| !set.is_empty()) else {
            return Ok(img.try_clone()?);
        };
        debug!(?style, backend = %landmarks.backend, faces = landmarks.faces.len(), "rendering landmarks");
        match style {
            RenderStyle::Points => self.draw_points_only(img, landmarks),
            RenderStyle::Mesh => self.draw_connected_mesh(img, landmarks),
            RenderStyle::Contours => self.draw_contours_only(img, landmarks),
            RenderStyle::Heatmap => self.heatmap_overlay(img, landmarks),
        }
    }

    pub fn draw_points_only(&self, img: &Mat, landmarks: &LandmarkSet) -> Result<Mat, Error> {
        let mut canvas = img.try_clone()?;
        for face in &landmarks.faces {
            stamp_points(
                &mut canvas,
                &face.points,
                self.draw.landmark_color,
                self.draw.landmark_radius,
                self.draw.landmark_thickness,
            )?;
        }
        Ok(canvas)
    }

    pub fn draw_connected_mesh(&self, img: &Mat, landmarks: &LandmarkSet) -> Result<Mat, Error> {
        let mut canvas = img.try_clone()?;
        let (width, height) = image_size(img);
        for face in &landmarks.faces {
            match landmarks.backend {
                BackendKind::FaceMesh => {
                    let color = bgr_scalar(self.draw.mesh_color);
                    for (a, b) in face_mesh::triangulation_segments(face, width, height)? {
                        imgproc::line(&mut canvas, a, b, color, self.draw.mesh_thickness, LINE_AA, 0)?;
                    }
                }
                BackendKind::Cascade => {
                    draw_edges(&mut canvas, face, cascade::MESH_EDGES, self.draw.mesh_color, self.draw.mesh_thickness)?;
                }
                BackendKind::Regression => {
                    let edges = regression::mesh_edges(face);
                    draw_edges(&mut canvas, face, &edges, self.draw.mesh_color, self.draw.mesh_thickness)?;
                }
            }
        }
        Ok(canvas)
    }

    pub fn draw_contours_only(&self, img: &Mat, landmarks: &LandmarkSet) -> Result<Mat, Error> {
        let mut canvas = img.try_clone()?;
        for face in &landmarks.faces {
            let edges = contour_edges(landmarks.backend, face);
            draw_edges(&mut canvas, face, &edges, self.draw.contour_color, self.draw.contour_thickness)?;
        }
        Ok(canvas)
    }

    /// Point density over the whole image, min-max scaled to 8-bit.
    ///
    /// Every in-bounds point adds a filled disk of `heatmap_radius`, so
    /// overlapping disks stack; the field is then Gaussian blurred with a
    /// `heatmap_kernel` square kernel.
    pub fn density_field(&self, width: i32, height: i32, landmarks: &LandmarkSet) -> Result<Mat, Error> {
        let mut heat = Mat::new_rows_cols_with_default(height, width, CV_32FC1, Scalar::all(0.0))?;
        let mut disk = Mat::new_rows_cols_with_default(height, width, CV_32FC1, Scalar::all(0.0))?;
        let mut sum = Mat::default();
        let r = self.draw.heatmap_radius;
        for face in &landmarks.faces {
            for lm in &face.points {
                if lm.x < 0 || lm.x >= width || lm.y < 0 || lm.y >= height {
                    continue;
                }
                let center = landmark_point(lm);
                imgproc::circle(&mut disk, center, r, Scalar::all(1.0), FILLED, LINE_8, 0)?;
                core::add(&heat, &disk, &mut sum, &core::no_array(), -1)?;
                std::mem::swap(&mut heat, &mut sum);
                // clear the scratch disk for the next point
                imgproc::circle(&mut disk, center, r, Scalar::all(0.0), FILLED, LINE_8, 0)?;
            }
        }

        let mut blurred = Mat::default();
        let k = self.draw.heatmap_kernel;
        imgproc::gaussian_blur_def(&heat, &mut blurred, Size::new(k, k), 0.0)?;

        let mut scaled = Mat::default();
        core::normalize(&blurred, &mut scaled, 0.0, 255.0, NORM_MINMAX, CV_8U, &core::no_array())?;
        Ok(scaled)
    }

    pub fn heatmap_overlay(&self, img: &Mat, landmarks: &LandmarkSet) -> Result<Mat, Error> {
        let (width, height) = image_size(img);
        let density = self.density_field(width, height, landmarks)?;

        let mut colored = Mat::default();
        imgproc::apply_color_map(&density, &mut colored, COLORMAP_JET)?;

        let image_weight = self.draw.heatmap_image_weight;
        let mut overlay = Mat::default();
        core::add_weighted(img, image_weight, &colored, 1.0 - image_weight, 0.0, &mut overlay, -1)?;
        Ok(overlay)
    }
}

/// Outline subgraph of a face: face boundary, eyes and lips.
pub fn contour_edges(backend: BackendKind, face: &FaceLandmarks) -> Vec<(usize, usize)> {
    match backend {
        BackendKind::FaceMesh => face_mesh::contour_edges(),
        BackendKind::Cascade => cascade::CONTOUR_EDGES.to_vec(),
        BackendKind::Regression => regression::contour_edges(face),
    }
}

#[cfg(test)]
mod tests {
    use opencv::core::{MatTraitConstManual, Vec3b, CV_8UC3};

    use super::*;
    use crate::helper::normalize::normalize_landmarks;
    use crate::modules::testing::{frontal_mesh_face, frontal_regressed_face};
    use crate::utils::coordinate::{RawFace, RawPoint};

    fn blank(w: i32, h: i32) -> Mat {
        Mat::new_rows_cols_with_default(h, w, CV_8UC3, Scalar::new(30.0, 60.0, 90.0, 0.0)).unwrap()
    }

    fn same_pixels(a: &Mat, b: &Mat) -> bool {
        a.data_bytes().unwrap() == b.data_bytes().unwrap()
    }

    fn mesh_set(w: i32, h: i32) -> LandmarkSet {
        let face = frontal_mesh_face(0.9);
        normalize_landmarks(BackendKind::FaceMesh, RawFace::Indexed(face.points), w, h)
    }

    #[test]
    fn test_empty_landmarks_leave_image_unchanged() {
        let img = blank(80, 60);
        let visualizer = FaceLandmarkVisualizer::new(DrawConfig::new());
        let empty = LandmarkSet::empty(BackendKind::FaceMesh, 80, 60);
        for style in [RenderStyle::Points, RenderStyle::Mesh, RenderStyle::Contours, RenderStyle::Heatmap] {
            assert!(same_pixels(&visualizer.render(&img, Some(&empty), style).unwrap(), &img));
            assert!(same_pixels(&visualizer.render(&img, None, style).unwrap(), &img));
        }
    }

    #[test]
    fn test_every_style_draws_something() {
        let img = blank(200, 200);
        let visualizer = FaceLandmarkVisualizer::new(DrawConfig::new());
        let set = mesh_set(200, 200);
        for style in [RenderStyle::Points, RenderStyle::Mesh, RenderStyle::Contours, RenderStyle::Heatmap] {
            let rendered = visualizer.render(&img, Some(&set), style).unwrap();
            assert_eq!(rendered.size().unwrap(), img.size().unwrap());
            assert!(!same_pixels(&rendered, &img), "style {:?} left the image untouched", style);
        }
    }

    #[test]
    fn test_input_is_not_mutated() {
        let img = blank(200, 200);
        let copy = img.try_clone().unwrap();
        let visualizer = FaceLandmarkVisualizer::new(DrawConfig::new());
        let _ = visualizer.render(&img, Some(&mesh_set(200, 200)), RenderStyle::Mesh).unwrap();
        assert!(same_pixels(&img, &copy));
    }

    #[test]
    fn test_points_marker_color() {
        let img = blank(100, 100);
        let set = normalize_landmarks(BackendKind::FaceMesh, RawFace::Indexed(vec![RawPoint::new(0.5, 0.5)]), 100, 100);
        let visualizer = FaceLandmarkVisualizer::new(DrawConfig::new());
        let out = visualizer.draw_points_only(&img, &set).unwrap();
        assert_eq!(*out.at_2d::<Vec3b>(50, 50).unwrap(), Vec3b::from([0, 255, 0]));
        assert_eq!(*out.at_2d::<Vec3b>(10, 10).unwrap(), Vec3b::from([30, 60, 90]));
    }

    #[test]
    fn test_single_point_heat_is_radially_symmetric() {
        let set = normalize_landmarks(BackendKind::FaceMesh, RawFace::Indexed(vec![RawPoint::new(0.5, 0.5)]), 101, 101);
        let visualizer = FaceLandmarkVisualizer::new(DrawConfig::new());
        let field = visualizer.density_field(101, 101, &set).unwrap();

        let at = |row: i32, col: i32| *field.at_2d::<u8>(row, col).unwrap() as i32;
        assert_eq!(at(50, 50), 255);
        let mut previous = at(50, 50);
        for d in 1..30 {
            let ring = [at(50, 50 + d), at(50, 50 - d), at(50 + d, 50), at(50 - d, 50)];
            let (lo, hi) = (*ring.iter().min().unwrap(), *ring.iter().max().unwrap());
            assert!(hi - lo <= 1, "asymmetric at distance {}: {:?}", d, ring);
            assert!(hi <= previous + 1, "heat rises away from the peak at distance {}", d);
            previous = hi;
        }
        assert_eq!(at(0, 0), 0);
    }

    #[test]
    fn test_overlapping_disks_stack() {
        let draw = DrawConfig { heatmap_kernel: 1, ..DrawConfig::new() };
        let visualizer = FaceLandmarkVisualizer::new(draw);
        // two points on one pixel, one point far away
        let points = vec![RawPoint::new(20.0, 20.0), RawPoint::new(20.0, 20.0), RawPoint::new(70.0, 70.0)];
        let set = normalize_landmarks(BackendKind::Cascade, RawFace::Indexed(points), 100, 100);
        let field = visualizer.density_field(100, 100, &set).unwrap();

        assert_eq!(*field.at_2d::<u8>(20, 20).unwrap(), 255);
        let single = *field.at_2d::<u8>(70, 70).unwrap() as i32;
        assert!((single - 128).abs() <= 1, "single disk scaled to {}", single);
        assert_eq!(*field.at_2d::<u8>(45, 45).unwrap(), 0);
    }

    #[test]
    fn test_regression_and_cascade_styles() {
        let img = blank(300, 300);
        let visualizer = FaceLandmarkVisualizer::new(DrawConfig::new());

        let regressed = frontal_regressed_face(None);
        let grouped = RawFace::Grouped(
            regressed
                .groups
                .into_iter()
                .map(|(g, pts)| (g, pts.into_iter().map(|(x, y)| RawPoint::new(x, y)).collect()))
                .collect(),
        );
        let set = normalize_landmarks(BackendKind::Regression, grouped, 300, 300);
        let contours = visualizer.draw_contours_only(&img, &set).unwrap();
        let mesh = visualizer.draw_connected_mesh(&img, &set).unwrap();
        assert!(!same_pixels(&contours, &img));
        assert!(!same_pixels(&mesh, &contours));

        let anchors = cascade::anchors_from_box(&opencv::core::Rect::new(50, 50, 200, 200));
        let set = normalize_landmarks(BackendKind::Cascade, RawFace::Indexed(anchors), 300, 300);
        let contours = visualizer.draw_contours_only(&img, &set).unwrap();
        // outline passes through the top edge midpoint
        assert_ne!(*contours.at_2d::<Vec3b>(50, 150).unwrap(), Vec3b::from([30, 60, 90]));
    }
}
