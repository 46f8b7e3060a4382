use anyhow::{Context, Error};
use opencv::core::Mat;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::config::{AppConfig, DetectorConfig};
use crate::error::LandmarkError;
use crate::helper::export::{export_expressions_json, export_landmarks, ExportFormat};
use crate::helper::expression::{ExpressionMetrics, FacialExpressionAnalyzer};
use crate::helper::visualizer::{FaceLandmarkVisualizer, RenderStyle};
use crate::modules::cascade::HaarCascade;
use crate::modules::detector::{BackendModel, DetectorSession};
use crate::utils::coordinate::{DetectionSummary, LandmarkSet};

/// Per-request choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessOptions {
    pub style: RenderStyle,
    pub analyze_expressions: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        ProcessOptions { style: RenderStyle::Points, analyze_expressions: true }
    }
}

/// Everything one processed image yields.
#[derive(Debug)]
pub struct LandmarkReport {
    /// Input with every point stamped, as the detector returned it.
    pub annotated: Mat,
    /// Input rendered in the requested style.
    pub rendered: Mat,
    pub landmarks: LandmarkSet,
    pub summary: DetectionSummary,
    pub expressions: Option<ExpressionMetrics>,
}

impl LandmarkReport {
    pub fn export_landmarks(&self, format: ExportFormat) -> Result<String, Error> {
        export_landmarks(&self.landmarks, format)
    }

    /// `None` when no face was analyzed.
    pub fn export_expressions(&self) -> Result<Option<String>, Error> {
        self.expressions.as_ref().map(export_expressions_json).transpose()
    }
}

/// The only built-in model is the Haar cascade; the other backends need a
/// caller-supplied model.
///
/// # Arguments
/// * `config` - &DetectorConfig
///
/// # Returns
/// * `Result<BackendModel, Error>`
pub fn builtin_model(config: &DetectorConfig) -> Result<BackendModel, Error> {
    match config {
        DetectorConfig::Cascade(c) => Ok(BackendModel::Cascade(Box::new(HaarCascade::load(&c.model_path)?))),
        other => Err(LandmarkError::Config(format!("no built-in model for backend {}", other.backend())).into()),
    }
}

#[derive(Debug, Clone)]
pub struct LandmarkPipeline {
    config: AppConfig,
    visualizer: FaceLandmarkVisualizer,
    analyzer: FacialExpressionAnalyzer,
}

impl LandmarkPipeline {
    /// new validates the config and initializes the pipeline.
    ///
    /// # Arguments
    /// * `config` - AppConfig
    ///
    /// # Returns
    /// * `Result<Self, Error>`
    pub fn new(config: AppConfig) -> Result<Self, Error> {
        config.validate()?;
        let visualizer = FaceLandmarkVisualizer::new(config.draw.clone());
        let analyzer = FacialExpressionAnalyzer::new(config.detector.backend());
        Ok(LandmarkPipeline { config, visualizer, analyzer })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn visualizer(&self) -> &FaceLandmarkVisualizer {
        &self.visualizer
    }

    /// open_session wraps `model` in a session for the configured backend.
    ///
    /// # Arguments
    /// * `model` - BackendModel, must match the configured backend
    ///
    /// # Returns
    /// * `Result<DetectorSession, Error>`
    pub fn open_session(&self, model: BackendModel) -> Result<DetectorSession, Error> {
        DetectorSession::open(&self.config.detector, &self.config.draw, model)
    }

    /// process_with_session runs detection, rendering and expression analysis on
    /// one image, leaving the session open for the next one.
    ///
    /// # Arguments
    /// * `session` - an open DetectorSession
    /// * `img` - BGR OpenCV matrix
    /// * `options` - &ProcessOptions
    ///
    /// # Returns
    /// * `Result<LandmarkReport, Error>`
    pub fn process_with_session(
        &self,
        session: &mut DetectorSession,
        img: &Mat,
        options: &ProcessOptions,
    ) -> Result<LandmarkReport, Error> {
        let detection = session.detect(img).context("landmark detection failed")?;

        if !detection.summary.success {
            warn!(backend = %session.backend(), "no face detected");
        }

        let rendered = self.visualizer.render(img, Some(&detection.landmarks), options.style)?;
        let expressions = if options.analyze_expressions {
            self.analyzer.analyze(&detection.landmarks)
        } else {
            None
        };

        info!(
            backend = %detection.landmarks.backend,
            faces = detection.summary.faces_detected,
            points = detection.summary.total_landmarks,
            coverage = detection.summary.coverage_percent(detection.landmarks.backend),
            expression = ?expressions.as_ref().map(|m| m.expression),
            "image processed"
        );

        Ok(LandmarkReport {
            annotated: detection.annotated,
            rendered,
            landmarks: detection.landmarks,
            summary: detection.summary,
            expressions,
        })
    }

    /// process loads the model for the configured backend, processes one image
    /// and releases the model again, also on failure.
    ///
    /// # Arguments
    /// * `img` - BGR OpenCV matrix
    /// * `options` - &ProcessOptions
    /// * `load_model` - builds the model for the configured backend
    ///
    /// # Returns
    /// * `Result<LandmarkReport, Error>`
    pub fn process<F>(&self, img: &Mat, options: &ProcessOptions, load_model: F) -> Result<LandmarkReport, Error>
    where
        F: FnOnce(&DetectorConfig) -> Result<BackendModel, Error>,
    {
        let model = load_model(&self.config.detector)?;
        let mut session = self.open_session(model)?;
        let report = self.process_with_session(&mut session, img, options);
        session.close();
        report
    }
}
