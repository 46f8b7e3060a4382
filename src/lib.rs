pub mod config;
pub mod error;
pub mod helper;
pub mod modules;
pub mod pipeline;
pub mod utils;

pub use config::config::{AppConfig, DetectorConfig, DrawConfig};
pub use error::LandmarkError;
pub use helper::export::ExportFormat;
pub use helper::expression::{Expression, ExpressionMetrics, FacialExpressionAnalyzer};
pub use helper::visualizer::{FaceLandmarkVisualizer, RenderStyle};
pub use modules::detector::{BackendModel, Detection, DetectorSession, LandmarkDetector};
pub use pipeline::pipeline::{LandmarkPipeline, LandmarkReport, ProcessOptions};
pub use utils::coordinate::{BackendKind, DetectionSummary, Landmark, LandmarkSet};
