use thiserror::Error;

use crate::utils::coordinate::BackendKind;

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("detector for backend {0} has already been released")]
    Released(BackendKind),

    #[error("detector config selects backend {configured} but the supplied model is for {supplied}")]
    BackendMismatch {
        configured: BackendKind,
        supplied: BackendKind,
    },

    #[error("backend {backend} returned {found} points for face {face}, expected {expected}")]
    UnexpectedPointCount {
        backend: BackendKind,
        face: usize,
        found: usize,
        expected: usize,
    },

    #[error("invalid input image: {0}")]
    InvalidImage(String),

    #[error("failed to load model from {path}: {reason}")]
    ModelLoad { path: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}
