//! Per-image failure taxonomy.
//!
//! Every variant is fatal for the image it was raised on and never for the
//! batch: the pipeline turns each one into an `error`-status result.

use std::path::PathBuf;
use thiserror::Error;

/// A semantic role the resolver has to fill from an output bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Score,
    Localization,
    Reliability,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Score => write!(f, "score"),
            Role::Localization => write!(f, "localization map"),
            Role::Reliability => write!(f, "reliability map"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("could not resolve {role} from output bundle (expected {height}x{width}); available keys: {available_keys:?}")]
    MissingRole {
        role: Role,
        height: usize,
        width: usize,
        available_keys: Vec<String>,
    },
}

#[derive(Error, Debug)]
pub enum TriageError {
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("could not read image {}: {source}", path.display())]
    ImageRead {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("forensics model invocation failed: {0:#}")]
    ModelInvocation(anyhow::Error),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("OCR failed: {0:#}")]
    Ocr(anyhow::Error),
}
