pub mod extract;
pub mod tesseract;

use crate::region::BoxRect;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use extract::{extract_regions, ExtractParams};
pub use tesseract::TesseractCli;

/// Line-grouping identity reported by the OCR engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineKey {
    pub block: u32,
    pub paragraph: u32,
    pub line: u32,
}

/// One recognized word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrToken {
    pub line: LineKey,
    pub bbox: BoxRect,
    pub text: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrDiag {
    pub exe: String,
    pub version: Option<String>,
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

pub trait OcrEngine {
    fn doctor(&self) -> Result<OcrDiag>;
    fn recognize(&self, image: &Path) -> Result<Vec<OcrToken>>;
}
