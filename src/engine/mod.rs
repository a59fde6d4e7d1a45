pub mod python;
pub mod types;

use anyhow::Result;
use std::path::{Path, PathBuf};

pub use types::EngineDiag;

/// The external image-forensics model.
///
/// One blocking call per image; implementations must be shareable across
/// batch workers.
pub trait ForensicsEngine {
    fn doctor(&self) -> Result<EngineDiag>;

    /// Runs the model on `image` and returns the path of the output bundle
    /// it wrote under `out_dir`.
    fn infer(&self, image: &Path, out_dir: &Path) -> Result<PathBuf>;
}
