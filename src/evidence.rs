use crate::{
    policy::Status,
    region::{BoxRect, RegionScore},
    util::{ensure_dir, safe_filename},
};
use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView};
use std::path::{Path, PathBuf};
use tracing::info;

/// Self-describing, batch-unique name for a flagged image's crop.
pub fn evidence_filename(task_id: &str, column: &str, max_roi: f32, global: f32) -> String {
    format!(
        "{}_{}_roi{:.3}_g{:.3}.png",
        safe_filename(task_id),
        safe_filename(column),
        max_roi,
        global
    )
}

/// Crops `bbox` padded by `pad` on every side, clamped to the image.
pub fn padded_crop(image: &DynamicImage, bbox: &BoxRect, pad: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    let r = bbox
        .padded(pad as i64)
        .clamp_to(width as usize, height as usize);
    image.crop_imm(r.x as u32, r.y as u32, r.w as u32, r.h as u32)
}

pub struct EvidenceRequest<'a> {
    pub task_id: &'a str,
    pub column: &'a str,
    pub status: Status,
    pub best: Option<&'a RegionScore>,
    pub global_score: f32,
    pub max_roi_score: f32,
}

/// Writes the padded crop of the best region for flagged images.
///
/// Returns `None` without touching the filesystem for `ok`/`error` images and
/// for flagged images without a best region.
pub fn export(
    image: &DynamicImage,
    crops_dir: &Path,
    pad: u32,
    req: &EvidenceRequest<'_>,
) -> Result<Option<PathBuf>> {
    if req.status != Status::Flagged {
        return Ok(None);
    }
    let Some(best) = req.best else {
        return Ok(None);
    };

    ensure_dir(crops_dir)?;
    let path = crops_dir.join(evidence_filename(
        req.task_id,
        req.column,
        req.max_roi_score,
        req.global_score,
    ));
    let patch = padded_crop(image, &best.region.bbox, pad);
    patch
        .save(&path)
        .with_context(|| format!("writing evidence crop: {}", path.display()))?;
    info!(
        "evidence crop {} ({}x{}) for {:?}",
        path.display(),
        patch.width(),
        patch.height(),
        best.region.text
    );
    Ok(Some(path))
}
