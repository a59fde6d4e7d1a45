use crate::{
    batch::ImageTask,
    bundle::OutputBundle,
    config::Config,
    engine::ForensicsEngine,
    error::TriageError,
    evidence::{self, EvidenceRequest},
    ocr::{extract_regions, ExtractParams, OcrEngine},
    policy::{self, Status},
    report::AnalysisResult,
    resolve::{resolve_with, Normalization},
    roi::{best_region, score_regions, ScoreParams},
    util::safe_filename,
};
use anyhow::{Context, Result};
use image::GenericImageView;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Per-image tamper triage. Holds no state that changes between images.
pub struct Pipeline<E: ForensicsEngine, O: OcrEngine> {
    cfg: Config,
    engine: E,
    ocr: O,
    bundles_dir: PathBuf,
    crops_dir: PathBuf,
}

impl<E: ForensicsEngine, O: OcrEngine> Pipeline<E, O> {
    /// Model outputs and evidence crops are written under `run_dir`.
    pub fn new(cfg: &Config, engine: E, ocr: O, run_dir: &Path) -> Self {
        Self {
            cfg: cfg.clone(),
            engine,
            ocr,
            bundles_dir: run_dir.join(&cfg.paths.bundles_subdir),
            crops_dir: run_dir.join(&cfg.paths.crops_subdir),
        }
    }

    pub fn crops_dir(&self) -> &Path {
        &self.crops_dir
    }

    /// Never fails: every per-image failure becomes an `error` result.
    pub fn analyze(&self, task: &ImageTask) -> AnalysisResult {
        let started = Instant::now();
        match self.try_analyze(task) {
            Ok(res) => {
                info!(
                    "{} [{}] status={} global={:.3} max_roi={:.3} rois={} in {:?}",
                    task.task_id,
                    task.column,
                    res.status,
                    res.global_score.unwrap_or_default(),
                    res.max_roi_score.unwrap_or_default(),
                    res.n_rois,
                    started.elapsed()
                );
                res
            }
            Err(err) => {
                warn!("{} [{}] error: {err}", task.task_id, task.column);
                AnalysisResult::failed(task, err.to_string())
            }
        }
    }

    fn try_analyze(&self, task: &ImageTask) -> Result<AnalysisResult, TriageError> {
        if !task.path.is_file() {
            return Err(TriageError::FileNotFound(task.path.clone()));
        }
        let image = image::open(&task.path).map_err(|source| TriageError::ImageRead {
            path: task.path.clone(),
            source,
        })?;
        let (width, height) = image.dimensions();

        let out_dir = self.bundles_dir.join(format!(
            "{}_{}",
            safe_filename(&task.task_id),
            safe_filename(&task.column)
        ));
        let bundle_path = self
            .engine
            .infer(&task.path, &out_dir)
            .map_err(TriageError::ModelInvocation)?;
        let bundle =
            OutputBundle::load_npz(&bundle_path).map_err(TriageError::ModelInvocation)?;
        let resolved = resolve_with(
            &bundle,
            height as usize,
            width as usize,
            Normalization::from(&self.cfg.scoring),
        )?;

        let tokens = match self.ocr.recognize(&task.path) {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!("{}; continuing with zero regions", TriageError::Ocr(e));
                Vec::new()
            }
        };
        let regions = extract_regions(&tokens, &ExtractParams::from(&self.cfg.ocr));
        let scores = score_regions(&resolved, &regions, &ScoreParams::from(&self.cfg.scoring));
        debug!(tokens = tokens.len(), regions = regions.len(), "ocr regions");

        let max_roi = scores.iter().map(|s| s.score).fold(0.0f32, f32::max);
        let best = best_region(&scores).cloned();
        let decision = policy::decide_with(&self.cfg.decision, resolved.score, max_roi);

        let crop_path = if self.cfg.evidence.write_crops {
            let req = EvidenceRequest {
                task_id: &task.task_id,
                column: &task.column,
                status: decision.status,
                best: best.as_ref(),
                global_score: resolved.score,
                max_roi_score: max_roi,
            };
            match evidence::export(&image, &self.crops_dir, self.cfg.evidence.crop_pad, &req) {
                Ok(p) => p,
                Err(e) => {
                    warn!("evidence export failed for {}: {e:#}", task.task_id);
                    None
                }
            }
        } else {
            None
        };

        if decision.status == Status::Flagged && best.is_none() {
            debug!("{} flagged without a region to crop", task.task_id);
        }

        Ok(AnalysisResult {
            task_id: task.task_id.clone(),
            image_col: task.column.clone(),
            image_path: task.path.display().to_string(),
            status: decision.status,
            error: String::new(),
            global_score: Some(resolved.score),
            max_roi_score: Some(max_roi),
            n_rois: regions.len(),
            best_region: best,
            global_tripped: decision.global_tripped,
            roi_tripped: decision.roi_tripped,
            reliability_defaulted: resolved.reliability_defaulted,
            bundle_path: Some(bundle_path.display().to_string()),
            crop_path: crop_path.map(|p| p.display().to_string()),
        })
    }

    /// Analyzes `tasks` on at most `batch.max_workers` threads and returns the
    /// results in input order.
    pub fn run_batch(&self, tasks: &[ImageTask]) -> Result<Vec<AnalysisResult>>
    where
        E: Sync,
        O: Sync,
    {
        let workers = self.cfg.batch.max_workers.clamp(1, tasks.len().max(1));
        info!("batch of {} images on {} worker(s)", tasks.len(), workers);
        if workers == 1 {
            return Ok(tasks.iter().map(|t| self.analyze(t)).collect());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("triage-{i}"))
            .build()
            .context("building batch worker pool")?;
        Ok(pool.install(|| tasks.par_iter().map(|t| self.analyze(t)).collect()))
    }
}
