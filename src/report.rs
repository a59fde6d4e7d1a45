use crate::{
    batch::ImageTask,
    policy::Status,
    region::RegionScore,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// Verdict for one image. The only per-image state that outlives a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub task_id: String,
    pub image_col: String,
    pub image_path: String,
    pub status: Status,
    #[serde(default)]
    pub error: String,
    pub global_score: Option<f32>,
    pub max_roi_score: Option<f32>,
    pub n_rois: usize,
    pub best_region: Option<RegionScore>,
    #[serde(default)]
    pub global_tripped: bool,
    #[serde(default)]
    pub roi_tripped: bool,
    #[serde(default)]
    pub reliability_defaulted: bool,
    pub bundle_path: Option<String>,
    pub crop_path: Option<String>,
}

impl AnalysisResult {
    pub fn failed(task: &ImageTask, message: impl Into<String>) -> Self {
        Self {
            task_id: task.task_id.clone(),
            image_col: task.column.clone(),
            image_path: task.path.display().to_string(),
            status: Status::Error,
            error: message.into(),
            global_score: None,
            max_roi_score: None,
            n_rois: 0,
            best_region: None,
            global_tripped: false,
            roi_tripped: false,
            reliability_defaulted: false,
            bundle_path: None,
            crop_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub ok: usize,
    pub flagged: usize,
    pub error: usize,
}

impl Summary {
    pub fn from_results(results: &[AnalysisResult]) -> Self {
        let mut s = Summary {
            total: results.len(),
            ..Default::default()
        };
        for r in results {
            match r.status {
                Status::Ok => s.ok += 1,
                Status::Flagged => s.flagged += 1,
                Status::Error => s.error += 1,
            }
        }
        s
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: String,
    pub started: String,
    pub finished: String,
    pub summary: Summary,
    pub results: Vec<AnalysisResult>,
}

pub const CSV_HEADER: &str = "task_id,image_col,image_path,status,error,global_score,max_roi_score,n_rois,bundle_path,best_roi_text,best_roi_conf,crop_path";

/// One row per image; missing numbers are empty cells.
pub fn write_csv<W: Write>(
    mut w: W,
    results: &[AnalysisResult],
    text_max_chars: usize,
) -> Result<()> {
    writeln!(w, "{CSV_HEADER}")?;
    for r in results {
        let fmt_opt = |v: Option<f32>| v.map(|v| format!("{v:.6}")).unwrap_or_default();
        let best_text = r
            .best_region
            .as_ref()
            .map(|b| b.region.text.chars().take(text_max_chars).collect::<String>())
            .unwrap_or_default();
        let best_conf = r
            .best_region
            .as_ref()
            .map(|b| format!("{:.2}", b.region.confidence))
            .unwrap_or_default();
        let cells = [
            csv_escape(&r.task_id),
            csv_escape(&r.image_col),
            csv_escape(&r.image_path),
            r.status.to_string(),
            csv_escape(&r.error),
            fmt_opt(r.global_score),
            fmt_opt(r.max_roi_score),
            r.n_rois.to_string(),
            csv_escape(r.bundle_path.as_deref().unwrap_or("")),
            csv_escape(&best_text),
            best_conf,
            csv_escape(r.crop_path.as_deref().unwrap_or("")),
        ];
        writeln!(w, "{}", cells.join(","))?;
    }
    Ok(())
}

pub fn write_csv_file(
    path: &Path,
    results: &[AnalysisResult],
    text_max_chars: usize,
) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("create report: {}", path.display()))?;
    let mut w = std::io::BufWriter::new(file);
    write_csv(&mut w, results, text_max_chars)?;
    w.flush()?;
    Ok(())
}

fn csv_escape(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
