use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub forensics: Forensics,
    #[serde(default)]
    pub ocr: Ocr,
    #[serde(default)]
    pub scoring: Scoring,
    #[serde(default)]
    pub decision: Decision,
    #[serde(default)]
    pub evidence: Evidence,
    #[serde(default)]
    pub batch: Batch,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub debug: Debug,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw)
            .with_context(|| format!("parsing config TOML: {}", path.display()))?;
        cfg.validate()
            .with_context(|| format!("invalid config: {}", path.display()))?;
        Ok(cfg)
    }

    /// Canonical TOML rendering; feeds the run id and `effective-config.toml`.
    pub fn normalized_for_hash(&self) -> String {
        toml::to_string(self).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("decision.global_thresh", self.decision.global_thresh),
            ("decision.roi_thresh", self.decision.roi_thresh),
        ] {
            if !(v > 0.0 && v <= 1.0) {
                return Err(anyhow!("{name} must be in (0, 1]: {v}"));
            }
        }
        for (name, v) in [
            ("scoring.rel_min", self.scoring.rel_min),
            ("scoring.min_reliable_coverage", self.scoring.min_reliable_coverage),
            ("scoring.weak_signal_weight", self.scoring.weak_signal_weight),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(anyhow!("{name} must be in [0, 1]: {v}"));
            }
        }
        let lo = self.scoring.percentile_lo;
        let hi = self.scoring.percentile_hi;
        if !(0.0..=100.0).contains(&lo) || !(0.0..=100.0).contains(&hi) || lo >= hi {
            return Err(anyhow!(
                "scoring percentiles must satisfy 0 <= lo < hi <= 100: lo={lo} hi={hi}"
            ));
        }
        if self.batch.path_columns.is_empty() {
            return Err(anyhow!("batch.path_columns must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Global {
    pub resume: bool,
    pub print_summary: bool,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            resume: true,
            print_summary: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paths {
    pub out_dir: String,
    pub bundles_subdir: String,
    pub crops_subdir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            out_dir: "out".into(),
            bundles_subdir: "bundles".into(),
            crops_subdir: "crops".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Forensics {
    pub python_exe: String,
    pub model_root: String,
    /// Empty means `<model_root>/test_docker/weights`.
    pub weights_dir: String,
    pub gpu: i32,
    pub save_np: bool,
    pub timeout_seconds: u64,
    #[serde(default)]
    pub env: std::collections::BTreeMap<String, String>,
}
impl Default for Forensics {
    fn default() -> Self {
        Self {
            python_exe: "python3".into(),
            model_root: "TruFor".into(),
            weights_dir: "".into(),
            gpu: -1,
            save_np: false,
            timeout_seconds: 600,
            env: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ocr {
    pub tesseract_exe: String,
    pub lang: String,
    pub psm: u32,
    pub timeout_seconds: u64,
    pub min_conf: f32,
    pub min_size: u32,
    pub filter_small_tokens: bool,
}
impl Default for Ocr {
    fn default() -> Self {
        Self {
            tesseract_exe: "tesseract".into(),
            lang: "eng".into(),
            psm: 3,
            timeout_seconds: 120,
            min_conf: 40.0,
            min_size: 18,
            filter_small_tokens: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scoring {
    pub rel_min: f32,
    /// Fraction of reliable pixels below which a region falls back to the
    /// downweighted estimator. Heuristic; recalibrate on labeled data.
    pub min_reliable_coverage: f32,
    /// Heuristic; recalibrate on labeled data.
    pub weak_signal_weight: f32,
    pub percentile_lo: f32,
    pub percentile_hi: f32,
    pub epsilon: f32,
}
impl Default for Scoring {
    fn default() -> Self {
        Self {
            rel_min: 0.40,
            min_reliable_coverage: 0.15,
            weak_signal_weight: 0.25,
            percentile_lo: 1.0,
            percentile_hi: 99.0,
            epsilon: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub global_thresh: f32,
    pub roi_thresh: f32,
}
impl Default for Decision {
    fn default() -> Self {
        Self {
            global_thresh: 0.50,
            roi_thresh: 0.22,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub write_crops: bool,
    pub crop_pad: u32,
    pub best_text_max_chars: usize,
}
impl Default for Evidence {
    fn default() -> Self {
        Self {
            write_crops: true,
            crop_pad: 28,
            best_text_max_chars: 80,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub task_id_column: String,
    pub path_columns: Vec<String>,
    pub max_workers: usize,
}
impl Default for Batch {
    fn default() -> Self {
        Self {
            task_id_column: "task_id".into(),
            path_columns: vec![
                "total_screenshot_path".into(),
                "app_screenshot1_path".into(),
                "app_screenshot2_path".into(),
                "app_screenshot3_path".into(),
            ],
            max_workers: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub write_report_csv: bool,
    pub write_report_json: bool,
    pub write_index_json: bool,
    pub report_csv_filename: String,
    pub report_json_filename: String,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            write_report_csv: true,
            write_report_json: true,
            write_index_json: true,
            report_csv_filename: "report.csv".into(),
            report_json_filename: "report.json".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: true,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debug {
    pub keep_model_stderr: bool,
    pub dump_effective_config: bool,
}
impl Default for Debug {
    fn default() -> Self {
        Self {
            keep_model_stderr: true,
            dump_effective_config: true,
        }
    }
}
