use super::{LineKey, OcrDiag, OcrEngine, OcrToken};
use crate::{config::Config, region::BoxRect, util::run_with_timeout};
use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::debug;

/// Tesseract word level in TSV output.
const WORD_LEVEL: u32 = 5;

pub struct TesseractCli {
    exe: PathBuf,
    lang: String,
    psm: u32,
    timeout: Option<Duration>,
}

impl TesseractCli {
    pub fn new(cfg: &Config) -> Self {
        Self {
            exe: crate::util::expand_tilde(&cfg.ocr.tesseract_exe),
            lang: cfg.ocr.lang.clone(),
            psm: cfg.ocr.psm,
            timeout: (cfg.ocr.timeout_seconds > 0)
                .then(|| Duration::from_secs(cfg.ocr.timeout_seconds)),
        }
    }
}

impl OcrEngine for TesseractCli {
    fn doctor(&self) -> Result<OcrDiag> {
        let mut cmd = Command::new(&self.exe);
        cmd.arg("--version");
        let diag = match run_with_timeout(&mut cmd, self.timeout) {
            Ok(out) if out.status.success() => {
                // Older builds print the banner on stderr.
                let banner = if out.stdout.is_empty() {
                    out.stderr
                } else {
                    out.stdout
                };
                OcrDiag {
                    exe: self.exe.display().to_string(),
                    version: String::from_utf8_lossy(&banner)
                        .lines()
                        .next()
                        .map(|l| l.trim().to_string()),
                    ok: true,
                    error: None,
                }
            }
            Ok(out) => OcrDiag {
                exe: self.exe.display().to_string(),
                version: None,
                ok: false,
                error: Some(String::from_utf8_lossy(&out.stderr).trim().to_string()),
            },
            Err(e) => OcrDiag {
                exe: self.exe.display().to_string(),
                version: None,
                ok: false,
                error: Some(format!("{e:#}")),
            },
        };
        Ok(diag)
    }

    fn recognize(&self, image: &Path) -> Result<Vec<OcrToken>> {
        let mut cmd = Command::new(&self.exe);
        cmd.arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(&self.lang)
            .arg("--psm")
            .arg(self.psm.to_string())
            .arg("tsv");

        let output = run_with_timeout(&mut cmd, self.timeout)?;
        if !output.status.success() {
            return Err(anyhow!(
                "tesseract failed on {}: {}",
                image.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let tokens = parse_tsv(&String::from_utf8_lossy(&output.stdout));
        debug!("tesseract {} tokens from {}", tokens.len(), image.display());
        Ok(tokens)
    }
}

/// Parses `tesseract ... tsv` output into word tokens.
///
/// Columns: level, page_num, block_num, par_num, line_num, word_num, left,
/// top, width, height, conf, text. Non-word rows carry `conf = -1`.
pub fn parse_tsv(tsv: &str) -> Vec<OcrToken> {
    let mut tokens = Vec::new();
    for row in tsv.lines() {
        let fields: Vec<&str> = row.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }
        let Ok(level) = fields[0].trim().parse::<u32>() else {
            // Header row.
            continue;
        };
        if level != WORD_LEVEL {
            continue;
        }
        let conf: f32 = fields[10].trim().parse().unwrap_or(-1.0);
        if conf < 0.0 {
            continue;
        }
        let num = |i: usize| fields[i].trim().parse::<i64>().unwrap_or(0);
        tokens.push(OcrToken {
            line: LineKey {
                block: num(2) as u32,
                paragraph: num(3) as u32,
                line: num(4) as u32,
            },
            bbox: BoxRect::new(num(6), num(7), num(8), num(9)),
            text: fields[11].to_string(),
            confidence: conf,
        });
    }
    tokens
}
