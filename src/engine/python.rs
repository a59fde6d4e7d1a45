use super::{types::EngineDiag, ForensicsEngine};
use crate::{
    config::Config,
    util::{ensure_dir, expand_tilde, run_with_timeout},
};
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Runs a TruFor-style checkout's test script as a subprocess.
pub struct PythonEngine {
    cfg: Config,
    python_exe: PathBuf,
    entrypoint: PathBuf,
    weights_dir: PathBuf,
}

impl PythonEngine {
    pub fn new(cfg: &Config) -> Result<Self> {
        let model_root = expand_tilde(&cfg.forensics.model_root);
        let entrypoint = find_entrypoint(&model_root)?;
        let weights_dir = resolve_weights_dir(cfg, &model_root);
        if !weights_present(&weights_dir) {
            warn!(
                "no model weights found under {}; inference will likely fail",
                weights_dir.display()
            );
        }
        Ok(Self {
            cfg: cfg.clone(),
            python_exe: resolve_python_exe(&cfg.forensics.python_exe),
            entrypoint,
            weights_dir,
        })
    }

    fn timeout(&self) -> Option<Duration> {
        (self.cfg.forensics.timeout_seconds > 0)
            .then(|| Duration::from_secs(self.cfg.forensics.timeout_seconds))
    }
}

fn resolve_python_exe(raw: &str) -> PathBuf {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("auto") {
        if let Ok(env_val) = std::env::var("TRUFOR_PYTHON") {
            let p = expand_tilde(&env_val);
            if p.exists() {
                return p;
            }
        }
        return PathBuf::from("python3");
    }
    expand_tilde(raw)
}

fn resolve_weights_dir(cfg: &Config, model_root: &Path) -> PathBuf {
    if !cfg.forensics.weights_dir.is_empty() {
        return expand_tilde(&cfg.forensics.weights_dir);
    }
    model_root.join("test_docker").join("weights")
}

/// Locates the inference script under `<model_root>/test_docker/src`.
pub fn find_entrypoint(model_root: &Path) -> Result<PathBuf> {
    let src_dir = model_root.join("test_docker").join("src");
    for name in ["trufor_test.py", "test.py"] {
        let p = src_dir.join(name);
        if p.exists() {
            return Ok(p);
        }
    }

    if src_dir.is_dir() {
        let mut found: Vec<PathBuf> = walk_files(&src_dir)
            .into_iter()
            .filter(|p| {
                let name = p
                    .file_name()
                    .map(|n| n.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                name.ends_with(".py")
                    && name.contains("trufor")
                    && (name.contains("test") || name.contains("infer"))
            })
            .collect();
        found.sort();
        if let Some(p) = found.into_iter().next() {
            return Ok(p);
        }
    }

    Err(anyhow!(
        "could not find the forensics inference script under {}",
        src_dir.display()
    ))
}

fn weights_present(dir: &Path) -> bool {
    walk_files(dir).iter().any(|p| {
        let name = p.to_string_lossy();
        name.ends_with(".pth") || name.ends_with(".tar")
    })
}

fn walk_files(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&d) else {
            continue;
        };
        for entry in entries.flatten() {
            let p = entry.path();
            if p.is_dir() {
                stack.push(p);
            } else {
                out.push(p);
            }
        }
    }
    out
}

/// Removes `.npz` files left in `out_dir` by an earlier run, so a script that
/// exits cleanly without writing cannot hand back a stale bundle.
pub fn clear_stale_bundles(out_dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(out_dir)
        .with_context(|| format!("read_dir {}", out_dir.display()))?
        .flatten()
    {
        let p = entry.path();
        if p.is_file() && p.extension().is_some_and(|e| e == "npz") {
            std::fs::remove_file(&p)
                .with_context(|| format!("removing stale bundle {}", p.display()))?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// `<out_dir>/<image file name>.npz`, else the newest `.npz` in `out_dir`.
pub fn find_bundle(out_dir: &Path, image: &Path) -> Result<PathBuf> {
    if let Some(name) = image.file_name() {
        let mut expected = name.to_os_string();
        expected.push(".npz");
        let p = out_dir.join(expected);
        if p.exists() {
            return Ok(p);
        }
    }

    let newest = std::fs::read_dir(out_dir)
        .with_context(|| format!("read_dir {}", out_dir.display()))?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == "npz"))
        .filter_map(|p| {
            let mtime = std::fs::metadata(&p).and_then(|m| m.modified()).ok()?;
            Some((mtime, p))
        })
        .max_by_key(|(mtime, _)| *mtime)
        .map(|(_, p)| p);

    newest.ok_or_else(|| anyhow!("no .npz output found in {}", out_dir.display()))
}

impl ForensicsEngine for PythonEngine {
    fn doctor(&self) -> Result<EngineDiag> {
        let mut cmd = Command::new(&self.python_exe);
        cmd.arg("--version");
        let version_out = run_with_timeout(&mut cmd, Some(Duration::from_secs(30)));
        let (python_version, error) = match version_out {
            Ok(out) if out.status.success() => {
                let text = if out.stdout.is_empty() {
                    out.stderr
                } else {
                    out.stdout
                };
                (Some(String::from_utf8_lossy(&text).trim().to_string()), None)
            }
            Ok(out) => (None, Some(String::from_utf8_lossy(&out.stderr).trim().to_string())),
            Err(e) => (None, Some(format!("{e:#}"))),
        };
        let weights = weights_present(&self.weights_dir);
        Ok(EngineDiag {
            python_exe: self.python_exe.display().to_string(),
            python_version,
            entrypoint: Some(self.entrypoint.display().to_string()),
            weights_dir: self.weights_dir.display().to_string(),
            weights_present: weights,
            ok: error.is_none() && weights,
            error,
        })
    }

    fn infer(&self, image: &Path, out_dir: &Path) -> Result<PathBuf> {
        ensure_dir(out_dir)?;
        let image_abs = image
            .canonicalize()
            .with_context(|| format!("canonicalize image: {}", image.display()))?;
        let out_abs = out_dir
            .canonicalize()
            .with_context(|| format!("canonicalize out_dir: {}", out_dir.display()))?;
        let stale = clear_stale_bundles(&out_abs)?;
        if stale > 0 {
            debug!("removed {stale} stale bundle(s) from {}", out_abs.display());
        }
        let src_dir = self
            .entrypoint
            .parent()
            .ok_or_else(|| anyhow!("entrypoint has no parent: {}", self.entrypoint.display()))?;
        let script = self
            .entrypoint
            .file_name()
            .ok_or_else(|| anyhow!("entrypoint has no file name"))?;

        // The script resolves its yaml config relative to its own directory.
        let mut cmd = Command::new(&self.python_exe);
        cmd.current_dir(src_dir)
            .arg(script)
            .arg("-gpu")
            .arg(self.cfg.forensics.gpu.to_string())
            .arg("-in")
            .arg(&image_abs)
            .arg("-out")
            .arg(&out_abs);
        if self.cfg.forensics.save_np {
            cmd.arg("--save_np");
        }
        for (k, v) in &self.cfg.forensics.env {
            cmd.env(k, v);
        }

        info!("forensics model on {}", image_abs.display());
        let output = run_with_timeout(&mut cmd, self.timeout())?;
        if !output.status.success() {
            return Err(anyhow!(
                "forensics script exited with {}\nstdout:\n{}\nstderr:\n{}",
                output.status,
                String::from_utf8_lossy(&output.stdout).trim(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        if self.cfg.debug.keep_model_stderr && !output.stderr.is_empty() {
            debug!(
                "forensics stderr: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        find_bundle(&out_abs, &image_abs)
    }
}
