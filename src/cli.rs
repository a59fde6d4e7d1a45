use crate::{
    batch::{read_tasks, ImageTask},
    config::Config,
    engine::{python::PythonEngine, ForensicsEngine},
    ocr::{OcrEngine, TesseractCli},
    pipeline::Pipeline,
    report::{self, BatchReport, Summary},
    util::{ensure_dir, hash_file, now_rfc3339, sha256_hex},
};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
};

#[derive(Parser, Debug)]
#[command(name = "tamper-triage")]
#[command(about = "Screen-time screenshot tamper triage (forensics bundle + OCR regions + policy)")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./tamper-triage.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check the forensics model checkout, its weights and the OCR engine.
    Doctor {},
    /// Triage a single screenshot and print the result as JSON.
    Analyze {
        #[arg(long)]
        image: PathBuf,
        #[arg(long, default_value = "single")]
        task_id: String,
        #[arg(long, default_value = "image")]
        column: String,
    },
    /// Triage every screenshot referenced by a batch table.
    Batch {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref());
    let cfg = if cfg_path.exists() {
        Config::load(&cfg_path)?
    } else {
        Config::default()
    };

    match &args.cmd {
        Command::Doctor {} => {
            let _guard = init_logging(&args, &cfg, None)?;
            doctor(&cfg)
        }
        Command::Analyze {
            image,
            task_id,
            column,
        } => {
            let log_path = resolve_log_path(&cfg, None);
            let _guard = init_logging(&args, &cfg, log_path.as_deref())?;
            analyze(&cfg, ImageTask::new(task_id, column, image))
        }
        Command::Batch { csv, out_dir } => batch(&args, &cfg, csv, out_dir.as_deref()),
    }
}

fn resolve_config_path(user: Option<&Path>) -> PathBuf {
    if let Some(p) = user {
        return p.to_path_buf();
    }
    let default = PathBuf::from("tamper-triage.toml");
    if default.exists() {
        default
    } else {
        PathBuf::from("tamper-triage.example.toml")
    }
}

fn init_logging(
    args: &Args,
    cfg: &Config,
    file_path: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let directive = args.log_level.clone().unwrap_or_else(|| cfg.logging.level.clone());
    let filter = match EnvFilter::try_from_default_env() {
        Ok(from_env) => from_env,
        Err(_) => EnvFilter::try_new(&directive)
            .with_context(|| format!("invalid log level: {directive}"))?,
    };

    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);
    let console = if cfg.logging.json {
        console.json().boxed()
    } else {
        console.boxed()
    };

    let (file_layer, guard) = match file_path {
        Some(path) => {
            let (layer, guard) = log_file_layer(path)?;
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("logging already initialized: {e}"))?;

    Ok(guard)
}

/// Plain-text, ANSI-free log file written off the hot path.
fn log_file_layer<S>(path: &Path) -> Result<(Box<dyn Layer<S> + Send + Sync>, WorkerGuard)>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating log file {}", path.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(file);
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .boxed();
    Ok((layer, guard))
}

fn doctor(cfg: &Config) -> Result<()> {
    let engine = match PythonEngine::new(cfg) {
        Ok(engine) => serde_json::to_value(engine.doctor()?)?,
        Err(e) => serde_json::json!({ "ok": false, "error": format!("{e:#}") }),
    };
    let ocr = TesseractCli::new(cfg).doctor()?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "forensics": engine,
            "ocr": ocr,
        }))?
    );
    Ok(())
}

fn analyze(cfg: &Config, task: ImageTask) -> Result<()> {
    let run_dir = PathBuf::from(&cfg.paths.out_dir);
    ensure_dir(&run_dir)?;
    let pipeline = Pipeline::new(cfg, PythonEngine::new(cfg)?, TesseractCli::new(cfg), &run_dir);
    let result = pipeline.analyze(&task);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn batch(args: &Args, cfg: &Config, csv: &Path, out_override: Option<&Path>) -> Result<()> {
    if !csv.is_file() {
        return Err(anyhow!("batch table not found: {}", csv.display()));
    }

    // Same config + same table => same run directory.
    let cfg_hash = sha256_hex(cfg.normalized_for_hash().as_bytes());
    let csv_hash = hash_file(csv).with_context(|| format!("hashing {}", csv.display()))?;
    let run_id = sha256_hex(format!("{cfg_hash}:{csv_hash}").as_bytes());
    let run_dir = out_override
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(&cfg.paths.out_dir))
        .join(&run_id);

    if run_dir.exists() && !cfg.global.resume {
        return Err(anyhow!(
            "run directory {} exists and global.resume is off",
            run_dir.display()
        ));
    }
    ensure_dir(&run_dir.join("logs"))?;

    let log_path = resolve_log_path(cfg, Some(&run_dir));
    let _guard = init_logging(args, cfg, log_path.as_deref())?;
    info!(run_id = %run_id, run_dir = %run_dir.display(), "starting batch");

    if cfg.debug.dump_effective_config {
        std::fs::write(run_dir.join("effective-config.toml"), cfg.normalized_for_hash())?;
    }

    let tasks = read_tasks(csv, &cfg.batch)?;
    let pipeline = Pipeline::new(cfg, PythonEngine::new(cfg)?, TesseractCli::new(cfg), &run_dir);

    let started = now_rfc3339();
    let results = pipeline.run_batch(&tasks)?;
    let report = BatchReport {
        run_id,
        started,
        finished: now_rfc3339(),
        summary: Summary::from_results(&results),
        results,
    };
    info!(
        total = report.summary.total,
        ok = report.summary.ok,
        flagged = report.summary.flagged,
        error = report.summary.error,
        "batch finished"
    );

    write_outputs(cfg, &run_dir, csv, pipeline.crops_dir(), &report)?;

    if cfg.global.print_summary {
        let summary = serde_json::json!({
            "run_id": report.run_id,
            "run_dir": run_dir,
            "summary": report.summary,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}

fn write_outputs(
    cfg: &Config,
    run_dir: &Path,
    csv: &Path,
    crops_dir: &Path,
    report: &BatchReport,
) -> Result<()> {
    let out = &cfg.output;
    if out.write_report_csv {
        report::write_csv_file(
            &run_dir.join(&out.report_csv_filename),
            &report.results,
            cfg.evidence.best_text_max_chars,
        )?;
    }
    if out.write_report_json {
        let path = run_dir.join(&out.report_json_filename);
        std::fs::write(&path, serde_json::to_string_pretty(report)?)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    if out.write_index_json {
        let index = serde_json::json!({
            "run_id": report.run_id,
            "input": csv,
            "started": report.started,
            "finished": report.finished,
            "report_csv": out.write_report_csv.then_some(&out.report_csv_filename),
            "report_json": out.write_report_json.then_some(&out.report_json_filename),
            "crops_dir": crops_dir,
        });
        std::fs::write(run_dir.join("index.json"), serde_json::to_string_pretty(&index)?)?;
    }
    Ok(())
}

fn resolve_log_path(cfg: &Config, run_dir: Option<&Path>) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }

    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }

    if let Some(run_dir) = run_dir {
        return Some(run_dir.join("logs").join("tamper-triage.log"));
    }

    Some(PathBuf::from(&cfg.paths.out_dir).join("tamper-triage.log"))
}
