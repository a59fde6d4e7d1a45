use anyhow::{anyhow, Result};
use ndarray::{arr0, Array2};
use ndarray_npy::NpzWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tamper_triage::{
    batch::ImageTask,
    config::Config,
    engine::{EngineDiag, ForensicsEngine},
    ocr::{LineKey, OcrDiag, OcrEngine, OcrToken},
    pipeline::Pipeline,
    policy::Status,
    region::BoxRect,
};

/// Writes a bundle shaped like the real model's: a 0-d score and an H x W map
/// that is zero except for `patch`.
struct FakeEngine {
    score: Option<f32>,
    patch: Option<(BoxRect, f32)>,
    fail: bool,
    calls: Arc<AtomicUsize>,
}

impl FakeEngine {
    fn new(score: Option<f32>, patch: Option<(BoxRect, f32)>) -> Self {
        Self {
            score,
            patch,
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(None, None)
        }
    }
}

impl ForensicsEngine for FakeEngine {
    fn doctor(&self) -> Result<EngineDiag> {
        Err(anyhow!("not a real engine"))
    }

    fn infer(&self, image: &Path, out_dir: &Path) -> Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("model exited with status 1"));
        }
        let (width, height) = image::image_dimensions(image)?;
        let mut map = Array2::<f32>::zeros((height as usize, width as usize));
        if let Some((b, v)) = self.patch {
            map.slice_mut(ndarray::s![
                b.y as usize..b.y2() as usize,
                b.x as usize..b.x2() as usize
            ])
            .fill(v);
        }

        std::fs::create_dir_all(out_dir)?;
        let name = image.file_name().ok_or_else(|| anyhow!("no file name"))?;
        let path = out_dir.join(format!("{}.npz", name.to_string_lossy()));
        let mut npz = NpzWriter::new(std::fs::File::create(&path)?);
        if let Some(score) = self.score {
            npz.add_array("integrity_score", &arr0(score))?;
        }
        npz.add_array("pred_map", &map)?;
        npz.finish()?;
        Ok(path)
    }
}

struct FakeOcr {
    tokens: Vec<OcrToken>,
    fail: bool,
}

impl FakeOcr {
    fn with(tokens: Vec<OcrToken>) -> Self {
        Self {
            tokens,
            fail: false,
        }
    }
}

impl OcrEngine for FakeOcr {
    fn doctor(&self) -> Result<OcrDiag> {
        Err(anyhow!("not a real engine"))
    }

    fn recognize(&self, _image: &Path) -> Result<Vec<OcrToken>> {
        if self.fail {
            return Err(anyhow!("tesseract: command not found"));
        }
        Ok(self.tokens.clone())
    }
}

fn tok(x: i64, y: i64, w: i64, h: i64, text: &str) -> OcrToken {
    OcrToken {
        line: LineKey {
            block: 1,
            paragraph: 1,
            line: 1,
        },
        bbox: BoxRect::new(x, y, w, h),
        text: text.to_string(),
        confidence: 92.0,
    }
}

fn screen_time_tokens() -> Vec<OcrToken> {
    vec![tok(40, 40, 18, 20, "7h"), tok(62, 40, 18, 20, "35m")]
}

fn write_png(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    image::RgbImage::from_pixel(400, 300, image::Rgb([200, 200, 200]))
        .save(&path)
        .unwrap();
    path
}

#[test]
fn tampered_digits_flag_and_export_a_crop() {
    let dir = tempfile::tempdir().unwrap();
    let img = write_png(dir.path(), "shot.png");
    let run_dir = dir.path().join("run");

    let engine = FakeEngine::new(Some(0.3), Some((BoxRect::new(40, 40, 40, 20), 0.28)));
    let pipeline = Pipeline::new(
        &Config::default(),
        engine,
        FakeOcr::with(screen_time_tokens()),
        &run_dir,
    );
    let res = pipeline.analyze(&ImageTask::new("task1", "total_screenshot_path", &img));

    assert_eq!(res.status, Status::Flagged, "error: {}", res.error);
    assert!(!res.global_tripped);
    assert!(res.roi_tripped);
    assert!(res.reliability_defaulted);
    assert_eq!(res.n_rois, 1);
    assert!((res.global_score.unwrap() - 0.3).abs() < 1e-6);
    assert!((res.max_roi_score.unwrap() - 0.28).abs() < 1e-5);
    let best = res.best_region.as_ref().unwrap();
    assert_eq!(best.region.text, "7h 35m");
    assert_eq!(best.region.bbox, BoxRect::new(40, 40, 40, 20));

    let crop = PathBuf::from(res.crop_path.as_deref().unwrap());
    assert_eq!(
        crop.file_name().unwrap().to_string_lossy(),
        "task1_total_screenshot_path_roi0.280_g0.300.png"
    );
    assert_eq!(crop.parent().unwrap(), pipeline.crops_dir());
    assert_eq!(image::image_dimensions(&crop).unwrap(), (96, 76));

    let crops: Vec<_> = std::fs::read_dir(pipeline.crops_dir()).unwrap().collect();
    assert_eq!(crops.len(), 1);
}

#[test]
fn high_global_score_flags_without_regions_or_crop() {
    let dir = tempfile::tempdir().unwrap();
    let img = write_png(dir.path(), "shot.png");
    let run_dir = dir.path().join("run");

    let pipeline = Pipeline::new(
        &Config::default(),
        FakeEngine::new(Some(0.6), None),
        FakeOcr::with(Vec::new()),
        &run_dir,
    );
    let res = pipeline.analyze(&ImageTask::new("t2", "screenshot", &img));

    assert_eq!(res.status, Status::Flagged);
    assert!(res.global_tripped);
    assert!(!res.roi_tripped);
    assert_eq!(res.n_rois, 0);
    assert_eq!(res.max_roi_score, Some(0.0));
    assert!(res.best_region.is_none());
    assert!(res.crop_path.is_none());
    assert!(!pipeline.crops_dir().exists());
}

#[test]
fn clean_screenshot_is_ok() {
    let dir = tempfile::tempdir().unwrap();
    let img = write_png(dir.path(), "shot.png");

    let pipeline = Pipeline::new(
        &Config::default(),
        FakeEngine::new(Some(0.1), None),
        FakeOcr::with(screen_time_tokens()),
        &dir.path().join("run"),
    );
    let res = pipeline.analyze(&ImageTask::new("t3", "screenshot", &img));

    assert_eq!(res.status, Status::Ok);
    assert_eq!(res.n_rois, 1);
    assert!(res.crop_path.is_none());
    assert!(res.error.is_empty());
}

#[test]
fn missing_file_is_an_error_without_invoking_the_model() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::new(Some(0.9), None);
    let calls = Arc::clone(&engine.calls);
    let pipeline = Pipeline::new(
        &Config::default(),
        engine,
        FakeOcr::with(Vec::new()),
        &dir.path().join("run"),
    );
    let res = pipeline.analyze(&ImageTask::new("t4", "screenshot", dir.path().join("nope.png")));

    assert_eq!(res.status, Status::Error);
    assert!(res.error.contains("file not found"), "{}", res.error);
    assert!(res.global_score.is_none());
    assert!(res.max_roi_score.is_none());
    assert_eq!(res.n_rois, 0);
    assert!(res.crop_path.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn undecodable_image_is_an_error_without_invoking_the_model() {
    let dir = tempfile::tempdir().unwrap();
    let bad = dir.path().join("bad.png");
    std::fs::write(&bad, b"not a png").unwrap();
    let engine = FakeEngine::new(Some(0.9), None);
    let calls = Arc::clone(&engine.calls);
    let pipeline = Pipeline::new(
        &Config::default(),
        engine,
        FakeOcr::with(screen_time_tokens()),
        &dir.path().join("run"),
    );
    let res = pipeline.analyze(&ImageTask::new("t8", "screenshot", &bad));

    assert_eq!(res.status, Status::Error);
    assert!(res.error.contains("could not read image"), "{}", res.error);
    assert!(res.bundle_path.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn ocr_failure_degrades_to_zero_regions() {
    let dir = tempfile::tempdir().unwrap();
    let img = write_png(dir.path(), "shot.png");

    let pipeline = Pipeline::new(
        &Config::default(),
        FakeEngine::new(Some(0.2), Some((BoxRect::new(40, 40, 40, 20), 0.9))),
        FakeOcr {
            tokens: screen_time_tokens(),
            fail: true,
        },
        &dir.path().join("run"),
    );
    let res = pipeline.analyze(&ImageTask::new("t5", "screenshot", &img));

    assert_eq!(res.status, Status::Ok, "error: {}", res.error);
    assert_eq!(res.n_rois, 0);
    assert_eq!(res.max_roi_score, Some(0.0));
}

#[test]
fn bundle_without_score_is_an_error_naming_the_keys() {
    let dir = tempfile::tempdir().unwrap();
    let img = write_png(dir.path(), "shot.png");

    let pipeline = Pipeline::new(
        &Config::default(),
        FakeEngine::new(None, None),
        FakeOcr::with(screen_time_tokens()),
        &dir.path().join("run"),
    );
    let res = pipeline.analyze(&ImageTask::new("t6", "screenshot", &img));

    assert_eq!(res.status, Status::Error);
    assert!(res.error.contains("score"), "{}", res.error);
    assert!(res.error.contains("pred_map"), "{}", res.error);
}

#[test]
fn model_failure_is_an_error_result() {
    let dir = tempfile::tempdir().unwrap();
    let img = write_png(dir.path(), "shot.png");

    let pipeline = Pipeline::new(
        &Config::default(),
        FakeEngine::failing(),
        FakeOcr::with(Vec::new()),
        &dir.path().join("run"),
    );
    let res = pipeline.analyze(&ImageTask::new("t7", "screenshot", &img));

    assert_eq!(res.status, Status::Error);
    assert!(res.error.contains("status 1"), "{}", res.error);
    assert!(res.bundle_path.is_none());
}

#[test]
fn parallel_batch_keeps_input_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut tasks = Vec::new();
    for i in 0..7 {
        let path = if i % 3 == 1 {
            dir.path().join(format!("missing_{i}.png"))
        } else {
            write_png(dir.path(), &format!("shot_{i}.png"))
        };
        tasks.push(ImageTask::new(format!("task{i}"), "screenshot", path));
    }

    let mut cfg = Config::default();
    cfg.batch.max_workers = 3;
    let pipeline = Pipeline::new(
        &cfg,
        FakeEngine::new(Some(0.6), None),
        FakeOcr::with(Vec::new()),
        &dir.path().join("run"),
    );
    let results = pipeline.run_batch(&tasks).unwrap();

    let ids: Vec<&str> = results.iter().map(|r| r.task_id.as_str()).collect();
    assert_eq!(ids, vec!["task0", "task1", "task2", "task3", "task4", "task5", "task6"]);
    for (i, r) in results.iter().enumerate() {
        let expected = if i % 3 == 1 {
            Status::Error
        } else {
            Status::Flagged
        };
        assert_eq!(r.status, expected, "task{i}: {}", r.error);
    }
}
