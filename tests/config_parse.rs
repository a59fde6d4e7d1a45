use tamper_triage::config::Config;

#[test]
fn parse_example_config() {
    let raw = include_str!("../tamper-triage.example.toml");
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    cfg.validate().expect("example config is valid");
    assert!(cfg.batch.max_workers >= 1);
    assert!(!cfg.paths.out_dir.is_empty());
    assert!(cfg.decision.roi_thresh < cfg.decision.global_thresh);
}

#[test]
fn missing_sections_fall_back_to_defaults() {
    let cfg: Config = toml::from_str("[decision]\nglobal_thresh = 0.6\nroi_thresh = 0.3\n")
        .expect("parse TOML");
    assert_eq!(cfg.decision.global_thresh, 0.6);
    assert_eq!(cfg.scoring.rel_min, 0.40);
    assert_eq!(cfg.scoring.min_reliable_coverage, 0.15);
    assert_eq!(cfg.scoring.weak_signal_weight, 0.25);
    assert_eq!(cfg.ocr.min_size, 18);
    assert_eq!(cfg.evidence.crop_pad, 28);
}

#[test]
fn rejects_out_of_range_thresholds() {
    let mut cfg = Config::default();
    cfg.decision.roi_thresh = 0.0;
    assert!(cfg.validate().is_err());

    let mut cfg = Config::default();
    cfg.scoring.percentile_lo = 99.0;
    cfg.scoring.percentile_hi = 1.0;
    assert!(cfg.validate().is_err());

    let mut cfg = Config::default();
    cfg.batch.path_columns.clear();
    assert!(cfg.validate().is_err());
}
