//! Reduces the pixel-level localization and reliability maps to one anomaly
//! value per text region.
//!
//! Reliability coverage picks the estimator. With enough reliable pixels the
//! score is the mean suspicion over the region with unreliable pixels zeroed.
//! Below the coverage floor the region falls back to a downweighted mean of
//! `localization * reliability`.

use crate::{
    config::Scoring,
    region::{BoxRect, RegionScore, TextRegion},
    resolve::ResolvedOutputs,
};
use ndarray::{s, Array2, Zip};

#[derive(Debug, Clone, Copy)]
pub struct ScoreParams {
    pub rel_min: f32,
    pub min_reliable_coverage: f32,
    pub weak_signal_weight: f32,
}

impl Default for ScoreParams {
    fn default() -> Self {
        Self::from(&Scoring::default())
    }
}

impl From<&Scoring> for ScoreParams {
    fn from(s: &Scoring) -> Self {
        Self {
            rel_min: s.rel_min,
            min_reliable_coverage: s.min_reliable_coverage,
            weak_signal_weight: s.weak_signal_weight,
        }
    }
}

/// Anomaly in [0, 1] for `bbox`, which is clamped to the map bounds first.
///
/// Both maps must share the same shape.
pub fn roi_score(
    localization: &Array2<f32>,
    reliability: &Array2<f32>,
    bbox: &BoxRect,
    params: &ScoreParams,
) -> f32 {
    let (height, width) = localization.dim();
    if height == 0 || width == 0 {
        return 0.0;
    }
    let r = bbox.clamp_to(width, height);
    let rows = r.y..r.y + r.h;
    let cols = r.x..r.x + r.w;
    let loc = localization.slice(s![rows.clone(), cols.clone()]);
    let rel = reliability.slice(s![rows, cols]);

    let mut reliable = 0usize;
    let mut masked_sum = 0.0f64;
    let mut product_sum = 0.0f64;
    Zip::from(&loc).and(&rel).for_each(|&l, &rv| {
        product_sum += (l * rv) as f64;
        if rv >= params.rel_min {
            reliable += 1;
            masked_sum += l as f64;
        }
    });

    let n = (r.w * r.h) as f64;
    // Compared in f32 so a coverage of exactly the configured fraction counts.
    let coverage = reliable as f32 / (r.w * r.h) as f32;
    let score = if coverage < params.min_reliable_coverage {
        params.weak_signal_weight as f64 * (product_sum / n)
    } else {
        masked_sum / n
    };
    (score as f32).clamp(0.0, 1.0)
}

/// Scores every region, keeping region order.
pub fn score_regions(
    outputs: &ResolvedOutputs,
    regions: &[TextRegion],
    params: &ScoreParams,
) -> Vec<RegionScore> {
    regions
        .iter()
        .map(|region| RegionScore {
            score: roi_score(
                &outputs.localization,
                &outputs.reliability,
                &region.bbox,
                params,
            ),
            region: region.clone(),
        })
        .collect()
}

/// The first region holding the strictly highest score above zero.
pub fn best_region(scores: &[RegionScore]) -> Option<&RegionScore> {
    let mut best: Option<&RegionScore> = None;
    for s in scores {
        let current = best.map_or(0.0, |b| b.score);
        if s.score > current {
            best = Some(s);
        }
    }
    best
}
