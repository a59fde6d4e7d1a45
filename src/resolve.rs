//! Maps an output bundle with unknown key names and shapes onto the three
//! roles the scorer needs: a global score, a localization map and a
//! reliability map.
//!
//! Candidates are filtered by shape first and then ranked by the first name
//! token their lower-cased key contains. Entries matching no token rank last;
//! ties keep bundle order. A scalar is never accepted as a map or the other
//! way round, and the entry picked as the localization map is not a
//! reliability candidate.

use crate::{
    bundle::{BundleEntry, OutputBundle},
    config::Scoring,
    error::{ResolutionError, Role},
};
use ndarray::{Array2, ArrayD, ArrayView2, Axis, Ix2};
use tracing::{debug, warn};

pub const SCORE_TOKENS: &[&str] = &["score", "global", "integrity", "sigmoid"];
pub const LOCALIZATION_TOKENS: &[&str] = &["map", "mask", "loc", "pred", "tamper"];
pub const RELIABILITY_TOKENS: &[&str] = &["reliab", "conf", "uncert"];

#[derive(Debug, Clone)]
pub struct ResolvedOutputs {
    /// Whole-image integrity score, clamped to [0, 1].
    pub score: f32,
    /// H x W, higher is more suspicious. Normalized to [0, 1].
    pub localization: Array2<f32>,
    /// H x W, higher is more trustworthy. Normalized to [0, 1].
    pub reliability: Array2<f32>,
    pub reliability_defaulted: bool,
}

/// Percentile window used to rescale maps into [0, 1].
#[derive(Debug, Clone, Copy)]
pub struct Normalization {
    pub percentile_lo: f32,
    pub percentile_hi: f32,
    pub epsilon: f32,
}

impl Default for Normalization {
    fn default() -> Self {
        Self {
            percentile_lo: 1.0,
            percentile_hi: 99.0,
            epsilon: 1e-6,
        }
    }
}

impl From<&Scoring> for Normalization {
    fn from(s: &Scoring) -> Self {
        Self {
            percentile_lo: s.percentile_lo,
            percentile_hi: s.percentile_hi,
            epsilon: s.epsilon,
        }
    }
}

pub fn resolve(
    bundle: &OutputBundle,
    height: usize,
    width: usize,
) -> Result<ResolvedOutputs, ResolutionError> {
    resolve_with(bundle, height, width, Normalization::default())
}

pub fn resolve_with(
    bundle: &OutputBundle,
    height: usize,
    width: usize,
    norm: Normalization,
) -> Result<ResolvedOutputs, ResolutionError> {
    let missing = |role| ResolutionError::MissingRole {
        role,
        height,
        width,
        available_keys: bundle.keys(),
    };

    let score = pick(bundle, SCORE_TOKENS, |_, e| scalar_value(&e.array))
        .ok_or_else(|| missing(Role::Score))?;
    let loc = pick(bundle, LOCALIZATION_TOKENS, |_, e| {
        map_view(&e.array, height, width)
    })
    .ok_or_else(|| missing(Role::Localization))?;
    // The localization entry is never its own reliability signal.
    let rel = pick(bundle, RELIABILITY_TOKENS, |i, e| {
        if i == loc.index {
            None
        } else {
            map_view(&e.array, height, width)
        }
    });

    let raw_score = score.value;
    if !(0.0..=1.0).contains(&raw_score) {
        warn!("score {raw_score} from {} is outside [0, 1]; clamping", score.key);
    }
    debug!(
        score = %score.key,
        localization = %loc.key,
        reliability = ?rel.as_ref().map(|p| &p.key),
        "resolved bundle roles"
    );

    let localization = normalize(loc.value, norm);
    let (reliability, reliability_defaulted) = match rel {
        Some(p) => (normalize(p.value, norm), false),
        None => {
            debug!("no reliability signal in bundle; treating every pixel as reliable");
            (Array2::ones((height, width)), true)
        }
    };

    Ok(ResolvedOutputs {
        score: raw_score.clamp(0.0, 1.0),
        localization,
        reliability,
        reliability_defaulted,
    })
}

/// Position of the first token contained in `key`, or `tokens.len()`.
pub fn name_rank(key: &str, tokens: &[&str]) -> usize {
    let lk = key.to_lowercase();
    tokens
        .iter()
        .position(|t| lk.contains(t))
        .unwrap_or(tokens.len())
}

struct Picked<T> {
    index: usize,
    key: String,
    value: T,
}

fn pick<'a, T, F>(bundle: &'a OutputBundle, tokens: &[&str], extract: F) -> Option<Picked<T>>
where
    F: Fn(usize, &'a BundleEntry) -> Option<T>,
{
    let mut best: Option<(usize, Picked<T>)> = None;
    for (index, entry) in bundle.entries().iter().enumerate() {
        let Some(value) = extract(index, entry) else {
            continue;
        };
        let rank = name_rank(&entry.key, tokens);
        if best.as_ref().is_none_or(|(r, _)| rank < *r) {
            best = Some((
                rank,
                Picked {
                    index,
                    key: entry.key.clone(),
                    value,
                },
            ));
        }
    }
    best.map(|(_, p)| p)
}

fn scalar_value(array: &ArrayD<f32>) -> Option<f32> {
    if array.len() != 1 {
        return None;
    }
    array.iter().next().copied().filter(|v| v.is_finite())
}

/// Accepts (H, W), (C, H, W) and (H, W, C).
///
/// Channel-first arrays use channel 0 when there is a single channel and the
/// last channel otherwise; channel-last arrays use channel 0.
fn map_view(array: &ArrayD<f32>, height: usize, width: usize) -> Option<ArrayView2<'_, f32>> {
    let shape = array.shape();
    match shape.len() {
        2 if shape == [height, width] => array.view().into_dimensionality::<Ix2>().ok(),
        3 if shape[1] == height && shape[2] == width && shape[0] > 0 => {
            let channel = if shape[0] == 1 { 0 } else { shape[0] - 1 };
            array
                .index_axis(Axis(0), channel)
                .into_dimensionality::<Ix2>()
                .ok()
        }
        3 if shape[0] == height && shape[1] == width && shape[2] > 0 => array
            .index_axis(Axis(2), 0)
            .into_dimensionality::<Ix2>()
            .ok(),
        _ => None,
    }
}

/// Rescales the percentile window of `map` onto [0, 1] and clips.
///
/// When the window is narrower than `epsilon` the values are only clipped.
/// Non-finite values become 0.
pub fn normalize(map: ArrayView2<'_, f32>, norm: Normalization) -> Array2<f32> {
    let mut sorted: Vec<f32> = map.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return Array2::zeros(map.raw_dim());
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let lo = percentile(&sorted, norm.percentile_lo);
    let hi = percentile(&sorted, norm.percentile_hi);
    let span = hi - lo;

    map.mapv(|v| {
        if !v.is_finite() {
            return 0.0;
        }
        if span < norm.epsilon {
            v.clamp(0.0, 1.0)
        } else {
            ((v - lo) / span).clamp(0.0, 1.0)
        }
    })
}

/// Linear-interpolated percentile over an ascending, non-empty slice.
fn percentile(sorted: &[f32], q: f32) -> f32 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let pos = (q.clamp(0.0, 100.0) / 100.0) as f64 * (n - 1) as f64;
    let i = pos.floor() as usize;
    let j = (i + 1).min(n - 1);
    let frac = (pos - i as f64) as f32;
    sorted[i] + (sorted[j] - sorted[i]) * frac
}
