use crate::config::Decision;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Flagged,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Flagged => "flagged",
            Status::Error => "error",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub status: Status,
    pub global_tripped: bool,
    pub roi_tripped: bool,
}

/// Flags when either the whole-image score or the worst region reaches its
/// threshold. Both comparisons are inclusive.
pub fn decide(
    global_score: f32,
    max_roi_score: f32,
    global_thresh: f32,
    roi_thresh: f32,
) -> Status {
    evaluate(global_score, max_roi_score, global_thresh, roi_thresh).status
}

pub fn evaluate(
    global_score: f32,
    max_roi_score: f32,
    global_thresh: f32,
    roi_thresh: f32,
) -> PolicyDecision {
    let global_tripped = global_score >= global_thresh;
    let roi_tripped = max_roi_score >= roi_thresh;
    PolicyDecision {
        status: if global_tripped || roi_tripped {
            Status::Flagged
        } else {
            Status::Ok
        },
        global_tripped,
        roi_tripped,
    }
}

pub fn decide_with(cfg: &Decision, global_score: f32, max_roi_score: f32) -> PolicyDecision {
    evaluate(global_score, max_roi_score, cfg.global_thresh, cfg.roi_thresh)
}
