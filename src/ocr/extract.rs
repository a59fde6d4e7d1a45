//! Groups OCR tokens into line-level regions and keeps only the lines that
//! carry a digit, which is where screen-time readings live.

use super::{LineKey, OcrToken};
use crate::{config::Ocr, region::TextRegion};
use std::collections::HashMap;
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone, Copy)]
pub struct ExtractParams {
    pub min_conf: f32,
    pub min_size: u32,
    /// Also drop individual tokens smaller than `min_size` before grouping.
    pub filter_small_tokens: bool,
}

impl Default for ExtractParams {
    fn default() -> Self {
        Self::from(&Ocr::default())
    }
}

impl From<&Ocr> for ExtractParams {
    fn from(cfg: &Ocr) -> Self {
        Self {
            min_conf: cfg.min_conf,
            min_size: cfg.min_size,
            filter_small_tokens: cfg.filter_small_tokens,
        }
    }
}

struct LineGroup {
    region: TextRegion,
    words: Vec<String>,
    conf_sum: f32,
}

/// Output order is the order in which each line's first kept token appears.
pub fn extract_regions(tokens: &[OcrToken], params: &ExtractParams) -> Vec<TextRegion> {
    let min_size = params.min_size as i64;
    let mut index: HashMap<LineKey, usize> = HashMap::new();
    let mut groups: Vec<LineGroup> = Vec::new();

    for tok in tokens {
        let text = normalize_text(&tok.text);
        if text.is_empty() || tok.confidence < params.min_conf {
            continue;
        }
        if params.filter_small_tokens && (tok.bbox.w < min_size || tok.bbox.h < min_size) {
            continue;
        }

        match index.get(&tok.line) {
            Some(&i) => {
                let g = &mut groups[i];
                g.region.bbox = g.region.bbox.union(&tok.bbox);
                g.words.push(text);
                g.conf_sum += tok.confidence;
            }
            None => {
                index.insert(tok.line, groups.len());
                groups.push(LineGroup {
                    region: TextRegion {
                        bbox: tok.bbox,
                        text: String::new(),
                        confidence: 0.0,
                    },
                    words: vec![text],
                    conf_sum: tok.confidence,
                });
            }
        }
    }

    groups
        .into_iter()
        .filter_map(|g| {
            let mut region = g.region;
            if region.bbox.w < min_size || region.bbox.h < min_size {
                return None;
            }
            region.text = g.words.join(" ");
            // Native-script digits (Arabic-Indic, Devanagari, ...) survive NFKC.
            if !region.text.chars().any(char::is_numeric) {
                return None;
            }
            region.confidence = g.conf_sum / g.words.len() as f32;
            Some(region)
        })
        .collect()
}

/// NFKC folds full-width and other compatibility digits to ASCII.
fn normalize_text(raw: &str) -> String {
    raw.nfkc().collect::<String>().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fullwidth_digits_fold_to_ascii() {
        assert_eq!(normalize_text(" ７h "), "7h");
    }
}
