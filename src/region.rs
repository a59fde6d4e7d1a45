use serde::{Deserialize, Serialize};

/// Axis-aligned box in image pixel coordinates.
///
/// Signed so that padding and untrusted OCR boxes can go out of bounds before
/// [`BoxRect::clamp_to`] brings them back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxRect {
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
}

impl BoxRect {
    pub fn new(x: i64, y: i64, w: i64, h: i64) -> Self {
        Self { x, y, w, h }
    }

    pub fn x2(&self) -> i64 {
        self.x + self.w
    }

    pub fn y2(&self) -> i64 {
        self.y + self.h
    }

    pub fn union(&self, other: &BoxRect) -> BoxRect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        BoxRect {
            x,
            y,
            w: self.x2().max(other.x2()) - x,
            h: self.y2().max(other.y2()) - y,
        }
    }

    pub fn padded(&self, pad: i64) -> BoxRect {
        BoxRect {
            x: self.x - pad,
            y: self.y - pad,
            w: self.w + 2 * pad,
            h: self.h + 2 * pad,
        }
    }

    /// Clamps into a `width` x `height` image: the origin lands inside
    /// `[0, width) x [0, height)` and both sides are at least one pixel.
    ///
    /// `width` and `height` must be non-zero.
    pub fn clamp_to(&self, width: usize, height: usize) -> PixelRect {
        let (wi, hi) = (width as i64, height as i64);
        let x = self.x.clamp(0, wi - 1);
        let y = self.y.clamp(0, hi - 1);
        let w = self.w.min(wi - x).max(1);
        let h = self.h.min(hi - y).max(1);
        PixelRect {
            x: x as usize,
            y: y as usize,
            w: w as usize,
            h: h as usize,
        }
    }
}

/// A box known to lie inside the image it was clamped against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: usize,
    pub y: usize,
    pub w: usize,
    pub h: usize,
}

/// One recognized, digit-bearing line of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRegion {
    pub bbox: BoxRect,
    pub text: String,
    /// Mean recognition confidence of the member tokens.
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionScore {
    pub region: TextRegion,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_keeps_boxes_inside() {
        let r = BoxRect::new(-10, 95, 500, 40).clamp_to(100, 100);
        assert_eq!(r, PixelRect { x: 0, y: 95, w: 100, h: 5 });

        let r = BoxRect::new(150, 150, 0, -3).clamp_to(100, 80);
        assert_eq!(r, PixelRect { x: 99, y: 79, w: 1, h: 1 });
    }

    #[test]
    fn union_covers_both() {
        let u = BoxRect::new(10, 10, 5, 5).union(&BoxRect::new(0, 12, 4, 10));
        assert_eq!(u, BoxRect::new(0, 10, 15, 12));
    }
}
