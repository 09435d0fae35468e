//! Watermark primitive boundary.
//!
//! The orchestrators treat the embed/decode transform as a black box: a key
//! goes in with a frame on the way out, and on the way back a frame yields a
//! [`Pattern`] that can be correlated against every candidate key.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::EngineConfig;
use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;

/// A decoded or reference watermark pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern(pub Vec<f32>);

impl Pattern {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Non-empty, finite, and carrying some energy.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self.0.iter().all(|v| v.is_finite())
            && self.0.iter().map(|v| (*v as f64).powi(2)).sum::<f64>() > 1e-9
    }

    /// Element-wise mean. `None` for no patterns or mismatched lengths.
    pub fn average(patterns: &[Pattern]) -> Option<Pattern> {
        let first = patterns.first()?;
        if patterns.iter().any(|p| p.len() != first.len()) {
            return None;
        }

        let mut sum = vec![0f64; first.len()];
        for p in patterns {
            for (acc, v) in sum.iter_mut().zip(&p.0) {
                *acc += *v as f64;
            }
        }
        let n = patterns.len() as f64;
        Some(Pattern(sum.into_iter().map(|v| (v / n) as f32).collect()))
    }

    /// Pearson correlation in `[-1, 1]`; 0 when either side is flat or the
    /// lengths differ.
    pub fn correlation(&self, other: &Pattern) -> f64 {
        if self.len() != other.len() || self.is_empty() {
            return 0.0;
        }

        let n = self.len() as f64;
        let mean_a = self.0.iter().map(|v| *v as f64).sum::<f64>() / n;
        let mean_b = other.0.iter().map(|v| *v as f64).sum::<f64>() / n;

        let (mut cov, mut var_a, mut var_b) = (0f64, 0f64, 0f64);
        for (a, b) in self.0.iter().zip(&other.0) {
            let da = *a as f64 - mean_a;
            let db = *b as f64 - mean_b;
            cov += da * db;
            var_a += da * da;
            var_b += db * db;
        }

        let denom = (var_a * var_b).sqrt();
        if !denom.is_finite() || denom < 1e-12 {
            return 0.0;
        }
        (cov / denom).clamp(-1.0, 1.0)
    }
}

/// Embed/decode transform keyed by an integer.
///
/// Implementations must be deterministic for a given key and safe to call
/// from several blocking threads at once.
pub trait WatermarkPrimitive: Send + Sync {
    /// Return a copy of `frame` carrying the watermark for `key`.
    fn embed(&self, frame: &Frame, key: i64) -> MediaResult<Frame>;

    /// Recover the raw watermark pattern present in `frame`.
    fn decode(&self, frame: &Frame) -> MediaResult<Pattern>;

    /// Reference pattern that `decode` output is correlated against.
    fn key_pattern(&self, key: i64) -> Pattern;
}

const KEY_SALT: u64 = 0x6d67_686f_7374_0001;

/// Additive spread-spectrum watermark on the luma plane.
///
/// The frame is divided into a `grid x grid` lattice of cells; each cell is
/// shifted by `+amplitude` or `-amplitude` according to a pseudo-random
/// sign sequence seeded by the key. Decoding takes per-cell mean luma with
/// the frame mean removed.
#[derive(Debug, Clone)]
pub struct LumaSpreadPrimitive {
    grid: u32,
    amplitude: f32,
}

impl LumaSpreadPrimitive {
    pub const DEFAULT_GRID: u32 = 16;

    /// `strength` scales the quantisation `step` into a luma amplitude.
    pub fn new(strength: f32, step: f32) -> Self {
        Self {
            grid: Self::DEFAULT_GRID,
            amplitude: (strength * step).abs(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.strength, config.step)
    }

    pub fn with_grid(mut self, grid: u32) -> Self {
        self.grid = grid.max(1);
        self
    }

    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }

    fn check_size(&self, frame: &Frame) -> MediaResult<()> {
        if frame.width() < self.grid || frame.height() < self.grid {
            return Err(MediaError::invalid(format!(
                "frame {}x{} is smaller than the {}x{} watermark grid",
                frame.width(),
                frame.height(),
                self.grid,
                self.grid
            )));
        }
        Ok(())
    }

    /// Cell index of every pixel, row-major.
    fn cell_of(&self, frame: &Frame) -> impl Iterator<Item = usize> + '_ {
        let (w, h, g) = (frame.width() as usize, frame.height() as usize, self.grid as usize);
        (0..h).flat_map(move |y| (0..w).map(move |x| (y * g / h) * g + (x * g / w)))
    }
}

impl WatermarkPrimitive for LumaSpreadPrimitive {
    fn embed(&self, frame: &Frame, key: i64) -> MediaResult<Frame> {
        self.check_size(frame)?;
        let pattern = self.key_pattern(key);

        let mut out = frame.clone();
        for (luma, cell) in out.y.iter_mut().zip(self.cell_of(frame)) {
            *luma = (*luma + self.amplitude * pattern.0[cell]).clamp(0.0, 255.0);
        }
        Ok(out)
    }

    fn decode(&self, frame: &Frame) -> MediaResult<Pattern> {
        self.check_size(frame)
            .map_err(|e| MediaError::DecodeFailed(e.to_string()))?;

        let cells = (self.grid * self.grid) as usize;
        let mut sums = vec![0f64; cells];
        let mut counts = vec![0u32; cells];
        for (luma, cell) in frame.y.iter().zip(self.cell_of(frame)) {
            sums[cell] += *luma as f64;
            counts[cell] += 1;
        }

        let means: Vec<f64> = sums
            .iter()
            .zip(&counts)
            .map(|(s, c)| if *c == 0 { 0.0 } else { s / *c as f64 })
            .collect();
        let global = means.iter().sum::<f64>() / cells as f64;

        Ok(Pattern(means.iter().map(|m| (m - global) as f32).collect()))
    }

    fn key_pattern(&self, key: i64) -> Pattern {
        let mut rng = StdRng::seed_from_u64((key as u64) ^ KEY_SALT);
        let cells = (self.grid * self.grid) as usize;
        Pattern(
            (0..cells)
                .map(|_| if rng.random::<bool>() { 1.0 } else { -1.0 })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn primitive() -> LumaSpreadPrimitive {
        LumaSpreadPrimitive::new(1.0, 5.0)
    }

    #[test]
    fn test_key_pattern_is_deterministic() {
        let p = primitive();
        assert_eq!(p.key_pattern(42), p.key_pattern(42));
        assert_ne!(p.key_pattern(42), p.key_pattern(43));
        assert_eq!(p.key_pattern(42).len(), 256);
    }

    #[test]
    fn test_embed_then_decode_matches_key() {
        let p = primitive();
        let keys = [10i64, 11, 12, 13];
        let frame = Frame::filled(64, 48, 128.0);

        for (i, key) in keys.iter().enumerate() {
            let marked = p.embed(&frame, *key).unwrap();
            let decoded = p.decode(&marked).unwrap();
            let scores: Vec<f64> = keys
                .iter()
                .map(|k| decoded.correlation(&p.key_pattern(*k)))
                .collect();
            let best = scores
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(idx, _)| idx)
                .unwrap();
            assert_eq!(best, i);
            assert!(scores[i] > 0.99);
        }
    }

    #[test]
    fn test_flat_frame_decodes_to_invalid_pattern() {
        let p = primitive();
        let decoded = p.decode(&Frame::filled(32, 32, 90.0)).unwrap();
        assert!(!decoded.is_valid());
    }

    #[test]
    fn test_small_frame_rejected() {
        let p = primitive();
        assert!(p.embed(&Frame::filled(8, 8, 0.0), 1).is_err());
        assert!(matches!(
            p.decode(&Frame::filled(8, 8, 0.0)),
            Err(MediaError::DecodeFailed(_))
        ));
    }

    #[test]
    fn test_pattern_average_and_correlation() {
        let a = Pattern(vec![1.0, -1.0, 1.0, -1.0]);
        let b = Pattern(vec![3.0, -1.0, 3.0, -1.0]);
        let avg = Pattern::average(&[a.clone(), b]).unwrap();
        assert_eq!(avg, Pattern(vec![2.0, -1.0, 2.0, -1.0]));
        assert!((a.correlation(&avg) - 1.0).abs() < 1e-9);
        assert_eq!(a.correlation(&Pattern(vec![0.0; 4])), 0.0);
        assert_eq!(a.correlation(&Pattern(vec![1.0])), 0.0);
        assert!(Pattern::average(&[]).is_none());
    }
}
