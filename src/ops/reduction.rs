//! Reduction-factor calculus.
//!
//! A reduction factor `r` names the power-of-two level whose linear scale is
//! 2^-r. Level selection walks the available resolutions from smallest to
//! largest and takes the first one that can still supply the requested scale,
//! so the decoder touches the fewest pixels that preserve quality. Whatever
//! scaling the chosen level does not cover remains as a residual for the
//! pipeline's resampler, and any software subsampling applied during the read
//! adds to the accumulated factor.

use crate::image::LevelInfo;

// =============================================================================
// ReductionFactor
// =============================================================================

/// A non-negative power-of-two reduction: logical scale is 2^-r.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReductionFactor(pub u32);

impl ReductionFactor {
    /// The largest factor whose level is still at least the requested scale:
    /// max { k : 2^-k ≥ scale }.
    ///
    /// A boundary value (scale exactly 2^-k) takes factor k, which is the
    /// larger-level side of the tie.
    pub fn for_scale(scale: f64) -> Self {
        if scale >= 1.0 || scale <= 0.0 {
            return ReductionFactor(0);
        }
        let mut k = 0u32;
        // Tiny epsilon keeps 0.25 from landing on k=1 through float error.
        while k < 31 && 2f64.powi(-(k as i32 + 1)) >= scale - 1e-9 {
            k += 1;
        }
        ReductionFactor(k)
    }

    /// The linear scale of this factor: 2^-r.
    pub fn scale(self) -> f64 {
        2f64.powi(-(self.0 as i32))
    }

    /// The decimation step for this factor: 2^r.
    pub fn subsample(self) -> u32 {
        1u32 << self.0.min(31)
    }
}

// =============================================================================
// Level Selection
// =============================================================================

/// The outcome of level selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelChoice {
    /// Index of the chosen level (0 = full resolution).
    pub level: usize,

    /// Reduction already provided by the chosen level.
    pub reduction: ReductionFactor,

    /// Scale still to apply after reading the level: requested / level scale.
    pub residual: f64,
}

/// Pick the smallest level that can supply scale `t` over the pyramid.
///
/// `t` is the linear factor relative to the full image, in (0, 1]. A request
/// for the full scale always takes level 0: at boundary equality a `≤` scan
/// would otherwise skip a level whose width matches the full width exactly.
/// Non-pyramidal sources (one level) yield level 0 with the whole scale left
/// as residual; the caller turns that into a software subsample.
pub fn pick_level(t: f64, full_width: u32, levels: &[LevelInfo]) -> LevelChoice {
    debug_assert!(t > 0.0);

    if t >= 1.0 || levels.len() <= 1 {
        return LevelChoice {
            level: 0,
            reduction: ReductionFactor(0),
            residual: t,
        };
    }

    // Smallest level first; the first that fits wins.
    for (index, level) in levels.iter().enumerate().rev() {
        let reduced = level.width as f64 / full_width as f64;
        if t <= reduced + 1e-9 {
            let reduction = ReductionFactor::for_scale(reduced);
            return LevelChoice {
                level: index,
                reduction,
                residual: t / reduced,
            };
        }
    }

    // Nothing fits (t larger than every reduced level): full resolution.
    LevelChoice {
        level: 0,
        reduction: ReductionFactor(0),
        residual: t,
    }
}

/// Software subsample for the residual scale after level selection.
///
/// Returns the accumulated extra reduction and the decimation step (2^k).
/// Residuals above 0.5 decimate nothing — the resampler handles them — so the
/// decoded image is never smaller than half the requested size.
pub fn subsample_for(residual: f64) -> (ReductionFactor, u32) {
    if residual >= 1.0 || residual <= 0.0 {
        return (ReductionFactor(0), 1);
    }
    let factor = ReductionFactor::for_scale(residual);
    (factor, factor.subsample())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn pyramid(widths: &[u32]) -> Vec<LevelInfo> {
        widths
            .iter()
            .map(|&w| LevelInfo {
                width: w,
                height: w,
                tile_width: 256,
                tile_height: 256,
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // ReductionFactor
    // -------------------------------------------------------------------------

    #[test]
    fn test_for_scale() {
        assert_eq!(ReductionFactor::for_scale(1.0).0, 0);
        assert_eq!(ReductionFactor::for_scale(0.75).0, 0);
        assert_eq!(ReductionFactor::for_scale(0.5).0, 1);
        assert_eq!(ReductionFactor::for_scale(0.3).0, 1);
        assert_eq!(ReductionFactor::for_scale(0.25).0, 2);
        assert_eq!(ReductionFactor::for_scale(0.125).0, 3);
        assert_eq!(ReductionFactor::for_scale(0.1).0, 3);
    }

    #[test]
    fn test_scale_and_subsample() {
        assert_eq!(ReductionFactor(0).scale(), 1.0);
        assert_eq!(ReductionFactor(2).scale(), 0.25);
        assert_eq!(ReductionFactor(0).subsample(), 1);
        assert_eq!(ReductionFactor(3).subsample(), 8);
    }

    #[test]
    fn test_for_scale_degenerate() {
        assert_eq!(ReductionFactor::for_scale(0.0).0, 0);
        assert_eq!(ReductionFactor::for_scale(2.0).0, 0);
    }

    // -------------------------------------------------------------------------
    // Level selection
    // -------------------------------------------------------------------------

    #[test]
    fn test_pick_level_deep_zoom() {
        // 10000 → {10000, 5000, 2500, 1250}; fit 256 over a 512 region → 0.5
        let levels = pyramid(&[10000, 5000, 2500, 1250]);
        let choice = pick_level(0.5, 10000, &levels);
        assert_eq!(choice.level, 1);
        assert_eq!(choice.reduction.0, 1);
        assert!((choice.residual - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pick_level_between_levels() {
        let levels = pyramid(&[10000, 5000, 2500, 1250]);
        // 0.3 doesn't fit 0.25 or 0.125; fits 0.5
        let choice = pick_level(0.3, 10000, &levels);
        assert_eq!(choice.level, 1);
        assert!((choice.residual - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_pick_level_smallest() {
        let levels = pyramid(&[10000, 5000, 2500, 1250]);
        let choice = pick_level(0.05, 10000, &levels);
        assert_eq!(choice.level, 3);
        assert_eq!(choice.reduction.0, 3);
        assert!((choice.residual - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_full_scale_forces_level_zero() {
        // Boundary case: percent 1.0 must take level 0 even though the scan's
        // `<=` would accept it too; guarded explicitly.
        let levels = pyramid(&[10000, 5000]);
        let choice = pick_level(1.0, 10000, &levels);
        assert_eq!(choice.level, 0);
        assert_eq!(choice.reduction.0, 0);
    }

    #[test]
    fn test_boundary_equality_prefers_larger_level() {
        let levels = pyramid(&[8000, 4000, 2000]);
        // Exactly 0.25: the 2000 level fits with nothing to spare.
        let choice = pick_level(0.25, 8000, &levels);
        assert_eq!(choice.level, 2);
        assert_eq!(choice.reduction.0, 2);
        assert!((choice.residual - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_level_leaves_residual() {
        let levels = pyramid(&[8000]);
        let choice = pick_level(0.25, 8000, &levels);
        assert_eq!(choice.level, 0);
        assert_eq!(choice.reduction.0, 0);
        assert!((choice.residual - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_reduction_soundness_invariant() {
        // Chosen level width ≥ 0.5 · target width and ≤ full width.
        let levels = pyramid(&[10000, 5000, 2500, 1250]);
        for &t in &[1.0, 0.9, 0.51, 0.5, 0.3, 0.25, 0.13, 0.125, 0.06] {
            let choice = pick_level(t, 10000, &levels);
            let level_width = levels[choice.level].width as f64;
            let target_width = 10000.0 * t;
            assert!(level_width + 1e-6 >= 0.5 * target_width, "t={}", t);
            assert!(level_width <= 10000.0);
        }
    }

    // -------------------------------------------------------------------------
    // Software subsampling
    // -------------------------------------------------------------------------

    #[test]
    fn test_subsample_for_quarter() {
        // Striped non-pyramidal at 25%: subsample 4, two extra halvings.
        let (extra, step) = subsample_for(0.25);
        assert_eq!(extra.0, 2);
        assert_eq!(step, 4);
    }

    #[test]
    fn test_subsample_above_half_is_identity() {
        let (extra, step) = subsample_for(0.6);
        assert_eq!(extra.0, 0);
        assert_eq!(step, 1);

        let (extra, step) = subsample_for(1.0);
        assert_eq!(extra.0, 0);
        assert_eq!(step, 1);
    }
}
