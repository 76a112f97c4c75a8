//! Distance metrics for dense vectors.
//!
//! Every component of an index (coarse assignment, lookup tables, refinement)
//! ranks candidates with the same [`DistanceMetric`]. Internally the engine
//! always works with a *rank distance* where lower is closer:
//!
//! | Metric | rank distance | reported value |
//! |--------|---------------|----------------|
//! | `SquaredL2` | $\lVert a-b \rVert^2$ | same |
//! | `L2` | $\lVert a-b \rVert^2$ | $\sqrt{\cdot}$ of it |
//! | `InnerProduct` | $-\langle a,b\rangle$ | $\langle a,b\rangle$ (similarity) |
//!
//! ## Important nuance
//!
//! For inner product the reported value is a similarity, so results are
//! ordered by *descending* reported value; for the L2 metrics they are ordered
//! by ascending distance. In both cases the order is ascending rank distance.

use serde::{Deserialize, Serialize};

use crate::simd;

/// Distance metric for dense vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Squared Euclidean distance.
    #[default]
    SquaredL2,
    /// Euclidean distance (square root applied to the final value only).
    L2,
    /// Maximum inner product search.
    InnerProduct,
}

impl DistanceMetric {
    /// Rank distance between two vectors: lower is closer.
    #[inline]
    #[must_use]
    pub fn rank_distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::SquaredL2 | DistanceMetric::L2 => simd::l2_distance_squared(a, b),
            DistanceMetric::InnerProduct => -simd::dot(a, b),
        }
    }

    /// Convert a rank distance into the value reported to callers.
    #[inline]
    #[must_use]
    pub fn finalize(self, rank_distance: f32) -> f32 {
        match self {
            DistanceMetric::SquaredL2 => rank_distance,
            DistanceMetric::L2 => rank_distance.max(0.0).sqrt(),
            DistanceMetric::InnerProduct => -rank_distance,
        }
    }

    /// Reported value written into result slots that hold no neighbor.
    ///
    /// This is the worst possible value for the metric: `+inf` for the L2
    /// metrics and `-inf` for inner-product similarity.
    #[inline]
    #[must_use]
    pub fn no_result_distance(self) -> f32 {
        match self {
            DistanceMetric::SquaredL2 | DistanceMetric::L2 => f32::INFINITY,
            DistanceMetric::InnerProduct => f32::NEG_INFINITY,
        }
    }

    /// Whether reported values are similarities (higher is better).
    #[inline]
    #[must_use]
    pub fn is_similarity(self) -> bool {
        matches!(self, DistanceMetric::InnerProduct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_metrics_share_rank_distance() {
        let a = [0.0_f32, 0.0];
        let b = [3.0_f32, 4.0];
        let r = DistanceMetric::SquaredL2.rank_distance(&a, &b);
        assert_eq!(r, DistanceMetric::L2.rank_distance(&a, &b));
        assert!((DistanceMetric::SquaredL2.finalize(r) - 25.0).abs() < 1e-6);
        assert!((DistanceMetric::L2.finalize(r) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn inner_product_ranks_larger_dot_first() {
        let q = [1.0_f32, 0.0];
        let near = [2.0_f32, 0.0];
        let far = [0.5_f32, 0.0];
        let m = DistanceMetric::InnerProduct;
        assert!(m.rank_distance(&q, &near) < m.rank_distance(&q, &far));
        assert!((m.finalize(m.rank_distance(&q, &near)) - 2.0).abs() < 1e-6);
        assert!(m.is_similarity());
    }

    #[test]
    fn no_result_is_worst_value() {
        assert_eq!(DistanceMetric::L2.no_result_distance(), f32::INFINITY);
        assert_eq!(
            DistanceMetric::InnerProduct.no_result_distance(),
            f32::NEG_INFINITY
        );
    }

    #[test]
    fn l2_never_reports_negative_root() {
        assert_eq!(DistanceMetric::L2.finalize(-1e-7), 0.0);
    }
}
