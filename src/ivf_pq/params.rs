//! Build and search parameters.
//!
//! Parameter structs derive `serde` so they can be loaded from any
//! configuration format; missing fields take their defaults.

use serde::{Deserialize, Serialize};

use crate::distance::DistanceMetric;
use crate::error::{IvfPqError, Result};
use crate::partitioning::{KMeansInit, KMeansParams};

/// Coarse training points drawn per list when no sample size is given.
pub const DEFAULT_TRAIN_POINTS_PER_LIST: usize = 256;

/// Residuals drawn per codebook entry when no PQ sample size is given.
pub const DEFAULT_PQ_TRAIN_POINTS_PER_CODE: usize = 256;

/// How PQ codebooks are shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodebookKind {
    /// One codebook per subspace, shared by all clusters.
    #[default]
    PerSubspace,
    /// One codebook per cluster, shared by all subspaces of that cluster.
    PerCluster,
}

/// Index construction parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexParams {
    /// Number of coarse clusters (inverted lists).
    pub n_lists: usize,
    /// Number of PQ subspaces; `0` picks `dim / 2` for even `dim`, else `dim`.
    pub pq_dim: usize,
    /// Bits per subspace code, `1..=8`.
    pub pq_bits: u32,
    pub codebook_kind: CodebookKind,
    pub metric: DistanceMetric,
    /// Lloyd iterations for both coarse and PQ training.
    pub kmeans_n_iters: usize,
    pub kmeans_init: KMeansInit,
    /// Rows sampled to train the coarse quantizer; `None` uses
    /// `min(n_rows, 256 * n_lists)`.
    pub train_sample_size: Option<usize>,
    /// Residuals sampled to train PQ codebooks; `None` uses
    /// `min(sample, 256 * 2^pq_bits)`.
    pub pq_train_sample_size: Option<usize>,
    /// Zero-pad residuals when `dim` is not divisible by `pq_dim`.
    pub pad_dimension: bool,
    /// Encode and store the training dataset after training.
    pub add_data_on_build: bool,
    pub seed: u64,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            n_lists: 1024,
            pq_dim: 0,
            pq_bits: 8,
            codebook_kind: CodebookKind::PerSubspace,
            metric: DistanceMetric::SquaredL2,
            kmeans_n_iters: 20,
            kmeans_init: KMeansInit::PlusPlus,
            train_sample_size: None,
            pq_train_sample_size: None,
            pad_dimension: false,
            add_data_on_build: true,
            seed: 0x5eed,
        }
    }
}

impl IndexParams {
    #[must_use]
    pub fn with_n_lists(mut self, n_lists: usize) -> Self {
        self.n_lists = n_lists;
        self
    }

    #[must_use]
    pub fn with_pq(mut self, pq_dim: usize, pq_bits: u32) -> Self {
        self.pq_dim = pq_dim;
        self.pq_bits = pq_bits;
        self
    }

    #[must_use]
    pub fn with_codebook_kind(mut self, kind: CodebookKind) -> Self {
        self.codebook_kind = kind;
        self
    }

    #[must_use]
    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    #[must_use]
    pub fn with_train_sample_size(mut self, size: usize) -> Self {
        self.train_sample_size = Some(size);
        self
    }

    #[must_use]
    pub fn with_pq_train_sample_size(mut self, size: usize) -> Self {
        self.pq_train_sample_size = Some(size);
        self
    }

    #[must_use]
    pub fn with_padding(mut self, pad: bool) -> Self {
        self.pad_dimension = pad;
        self
    }

    #[must_use]
    pub fn with_add_data_on_build(mut self, add: bool) -> Self {
        self.add_data_on_build = add;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Check parameters that do not depend on the dataset.
    pub fn validate(&self) -> Result<()> {
        if self.n_lists == 0 {
            return Err(IvfPqError::config("n_lists must be greater than 0"));
        }
        if self.pq_bits == 0 || self.pq_bits > 8 {
            return Err(IvfPqError::config(format!(
                "pq_bits must be in 1..=8, got {}",
                self.pq_bits
            )));
        }
        if self.kmeans_n_iters == 0 {
            return Err(IvfPqError::config("kmeans_n_iters must be greater than 0"));
        }
        if self.train_sample_size == Some(0) {
            return Err(IvfPqError::config("train_sample_size must be greater than 0"));
        }
        if self.pq_train_sample_size == Some(0) {
            return Err(IvfPqError::config(
                "pq_train_sample_size must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Coarse training sample size for a dataset of `n_rows`.
    pub fn coarse_sample_size(&self, n_rows: usize) -> usize {
        self.train_sample_size
            .unwrap_or_else(|| self.n_lists.saturating_mul(DEFAULT_TRAIN_POINTS_PER_LIST))
            .min(n_rows)
    }

    /// PQ training sample size given `available` residuals.
    pub fn pq_sample_size(&self, available: usize) -> usize {
        self.pq_train_sample_size
            .unwrap_or_else(|| (1usize << self.pq_bits) * DEFAULT_PQ_TRAIN_POINTS_PER_CODE)
            .min(available)
    }

    pub(crate) fn kmeans_params(&self, seed: u64) -> KMeansParams {
        KMeansParams {
            n_iters: self.kmeans_n_iters,
            init: self.kmeans_init,
            seed,
            ..KMeansParams::default()
        }
    }
}

/// Query-time parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    /// Clusters probed per query; clamped to the number of lists.
    pub n_probes: usize,
    /// Candidates fetched per requested neighbor before exact re-ranking.
    /// `1.0` disables refinement.
    pub refine_ratio: f32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            n_probes: 20,
            refine_ratio: 1.0,
        }
    }
}

impl SearchParams {
    #[must_use]
    pub fn with_n_probes(mut self, n_probes: usize) -> Self {
        self.n_probes = n_probes;
        self
    }

    #[must_use]
    pub fn with_refine_ratio(mut self, ratio: f32) -> Self {
        self.refine_ratio = ratio;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_probes == 0 {
            return Err(IvfPqError::argument("n_probes must be greater than 0"));
        }
        if !self.refine_ratio.is_finite() || self.refine_ratio < 1.0 {
            return Err(IvfPqError::argument(format!(
                "refine_ratio must be a finite value >= 1.0, got {}",
                self.refine_ratio
            )));
        }
        Ok(())
    }

    pub fn refines(&self) -> bool {
        self.refine_ratio > 1.0
    }

    /// Candidates to fetch before refinement for a final `k`.
    pub fn refine_candidates(&self, k: usize) -> usize {
        ((k as f64) * f64::from(self.refine_ratio)).ceil() as usize
    }
}
