//! k-means clustering implementation.
//!
//! Lloyd's algorithm with k-means++ (or uniform random) seeding. Used by the
//! coarse quantizer (with the index metric) and by the product quantizer
//! (always squared L2 on residual slices).
//!
//! # Degenerate inputs
//!
//! The requested `k` is always honoured. When the input holds fewer distinct
//! points than `k`, seeding stops at the last distinct point and the
//! remaining centroids duplicate the chosen ones cyclically (centroid `j`
//! copies centroid `j % distinct`). Assignment breaks ties toward the lowest
//! centroid id, so duplicates end up owning no points. A cluster that becomes
//! empty during refinement keeps its previous centroid.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::distance::DistanceMetric;
use crate::error::{IvfPqError, Result};
use crate::resources::Resources;
use crate::simd;

/// Centroid seeding strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KMeansInit {
    /// D²-weighted sampling; slower to seed, better starting partition.
    #[default]
    PlusPlus,
    /// Uniform sample of `k` rows; cheap for large `k`.
    Random,
}

/// k-means training parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KMeansParams {
    /// Maximum number of Lloyd iterations.
    pub n_iters: usize,
    /// Stop once no centroid moves more than this (squared L2).
    pub tolerance: f32,
    pub init: KMeansInit,
    pub seed: u64,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            n_iters: 20,
            tolerance: 1e-6,
            init: KMeansInit::PlusPlus,
            seed: 0x5eed,
        }
    }
}

/// k-means clustering over row-major `f32` vectors.
#[derive(Debug, Clone)]
pub struct KMeans {
    /// Centroids, `k x dimension`, row-major.
    centroids: Vec<f32>,
    dimension: usize,
    k: usize,
    metric: DistanceMetric,
    params: KMeansParams,
}

impl KMeans {
    /// Create new k-means with k clusters.
    pub fn new(dimension: usize, k: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(IvfPqError::config("k-means dimension must be greater than 0"));
        }
        if k == 0 {
            return Err(IvfPqError::config("cluster count must be greater than 0"));
        }

        Ok(Self {
            centroids: Vec::new(),
            dimension,
            k,
            metric: DistanceMetric::SquaredL2,
            params: KMeansParams::default(),
        })
    }

    #[must_use]
    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    #[must_use]
    pub fn with_params(mut self, params: KMeansParams) -> Self {
        self.params = params;
        self
    }

    /// Configure a deterministic seed.
    ///
    /// Repeated `fit(...)` calls on the same inputs produce identical results.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.params.seed = seed;
        self
    }

    /// Train on `num_vectors` rows of `vectors`.
    pub fn fit(&mut self, res: &Resources, vectors: &[f32], num_vectors: usize) -> Result<()> {
        if num_vectors == 0 {
            return Err(IvfPqError::config("k-means training sample is empty"));
        }
        if vectors.len() < num_vectors * self.dimension {
            return Err(IvfPqError::argument(format!(
                "k-means input holds {} values, expected {}",
                vectors.len(),
                num_vectors * self.dimension
            )));
        }

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        self.centroids = match self.params.init {
            KMeansInit::PlusPlus => self.kmeans_plus_plus(res, vectors, num_vectors, &mut rng)?,
            KMeansInit::Random => self.random_init(vectors, num_vectors, &mut rng),
        };

        for iteration in 0..self.params.n_iters {
            res.check_cancelled()?;

            let assignments = self.assign_clusters(vectors, num_vectors);
            let new_centroids = self.update_centroids(vectors, &assignments);

            let max_shift = self
                .centroids
                .chunks_exact(self.dimension)
                .zip(new_centroids.chunks_exact(self.dimension))
                .map(|(old, new)| simd::l2_distance_squared(old, new))
                .fold(0.0f32, f32::max);

            self.centroids = new_centroids;
            if max_shift <= self.params.tolerance {
                tracing::debug!(iteration, k = self.k, "k-means converged");
                break;
            }
        }

        Ok(())
    }

    /// k-means++ initialization.
    fn kmeans_plus_plus(
        &self,
        res: &Resources,
        vectors: &[f32],
        num_vectors: usize,
        rng: &mut StdRng,
    ) -> Result<Vec<f32>> {
        let mut centroids = Vec::with_capacity(self.k * self.dimension);

        // First centroid: random vector
        let first_idx = rng.random_range(0..num_vectors);
        centroids.extend_from_slice(self.get_vector(vectors, first_idx));

        // Squared distance from every row to its nearest chosen centroid.
        let mut min_dist: Vec<f32> = (0..num_vectors)
            .into_par_iter()
            .map(|i| simd::l2_distance_squared(self.get_vector(vectors, i), &centroids))
            .collect();

        let mut chosen = 1;
        while chosen < self.k {
            res.check_cancelled()?;

            let total: f64 = min_dist.iter().map(|&d| f64::from(d)).sum();
            if total <= 0.0 {
                break;
            }

            // Sample proportional to squared distance; never a point already covered.
            let threshold = rng.random::<f64>() * total;
            let mut cumulative = 0.0f64;
            let mut picked = None;
            for (i, &dist) in min_dist.iter().enumerate() {
                if dist <= 0.0 {
                    continue;
                }
                cumulative += f64::from(dist);
                picked = Some(i);
                if cumulative >= threshold {
                    break;
                }
            }
            let Some(idx) = picked else { break };

            let new_centroid = self.get_vector(vectors, idx);
            centroids.extend_from_slice(new_centroid);
            chosen += 1;

            min_dist.par_iter_mut().enumerate().for_each(|(i, d)| {
                let dist = simd::l2_distance_squared(self.get_vector(vectors, i), new_centroid);
                if dist < *d {
                    *d = dist;
                }
            });
        }

        if chosen < self.k {
            tracing::warn!(
                distinct = chosen,
                requested = self.k,
                "fewer distinct training points than clusters; duplicating centroids"
            );
            self.fill_cyclic(&mut centroids, chosen);
        }

        Ok(centroids)
    }

    /// Uniform random initialization.
    fn random_init(&self, vectors: &[f32], num_vectors: usize, rng: &mut StdRng) -> Vec<f32> {
        let take = self.k.min(num_vectors);
        let mut rows = rand::seq::index::sample(rng, num_vectors, take).into_vec();
        rows.sort_unstable();

        let mut centroids = Vec::with_capacity(self.k * self.dimension);
        for &row in &rows {
            centroids.extend_from_slice(self.get_vector(vectors, row));
        }
        if take < self.k {
            self.fill_cyclic(&mut centroids, take);
        }
        centroids
    }

    /// Extend `centroids` from `chosen` rows to `k` rows by cyclic copies.
    fn fill_cyclic(&self, centroids: &mut Vec<f32>, chosen: usize) {
        for j in chosen..self.k {
            let src = (j % chosen) * self.dimension;
            centroids.extend_from_within(src..src + self.dimension);
        }
    }

    /// Nearest centroid to `vector` (ties go to the lowest id).
    #[inline]
    pub fn assign(&self, vector: &[f32]) -> usize {
        nearest_centroid(&self.centroids, self.dimension, self.metric, vector)
    }

    /// Assign vectors to nearest clusters.
    pub fn assign_clusters(&self, vectors: &[f32], num_vectors: usize) -> Vec<u32> {
        (0..num_vectors)
            .into_par_iter()
            .map(|i| self.assign(self.get_vector(vectors, i)) as u32)
            .collect()
    }

    /// Update centroids based on assignments.
    ///
    /// Sums are accumulated sequentially in `f64` so the result is identical
    /// for any thread count.
    fn update_centroids(&self, vectors: &[f32], assignments: &[u32]) -> Vec<f32> {
        let mut cluster_sums = vec![0.0f64; self.k * self.dimension];
        let mut cluster_counts = vec![0usize; self.k];

        for (i, &cluster) in assignments.iter().enumerate() {
            let cluster = cluster as usize;
            cluster_counts[cluster] += 1;
            let sums = &mut cluster_sums[cluster * self.dimension..(cluster + 1) * self.dimension];
            for (s, &val) in sums.iter_mut().zip(self.get_vector(vectors, i)) {
                *s += f64::from(val);
            }
        }

        let mut new_centroids = self.centroids.clone();
        for (c, &count) in cluster_counts.iter().enumerate() {
            if count == 0 {
                // Empty cluster: keep old centroid
                continue;
            }
            let sums = &cluster_sums[c * self.dimension..(c + 1) * self.dimension];
            let dst = &mut new_centroids[c * self.dimension..(c + 1) * self.dimension];
            for (d, &s) in dst.iter_mut().zip(sums) {
                *d = (s / count as f64) as f32;
            }
        }

        new_centroids
    }

    /// Get vector from SoA storage.
    #[inline]
    fn get_vector<'a>(&self, vectors: &'a [f32], idx: usize) -> &'a [f32] {
        let start = idx * self.dimension;
        &vectors[start..start + self.dimension]
    }

    /// Get centroids (`k x dimension`, row-major).
    pub fn centroids(&self) -> &[f32] {
        &self.centroids
    }

    pub fn into_centroids(self) -> Vec<f32> {
        self.centroids
    }

    pub fn k(&self) -> usize {
        self.k
    }
}

/// Index of the centroid closest to `vector`; strict comparison keeps the
/// lowest id on ties.
#[inline]
pub(crate) fn nearest_centroid(
    centroids: &[f32],
    dimension: usize,
    metric: DistanceMetric,
    vector: &[f32],
) -> usize {
    let mut best_cluster = 0;
    let mut best_dist = f32::INFINITY;
    for (cluster_idx, centroid) in centroids.chunks_exact(dimension).enumerate() {
        let dist = metric.rank_distance(vector, centroid);
        if dist < best_dist {
            best_dist = dist;
            best_cluster = cluster_idx;
        }
    }
    best_cluster
}
