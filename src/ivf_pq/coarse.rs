//! Coarse quantizer: the IVF partition of the vector space.

use std::cmp::Ordering;

use rayon::prelude::*;

use super::index::Generation;
use crate::distance::DistanceMetric;
use crate::error::{IvfPqError, Result};
use crate::partitioning::kmeans::{nearest_centroid, KMeans, KMeansParams};
use crate::resources::Resources;

/// Trained cluster centroids.
#[derive(Debug, Clone)]
pub struct CoarseQuantizer {
    generation: Generation,
    dim: usize,
    n_lists: usize,
    metric: DistanceMetric,
    /// `n_lists x dim`, row-major.
    centroids: Vec<f32>,
}

impl CoarseQuantizer {
    /// Cluster `n_rows` sample rows into `n_lists` centroids.
    #[allow(clippy::too_many_arguments)]
    pub fn train(
        res: &Resources,
        sample: &[f32],
        n_rows: usize,
        dim: usize,
        n_lists: usize,
        metric: DistanceMetric,
        kmeans: KMeansParams,
        generation: Generation,
    ) -> Result<Self> {
        if n_lists == 0 {
            return Err(IvfPqError::config("n_lists must be greater than 0"));
        }
        if n_rows == 0 {
            return Err(IvfPqError::config("coarse training sample is empty"));
        }

        let mut km = KMeans::new(dim, n_lists)?
            .with_metric(metric)
            .with_params(kmeans);
        km.fit(res, sample, n_rows)?;

        Ok(Self {
            generation,
            dim,
            n_lists,
            metric,
            centroids: km.into_centroids(),
        })
    }

    /// Wrap externally computed centroids.
    pub fn from_centroids(
        centroids: Vec<f32>,
        dim: usize,
        metric: DistanceMetric,
        generation: Generation,
    ) -> Result<Self> {
        if dim == 0 || centroids.is_empty() || centroids.len() % dim != 0 {
            return Err(IvfPqError::config(format!(
                "{} centroid values do not form rows of dimension {dim}",
                centroids.len()
            )));
        }
        Ok(Self {
            generation,
            dim,
            n_lists: centroids.len() / dim,
            metric,
            centroids,
        })
    }

    /// Nearest cluster (ties go to the lowest id).
    #[inline]
    pub fn assign(&self, vector: &[f32]) -> u32 {
        nearest_centroid(&self.centroids, self.dim, self.metric, vector) as u32
    }

    /// Nearest cluster of each of `n_rows` rows.
    pub fn assign_batch(&self, vectors: &[f32], n_rows: usize) -> Vec<u32> {
        vectors[..n_rows * self.dim]
            .par_chunks_exact(self.dim)
            .map(|v| self.assign(v))
            .collect()
    }

    /// The `n_probes` nearest clusters, closest first.
    ///
    /// `n_probes` is clamped to the number of lists; equal distances are
    /// ordered by cluster id.
    pub fn probe(&self, query: &[f32], n_probes: usize) -> Vec<u32> {
        let n = n_probes.min(self.n_lists);
        if n == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(f32, u32)> = self
            .centroids
            .chunks_exact(self.dim)
            .enumerate()
            .map(|(idx, c)| (self.metric.rank_distance(query, c), idx as u32))
            .collect();

        let by_distance =
            |a: &(f32, u32), b: &(f32, u32)| -> Ordering { a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)) };
        if n < scored.len() {
            scored.select_nth_unstable_by(n - 1, by_distance);
            scored.truncate(n);
        }
        scored.sort_unstable_by(by_distance);
        scored.into_iter().map(|(_, idx)| idx).collect()
    }

    #[inline]
    pub fn centroid(&self, cluster: u32) -> &[f32] {
        let start = cluster as usize * self.dim;
        &self.centroids[start..start + self.dim]
    }

    pub fn centroids(&self) -> &[f32] {
        &self.centroids
    }

    pub fn n_lists(&self) -> usize {
        self.n_lists
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }
}
