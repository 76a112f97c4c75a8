//! Product Quantization (PQ) of cluster residuals.
//!
//! A residual of `dim` values is (optionally zero-padded to `rot_dim` and)
//! split into `pq_dim` slices of `pq_len` values. Each slice is replaced by
//! the id of its nearest codebook entry, so a vector is stored as `pq_dim`
//! bytes. Codebooks are trained with k-means under squared L2 regardless of
//! the index metric: they approximate residual *values*, and the metric only
//! enters when lookup tables are built.

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::index::Generation;
use super::lut::LookupTable;
use super::params::{CodebookKind, IndexParams, DEFAULT_PQ_TRAIN_POINTS_PER_CODE};
use crate::distance::DistanceMetric;
use crate::error::{IvfPqError, Result};
use crate::partitioning::{KMeans, KMeansParams};
use crate::resources::Resources;
use crate::simd;

/// Shape of the code space, fixed at training time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PqLayout {
    /// Input dimensionality.
    pub dim: usize,
    /// Padded dimensionality, `pq_dim * pq_len >= dim`.
    pub rot_dim: usize,
    pub pq_dim: usize,
    pub pq_len: usize,
    pub pq_bits: u32,
    pub kind: CodebookKind,
}

impl PqLayout {
    /// Validate and derive a layout.
    ///
    /// `pq_dim == 0` selects `dim / 2` for even `dim`, else `dim`. A `dim`
    /// not divisible by `pq_dim` is rejected unless `pad` is set.
    pub fn new(
        dim: usize,
        pq_dim: usize,
        pq_bits: u32,
        kind: CodebookKind,
        pad: bool,
    ) -> Result<Self> {
        if dim == 0 {
            return Err(IvfPqError::config("dimension must be greater than 0"));
        }
        if pq_bits == 0 || pq_bits > 8 {
            return Err(IvfPqError::config(format!(
                "pq_bits must be in 1..=8, got {pq_bits}"
            )));
        }
        let pq_dim = match pq_dim {
            0 if dim % 2 == 0 => dim / 2,
            0 => dim,
            n => n,
        };
        if pq_dim > dim {
            return Err(IvfPqError::config(format!(
                "pq_dim ({pq_dim}) exceeds dimension ({dim})"
            )));
        }
        if dim % pq_dim != 0 && !pad {
            return Err(IvfPqError::config(format!(
                "dimension {dim} is not divisible by pq_dim {pq_dim} and padding is disabled"
            )));
        }
        let pq_len = dim.div_ceil(pq_dim);

        Ok(Self {
            dim,
            rot_dim: pq_dim * pq_len,
            pq_dim,
            pq_len,
            pq_bits,
            kind,
        })
    }

    pub fn from_params(params: &IndexParams, dim: usize) -> Result<Self> {
        Self::new(
            dim,
            params.pq_dim,
            params.pq_bits,
            params.codebook_kind,
            params.pad_dimension,
        )
    }

    /// Entries per codebook, `2^pq_bits`.
    #[inline]
    pub fn book_size(&self) -> usize {
        1 << self.pq_bits
    }

    #[inline]
    pub fn is_padded(&self) -> bool {
        self.rot_dim != self.dim
    }
}

/// Trained product quantizer.
#[derive(Debug, Clone)]
pub struct ProductQuantizer {
    generation: Generation,
    layout: PqLayout,
    /// `n_books x book_size x pq_len`; `n_books` is `pq_dim` for per-subspace
    /// codebooks and `n_lists` for per-cluster codebooks.
    codebooks: Vec<f32>,
    n_books: usize,
}

impl ProductQuantizer {
    /// Train codebooks on `n_rows` residuals of `layout.rot_dim` values.
    ///
    /// `labels` gives each residual's cluster and is only consulted for
    /// per-cluster codebooks.
    #[allow(clippy::too_many_arguments)]
    pub fn train(
        res: &Resources,
        layout: PqLayout,
        residuals: &[f32],
        n_rows: usize,
        labels: &[u32],
        n_lists: usize,
        kmeans: KMeansParams,
        generation: Generation,
    ) -> Result<Self> {
        if n_rows == 0 {
            return Err(IvfPqError::config("PQ training set is empty"));
        }
        if residuals.len() < n_rows * layout.rot_dim {
            return Err(IvfPqError::argument(format!(
                "PQ training input holds {} values, expected {}",
                residuals.len(),
                n_rows * layout.rot_dim
            )));
        }

        let codebooks = match layout.kind {
            CodebookKind::PerSubspace => {
                Self::train_per_subspace(res, &layout, residuals, n_rows, &kmeans)?
            }
            CodebookKind::PerCluster => {
                if labels.len() != n_rows {
                    return Err(IvfPqError::argument(format!(
                        "{} labels for {n_rows} PQ training residuals",
                        labels.len()
                    )));
                }
                Self::train_per_cluster(res, &layout, residuals, labels, n_lists, &kmeans)?
            }
        };
        let n_books = codebooks.len() / (layout.book_size() * layout.pq_len);

        Ok(Self {
            generation,
            layout,
            codebooks,
            n_books,
        })
    }

    fn train_per_subspace(
        res: &Resources,
        layout: &PqLayout,
        residuals: &[f32],
        n_rows: usize,
        kmeans: &KMeansParams,
    ) -> Result<Vec<f32>> {
        let mut codebooks = Vec::with_capacity(layout.pq_dim * layout.book_size() * layout.pq_len);
        let mut sub = vec![0.0f32; n_rows * layout.pq_len];

        for m in 0..layout.pq_dim {
            res.check_cancelled()?;

            let start = m * layout.pq_len;
            for (dst, row) in sub
                .chunks_exact_mut(layout.pq_len)
                .zip(residuals.chunks_exact(layout.rot_dim))
            {
                dst.copy_from_slice(&row[start..start + layout.pq_len]);
            }

            let params = KMeansParams {
                seed: kmeans.seed.wrapping_add(m as u64),
                ..kmeans.clone()
            };
            let mut km = KMeans::new(layout.pq_len, layout.book_size())?.with_params(params);
            km.fit(res, &sub, n_rows)?;
            codebooks.extend_from_slice(km.centroids());
        }

        Ok(codebooks)
    }

    fn train_per_cluster(
        res: &Resources,
        layout: &PqLayout,
        residuals: &[f32],
        labels: &[u32],
        n_lists: usize,
        kmeans: &KMeansParams,
    ) -> Result<Vec<f32>> {
        let book_len = layout.book_size() * layout.pq_len;
        let mut codebooks = Vec::with_capacity(n_lists * book_len);

        let mut members: Vec<Vec<usize>> = vec![Vec::new(); n_lists];
        for (row, &label) in labels.iter().enumerate() {
            members[label as usize].push(row);
        }

        // Trained on demand for clusters that received no training residuals.
        let mut pooled: Option<Vec<f32>> = None;

        for (cluster, rows) in members.iter().enumerate() {
            res.check_cancelled()?;

            let params = KMeansParams {
                seed: kmeans.seed.wrapping_add(cluster as u64),
                ..kmeans.clone()
            };

            if rows.is_empty() {
                if pooled.is_none() {
                    tracing::debug!(cluster, "cluster has no PQ training data; using pooled codebook");
                    pooled = Some(Self::train_pooled(res, layout, residuals, labels.len(), kmeans)?);
                }
                if let Some(book) = &pooled {
                    codebooks.extend_from_slice(book);
                }
                continue;
            }

            // Every subspace slice of every member row is one training point.
            let mut sub = Vec::with_capacity(rows.len() * layout.rot_dim);
            for &row in rows {
                sub.extend_from_slice(&residuals[row * layout.rot_dim..(row + 1) * layout.rot_dim]);
            }
            let n_sub = rows.len() * layout.pq_dim;
            let mut km = KMeans::new(layout.pq_len, layout.book_size())?.with_params(params);
            km.fit(res, &sub, n_sub)?;
            codebooks.extend_from_slice(km.centroids());
        }

        Ok(codebooks)
    }

    /// One codebook over the slices of all residuals, sub-sampled.
    fn train_pooled(
        res: &Resources,
        layout: &PqLayout,
        residuals: &[f32],
        n_rows: usize,
        kmeans: &KMeansParams,
    ) -> Result<Vec<f32>> {
        let n_sub = n_rows * layout.pq_dim;
        let take = n_sub.min(layout.book_size() * DEFAULT_PQ_TRAIN_POINTS_PER_CODE);
        let mut rng = StdRng::seed_from_u64(kmeans.seed);
        let mut picks = rand::seq::index::sample(&mut rng, n_sub, take).into_vec();
        picks.sort_unstable();

        let mut sub = Vec::with_capacity(take * layout.pq_len);
        for p in picks {
            let start = p * layout.pq_len;
            sub.extend_from_slice(&residuals[start..start + layout.pq_len]);
        }
        let mut km = KMeans::new(layout.pq_len, layout.book_size())?.with_params(kmeans.clone());
        km.fit(res, &sub, take)?;
        Ok(km.into_centroids())
    }

    /// Codebook used for subspace `m` of a vector in `cluster`.
    #[inline]
    pub fn codebook(&self, m: usize, cluster: u32) -> &[f32] {
        let book = match self.layout.kind {
            CodebookKind::PerSubspace => m,
            CodebookKind::PerCluster => cluster as usize,
        };
        let len = self.layout.book_size() * self.layout.pq_len;
        &self.codebooks[book * len..(book + 1) * len]
    }

    /// Encode a padded residual (`rot_dim` values) into `out[..pq_dim]`.
    pub fn encode(&self, residual: &[f32], cluster: u32, out: &mut [u8]) {
        let pq_len = self.layout.pq_len;
        for (m, code) in out.iter_mut().enumerate().take(self.layout.pq_dim) {
            let slice = &residual[m * pq_len..(m + 1) * pq_len];
            let mut best_code = 0usize;
            let mut best_dist = f32::INFINITY;
            for (j, entry) in self.codebook(m, cluster).chunks_exact(pq_len).enumerate() {
                let dist = simd::l2_distance_squared(slice, entry);
                if dist < best_dist {
                    best_dist = dist;
                    best_code = j;
                }
            }
            *code = best_code as u8;
        }
    }

    /// Encode a residual of `dim` values, padding as needed.
    pub fn encode_vec(&self, residual: &[f32], cluster: u32) -> Vec<u8> {
        let mut padded = vec![0.0f32; self.layout.rot_dim];
        padded[..self.layout.dim].copy_from_slice(&residual[..self.layout.dim]);
        let mut code = vec![0u8; self.layout.pq_dim];
        self.encode(&padded, cluster, &mut code);
        code
    }

    /// Approximate residual (`dim` values) of a code.
    pub fn decode(&self, code: &[u8], cluster: u32, out: &mut [f32]) {
        let pq_len = self.layout.pq_len;
        let dim = self.layout.dim;
        for (m, &c) in code.iter().enumerate().take(self.layout.pq_dim) {
            let entry = &self.codebook(m, cluster)[c as usize * pq_len..(c as usize + 1) * pq_len];
            for (j, &v) in entry.iter().enumerate() {
                let idx = m * pq_len + j;
                if idx < dim {
                    out[idx] = v;
                }
            }
        }
    }

    /// Fill `lut` for `query` against the cluster with `centroid`.
    ///
    /// `scratch` must hold `rot_dim` values; its padding tail must be zero.
    pub fn compute_lut(
        &self,
        query: &[f32],
        centroid: &[f32],
        cluster: u32,
        metric: DistanceMetric,
        scratch: &mut [f32],
        lut: &mut LookupTable,
    ) {
        let dim = self.layout.dim;
        let pq_len = self.layout.pq_len;

        let base = match metric {
            DistanceMetric::SquaredL2 | DistanceMetric::L2 => {
                simd::sub_into(query, centroid, &mut scratch[..dim]);
                0.0
            }
            DistanceMetric::InnerProduct => {
                scratch[..dim].copy_from_slice(query);
                -simd::dot(query, centroid)
            }
        };
        lut.set_base(base);

        for m in 0..self.layout.pq_dim {
            let slice = &scratch[m * pq_len..(m + 1) * pq_len];
            let book = self.codebook(m, cluster);
            let row = lut.row_mut(m);
            for (dst, entry) in row.iter_mut().zip(book.chunks_exact(pq_len)) {
                *dst = match metric {
                    DistanceMetric::SquaredL2 | DistanceMetric::L2 => {
                        simd::l2_distance_squared(slice, entry)
                    }
                    DistanceMetric::InnerProduct => -simd::dot(slice, entry),
                };
            }
        }
    }

    pub fn layout(&self) -> &PqLayout {
        &self.layout
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Number of trained codebooks.
    pub fn n_books(&self) -> usize {
        self.n_books
    }

    /// Get codebooks (for testing/debugging).
    pub fn codebooks(&self) -> &[f32] {
        &self.codebooks
    }
}
