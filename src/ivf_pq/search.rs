//! Search Engine: approximate top-k queries against an index.
//!
//! Per query:
//!
//! 1. rank all centroids and keep the `n_probes` nearest (ties by cluster id);
//! 2. for each probed cluster, build a lookup table from the query (residual)
//!    to every codebook entry;
//! 3. scan the cluster's list, scoring each entry with `pq_dim` table lookups;
//! 4. keep the best `k` across all probed clusters in a bounded heap;
//! 5. write them closest first.
//!
//! Queries are independent and run in parallel. Results are a pure function
//! of the index contents, the query and the parameters.
//!
//! # Unfilled slots
//!
//! When fewer than `k` candidates exist in the probed lists, the remaining
//! slots of that query's row hold [`IndexId::NO_RESULT`] and
//! [`DistanceMetric::no_result_distance`](crate::distance::DistanceMetric::no_result_distance);
//! [`SearchResults::count`] reports how many slots are real.

use rayon::prelude::*;

use super::index::Index;
use super::lists::CHUNK_ROWS;
use super::lut::LookupTable;
use super::params::SearchParams;
use super::refine::refine;
use super::topk::TopK;
use crate::element::{DatasetView, IndexId, VectorElement};
use crate::error::{IvfPqError, Result};
use crate::resources::Resources;

/// Fixed-width search output: `n_queries` rows of `k` slots.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResults<I> {
    n_queries: usize,
    k: usize,
    ids: Vec<I>,
    distances: Vec<f32>,
    counts: Vec<usize>,
}

impl<I: IndexId> SearchResults<I> {
    pub(crate) fn from_parts(
        n_queries: usize,
        k: usize,
        ids: Vec<I>,
        distances: Vec<f32>,
        counts: Vec<usize>,
    ) -> Self {
        debug_assert_eq!(ids.len(), n_queries * k);
        debug_assert_eq!(distances.len(), n_queries * k);
        debug_assert_eq!(counts.len(), n_queries);
        Self {
            n_queries,
            k,
            ids,
            distances,
            counts,
        }
    }

    pub fn n_queries(&self) -> usize {
        self.n_queries
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of real neighbors found for query `q` (`<= k`).
    pub fn count(&self, q: usize) -> usize {
        self.counts[q]
    }

    /// All `k` id slots of query `q`, including unfilled ones.
    pub fn row_ids(&self, q: usize) -> &[I] {
        &self.ids[q * self.k..(q + 1) * self.k]
    }

    /// All `k` distance slots of query `q`, including unfilled ones.
    pub fn row_distances(&self, q: usize) -> &[f32] {
        &self.distances[q * self.k..(q + 1) * self.k]
    }

    /// Real neighbors of query `q`, closest first.
    pub fn neighbors(&self, q: usize) -> impl Iterator<Item = (I, f32)> + '_ {
        let n = self.counts[q];
        self.row_ids(q)[..n]
            .iter()
            .copied()
            .zip(self.row_distances(q)[..n].iter().copied())
    }

    /// Flat id buffer, `n_queries * k`.
    pub fn ids(&self) -> &[I] {
        &self.ids
    }

    /// Flat distance buffer, `n_queries * k`.
    pub fn distances(&self) -> &[f32] {
        &self.distances
    }

    pub fn into_parts(self) -> (Vec<I>, Vec<f32>, Vec<usize>) {
        (self.ids, self.distances, self.counts)
    }
}

/// Per-worker buffers reused across queries.
struct QueryScratch<I> {
    query: Vec<f32>,
    residual: Vec<f32>,
    lut: LookupTable,
    chunk_distances: Vec<f32>,
    top: TopK<I>,
}

impl<I: IndexId> QueryScratch<I> {
    fn new(index: &Index<I>, k: usize) -> Self {
        let layout = index.pq().layout();
        Self {
            query: vec![0.0; layout.dim],
            residual: vec![0.0; layout.rot_dim],
            lut: LookupTable::new(layout.pq_dim, layout.book_size()),
            chunk_distances: Vec::with_capacity(CHUNK_ROWS),
            top: TopK::new(k),
        }
    }

    fn bytes(index: &Index<I>, k: usize) -> usize {
        let layout = index.pq().layout();
        // The heap never holds more entries than the index does.
        let kept = k.min(index.len());
        (layout.dim + layout.rot_dim) * std::mem::size_of::<f32>()
            + LookupTable::bytes_for(layout.pq_dim, layout.book_size())
            + CHUNK_ROWS * std::mem::size_of::<f32>()
            + kept * (std::mem::size_of::<I>() + std::mem::size_of::<f32>())
    }
}

/// Slot count of an `n_queries x k` result, if its buffers are addressable.
pub(crate) fn result_slots<I>(n_queries: usize, k: usize) -> Result<usize> {
    let slot_bytes = std::mem::size_of::<I>().max(std::mem::size_of::<f32>());
    n_queries
        .checked_mul(k)
        .filter(|&slots| {
            slots
                .checked_mul(slot_bytes)
                .is_some_and(|bytes| bytes <= isize::MAX as usize)
        })
        .ok_or_else(|| {
            IvfPqError::argument(format!("k = {k} is too large for {n_queries} queries"))
        })
}

/// `len` copies of `value`; allocation failure is `ResourceExhausted`.
pub(crate) fn filled<T: Clone>(value: T, len: usize) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| IvfPqError::ResourceExhausted {
            requested: len.saturating_mul(std::mem::size_of::<T>()),
        })?;
    v.resize(len, value);
    Ok(v)
}

fn validate_queries<T: VectorElement, I: IndexId>(
    index: &Index<I>,
    queries: &DatasetView<'_, T>,
) -> Result<()> {
    if queries.dim() != index.dim() {
        return Err(IvfPqError::argument(format!(
            "queries have dimension {}, index has {}",
            queries.dim(),
            index.dim()
        )));
    }
    Ok(())
}

/// Search `queries` for their `k` approximate nearest neighbors.
///
/// `k == 0` yields an empty result. `n_probes` larger than the number of
/// lists is clamped. Refinement (`refine_ratio > 1`) needs the original
/// vectors; use [`search_refined`].
pub fn search<T: VectorElement, I: IndexId>(
    res: &Resources,
    params: &SearchParams,
    index: &Index<I>,
    queries: DatasetView<'_, T>,
    k: usize,
) -> Result<SearchResults<I>> {
    params.validate()?;
    if params.refines() {
        return Err(IvfPqError::argument(
            "refine_ratio > 1 requires the original dataset; use search_refined",
        ));
    }
    validate_queries(index, &queries)?;
    search_unrefined(res, params.n_probes, index, queries, k)
}

/// Search into caller-owned buffers of `queries.n_rows() * k` slots.
///
/// Returns the number of real neighbors per query.
pub fn search_into<T: VectorElement, I: IndexId>(
    res: &Resources,
    params: &SearchParams,
    index: &Index<I>,
    queries: DatasetView<'_, T>,
    k: usize,
    out_ids: &mut [I],
    out_distances: &mut [f32],
) -> Result<Vec<usize>> {
    params.validate()?;
    if params.refines() {
        return Err(IvfPqError::argument(
            "refine_ratio > 1 requires the original dataset; use search_refined",
        ));
    }
    validate_queries(index, &queries)?;
    let slots = result_slots::<I>(queries.n_rows(), k)?;
    if out_ids.len() != slots || out_distances.len() != slots {
        return Err(IvfPqError::argument(format!(
            "output buffers hold {} ids and {} distances, expected {slots}",
            out_ids.len(),
            out_distances.len()
        )));
    }

    let mut counts = vec![0usize; queries.n_rows()];
    search_core(res, params.n_probes, index, queries, k, out_ids, out_distances, &mut counts)?;
    Ok(counts)
}

/// Search with an exact re-ranking pass over `dataset`.
///
/// Fetches `ceil(k * refine_ratio)` candidates per query from the index,
/// recomputes their exact distances against `dataset` (rows addressed by
/// id) and keeps the best `k`. With `refine_ratio == 1` this is [`search`].
pub fn search_refined<T: VectorElement, I: IndexId>(
    res: &Resources,
    params: &SearchParams,
    index: &Index<I>,
    dataset: DatasetView<'_, T>,
    queries: DatasetView<'_, T>,
    k: usize,
) -> Result<SearchResults<I>> {
    params.validate()?;
    validate_queries(index, &queries)?;
    if dataset.dim() != index.dim() {
        return Err(IvfPqError::argument(format!(
            "refinement dataset has dimension {}, index has {}",
            dataset.dim(),
            index.dim()
        )));
    }
    if !params.refines() {
        return search_unrefined(res, params.n_probes, index, queries, k);
    }

    let candidates = search_unrefined(
        res,
        params.n_probes,
        index,
        queries,
        params.refine_candidates(k),
    )?;
    refine(res, dataset, queries, &candidates, k, index.metric())
}

fn search_unrefined<T: VectorElement, I: IndexId>(
    res: &Resources,
    n_probes: usize,
    index: &Index<I>,
    queries: DatasetView<'_, T>,
    k: usize,
) -> Result<SearchResults<I>> {
    let n_queries = queries.n_rows();
    let slots = result_slots::<I>(n_queries, k)?;
    let mut ids = filled(I::NO_RESULT, slots)?;
    let mut distances = filled(index.metric().no_result_distance(), slots)?;
    let mut counts = vec![0usize; n_queries];
    search_core(res, n_probes, index, queries, k, &mut ids, &mut distances, &mut counts)?;
    Ok(SearchResults::from_parts(n_queries, k, ids, distances, counts))
}

#[allow(clippy::too_many_arguments)]
fn search_core<T: VectorElement, I: IndexId>(
    res: &Resources,
    n_probes: usize,
    index: &Index<I>,
    queries: DatasetView<'_, T>,
    k: usize,
    out_ids: &mut [I],
    out_distances: &mut [f32],
    counts: &mut [usize],
) -> Result<()> {
    if k == 0 || queries.is_empty() {
        counts.fill(0);
        return Ok(());
    }

    let _scratch = res.allocate(res.num_threads().saturating_mul(QueryScratch::<I>::bytes(index, k)))?;
    let n_probes = n_probes.min(index.n_lists());
    tracing::trace!(n_queries = queries.n_rows(), k, n_probes, "searching");

    res.install(|| {
        out_ids
            .par_chunks_mut(k)
            .zip(out_distances.par_chunks_mut(k))
            .zip(counts.par_iter_mut())
            .enumerate()
            .for_each_init(
                || QueryScratch::new(index, k),
                |scratch, (q, ((ids, dists), count))| {
                    *count = search_one(index, queries, q, n_probes, scratch, ids, dists);
                },
            );
    });
    Ok(())
}

fn search_one<T: VectorElement, I: IndexId>(
    index: &Index<I>,
    queries: DatasetView<'_, T>,
    q: usize,
    n_probes: usize,
    scratch: &mut QueryScratch<I>,
    out_ids: &mut [I],
    out_distances: &mut [f32],
) -> usize {
    let metric = index.metric();
    let coarse = index.coarse();
    let pq = index.pq();
    let lists = index.lists();

    queries.row_f32_into(q, &mut scratch.query);
    scratch.top.clear();

    for cluster in coarse.probe(&scratch.query, n_probes) {
        let reader = lists.reader(cluster);
        if reader.is_empty() {
            continue;
        }
        pq.compute_lut(
            &scratch.query,
            coarse.centroid(cluster),
            cluster,
            metric,
            &mut scratch.residual,
            &mut scratch.lut,
        );
        for (codes, ids) in reader.chunks() {
            scratch.lut.distances(codes, &mut scratch.chunk_distances);
            for (&id, &distance) in ids.iter().zip(&scratch.chunk_distances) {
                scratch.top.push(id, distance);
            }
        }
    }

    let found = scratch.top.drain_sorted();
    for (slot, c) in found.iter().enumerate() {
        out_ids[slot] = c.id;
        out_distances[slot] = metric.finalize(c.distance);
    }
    for slot in found.len()..out_ids.len() {
        out_ids[slot] = I::NO_RESULT;
        out_distances[slot] = metric.no_result_distance();
    }
    found.len()
}
