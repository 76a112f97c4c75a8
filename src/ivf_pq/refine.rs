//! Exact re-ranking of approximate candidates.
//!
//! Product quantization only approximates distances. Refinement takes an
//! over-fetched candidate list per query, recomputes each candidate's exact
//! distance against the original vectors and keeps the best `k`.

use rayon::prelude::*;

use super::search::{filled, result_slots, SearchResults};
use super::topk::TopK;
use crate::distance::DistanceMetric;
use crate::element::{DatasetView, IndexId, VectorElement};
use crate::error::{IvfPqError, Result};
use crate::resources::Resources;

/// Re-rank `candidates` by exact distance and keep the best `k` per query.
///
/// Candidate ids address rows of `dataset`. Unfilled candidate slots are
/// skipped; an id past the end of `dataset` is an `InvalidArgument`.
pub fn refine<T: VectorElement, I: IndexId>(
    res: &Resources,
    dataset: DatasetView<'_, T>,
    queries: DatasetView<'_, T>,
    candidates: &SearchResults<I>,
    k: usize,
    metric: DistanceMetric,
) -> Result<SearchResults<I>> {
    if dataset.dim() != queries.dim() {
        return Err(IvfPqError::argument(format!(
            "dataset has dimension {}, queries have {}",
            dataset.dim(),
            queries.dim()
        )));
    }
    if candidates.n_queries() != queries.n_rows() {
        return Err(IvfPqError::argument(format!(
            "{} candidate rows for {} queries",
            candidates.n_queries(),
            queries.n_rows()
        )));
    }
    for q in 0..candidates.n_queries() {
        if let Some((id, _)) = candidates
            .neighbors(q)
            .find(|(id, _)| id.as_usize() >= dataset.n_rows())
        {
            return Err(IvfPqError::argument(format!(
                "candidate id {id:?} is out of range for a dataset of {} rows",
                dataset.n_rows()
            )));
        }
    }

    let n_queries = queries.n_rows();
    let slots = result_slots::<I>(n_queries, k)?;
    let mut ids = filled(I::NO_RESULT, slots)?;
    let mut distances = filled(metric.no_result_distance(), slots)?;
    let mut counts = vec![0usize; n_queries];
    if k == 0 || n_queries == 0 {
        return Ok(SearchResults::from_parts(n_queries, k, ids, distances, counts));
    }

    let dim = dataset.dim();
    let _scratch = res.allocate(res.num_threads() * 2 * dim * std::mem::size_of::<f32>())?;

    res.install(|| {
        ids.par_chunks_mut(k)
            .zip(distances.par_chunks_mut(k))
            .zip(counts.par_iter_mut())
            .enumerate()
            .for_each_init(
                || (vec![0.0f32; dim], vec![0.0f32; dim], TopK::new(k)),
                |(query, row, top), (q, ((out_ids, out_dists), count))| {
                    queries.row_f32_into(q, query);
                    top.clear();
                    for (id, _) in candidates.neighbors(q) {
                        dataset.row_f32_into(id.as_usize(), row);
                        top.push(id, metric.rank_distance(query, row));
                    }
                    let kept = top.drain_sorted();
                    for (slot, c) in kept.iter().enumerate() {
                        out_ids[slot] = c.id;
                        out_dists[slot] = metric.finalize(c.distance);
                    }
                    *count = kept.len();
                },
            );
    });

    Ok(SearchResults::from_parts(n_queries, k, ids, distances, counts))
}
