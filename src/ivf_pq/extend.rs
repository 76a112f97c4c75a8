//! Index Extender: add vectors to a trained index without retraining.

use rayon::prelude::*;

use super::coarse::CoarseQuantizer;
use super::index::Index;
use super::lists::InvertedLists;
use super::pq::ProductQuantizer;
use crate::element::{DatasetView, IndexId, VectorElement};
use crate::error::{IvfPqError, Result, Status};
use crate::resources::Resources;
use crate::simd;

/// Rows encoded between cancellation checks.
pub(crate) const ENCODE_BATCH_ROWS: usize = 1 << 14;

/// Assign, encode and append every row of `vectors`.
///
/// All rows are encoded before the first entry is stored, so a failure or
/// cancellation leaves `lists` untouched.
pub(crate) fn encode_into_lists<T: VectorElement, I: IndexId>(
    res: &Resources,
    coarse: &CoarseQuantizer,
    pq: &ProductQuantizer,
    lists: &InvertedLists<I>,
    vectors: DatasetView<'_, T>,
    ids: &[I],
) -> Result<()> {
    let n_rows = vectors.n_rows();
    let layout = *pq.layout();
    let dim = layout.dim;
    let pq_dim = layout.pq_dim;

    let _scratch = res.allocate(n_rows * (pq_dim + std::mem::size_of::<u32>()))?;
    let mut labels = vec![0u32; n_rows];
    let mut codes = vec![0u8; n_rows * pq_dim];

    for start in (0..n_rows).step_by(ENCODE_BATCH_ROWS) {
        res.check_cancelled()?;
        let end = (start + ENCODE_BATCH_ROWS).min(n_rows);

        labels[start..end]
            .par_iter_mut()
            .zip(codes[start * pq_dim..end * pq_dim].par_chunks_mut(pq_dim))
            .enumerate()
            .for_each_init(
                || (vec![0.0f32; dim], vec![0.0f32; layout.rot_dim]),
                |(row, residual), (i, (label, code))| {
                    vectors.row_f32_into(start + i, row);
                    let cluster = coarse.assign(row);
                    simd::sub_into(row, coarse.centroid(cluster), &mut residual[..dim]);
                    pq.encode(residual, cluster, code);
                    *label = cluster;
                },
            );
    }
    res.check_cancelled()?;

    lists.append_assigned(&labels, &codes, ids)
}

/// Consecutive ids `start..start + n`.
pub(crate) fn sequential_ids<I: IndexId>(start: usize, n: usize) -> Result<Vec<I>> {
    (start..start + n)
        .map(|i| {
            I::from_usize(i).ok_or_else(|| {
                IvfPqError::argument(format!("row id {i} does not fit the index id type"))
            })
        })
        .collect()
}

fn validate<T: VectorElement, I: IndexId>(
    index: &Index<I>,
    new_vectors: &DatasetView<'_, T>,
    new_ids: Option<&[I]>,
) -> Result<()> {
    if new_vectors.dim() != index.dim() {
        return Err(IvfPqError::argument(format!(
            "new vectors have dimension {}, index has {}",
            new_vectors.dim(),
            index.dim()
        )));
    }
    if let Some(ids) = new_ids {
        if ids.len() != new_vectors.n_rows() {
            return Err(IvfPqError::argument(format!(
                "{} new vectors but {} new ids",
                new_vectors.n_rows(),
                ids.len()
            )));
        }
        if let Some(row) = ids.iter().position(|&id| id == I::NO_RESULT) {
            return Err(IvfPqError::argument(format!(
                "new id at row {row} is the reserved no-result id"
            )));
        }
    }
    Ok(())
}

/// Return a copy of `index` holding `new_vectors` as well.
///
/// `new_ids` defaults to consecutive ids starting at `index.len()`. Duplicate
/// ids are stored as given; [`IndexId::NO_RESULT`] is rejected. The
/// quantizers are never retrained.
pub fn extend<T: VectorElement, I: IndexId>(
    res: &Resources,
    index: &Index<I>,
    new_vectors: DatasetView<'_, T>,
    new_ids: Option<&[I]>,
) -> Result<Index<I>> {
    validate(index, &new_vectors, new_ids)?;
    let mut copy = index.try_clone_in(res.memory().clone())?;
    extend_in_place(res, &mut copy, new_vectors, new_ids)?;
    Ok(copy)
}

/// Add `new_vectors` to `index`; on error the index is unchanged.
pub fn extend_in_place<T: VectorElement, I: IndexId>(
    res: &Resources,
    index: &mut Index<I>,
    new_vectors: DatasetView<'_, T>,
    new_ids: Option<&[I]>,
) -> Result<()> {
    validate(index, &new_vectors, new_ids)?;
    if new_vectors.is_empty() {
        return Ok(());
    }

    let generated;
    let ids = match new_ids {
        Some(ids) => ids,
        None => {
            generated = sequential_ids(index.len(), new_vectors.n_rows())?;
            &generated
        }
    };

    let _span = tracing::info_span!("ivf_pq::extend", rows = new_vectors.n_rows()).entered();
    res.install(|| {
        encode_into_lists(res, index.coarse(), index.pq(), index.lists(), new_vectors, ids)
    })?;
    tracing::info!(total = index.len(), "extended index");
    Ok(())
}

/// [`extend_in_place`] reporting failure through a [`Status`] code.
pub fn extend_into<T: VectorElement, I: IndexId>(
    res: &Resources,
    index: &mut Index<I>,
    new_vectors: DatasetView<'_, T>,
    new_ids: Option<&[I]>,
) -> Status {
    Status::from_result(&extend_in_place(res, index, new_vectors, new_ids))
}
