//! Index Builder: train both quantizers and (optionally) populate the lists.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use super::coarse::CoarseQuantizer;
use super::extend::{encode_into_lists, sequential_ids};
use super::index::{Generation, Index};
use super::lists::InvertedLists;
use super::params::IndexParams;
use super::pq::{PqLayout, ProductQuantizer};
use crate::element::{DatasetView, IndexId, VectorElement};
use crate::error::{IvfPqError, Result, Status};
use crate::resources::Resources;
use crate::simd;

/// Seed offset separating PQ sampling/training from coarse training.
const PQ_SEED_OFFSET: u64 = 0x9e37_79b9_7f4a_7c15;

/// Sorted sample of `amount` row numbers out of `n_rows`.
fn sample_rows(n_rows: usize, amount: usize, seed: u64) -> Vec<usize> {
    if amount >= n_rows {
        return (0..n_rows).collect();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut rows = rand::seq::index::sample(&mut rng, n_rows, amount).into_vec();
    rows.sort_unstable();
    rows
}

/// Build an index over `dataset`.
///
/// 1. Train the coarse quantizer on a sample of rows.
/// 2. Compute residuals of a (sub-)sample against their nearest centroid.
/// 3. Train the product quantizer on those residuals.
/// 4. If `params.add_data_on_build`, encode every row and store it with id
///    equal to its row number.
///
/// Steps 2 and 4 run data-parallel. The returned index carries a fresh
/// [`Generation`].
pub fn build<T: VectorElement, I: IndexId>(
    res: &Resources,
    params: &IndexParams,
    dataset: DatasetView<'_, T>,
) -> Result<Index<I>> {
    if dataset.is_empty() {
        return Err(IvfPqError::EmptyDataset);
    }
    params.validate()?;
    let layout = PqLayout::from_params(params, dataset.dim())?;
    let ids: Vec<I> = if params.add_data_on_build {
        sequential_ids(0, dataset.n_rows())?
    } else {
        Vec::new()
    };

    res.install(|| build_impl(res, params, layout, dataset, &ids))
}

fn build_impl<T: VectorElement, I: IndexId>(
    res: &Resources,
    params: &IndexParams,
    layout: PqLayout,
    dataset: DatasetView<'_, T>,
    ids: &[I],
) -> Result<Index<I>> {
    let n_rows = dataset.n_rows();
    let dim = dataset.dim();
    let generation = Generation::next();
    let _span = tracing::info_span!(
        "ivf_pq::build",
        n_rows,
        dim,
        n_lists = params.n_lists,
        generation = generation.get()
    )
    .entered();

    // Coarse quantizer.
    let n_train = params.coarse_sample_size(n_rows);
    let train_rows = sample_rows(n_rows, n_train, params.seed);
    let _trainset_bytes = res.allocate(n_train * dim * std::mem::size_of::<f32>())?;
    let trainset = dataset.gather_f32(&train_rows);
    tracing::debug!(n_train, "sampled coarse training set");

    let coarse = CoarseQuantizer::train(
        res,
        &trainset,
        n_train,
        dim,
        params.n_lists,
        params.metric,
        params.kmeans_params(params.seed),
        generation,
    )?;
    tracing::info!(n_lists = coarse.n_lists(), "trained coarse quantizer");

    // Residuals for PQ training.
    let labels = coarse.assign_batch(&trainset, n_train);
    let n_pq = params.pq_sample_size(n_train);
    let pq_seed = params.seed.wrapping_add(PQ_SEED_OFFSET);
    let pq_rows = sample_rows(n_train, n_pq, pq_seed);
    let _residual_bytes = res.allocate(n_pq * layout.rot_dim * std::mem::size_of::<f32>())?;

    let mut residuals = vec![0.0f32; n_pq * layout.rot_dim];
    residuals
        .par_chunks_mut(layout.rot_dim)
        .zip(pq_rows.par_iter())
        .for_each(|(dst, &row)| {
            let v = &trainset[row * dim..(row + 1) * dim];
            simd::sub_into(v, coarse.centroid(labels[row]), &mut dst[..dim]);
        });
    let pq_labels: Vec<u32> = pq_rows.iter().map(|&row| labels[row]).collect();
    res.check_cancelled()?;

    let pq = ProductQuantizer::train(
        res,
        layout,
        &residuals,
        n_pq,
        &pq_labels,
        params.n_lists,
        params.kmeans_params(pq_seed),
        generation,
    )?;
    tracing::info!(
        pq_dim = layout.pq_dim,
        pq_bits = layout.pq_bits,
        n_train = n_pq,
        "trained product quantizer"
    );

    let lists = InvertedLists::new(
        generation,
        params.n_lists,
        layout.pq_dim,
        layout.pq_bits,
        res.memory().clone(),
    );
    if !ids.is_empty() {
        encode_into_lists(res, &coarse, &pq, &lists, dataset, ids)?;
        tracing::info!(n_rows, "populated inverted lists");
    }

    Index::from_parts(coarse, pq, lists, T::KIND)
}

/// [`build`] reporting failure through a [`Status`] code.
///
/// On success `out` holds the new index; on failure it is left as it was.
pub fn build_into<T: VectorElement, I: IndexId>(
    res: &Resources,
    params: &IndexParams,
    dataset: DatasetView<'_, T>,
    out: &mut Option<Index<I>>,
) -> Status {
    let result = build(res, params, dataset);
    let status = Status::from_result(&result);
    if let Ok(index) = result {
        *out = Some(index);
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_rows_is_sorted_and_deterministic() {
        let a = sample_rows(1000, 50, 3);
        assert_eq!(a.len(), 50);
        assert!(a.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(a, sample_rows(1000, 50, 3));
        assert_eq!(sample_rows(5, 50, 3), vec![0, 1, 2, 3, 4]);
    }
}
