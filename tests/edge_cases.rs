//! Edge case tests for ivfpq.
//!
//! Error kinds, unfilled result slots, resource limits and cancellation.

use std::sync::Arc;

use ivfpq::ivf_pq::{self, Index, IndexParams, SearchParams};
use ivfpq::{
    BoundedMemory, CancellationToken, DatasetView, DistanceMetric, IvfPqError, Resources, Status,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_data(n: usize, dim: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n * dim).map(|_| rng.random_range(-1.0f32..1.0)).collect()
}

fn small_index(res: &Resources, data: &[f32], n: usize, dim: usize) -> Index {
    let params = IndexParams::default().with_n_lists(4).with_pq(dim / 2, 4);
    ivf_pq::build(res, &params, DatasetView::new(data, n, dim).expect("view")).expect("build failed")
}

// =============================================================================
// Configuration and argument errors
// =============================================================================

#[test]
fn zero_lists_is_invalid_configuration() {
    let data = random_data(10, 2, 1);
    let params = IndexParams::default().with_n_lists(0);
    let err = ivf_pq::build::<f32, u64>(
        &Resources::default(),
        &params,
        DatasetView::new(&data, 10, 2).expect("view"),
    )
    .expect_err("n_lists = 0 accepted");
    assert!(matches!(err, IvfPqError::InvalidConfiguration(_)));
}

#[test]
fn bad_pq_bits_is_invalid_configuration() {
    let data = random_data(10, 2, 1);
    for bits in [0, 9] {
        let params = IndexParams::default().with_n_lists(2).with_pq(1, bits);
        let err = ivf_pq::build::<f32, u64>(
            &Resources::default(),
            &params,
            DatasetView::new(&data, 10, 2).expect("view"),
        )
        .expect_err("bad pq_bits accepted");
        assert!(matches!(err, IvfPqError::InvalidConfiguration(_)), "bits = {bits}");
    }
}

#[test]
fn empty_dataset_is_rejected() {
    let data: [f32; 0] = [];
    let err = ivf_pq::build::<f32, u64>(
        &Resources::default(),
        &IndexParams::default(),
        DatasetView::new(&data, 0, 4).expect("view"),
    )
    .expect_err("empty dataset accepted");
    assert_eq!(err, IvfPqError::EmptyDataset);
}

#[test]
fn malformed_views_are_rejected() {
    let data = [0.0f32; 7];
    assert!(matches!(
        DatasetView::new(&data, 2, 4),
        Err(IvfPqError::InvalidArgument(_))
    ));
    assert!(matches!(
        DatasetView::from_flat(&data, 0),
        Err(IvfPqError::InvalidArgument(_))
    ));
}

#[test]
fn extend_with_mismatched_ids_fails_and_keeps_index() {
    let (n, dim) = (40, 2);
    let data = random_data(n, dim, 2);
    let res = Resources::default();
    let mut index = small_index(&res, &data, n, dim);

    let new = random_data(3, dim, 3);
    let ids = [100u64, 101];
    let err = ivf_pq::extend_in_place(
        &res,
        &mut index,
        DatasetView::new(&new, 3, dim).expect("view"),
        Some(&ids[..]),
    )
    .expect_err("3 vectors with 2 ids accepted");
    assert!(matches!(err, IvfPqError::InvalidArgument(_)));
    assert_eq!(index.len(), n);

    let status = ivf_pq::extend_into(
        &res,
        &mut index,
        DatasetView::new(&new, 3, dim).expect("view"),
        Some(&ids[..]),
    );
    assert_eq!(status, Status::InvalidArgument);
    assert_eq!(index.len(), n);
}

#[test]
fn dimension_mismatch_is_invalid_argument() {
    let (n, dim) = (40, 4);
    let data = random_data(n, dim, 4);
    let res = Resources::default();
    let mut index = small_index(&res, &data, n, dim);

    let wrong = random_data(2, 3, 5);
    let view = DatasetView::new(&wrong, 2, 3).expect("view");
    assert!(matches!(
        ivf_pq::extend_in_place(&res, &mut index, view, None),
        Err(IvfPqError::InvalidArgument(_))
    ));
    assert!(matches!(
        ivf_pq::search(&res, &SearchParams::default(), &index, view, 1),
        Err(IvfPqError::InvalidArgument(_))
    ));
}

#[test]
fn zero_probes_is_invalid_argument() {
    let (n, dim) = (40, 2);
    let data = random_data(n, dim, 6);
    let res = Resources::default();
    let index = small_index(&res, &data, n, dim);
    let q = DatasetView::new(&data[..dim], 1, dim).expect("view");

    let sp = SearchParams::default().with_n_probes(0);
    assert!(matches!(
        ivf_pq::search(&res, &sp, &index, q, 1),
        Err(IvfPqError::InvalidArgument(_))
    ));

    let sp = SearchParams::default().with_refine_ratio(0.5);
    assert!(matches!(
        ivf_pq::search(&res, &sp, &index, q, 1),
        Err(IvfPqError::InvalidArgument(_))
    ));
}

fn unit_square(res: &Resources) -> Index {
    let data = [0.0f32, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0];
    let params = IndexParams::default().with_n_lists(2).with_pq(1, 2);
    ivf_pq::build(res, &params, DatasetView::new(&data, 4, 2).expect("view")).expect("build failed")
}

#[test]
fn oversized_k_is_invalid_argument() {
    let res = Resources::default();
    let index = unit_square(&res);
    let data = [0.0f32, 0.0, 1.0, 1.0];
    let two = DatasetView::new(&data, 2, 2).expect("view");
    let one = DatasetView::new(&data[..2], 1, 2).expect("view");
    let dataset = [0.0f32, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0];
    let dataset = DatasetView::new(&dataset, 4, 2).expect("view");
    let sp = SearchParams::default().with_n_probes(2);
    let k = usize::MAX / 2 + 1;

    assert!(matches!(
        ivf_pq::search(&res, &sp, &index, two, k),
        Err(IvfPqError::InvalidArgument(_))
    ));
    assert!(matches!(
        ivf_pq::search(&res, &sp, &index, one, k),
        Err(IvfPqError::InvalidArgument(_))
    ));
    assert!(matches!(
        ivf_pq::search_into(&res, &sp, &index, two, k, &mut [], &mut []),
        Err(IvfPqError::InvalidArgument(_))
    ));
    assert!(matches!(
        ivf_pq::search_refined(&res, &sp.clone().with_refine_ratio(2.0), &index, dataset, two, k),
        Err(IvfPqError::InvalidArgument(_))
    ));

    let candidates = ivf_pq::search(&res, &sp, &index, two, 2).expect("search failed");
    assert!(matches!(
        ivf_pq::refine(&res, dataset, two, &candidates, k, index.metric()),
        Err(IvfPqError::InvalidArgument(_))
    ));
}

#[test]
fn k_beyond_index_size_fills_what_exists() {
    let res = Resources::default();
    let index = unit_square(&res);
    let data = [0.0f32, 0.0];
    let q = DatasetView::new(&data, 1, 2).expect("view");
    let sp = SearchParams::default().with_n_probes(2);

    let hits = ivf_pq::search(&res, &sp, &index, q, 5000).expect("search failed");
    assert_eq!(hits.count(0), 4);
    assert_eq!(hits.row_ids(0).len(), 5000);
    assert_eq!(hits.row_ids(0)[4], u64::MAX);
}

#[test]
fn out_of_range_code_is_rejected_and_search_still_works() {
    let res = Resources::default();
    let index = unit_square(&res);

    // Two-bit codes only address entries 0..4.
    assert!(matches!(
        index.lists().append(0, &[200], 99),
        Err(IvfPqError::InvalidArgument(_))
    ));
    assert!(matches!(
        index.lists().append(1, &[4], 99),
        Err(IvfPqError::InvalidArgument(_))
    ));
    assert_eq!(index.len(), 4);

    index.lists().append(0, &[3], 99).expect("in-range code rejected");
    assert_eq!(index.len(), 5);

    let data = [0.0f32, 0.0];
    let q = DatasetView::new(&data, 1, 2).expect("view");
    let sp = SearchParams::default().with_n_probes(2);
    let hits = ivf_pq::search(&res, &sp, &index, q, 5).expect("search failed");
    assert_eq!(hits.count(0), 5);
    assert_eq!(hits.row_ids(0)[0], 0);
}

#[test]
fn no_result_id_is_rejected_by_extend() {
    let res = Resources::default();
    let mut index = unit_square(&res);
    let new = [0.5f32, 0.5, 0.25, 0.25];
    let view = DatasetView::new(&new, 2, 2).expect("view");
    let ids = [7u64, u64::MAX];

    assert!(matches!(
        ivf_pq::extend(&res, &index, view, Some(&ids[..])),
        Err(IvfPqError::InvalidArgument(_))
    ));
    assert!(matches!(
        ivf_pq::extend_in_place(&res, &mut index, view, Some(&ids[..])),
        Err(IvfPqError::InvalidArgument(_))
    ));
    assert_eq!(
        ivf_pq::extend_into(&res, &mut index, view, Some(&ids[..])),
        Status::InvalidArgument
    );
    assert_eq!(index.len(), 4);
}

// =============================================================================
// Result shape
// =============================================================================

#[test]
fn k_zero_returns_empty_rows() {
    let (n, dim) = (40, 2);
    let data = random_data(n, dim, 7);
    let res = Resources::default();
    let index = small_index(&res, &data, n, dim);
    let q = DatasetView::new(&data[..3 * dim], 3, dim).expect("view");

    let hits = ivf_pq::search(&res, &SearchParams::default(), &index, q, 0).expect("search failed");
    assert_eq!(hits.n_queries(), 3);
    assert!(hits.ids().is_empty());
    assert!(hits.distances().is_empty());
    assert_eq!(hits.count(2), 0);
}

#[test]
fn probes_beyond_list_count_are_clamped() {
    let (n, dim) = (80, 2);
    let data = random_data(n, dim, 8);
    let res = Resources::default();
    let index = small_index(&res, &data, n, dim);
    let q = DatasetView::new(&data[..4 * dim], 4, dim).expect("view");

    let all = SearchParams::default().with_n_probes(index.n_lists());
    let many = SearchParams::default().with_n_probes(1000);
    let a = ivf_pq::search(&res, &all, &index, q, 5).expect("search failed");
    let b = ivf_pq::search(&res, &many, &index, q, 5).expect("search failed");
    assert_eq!(a, b);
}

#[test]
fn unfilled_slots_hold_no_result_markers() {
    let data = [0.0f32, 0.0, 1.0, 1.0, 2.0, 2.0];
    let res = Resources::default();
    let q = DatasetView::new(&data[..2], 1, 2).expect("view");

    for metric in [DistanceMetric::SquaredL2, DistanceMetric::InnerProduct] {
        let params = IndexParams::default()
            .with_n_lists(2)
            .with_pq(1, 2)
            .with_metric(metric);
        let index: Index =
            ivf_pq::build(&res, &params, DatasetView::new(&data, 3, 2).expect("view"))
                .expect("build failed");
        let sp = SearchParams::default().with_n_probes(2);
        let hits = ivf_pq::search(&res, &sp, &index, q, 5).expect("search failed");

        assert_eq!(hits.count(0), 3);
        assert_eq!(&hits.row_ids(0)[3..], &[u64::MAX, u64::MAX]);
        for &d in &hits.row_distances(0)[3..] {
            assert_eq!(d, metric.no_result_distance());
        }
        assert_eq!(hits.neighbors(0).count(), 3);
    }
}

#[test]
fn unfilled_slots_with_u32_ids() {
    let data = [0.0f32, 0.0, 1.0, 1.0];
    let res = Resources::default();
    let params = IndexParams::default().with_n_lists(1).with_pq(1, 1);
    let index: Index<u32> =
        ivf_pq::build(&res, &params, DatasetView::new(&data, 2, 2).expect("view"))
            .expect("build failed");
    let q = DatasetView::new(&data[..2], 1, 2).expect("view");
    let hits = ivf_pq::search(&res, &SearchParams::default(), &index, q, 3).expect("search failed");
    assert_eq!(hits.count(0), 2);
    assert_eq!(hits.row_ids(0)[2], u32::MAX);
    assert_eq!(hits.row_distances(0)[2], f32::INFINITY);
}

#[test]
fn more_lists_than_distinct_points() {
    // Three distinct points, eight lists: the list count is kept and the
    // surplus lists stay empty.
    let data = [0.0f32, 0.0, 0.0, 0.0, 5.0, 5.0, -5.0, 5.0, 5.0, 5.0];
    let res = Resources::default();
    let params = IndexParams::default().with_n_lists(8).with_pq(1, 2);
    let index: Index =
        ivf_pq::build(&res, &params, DatasetView::new(&data, 5, 2).expect("view"))
            .expect("build failed");

    assert_eq!(index.n_lists(), 8);
    let sizes = index.list_sizes();
    assert_eq!(sizes.iter().sum::<usize>(), 5);
    assert_eq!(sizes.iter().filter(|&&s| s > 0).count(), 3);

    let q = DatasetView::new(&data[..2], 1, 2).expect("view");
    let sp = SearchParams::default().with_n_probes(8);
    let hits = ivf_pq::search(&res, &sp, &index, q, 5).expect("search failed");
    assert_eq!(hits.count(0), 5);
    assert_eq!(&hits.row_ids(0)[..2], &[0, 1]);
}

// =============================================================================
// Status side channel
// =============================================================================

#[test]
fn build_into_reports_status() {
    let data = random_data(30, 2, 9);
    let res = Resources::default();
    let view = DatasetView::new(&data, 30, 2).expect("view");

    let mut out: Option<Index> = None;
    let bad = IndexParams::default().with_n_lists(0);
    let status = ivf_pq::build_into(&res, &bad, view, &mut out);
    assert_eq!(status, Status::InvalidConfiguration);
    assert_eq!(status.code(), 1);
    assert!(out.is_none());

    let good = IndexParams::default().with_n_lists(2).with_pq(1, 3);
    let status = ivf_pq::build_into(&res, &good, view, &mut out);
    assert!(status.is_success());
    assert_eq!(out.as_ref().map(Index::len), Some(30));
}

// =============================================================================
// Generations
// =============================================================================

#[test]
fn parts_from_different_builds_are_stale() {
    let data = random_data(40, 2, 10);
    let res = Resources::default();
    let a = small_index(&res, &data, 40, 2);
    let b = small_index(&res, &data, 40, 2);
    let expected = a.generation();
    assert!(a.ensure_generation(expected).is_ok());
    assert!(matches!(
        b.ensure_generation(expected),
        Err(IvfPqError::StaleIndex { .. })
    ));

    let kind = a.element_kind();
    let (coarse_a, _, _) = a.into_parts();
    let (_, pq_b, lists_b) = b.into_parts();
    let err = Index::from_parts(coarse_a, pq_b, lists_b, kind).expect_err("mixed parts accepted");
    assert!(matches!(
        err,
        IvfPqError::StaleIndex { expected: e, .. } if e == expected.get()
    ));
}

// =============================================================================
// Resources
// =============================================================================

#[test]
fn cancelled_build_reports_cancelled() {
    let data = random_data(100, 4, 11);
    let token = CancellationToken::new();
    token.cancel();
    let res = Resources::default().with_cancellation(token);
    let err = ivf_pq::build::<f32, u64>(
        &res,
        &IndexParams::default().with_n_lists(4),
        DatasetView::new(&data, 100, 4).expect("view"),
    )
    .expect_err("cancelled build succeeded");
    assert_eq!(err, IvfPqError::Cancelled);
}

#[test]
fn cancelled_extend_leaves_index_unchanged() {
    let (n, dim) = (60, 4);
    let data = random_data(n, dim, 12);
    let mut index = small_index(&Resources::default(), &data, n, dim);

    let token = CancellationToken::new();
    let res = Resources::default().with_cancellation(token.clone());
    token.cancel();
    let err = ivf_pq::extend_in_place(&res, &mut index, DatasetView::new(&data, n, dim).expect("view"), None)
        .expect_err("cancelled extend succeeded");
    assert_eq!(err, IvfPqError::Cancelled);
    assert_eq!(index.len(), n);
}

#[test]
fn exhausted_memory_leaves_index_unchanged() {
    let (n, dim) = (60, 4);
    let data = random_data(n, dim, 13);
    let mut index = small_index(&Resources::default(), &data, n, dim);

    let tiny = Arc::new(BoundedMemory::new(16));
    let res = Resources::default().with_memory(tiny.clone());
    let err = ivf_pq::extend_in_place(&res, &mut index, DatasetView::new(&data, n, dim).expect("view"), None)
        .expect_err("extend within 16 bytes succeeded");
    assert!(matches!(err, IvfPqError::ResourceExhausted { .. }));
    assert_eq!(index.len(), n);
    assert_eq!(tiny.used(), 0);

    let err = ivf_pq::build::<f32, u64>(
        &res,
        &IndexParams::default().with_n_lists(4).with_pq(2, 4),
        DatasetView::new(&data, n, dim).expect("view"),
    )
    .expect_err("build within 16 bytes succeeded");
    assert!(matches!(err, IvfPqError::ResourceExhausted { .. }));
    assert_eq!(tiny.used(), 0);
}

#[test]
fn bounded_memory_tracks_index_storage() {
    let (n, dim) = (60, 4);
    let data = random_data(n, dim, 14);
    let memory = Arc::new(BoundedMemory::new(64 << 20));
    let res = Resources::default().with_memory(memory.clone());

    let index = small_index(&res, &data, n, dim);
    let held = memory.used();
    assert!(held > 0);
    assert!(held <= memory.limit());
    drop(index);
    assert_eq!(memory.used(), 0);
}
