//! ivfpq: an IVF-PQ approximate nearest neighbor index.
//!
//! Vectors are partitioned into Voronoi cells by a k-means coarse quantizer,
//! and each vector is stored as the product-quantized code of its residual
//! from the cell centroid. Queries probe the nearest cells and score stored
//! codes with per-cell lookup tables.
//!
//! - [`ivf_pq`]: build, extend, search and refine.
//! - [`partitioning`]: the k-means trainer shared by the coarse quantizer
//!   and the codebooks.
//! - [`resources`]: thread pool, memory accounting and cancellation.
//! - [`element`]: supported element (`f32`, `i8`, `u8`) and id (`u32`,
//!   `u64`) types.
//!
//! ```rust,no_run
//! use ivfpq::ivf_pq::{self, IndexParams, SearchParams};
//! use ivfpq::{DatasetView, Resources};
//!
//! # fn main() -> ivfpq::Result<()> {
//! let data: Vec<f32> = (0..4096 * 16).map(|i| (i % 97) as f32).collect();
//! let dataset = DatasetView::new(&data, 4096, 16)?;
//!
//! let res = Resources::default();
//! let params = IndexParams::default().with_n_lists(64).with_pq(8, 8);
//! let index: ivf_pq::Index<u64> = ivf_pq::build(&res, &params, dataset)?;
//!
//! let query = DatasetView::new(&data[..16], 1, 16)?;
//! let hits = ivf_pq::search(&res, &SearchParams::default(), &index, query, 10)?;
//! for (id, distance) in hits.neighbors(0) {
//!     println!("{id}: {distance}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! Searches only read the index and may run from any number of threads.
//! [`ivf_pq::extend_in_place`] takes `&mut Index`, so the borrow checker
//! keeps it from overlapping searches on the same value; callers that need
//! concurrent readers during an extend use [`ivf_pq::extend`], which
//! returns a new index.

pub mod distance;
pub mod element;
pub mod error;
pub mod ivf_pq;
pub mod partitioning;
pub mod resources;
pub mod simd;

pub use distance::DistanceMetric;
pub use element::{DatasetView, ElementKind, IndexId, VectorElement};
pub use error::{IvfPqError, Result, Status};
pub use resources::{
    BoundedMemory, CancellationToken, MemoryResource, Resources, SystemMemory,
};
