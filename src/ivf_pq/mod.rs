//! IVF-PQ: Inverted File with Product Quantization.
//!
//! Combines two ideas:
//!
//! 1. **IVF (Inverted File)**: partition space into `n_lists` Voronoi cells
//!    with k-means and only search the cells nearest the query.
//! 2. **PQ (Product Quantization)**: store each vector's residual (vector
//!    minus its cell centroid) as `pq_dim` small codes, one per subspace.
//!
//! ```text
//!           Query
//!             |
//!     +-------+-------+
//!     |               |
//!   Cell A          Cell B      (probe n_probes cells)
//!   |__|__|         |__|__|
//!   v  v  v         v  v  v
//!   [codes]         [codes]     (score with lookup tables)
//! ```
//!
//! ## Encoding
//!
//! ```text
//! residual:  [r₁ r₂ r₃ r₄ ... r_d]   (padded to rot_dim if requested)
//!            └──┴──┘ └──┴──┘ ... └──┘
//!              ↓       ↓         ↓
//!            [c₁]    [c₂]  ... [c_m]  (m = pq_dim codes of pq_bits each)
//! ```
//!
//! ## Asymmetric Distance Computation (ADC)
//!
//! The query is never compressed. For every probed cell a lookup table of
//! query-subvector to codebook-entry distances is built once, then each
//! stored vector costs `pq_dim` table lookups:
//!
//! ```text
//! d(query, db) ≈ base + Σᵢ lut[i][code[i]]
//! ```
//!
//! ## Lifecycle
//!
//! - [`build`]: train the coarse quantizer and codebooks, optionally encode
//!   the training data.
//! - [`extend`] / [`extend_in_place`]: encode more vectors into an existing
//!   index; training state is never changed.
//! - [`search`]: approximate top-k; [`search_refined`] re-ranks an
//!   over-fetched candidate set with exact distances.
//!
//! [`build_into`] and [`extend_into`] report a [`Status`](crate::Status)
//! instead of a `Result`, for callers that prefer an out-parameter style.
//!
//! ## Trade-offs
//!
//! | Parameter | ↑ Effect |
//! |-----------|----------|
//! | n_probes | Better recall, slower search |
//! | n_lists | Finer partitioning, slower training |
//! | pq_dim | More memory per vector, better accuracy |
//! | pq_bits | Larger lookup tables, better accuracy |
//!
//! ## References
//!
//! - Jégou, Douze, Schmid (2011). "Product Quantization for Nearest Neighbor Search."

pub mod build;
pub mod coarse;
pub mod extend;
pub mod index;
pub mod lists;
pub mod lut;
pub mod params;
pub mod pq;
pub mod refine;
pub mod search;
mod topk;

pub use build::{build, build_into};
pub use coarse::CoarseQuantizer;
pub use extend::{extend, extend_in_place, extend_into};
pub use index::{Generation, Index, IndexStats};
pub use lists::{Entry, InvertedLists, ListReader, CHUNK_ROWS};
pub use lut::LookupTable;
pub use params::{
    CodebookKind, IndexParams, SearchParams, DEFAULT_PQ_TRAIN_POINTS_PER_CODE,
    DEFAULT_TRAIN_POINTS_PER_LIST,
};
pub use pq::{PqLayout, ProductQuantizer};
pub use refine::refine;
pub use search::{search, search_into, search_refined, SearchResults};
