//! The trained index and its training generation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::coarse::CoarseQuantizer;
use super::lists::InvertedLists;
use super::params::CodebookKind;
use super::pq::ProductQuantizer;
use crate::distance::DistanceMetric;
use crate::element::{ElementKind, IndexId};
use crate::error::{IvfPqError, Result};
use crate::resources::MemoryResource;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Identity of one training run.
///
/// Every build draws a fresh, process-unique generation and stamps the coarse
/// quantizer, the product quantizer and the inverted lists with it. Parts of
/// different generations are never combined into one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(u64);

impl Generation {
    /// A generation newer than every generation handed out so far.
    pub fn next() -> Self {
        Self(NEXT_GENERATION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Statistics about an index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexStats {
    pub num_vectors: usize,
    pub dimension: usize,
    pub n_lists: usize,
    pub pq_dim: usize,
    pub pq_bits: u32,
    pub size_bytes: usize,
    pub generation: u64,
}

/// IVF-PQ index: coarse quantizer, product quantizer and inverted lists of
/// one generation.
///
/// Created by [`build`](super::build), grown by [`extend`](super::extend),
/// read by [`search`](super::search). Search takes `&Index` and may run
/// concurrently with other searches; extension needs `&mut Index` (or works
/// on a copy), so a search never observes a half-extended index.
#[derive(Debug)]
pub struct Index<I: IndexId = u64> {
    generation: Generation,
    element_kind: ElementKind,
    coarse: CoarseQuantizer,
    pq: ProductQuantizer,
    lists: InvertedLists<I>,
}

impl<I: IndexId> Index<I> {
    /// Assemble an index, checking that all parts belong together.
    ///
    /// Fails with `StaleIndex` when the parts come from different
    /// generations and with `InvalidArgument` when their shapes disagree.
    pub fn from_parts(
        coarse: CoarseQuantizer,
        pq: ProductQuantizer,
        lists: InvertedLists<I>,
        element_kind: ElementKind,
    ) -> Result<Self> {
        let generation = coarse.generation();
        for actual in [pq.generation(), lists.generation()] {
            if actual != generation {
                return Err(IvfPqError::StaleIndex {
                    expected: generation.get(),
                    actual: actual.get(),
                });
            }
        }

        let layout = pq.layout();
        if layout.dim != coarse.dim() {
            return Err(IvfPqError::argument(format!(
                "product quantizer dimension {} does not match coarse dimension {}",
                layout.dim,
                coarse.dim()
            )));
        }
        if lists.n_lists() != coarse.n_lists() || lists.pq_dim() != layout.pq_dim {
            return Err(IvfPqError::argument(format!(
                "inverted lists ({} lists x {} bytes) do not match quantizers ({} lists x {} bytes)",
                lists.n_lists(),
                lists.pq_dim(),
                coarse.n_lists(),
                layout.pq_dim
            )));
        }
        if lists.pq_bits() != layout.pq_bits {
            return Err(IvfPqError::argument(format!(
                "inverted lists hold {}-bit codes, quantizer produces {}-bit codes",
                lists.pq_bits(),
                layout.pq_bits
            )));
        }
        if layout.kind == CodebookKind::PerCluster && pq.n_books() != coarse.n_lists() {
            return Err(IvfPqError::argument(format!(
                "{} per-cluster codebooks for {} clusters",
                pq.n_books(),
                coarse.n_lists()
            )));
        }

        Ok(Self {
            generation,
            element_kind,
            coarse,
            pq,
            lists,
        })
    }

    pub fn into_parts(self) -> (CoarseQuantizer, ProductQuantizer, InvertedLists<I>) {
        (self.coarse, self.pq, self.lists)
    }

    /// Fail with `StaleIndex` unless this index belongs to `expected`.
    pub fn ensure_generation(&self, expected: Generation) -> Result<()> {
        if self.generation != expected {
            return Err(IvfPqError::StaleIndex {
                expected: expected.get(),
                actual: self.generation.get(),
            });
        }
        Ok(())
    }

    /// Deep copy whose list storage is charged against `memory`.
    pub fn try_clone_in(&self, memory: Arc<dyn MemoryResource>) -> Result<Self> {
        Ok(Self {
            generation: self.generation,
            element_kind: self.element_kind,
            coarse: self.coarse.clone(),
            pq: self.pq.clone(),
            lists: self.lists.try_clone_in(memory)?,
        })
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Element type of the data the index was built from.
    pub fn element_kind(&self) -> ElementKind {
        self.element_kind
    }

    pub fn metric(&self) -> DistanceMetric {
        self.coarse.metric()
    }

    pub fn dim(&self) -> usize {
        self.coarse.dim()
    }

    pub fn n_lists(&self) -> usize {
        self.coarse.n_lists()
    }

    pub fn pq_dim(&self) -> usize {
        self.pq.layout().pq_dim
    }

    pub fn pq_bits(&self) -> u32 {
        self.pq.layout().pq_bits
    }

    /// Number of indexed vectors.
    pub fn len(&self) -> usize {
        self.lists.total_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn list_size(&self, cluster: u32) -> usize {
        self.lists.len(cluster)
    }

    pub fn list_sizes(&self) -> Vec<usize> {
        self.lists.list_sizes()
    }

    pub fn coarse(&self) -> &CoarseQuantizer {
        &self.coarse
    }

    pub fn pq(&self) -> &ProductQuantizer {
        &self.pq
    }

    pub fn lists(&self) -> &InvertedLists<I> {
        &self.lists
    }

    /// Get index size in bytes (approximate).
    pub fn size_bytes(&self) -> usize {
        (self.coarse.centroids().len() + self.pq.codebooks().len()) * std::mem::size_of::<f32>()
            + self.lists.size_bytes()
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            num_vectors: self.len(),
            dimension: self.dim(),
            n_lists: self.n_lists(),
            pq_dim: self.pq_dim(),
            pq_bits: self.pq_bits(),
            size_bytes: self.size_bytes(),
            generation: self.generation.get(),
        }
    }
}
