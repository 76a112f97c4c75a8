//! Inverted lists: per-cluster, append-only storage of `(code, id)` entries.
//!
//! Each cluster owns an independent arena guarded by its own lock. Storage
//! grows in fixed-size chunks, so growing a list never moves entries already
//! written (in that list or any other). Writers to distinct clusters never
//! contend; writers to one cluster are serialized by its write lock, and a
//! reader holding the read lock only ever sees complete entries.
//!
//! Multi-cluster batches ([`InvertedLists::append_assigned`]) are
//! all-or-nothing: capacity for every touched list is reserved before the
//! first entry is written, and reservations are rolled back on failure.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::index::Generation;
use crate::element::IndexId;
use crate::error::{IvfPqError, Result};
use crate::resources::{allocate, Allocation, MemoryResource};

/// Entries per storage chunk.
pub const CHUNK_ROWS: usize = 256;

/// Bytes of memory-resource budget taken by one chunk.
pub fn chunk_bytes<I>(pq_dim: usize) -> usize {
    CHUNK_ROWS * (pq_dim + std::mem::size_of::<I>())
}

struct Chunk<I> {
    codes: Vec<u8>,
    ids: Vec<I>,
    _allocation: Allocation,
}

impl<I: IndexId> Chunk<I> {
    fn new(pq_dim: usize, memory: &Arc<dyn MemoryResource>) -> Result<Self> {
        let allocation = allocate(memory, chunk_bytes::<I>(pq_dim))?;
        let mut codes = Vec::new();
        let mut ids = Vec::new();
        codes
            .try_reserve_exact(CHUNK_ROWS * pq_dim)
            .and_then(|_| ids.try_reserve_exact(CHUNK_ROWS))
            .map_err(|_| IvfPqError::ResourceExhausted {
                requested: allocation.bytes(),
            })?;
        Ok(Self {
            codes,
            ids,
            _allocation: allocation,
        })
    }
}

struct ClusterList<I> {
    chunks: Vec<Chunk<I>>,
    len: usize,
}

impl<I: IndexId> ClusterList<I> {
    fn new() -> Self {
        Self {
            chunks: Vec::new(),
            len: 0,
        }
    }

    fn spare(&self) -> usize {
        self.chunks.len() * CHUNK_ROWS - self.len
    }

    /// Make room for `additional` more entries.
    fn reserve(
        &mut self,
        additional: usize,
        pq_dim: usize,
        memory: &Arc<dyn MemoryResource>,
    ) -> Result<()> {
        while self.spare() < additional {
            self.chunks.push(Chunk::new(pq_dim, memory)?);
        }
        Ok(())
    }

    /// Drop chunks holding no entries.
    fn release_spare(&mut self) {
        let needed = self.len.div_ceil(CHUNK_ROWS);
        self.chunks.truncate(needed);
    }

    /// Append one entry; capacity must already be reserved.
    fn push(&mut self, code: &[u8], id: I) {
        let chunk = &mut self.chunks[self.len / CHUNK_ROWS];
        debug_assert!(chunk.ids.len() < CHUNK_ROWS);
        chunk.codes.extend_from_slice(code);
        chunk.ids.push(id);
        self.len += 1;
    }
}

/// One encoded vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry<'a, I> {
    pub code: &'a [u8],
    pub id: I,
}

/// Read access to one list; holds the list's read lock.
pub struct ListReader<'a, I> {
    guard: RwLockReadGuard<'a, ClusterList<I>>,
    pq_dim: usize,
}

impl<I: IndexId> ListReader<'_, I> {
    pub fn len(&self) -> usize {
        self.guard.len
    }

    pub fn is_empty(&self) -> bool {
        self.guard.len == 0
    }

    /// Contiguous runs of `(codes, ids)`; codes are `pq_dim` bytes per id.
    pub fn chunks(&self) -> impl Iterator<Item = (&[u8], &[I])> + '_ {
        self.guard
            .chunks
            .iter()
            .filter(|c| !c.ids.is_empty())
            .map(|c| (c.codes.as_slice(), c.ids.as_slice()))
    }

    /// Entries in append order. Each call starts from the beginning.
    pub fn iter(&self) -> impl Iterator<Item = Entry<'_, I>> + '_ {
        let pq_dim = self.pq_dim;
        self.chunks().flat_map(move |(codes, ids)| {
            codes
                .chunks_exact(pq_dim)
                .zip(ids.iter())
                .map(|(code, &id)| Entry { code, id })
        })
    }
}

/// Inverted lists of one index generation.
pub struct InvertedLists<I> {
    generation: Generation,
    pq_dim: usize,
    pq_bits: u32,
    lists: Vec<RwLock<ClusterList<I>>>,
    memory: Arc<dyn MemoryResource>,
}

impl<I> std::fmt::Debug for InvertedLists<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvertedLists")
            .field("generation", &self.generation)
            .field("n_lists", &self.lists.len())
            .field("pq_dim", &self.pq_dim)
            .field("pq_bits", &self.pq_bits)
            .finish()
    }
}

impl<I: IndexId> InvertedLists<I> {
    /// Lists holding `pq_dim`-byte codes whose bytes are below `2^pq_bits`.
    pub fn new(
        generation: Generation,
        n_lists: usize,
        pq_dim: usize,
        pq_bits: u32,
        memory: Arc<dyn MemoryResource>,
    ) -> Self {
        debug_assert!((1..=8).contains(&pq_bits));
        Self {
            generation,
            pq_dim,
            pq_bits,
            lists: (0..n_lists).map(|_| RwLock::new(ClusterList::new())).collect(),
            memory,
        }
    }

    fn check_cluster(&self, cluster: u32) -> Result<()> {
        if cluster as usize >= self.lists.len() {
            return Err(IvfPqError::argument(format!(
                "cluster {cluster} out of range (n_lists = {})",
                self.lists.len()
            )));
        }
        Ok(())
    }

    fn check_codes(&self, codes: &[u8], n: usize) -> Result<()> {
        if codes.len() != n * self.pq_dim {
            return Err(IvfPqError::argument(format!(
                "{} code bytes for {n} entries of {} bytes",
                codes.len(),
                self.pq_dim
            )));
        }
        let book_size = 1usize << self.pq_bits;
        if let Some(pos) = codes.iter().position(|&b| usize::from(b) >= book_size) {
            return Err(IvfPqError::argument(format!(
                "code byte {} at offset {pos} out of range for {} bits",
                codes[pos], self.pq_bits
            )));
        }
        Ok(())
    }

    /// Append one entry to `cluster`.
    ///
    /// Fails with `InvalidArgument` if `cluster` is out of range, `code` is
    /// not `pq_dim` bytes, or any byte is `>= 2^pq_bits`.
    pub fn append(&self, cluster: u32, code: &[u8], id: I) -> Result<()> {
        self.append_batch(cluster, code, std::slice::from_ref(&id))
    }

    /// Append `ids.len()` entries to one cluster, all or none.
    pub fn append_batch(&self, cluster: u32, codes: &[u8], ids: &[I]) -> Result<()> {
        self.check_cluster(cluster)?;
        self.check_codes(codes, ids.len())?;

        let mut list = self.lists[cluster as usize].write();
        if let Err(e) = list.reserve(ids.len(), self.pq_dim, &self.memory) {
            list.release_spare();
            return Err(e);
        }
        for (code, &id) in codes.chunks_exact(self.pq_dim).zip(ids) {
            list.push(code, id);
        }
        Ok(())
    }

    /// Append row `i` (`codes[i * pq_dim..]`, `ids[i]`) to list `labels[i]`
    /// for every row, all or none. Order within each list follows row order.
    pub fn append_assigned(&self, labels: &[u32], codes: &[u8], ids: &[I]) -> Result<()> {
        if labels.len() != ids.len() {
            return Err(IvfPqError::argument(format!(
                "{} labels for {} ids",
                labels.len(),
                ids.len()
            )));
        }
        self.check_codes(codes, ids.len())?;

        let mut counts = vec![0usize; self.lists.len()];
        for &label in labels {
            self.check_cluster(label)?;
            counts[label as usize] += 1;
        }

        // Lock touched lists in ascending order so concurrent batches cannot deadlock.
        let mut slot = vec![usize::MAX; self.lists.len()];
        let mut guards: Vec<RwLockWriteGuard<'_, ClusterList<I>>> = Vec::new();
        for (cluster, &count) in counts.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let mut list = self.lists[cluster].write();
            if let Err(e) = list.reserve(count, self.pq_dim, &self.memory) {
                list.release_spare();
                for g in guards.iter_mut() {
                    g.release_spare();
                }
                return Err(e);
            }
            slot[cluster] = guards.len();
            guards.push(list);
        }

        for ((&label, code), &id) in labels
            .iter()
            .zip(codes.chunks_exact(self.pq_dim))
            .zip(ids)
        {
            guards[slot[label as usize]].push(code, id);
        }
        Ok(())
    }

    /// Read access to one list.
    ///
    /// # Panics
    ///
    /// Panics if `cluster >= n_lists`.
    pub fn reader(&self, cluster: u32) -> ListReader<'_, I> {
        ListReader {
            guard: self.lists[cluster as usize].read(),
            pq_dim: self.pq_dim,
        }
    }

    /// Number of entries in `cluster`.
    pub fn len(&self, cluster: u32) -> usize {
        self.lists[cluster as usize].read().len
    }

    pub fn total_len(&self) -> usize {
        self.lists.iter().map(|l| l.read().len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    pub fn list_sizes(&self) -> Vec<usize> {
        self.lists.iter().map(|l| l.read().len).collect()
    }

    pub fn n_lists(&self) -> usize {
        self.lists.len()
    }

    pub fn pq_dim(&self) -> usize {
        self.pq_dim
    }

    pub fn pq_bits(&self) -> u32 {
        self.pq_bits
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Bytes of storage currently allocated.
    pub fn size_bytes(&self) -> usize {
        self.lists
            .iter()
            .map(|l| l.read().chunks.len() * chunk_bytes::<I>(self.pq_dim))
            .sum()
    }

    /// Deep copy, charged against `memory`.
    pub fn try_clone_in(&self, memory: Arc<dyn MemoryResource>) -> Result<Self> {
        let copy = Self::new(self.generation, self.lists.len(), self.pq_dim, self.pq_bits, memory);
        for (src, dst) in self.lists.iter().zip(&copy.lists) {
            let src = src.read();
            let mut dst = dst.write();
            dst.reserve(src.len, self.pq_dim, &copy.memory)?;
            for chunk in &src.chunks {
                for (code, &id) in chunk.codes.chunks_exact(self.pq_dim).zip(&chunk.ids) {
                    dst.push(code, id);
                }
            }
        }
        Ok(copy)
    }

    pub fn memory(&self) -> &Arc<dyn MemoryResource> {
        &self.memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{BoundedMemory, SystemMemory};

    fn lists(n_lists: usize, pq_dim: usize) -> InvertedLists<u64> {
        InvertedLists::new(Generation::next(), n_lists, pq_dim, 8, Arc::new(SystemMemory))
    }

    #[test]
    fn append_and_iterate_across_chunks() {
        let l = lists(3, 2);
        let n = CHUNK_ROWS + 5;
        for i in 0..n {
            l.append(1, &[i as u8, 7], i as u64).unwrap();
        }
        assert_eq!(l.len(1), n);
        assert_eq!(l.len(0), 0);
        assert_eq!(l.total_len(), n);

        let reader = l.reader(1);
        let ids: Vec<u64> = reader.iter().map(|e| e.id).collect();
        assert_eq!(ids, (0..n as u64).collect::<Vec<_>>());
        // Restartable.
        assert_eq!(reader.iter().count(), n);
        let last = reader.iter().last().unwrap();
        assert_eq!(last.code, &[(n - 1) as u8, 7]);
    }

    #[test]
    fn append_assigned_preserves_row_order_per_list() {
        let l = lists(2, 1);
        l.append_assigned(&[1, 0, 1, 1], &[10, 20, 30, 40], &[0, 1, 2, 3])
            .unwrap();
        let ones: Vec<(u8, u64)> = l.reader(1).iter().map(|e| (e.code[0], e.id)).collect();
        assert_eq!(ones, vec![(10, 0), (30, 2), (40, 3)]);
        assert_eq!(l.list_sizes(), vec![1, 3]);
    }

    #[test]
    fn rejects_bad_arguments() {
        let l = lists(2, 2);
        assert!(matches!(
            l.append(5, &[0, 0], 1),
            Err(IvfPqError::InvalidArgument(_))
        ));
        assert!(l.append(0, &[0], 1).is_err());
        assert!(l.append_assigned(&[0], &[0, 0], &[1, 2]).is_err());
        assert!(l.append_assigned(&[0, 9], &[0, 0, 0, 0], &[1, 2]).is_err());
        assert!(l.is_empty());
    }

    #[test]
    fn rejects_code_bytes_outside_codebook() {
        let l: InvertedLists<u64> =
            InvertedLists::new(Generation::next(), 2, 2, 2, Arc::new(SystemMemory));
        l.append(0, &[3, 0], 1).unwrap();

        assert!(matches!(
            l.append(0, &[200, 0], 2),
            Err(IvfPqError::InvalidArgument(_))
        ));
        assert!(matches!(
            l.append(1, &[0, 4], 3),
            Err(IvfPqError::InvalidArgument(_))
        ));
        assert!(matches!(
            l.append_batch(1, &[0, 0, 1, 9], &[4, 5]),
            Err(IvfPqError::InvalidArgument(_))
        ));
        assert!(matches!(
            l.append_assigned(&[0, 1], &[1, 1, 2, 255], &[6, 7]),
            Err(IvfPqError::InvalidArgument(_))
        ));
        assert_eq!(l.list_sizes(), vec![1, 0]);
    }

    #[test]
    fn failed_batch_leaves_lists_untouched() {
        let pq_dim = 4;
        let budget = chunk_bytes::<u64>(pq_dim) * 2;
        let memory = Arc::new(BoundedMemory::new(budget));
        let l: InvertedLists<u64> =
            InvertedLists::new(Generation::next(), 3, pq_dim, 8, memory.clone());

        l.append(0, &[1, 1, 1, 1], 0).unwrap();
        let used = memory.used();

        // Needs a chunk in list 1 and list 2: only one fits.
        let labels = [0u32, 1, 2];
        let codes = [0u8; 12];
        let err = l.append_assigned(&labels, &codes, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, IvfPqError::ResourceExhausted { .. }));
        assert_eq!(l.list_sizes(), vec![1, 0, 0]);
        assert_eq!(memory.used(), used);
    }

    #[test]
    fn concurrent_appends_keep_entries_whole() {
        use rayon::prelude::*;

        let l = lists(4, 3);
        (0..4000u64).into_par_iter().for_each(|i| {
            let cluster = (i % 4) as u32;
            let b = (i % 251) as u8;
            l.append(cluster, &[b, b, b], i).unwrap();
        });

        assert_eq!(l.total_len(), 4000);
        for cluster in 0..4u32 {
            let reader = l.reader(cluster);
            assert_eq!(reader.len(), 1000);
            for e in reader.iter() {
                assert_eq!(e.id % 4, u64::from(cluster));
                let b = (e.id % 251) as u8;
                assert_eq!(e.code, &[b, b, b]);
            }
        }
    }

    #[test]
    fn clone_is_independent() {
        let l = lists(2, 1);
        l.append(0, &[3], 9).unwrap();
        let copy = l.try_clone_in(Arc::new(SystemMemory)).unwrap();
        copy.append(0, &[4], 10).unwrap();
        assert_eq!(l.len(0), 1);
        assert_eq!(copy.len(0), 2);
        assert_eq!(copy.generation(), l.generation());
    }
}
