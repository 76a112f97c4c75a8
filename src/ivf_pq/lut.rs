//! Asymmetric distance computation (ADC) lookup tables.
//!
//! For one query and one probed cluster we precompute, for every subspace `m`
//! and every codebook entry `j`, the contribution `lut[m][j]` of that entry to
//! the rank distance. The distance to any encoded vector is then
//!
//! ```text
//! distance(query, code) = base + Σ_m lut[m][code[m]]
//! ```
//!
//! which is `pq_dim` loads and adds per candidate, with no decoding.
//! `base` carries the per-cluster constant (the query/centroid inner product
//! for inner-product search, zero for L2).

/// Flat lookup table: `[subspace_0_entries..., subspace_1_entries..., ...]`.
#[derive(Debug, Clone)]
pub struct LookupTable {
    data: Vec<f32>,
    pq_dim: usize,
    book_size: usize,
    base: f32,
}

impl LookupTable {
    pub fn new(pq_dim: usize, book_size: usize) -> Self {
        Self {
            data: vec![0.0; pq_dim * book_size],
            pq_dim,
            book_size,
            base: 0.0,
        }
    }

    /// Size in bytes of a table with these dimensions.
    pub fn bytes_for(pq_dim: usize, book_size: usize) -> usize {
        pq_dim * book_size * std::mem::size_of::<f32>()
    }

    #[inline]
    pub fn set_base(&mut self, base: f32) {
        self.base = base;
    }

    /// Entries of subspace `m`.
    #[inline]
    pub fn row_mut(&mut self, m: usize) -> &mut [f32] {
        let start = m * self.book_size;
        &mut self.data[start..start + self.book_size]
    }

    /// Rank distance to one encoded vector.
    #[inline]
    pub fn distance(&self, codes: &[u8]) -> f32 {
        debug_assert_eq!(codes.len(), self.pq_dim);
        let mut sum = 0.0f32;
        for (row, &code) in self.data.chunks_exact(self.book_size).zip(codes) {
            sum += row[code as usize];
        }
        self.base + sum
    }

    /// Rank distances for a run of codes stored back to back.
    pub fn distances(&self, codes: &[u8], out: &mut Vec<f32>) {
        out.clear();
        out.extend(codes.chunks_exact(self.pq_dim).map(|c| self.distance(c)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_sums_lookups_plus_base() {
        let mut lut = LookupTable::new(2, 4);
        lut.row_mut(0).copy_from_slice(&[0.0, 1.0, 2.0, 3.0]);
        lut.row_mut(1).copy_from_slice(&[10.0, 20.0, 30.0, 40.0]);
        lut.set_base(0.5);

        assert_eq!(lut.row_mut(1)[2], 30.0);
        assert_eq!(lut.distance(&[3, 0]), 13.5);

        let mut out = Vec::new();
        lut.distances(&[0, 0, 1, 1, 2, 3], &mut out);
        assert_eq!(out, vec![10.5, 21.5, 42.5]);
    }
}
