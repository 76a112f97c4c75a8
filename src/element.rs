//! Input element types, id types and borrowed dataset views.
//!
//! Every entry point is generic over the element type `T` and the id type
//! `I`; each supported combination is monomorphized, so the hot loops never
//! branch on element width. Narrow integer elements are promoted to `f32`
//! before any subtraction or accumulation.

use std::fmt::Debug;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::error::{IvfPqError, Result};

/// Numeric representation of input vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    /// 32-bit floating point.
    F32,
    /// 8-bit signed integer.
    I8,
    /// 8-bit unsigned integer.
    U8,
}

/// Element type of an input or query vector.
pub trait VectorElement: Copy + Send + Sync + Debug + 'static {
    const KIND: ElementKind;

    /// Promote to the accumulation type.
    fn to_f32(self) -> f32;
}

impl VectorElement for f32 {
    const KIND: ElementKind = ElementKind::F32;

    #[inline(always)]
    fn to_f32(self) -> f32 {
        self
    }
}

impl VectorElement for i8 {
    const KIND: ElementKind = ElementKind::I8;

    #[inline(always)]
    fn to_f32(self) -> f32 {
        f32::from(self)
    }
}

impl VectorElement for u8 {
    const KIND: ElementKind = ElementKind::U8;

    #[inline(always)]
    fn to_f32(self) -> f32 {
        f32::from(self)
    }
}

/// External identifier stored next to every encoded vector.
pub trait IndexId: Copy + Ord + Hash + Debug + Send + Sync + 'static {
    /// Id written into result slots that hold no neighbor.
    const NO_RESULT: Self;

    /// Convert a row number; `None` if it does not fit.
    fn from_usize(v: usize) -> Option<Self>;

    /// Row number addressed by this id (used by refinement).
    fn as_usize(self) -> usize;
}

impl IndexId for u32 {
    const NO_RESULT: Self = u32::MAX;

    #[inline]
    fn from_usize(v: usize) -> Option<Self> {
        u32::try_from(v).ok().filter(|&id| id != Self::NO_RESULT)
    }

    #[inline]
    fn as_usize(self) -> usize {
        self as usize
    }
}

impl IndexId for u64 {
    const NO_RESULT: Self = u64::MAX;

    #[inline]
    fn from_usize(v: usize) -> Option<Self> {
        u64::try_from(v).ok().filter(|&id| id != Self::NO_RESULT)
    }

    #[inline]
    fn as_usize(self) -> usize {
        usize::try_from(self).unwrap_or(usize::MAX)
    }
}

/// Row-major view over `n_rows` vectors of `dim` elements.
#[derive(Debug, Clone, Copy)]
pub struct DatasetView<'a, T> {
    data: &'a [T],
    n_rows: usize,
    dim: usize,
}

impl<'a, T: VectorElement> DatasetView<'a, T> {
    /// Wrap a flat buffer.
    ///
    /// Fails with `InvalidArgument` if `dim == 0` or
    /// `data.len() != n_rows * dim`.
    pub fn new(data: &'a [T], n_rows: usize, dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(IvfPqError::argument("dimension must be greater than 0"));
        }
        let expected = n_rows
            .checked_mul(dim)
            .ok_or_else(|| IvfPqError::argument("n_rows * dim overflows"))?;
        if data.len() != expected {
            return Err(IvfPqError::argument(format!(
                "buffer holds {} elements, expected {n_rows} rows x {dim} = {expected}",
                data.len()
            )));
        }
        Ok(Self { data, n_rows, dim })
    }

    /// Wrap a flat buffer whose row count is implied by its length.
    pub fn from_flat(data: &'a [T], dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(IvfPqError::argument("dimension must be greater than 0"));
        }
        if data.len() % dim != 0 {
            return Err(IvfPqError::argument(format!(
                "buffer length {} is not a multiple of dimension {dim}",
                data.len()
            )));
        }
        Self::new(data, data.len() / dim, dim)
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    #[inline]
    pub fn row(&self, idx: usize) -> &'a [T] {
        let start = idx * self.dim;
        &self.data[start..start + self.dim]
    }

    /// Promote row `idx` into `out[..dim]`.
    #[inline]
    pub fn row_f32_into(&self, idx: usize, out: &mut [f32]) {
        for (o, &x) in out.iter_mut().zip(self.row(idx)) {
            *o = x.to_f32();
        }
    }

    /// Promote the rows listed in `rows` into one flat `f32` buffer.
    pub fn gather_f32(&self, rows: &[usize]) -> Vec<f32> {
        let mut out = vec![0.0f32; rows.len() * self.dim];
        for (dst, &r) in out.chunks_exact_mut(self.dim).zip(rows) {
            self.row_f32_into(r, dst);
        }
        out
    }

    #[inline]
    pub fn as_slice(&self) -> &'a [T] {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_rejects_length_mismatch() {
        let data = [0.0_f32; 7];
        assert!(matches!(
            DatasetView::new(&data, 2, 4),
            Err(IvfPqError::InvalidArgument(_))
        ));
        assert!(DatasetView::new(&data[..6], 2, 3).is_ok());
        assert!(DatasetView::<f32>::new(&[], 0, 0).is_err());
    }

    #[test]
    fn narrow_integers_promote_without_wrapping() {
        let data: [i8; 4] = [-128, 127, 0, -1];
        let view = DatasetView::new(&data, 2, 2).unwrap();
        let flat = view.gather_f32(&[0, 1]);
        assert_eq!(flat, vec![-128.0, 127.0, 0.0, -1.0]);

        let bytes: [u8; 2] = [255, 0];
        let view = DatasetView::from_flat(&bytes, 2).unwrap();
        let mut out = [0.0f32; 2];
        view.row_f32_into(0, &mut out);
        assert_eq!(out, [255.0, 0.0]);
    }

    #[test]
    fn ids_reserve_max_as_sentinel() {
        assert_eq!(<u32 as IndexId>::from_usize(5), Some(5));
        assert_eq!(<u32 as IndexId>::from_usize(u32::MAX as usize), None);
        assert_eq!(<u64 as IndexId>::NO_RESULT, u64::MAX);
    }
}
