//! Bounded top-k selection.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Candidate keyed by rank distance, then id.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Candidate<I> {
    pub(crate) distance: f32,
    pub(crate) id: I,
}

impl<I: Ord> PartialEq for Candidate<I> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<I: Ord> Eq for Candidate<I> {}

impl<I: Ord> Ord for Candidate<I> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: the worst kept candidate sits on top.
        // Use total_cmp for IEEE 754 total ordering (NaN-safe)
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl<I: Ord> PartialOrd for Candidate<I> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Largest heap capacity reserved up front; bigger heaps grow on demand.
const PREALLOCATE_LIMIT: usize = 1024;

/// Keeps the `k` smallest `(distance, id)` pairs pushed so far.
///
/// The result does not depend on push order.
#[derive(Debug)]
pub(crate) struct TopK<I> {
    k: usize,
    heap: BinaryHeap<Candidate<I>>,
}

impl<I: Ord + Copy> TopK<I> {
    pub(crate) fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k.min(PREALLOCATE_LIMIT)),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.heap.clear();
    }

    #[inline]
    pub(crate) fn push(&mut self, id: I, distance: f32) {
        if self.k == 0 {
            return;
        }
        let candidate = Candidate { distance, id };
        if self.heap.len() < self.k {
            self.heap.push(candidate);
        } else if let Some(mut worst) = self.heap.peek_mut() {
            if candidate < *worst {
                *worst = candidate;
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    /// Drain kept candidates, closest first.
    pub(crate) fn drain_sorted(&mut self) -> Vec<Candidate<I>> {
        let mut out: Vec<Candidate<I>> = self.heap.drain().collect();
        out.sort_unstable();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_smallest_k_in_order() {
        let mut top = TopK::new(3);
        for (id, d) in [(1u64, 5.0f32), (2, 1.0), (3, 4.0), (4, 0.5), (5, 9.0)] {
            top.push(id, d);
        }
        let ids: Vec<u64> = top.drain_sorted().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![4, 2, 3]);
        assert_eq!(top.len(), 0);
    }

    #[test]
    fn ties_resolve_by_id_regardless_of_order() {
        let mut a = TopK::new(2);
        let mut b = TopK::new(2);
        for id in [9u32, 3, 7] {
            a.push(id, 1.0);
        }
        for id in [7u32, 9, 3] {
            b.push(id, 1.0);
        }
        let ia: Vec<u32> = a.drain_sorted().iter().map(|c| c.id).collect();
        let ib: Vec<u32> = b.drain_sorted().iter().map(|c| c.id).collect();
        assert_eq!(ia, vec![3, 7]);
        assert_eq!(ia, ib);
    }

    #[test]
    fn zero_k_keeps_nothing() {
        let mut top = TopK::new(0);
        top.push(1u64, 0.0);
        assert!(top.drain_sorted().is_empty());
    }

    #[test]
    fn huge_k_grows_on_demand() {
        let mut top = TopK::new(usize::MAX);
        for id in 0..2000u32 {
            top.push(id, (2000 - id) as f32);
        }
        let kept = top.drain_sorted();
        assert_eq!(kept.len(), 2000);
        assert_eq!(kept[0].id, 1999);
    }
}
