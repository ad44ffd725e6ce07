use std::sync::atomic::{AtomicU64, Ordering};

use itertools::Itertools;

/// Implements a union-find data structure.
/// This is also known as a disjoint-set data structure.
/// See <https://en.wikipedia.org/wiki/Disjoint-set_data_structure>.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<usize>,
}

impl UnionFind {
    /// Creates a new union-find data structure with `n` singleton sets.
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect_vec(),
            rank: vec![0; n],
        }
    }

    /// Finds the representative of the set containing `u`, halving the path on
    /// the way up.
    pub fn find(&mut self, u: usize) -> usize {
        let mut r = u;
        while self.parent[r] != r {
            self.parent[r] = self.parent[self.parent[r]];
            r = self.parent[r];
        }
        r
    }

    /// Unions the sets containing `x` and `y` by rank.
    pub fn union(&mut self, x: usize, y: usize) {
        let u = self.find(x);
        let v = self.find(y);
        if u == v {
            return;
        }

        let (low, high) = if self.rank[u] < self.rank[v] {
            (u, v)
        } else {
            (v, u)
        };
        self.parent[low] = high;
        if self.rank[low] == self.rank[high] {
            self.rank[high] += 1;
        }
    }
}

/// A lock-free minimum over `f64` values that concurrent searchers read for
/// pruning and lower with compare-and-swap when they find something better.
#[derive(Debug)]
pub struct SharedBound(AtomicU64);

impl SharedBound {
    pub fn new(initial: f64) -> Self {
        Self(AtomicU64::new(initial.to_bits()))
    }

    /// The latest visible bound.
    #[inline]
    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    /// Lowers the bound to `value` if it is smaller. Returns whether this call
    /// lowered it.
    pub fn offer(&self, value: f64) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if value >= f64::from_bits(current) {
                return false;
            }
            match self.0.compare_exchange_weak(
                current,
                value.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for SharedBound {
    fn default() -> Self {
        Self::new(f64::INFINITY)
    }
}
