use std::cmp::Ordering;

use crate::hypergraph::NodeId;

/// A pairwise contraction waiting in a greedy priority queue.
///
/// Ordered such that a max-heap pops the candidate with the lowest `score` first,
/// then the one with fewer flops, then the lowest id pair.
#[derive(Clone, Debug)]
pub(crate) struct Candidate {
    pub(crate) score: f64,
    pub(crate) flops: f64,
    pub(crate) parent_ids: (NodeId, NodeId),
}

impl Candidate {
    /// Creates a candidate with `parent_ids` stored as `(min, max)`.
    pub(crate) fn new(score: f64, flops: f64, a: NodeId, b: NodeId) -> Self {
        Self {
            score,
            flops,
            parent_ids: (a.min(b), a.max(b)),
        }
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| other.flops.total_cmp(&self.flops))
            .then_with(|| other.parent_ids.cmp(&self.parent_ids))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BinaryHeap;

    #[test]
    fn test_pop_order() {
        let mut queue = BinaryHeap::from([
            Candidate::new(-4.0, 100.0, 3, 2),
            Candidate::new(-4.0, 50.0, 5, 6),
            Candidate::new(-4.0, 50.0, 1, 7),
            Candidate::new(2.0, 1.0, 0, 1),
        ]);
        let order = std::iter::from_fn(|| queue.pop())
            .map(|candidate| candidate.parent_ids)
            .collect::<Vec<_>>();
        assert_eq!(order, vec![(1, 7), (5, 6), (2, 3), (0, 1)]);
    }
}
