//! Generators of contraction problems for testing and benchmarking the path
//! finders.

use itertools::Itertools;
use rand::seq::index;
use rand::Rng;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hypergraph::{EdgeIndex, HyperGraph};
use crate::utils::traits::WithCapacity;

/// Shape of the problems drawn by [`random_hypergraph`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomOptions {
    /// Number of input tensors.
    pub inputs: usize,
    /// Edges added on top of the random spanning tree that keeps the problem
    /// connected.
    pub extra_edges: usize,
    /// Maximal number of tensors sharing one of the extra edges. Values above 2
    /// create hyperedges.
    pub max_arity: usize,
    /// Number of open indices, each attached to a single random input.
    pub outputs: usize,
    /// Index sizes are drawn uniformly from `min_size..=max_size`.
    pub min_size: u64,
    pub max_size: u64,
}

impl Default for RandomOptions {
    fn default() -> Self {
        Self {
            inputs: 10,
            extra_edges: 10,
            max_arity: 2,
            outputs: 0,
            min_size: 2,
            max_size: 8,
        }
    }
}

/// Draws a random connected contraction problem.
///
/// The inputs are first joined by a random spanning tree, then
/// [`RandomOptions::extra_edges`] further indices connect between 2 and
/// [`RandomOptions::max_arity`] distinct inputs each.
///
/// # Examples
/// ```
/// # use tnc_paths::builders::{random_hypergraph, RandomOptions};
/// # use rand::rngs::StdRng;
/// # use rand::SeedableRng;
/// let mut rng = StdRng::seed_from_u64(42);
/// let graph = random_hypergraph(&RandomOptions::default(), &mut rng).unwrap();
/// assert_eq!(graph.num_inputs(), 10);
/// assert_eq!(graph.subgraphs().len(), 1);
/// ```
pub fn random_hypergraph<R>(options: &RandomOptions, rng: &mut R) -> Result<HyperGraph>
where
    R: Rng + ?Sized,
{
    if options.inputs == 0 {
        return Err(Error::malformed("a random problem needs at least one input"));
    }
    if options.min_size == 0 || options.min_size > options.max_size {
        return Err(Error::malformed(format!(
            "invalid size range {}..={}",
            options.min_size, options.max_size
        )));
    }
    if options.max_arity < 2 {
        return Err(Error::malformed("edges have to connect at least two inputs"));
    }

    let mut inputs = vec![Vec::new(); options.inputs];
    let mut size_dict = FxHashMap::with_capacity(options.inputs + options.extra_edges);
    let mut next_edge: EdgeIndex = 0;
    let mut new_edge = |rng: &mut R, size_dict: &mut FxHashMap<EdgeIndex, u64>| {
        let ix = next_edge;
        next_edge += 1;
        size_dict.insert(ix, rng.gen_range(options.min_size..=options.max_size));
        ix
    };

    for node in 1..options.inputs {
        let parent = rng.gen_range(0..node);
        let ix = new_edge(rng, &mut size_dict);
        inputs[node].push(ix);
        inputs[parent].push(ix);
    }

    let max_arity = options.max_arity.min(options.inputs);
    if max_arity >= 2 {
        for _ in 0..options.extra_edges {
            let arity = rng.gen_range(2..=max_arity);
            let ix = new_edge(rng, &mut size_dict);
            for node in index::sample(rng, options.inputs, arity) {
                inputs[node].push(ix);
            }
        }
    }

    let mut output = Vec::with_capacity(options.outputs);
    for _ in 0..options.outputs {
        let node = rng.gen_range(0..options.inputs);
        let ix = new_edge(rng, &mut size_dict);
        inputs[node].push(ix);
        output.push(ix);
    }

    HyperGraph::build(inputs, output, size_dict)
}

/// A closed `rows` x `cols` grid of tensors where every neighboring pair shares
/// one index of size `bond`. Horizontal bonds are numbered first, row by row.
///
/// # Examples
/// ```
/// # use tnc_paths::builders::lattice;
/// let graph = lattice(3, 3, 2).unwrap();
/// assert_eq!(graph.num_inputs(), 9);
/// assert_eq!(graph.problem().indices().len(), 12);
/// ```
pub fn lattice(rows: usize, cols: usize, bond: u64) -> Result<HyperGraph> {
    if rows == 0 || cols == 0 {
        return Err(Error::malformed("a lattice needs at least one site"));
    }
    let site = |row: usize, col: usize| row * cols + col;
    let mut inputs = vec![Vec::new(); rows * cols];
    let bonds = (0..rows)
        .cartesian_product(0..cols.saturating_sub(1))
        .map(|(row, col)| (site(row, col), site(row, col + 1)))
        .chain(
            (0..rows.saturating_sub(1))
                .cartesian_product(0..cols)
                .map(|(row, col)| (site(row, col), site(row + 1, col))),
        )
        .collect_vec();

    let mut size_dict = FxHashMap::with_capacity(bonds.len());
    for (ix, (a, b)) in bonds.into_iter().enumerate() {
        inputs[a].push(ix);
        inputs[b].push(ix);
        size_dict.insert(ix, bond);
    }
    HyperGraph::build(inputs, Vec::new(), size_dict)
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::error::ErrorKind;

    #[test]
    fn test_random_is_connected() {
        let mut rng = StdRng::seed_from_u64(3);
        let options = RandomOptions {
            inputs: 14,
            extra_edges: 6,
            max_arity: 4,
            outputs: 3,
            ..Default::default()
        };
        let graph = random_hypergraph(&options, &mut rng).unwrap();
        assert_eq!(graph.num_inputs(), 14);
        assert_eq!(graph.output().len(), 3);
        assert_eq!(graph.subgraphs().len(), 1);
        // spanning tree, extra edges and open indices
        assert_eq!(graph.problem().indices().len(), 13 + 6 + 3);
        for ix in graph.problem().indices() {
            assert!((2..=8).contains(&graph.size(ix)));
        }
    }

    #[test]
    fn test_random_is_seeded() {
        let options = RandomOptions::default();
        let a = random_hypergraph(&options, &mut StdRng::seed_from_u64(9)).unwrap();
        let b = random_hypergraph(&options, &mut StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_single_input() {
        let mut rng = StdRng::seed_from_u64(0);
        let options = RandomOptions {
            inputs: 1,
            outputs: 2,
            ..Default::default()
        };
        let graph = random_hypergraph(&options, &mut rng).unwrap();
        assert_eq!(graph.num_inputs(), 1);
        assert_eq!(graph.node_legs(0).unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_options() {
        let mut rng = StdRng::seed_from_u64(0);
        for options in [
            RandomOptions {
                inputs: 0,
                ..Default::default()
            },
            RandomOptions {
                min_size: 5,
                max_size: 4,
                ..Default::default()
            },
            RandomOptions {
                max_arity: 1,
                ..Default::default()
            },
        ] {
            let err = random_hypergraph(&options, &mut rng).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedProblem);
        }
    }

    #[test]
    fn test_lattice() {
        let graph = lattice(2, 3, 4).unwrap();
        assert_eq!(graph.problem().indices().len(), 7);
        // corner, edge and corner site of the top row
        assert_eq!(graph.node_legs(0).unwrap(), &[0, 4]);
        assert_eq!(graph.node_legs(1).unwrap(), &[0, 1, 5]);
        assert_eq!(graph.node_legs(2).unwrap(), &[1, 6]);
        assert!(graph.output().is_empty());
        assert_eq!(lattice(0, 3, 2).unwrap_err().kind(), ErrorKind::MalformedProblem);
    }
}
