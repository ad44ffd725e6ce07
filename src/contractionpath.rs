use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::hypergraph::NodeId;
use crate::utils::traits::{HashMapInsertNew, WithCapacity};

mod candidates;
pub mod contraction_cost;
pub mod contraction_tree;
pub mod paths;
pub mod slicing;

/// A flat contraction path. Depending on the context it is either in SSA format
/// (every contraction creates a new id `n, n + 1, ...`), in replace-left format
/// (the result takes the id of the left operand) or in linear format (both operands
/// are popped from a list and the result is appended).
pub type SimplePath = Vec<(NodeId, NodeId)>;

/// Reference to a [`SimplePath`].
pub type SimplePathRef<'a> = &'a [(NodeId, NodeId)];

/// Macro to create a [`SimplePath`] from a list of pairs.
///
/// # Examples
/// ```
/// # use tnc_paths::path;
/// let path = path![(0, 1), (2, 3)];
/// assert_eq!(path, vec![(0, 1), (2, 3)]);
/// ```
#[macro_export]
macro_rules! path {
    [] => {
        $crate::contractionpath::SimplePath::new()
    };
    [$( ($t0:expr, $t1:expr) ),* $(,)?] => {{
        let path: $crate::contractionpath::SimplePath = vec![$( ($t0, $t1) ),*];
        path
    }};
}

/// Renumbers a path given as `(left, right, result)` triples with arbitrary result
/// ids into SSA format.
///
/// # Arguments
/// * `path` - contraction triples, where results may carry any unique id `>= n`
/// * `n` - number of inputs
pub(crate) fn ssa_ordering(path: &[(NodeId, NodeId, NodeId)], mut n: usize) -> SimplePath {
    let mut ssa_path = Vec::with_capacity(path.len());
    let mut renamed = FxHashMap::with_capacity(path.len());
    let inputs = n;
    for &(u1, u2, u3) in path {
        let t1 = if u1 >= inputs { renamed[&u1] } else { u1 };
        let t2 = if u2 >= inputs { renamed[&u2] } else { u2 };
        renamed.insert_new(u3, n);
        n += 1;
        ssa_path.push((t1, t2));
    }
    ssa_path
}

/// Converts an SSA path into the replace-left format, where every contraction result
/// takes the place of its left operand.
///
/// # Examples
/// ```
/// # use tnc_paths::contractionpath::ssa_to_replace;
/// # use tnc_paths::path;
/// let ssa = path![(0, 1), (2, 3), (4, 5)];
/// assert_eq!(ssa_to_replace(&ssa, 4), path![(0, 1), (2, 3), (0, 2)]);
/// ```
pub fn ssa_to_replace(path: &[(NodeId, NodeId)], mut n: usize) -> SimplePath {
    let mut replaced = FxHashMap::with_capacity(path.len());
    let mut replace_path = Vec::with_capacity(path.len());
    for (t0, t1) in path {
        let new_t0 = *replaced.get(t0).unwrap_or(t0);
        let new_t1 = *replaced.get(t1).unwrap_or(t1);
        replaced.insert_new(n, new_t0);
        replace_path.push((new_t0, new_t1));
        n += 1;
    }
    replace_path
}

/// Converts an SSA path into the linear format used by `opt_einsum`, where both
/// operands are removed from a list of live tensors and the result is appended.
///
/// # Examples
/// ```
/// # use tnc_paths::contractionpath::ssa_to_linear;
/// # use tnc_paths::path;
/// let ssa = path![(0, 2), (1, 3)];
/// assert_eq!(ssa_to_linear(&ssa, 3), path![(0, 2), (0, 1)]);
/// ```
pub fn ssa_to_linear(path: &[(NodeId, NodeId)], n: usize) -> SimplePath {
    let mut ids = (0..n).collect::<Vec<_>>();
    let mut linear = Vec::with_capacity(path.len());
    let mut next = n;
    for &(a, b) in path {
        // `ids` stays sorted, since new ids are always the largest
        let pa = ids.partition_point(|&x| x < a);
        let pb = ids.partition_point(|&x| x < b);
        let (lo, hi) = if pa < pb { (pa, pb) } else { (pb, pa) };
        ids.remove(hi);
        ids.remove(lo);
        ids.push(next);
        next += 1;
        linear.push((lo, hi));
    }
    linear
}

/// Converts a linear path (see [`ssa_to_linear`]) back into SSA format.
///
/// # Examples
/// ```
/// # use tnc_paths::contractionpath::linear_to_ssa;
/// # use tnc_paths::path;
/// let linear = path![(0, 2), (0, 1)];
/// assert_eq!(linear_to_ssa(&linear, 3).unwrap(), path![(0, 2), (1, 3)]);
/// ```
pub fn linear_to_ssa(path: &[(usize, usize)], n: usize) -> Result<SimplePath> {
    let mut ids = (0..n).collect::<Vec<_>>();
    let mut ssa = Vec::with_capacity(path.len());
    let mut next = n;
    for &(a, b) in path {
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        if lo == hi || hi >= ids.len() {
            return Err(Error::invalid_path(format!(
                "linear step ({a}, {b}) is out of range for {} live tensors",
                ids.len()
            )));
        }
        let second = ids.remove(hi);
        let first = ids.remove(lo);
        ssa.push((first, second));
        ids.push(next);
        next += 1;
    }
    Ok(ssa)
}

/// Checks that an SSA path only contracts existing, not yet consumed tensors.
pub fn validate_ssa_path(path: &[(NodeId, NodeId)], n: usize) -> Result<()> {
    let mut consumed = vec![false; n + path.len()];
    for (step, &(a, b)) in path.iter().enumerate() {
        let available = n + step;
        for t in [a, b] {
            if t >= available {
                return Err(Error::invalid_path(format!(
                    "step {step} uses tensor {t}, which does not exist yet"
                )));
            }
            if consumed[t] {
                return Err(Error::invalid_path(format!(
                    "step {step} contracts already contracted tensor {t}"
                )));
            }
        }
        if a == b {
            return Err(Error::invalid_path(format!(
                "step {step} contracts tensor {a} with itself"
            )));
        }
        consumed[a] = true;
        consumed[b] = true;
    }
    Ok(())
}
