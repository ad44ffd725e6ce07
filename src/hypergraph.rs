//! Hypergraph view of a contraction problem.
//!
//! Every input tensor is a node, every index is a hyperedge touching all nodes that
//! carry it. A [`HyperGraph`] is a cheap-to-clone working copy: path finders merge
//! nodes on their own copy while the immutable [`Problem`] is shared behind an
//! [`Arc`].

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::fmt::{self, Display};
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;

use itertools::Itertools;
use ordered_float::OrderedFloat;
use rustc_hash::{FxHashMap, FxHashSet, FxHasher};
use serde::{Deserialize, Serialize};

use crate::contractionpath::contraction_cost::{ContractionCost, Objective};
use crate::contractionpath::SimplePath;
use crate::error::{Error, Result};
use crate::utils::datastructures::UnionFind;
use crate::utils::stable_hash::StableHasher;
use crate::utils::traits::{HashMapInsertNew, WithCapacity};

pub mod partitioning;

/// Identifier of an index (hyperedge).
pub type EdgeIndex = usize;

/// Identifier of a node. Inputs are `0..n`, every merge creates the next free id.
pub type NodeId = usize;

/// The immutable part of a contraction problem: inputs, output and index sizes.
#[derive(Debug)]
pub struct Problem {
    inputs: Vec<Vec<EdgeIndex>>,
    output: Vec<EdgeIndex>,
    output_set: FxHashSet<EdgeIndex>,
    size_dict: FxHashMap<EdgeIndex, u64>,
    appearances: FxHashMap<EdgeIndex, u32>,
    labels: FxHashMap<EdgeIndex, String>,
}

impl Problem {
    /// The (deduplicated, sorted) indices of every input.
    #[inline]
    pub fn inputs(&self) -> &[Vec<EdgeIndex>] {
        &self.inputs
    }

    #[inline]
    pub fn input(&self, node: NodeId) -> &[EdgeIndex] {
        &self.inputs[node]
    }

    #[inline]
    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    /// The output indices in their declared order.
    #[inline]
    pub fn output(&self) -> &[EdgeIndex] {
        &self.output
    }

    #[inline]
    pub fn is_output(&self, ix: EdgeIndex) -> bool {
        self.output_set.contains(&ix)
    }

    /// Dimension of index `ix`.
    #[inline]
    pub fn size(&self, ix: EdgeIndex) -> u64 {
        self.size_dict[&ix]
    }

    #[inline]
    pub fn size_dict(&self) -> &FxHashMap<EdgeIndex, u64> {
        &self.size_dict
    }

    /// Number of inputs carrying `ix`, plus one if `ix` is an output index. An
    /// intermediate holding all of these occurrences can sum the index out.
    #[inline]
    pub fn appearances(&self, ix: EdgeIndex) -> u32 {
        self.appearances[&ix]
    }

    /// Whether any input or the output carries `ix`.
    #[inline]
    pub fn has_index(&self, ix: EdgeIndex) -> bool {
        self.appearances.contains_key(&ix)
    }

    /// Human readable label of `ix`, falling back to its number.
    pub fn label(&self, ix: EdgeIndex) -> String {
        self.labels
            .get(&ix)
            .cloned()
            .unwrap_or_else(|| ix.to_string())
    }

    /// All indices used by inputs or output, sorted.
    pub fn indices(&self) -> Vec<EdgeIndex> {
        self.appearances.keys().copied().sorted().collect()
    }

    /// Number of elements of a tensor with the given legs.
    #[inline]
    pub fn legs_size(&self, legs: &[EdgeIndex]) -> f64 {
        legs.iter().map(|&ix| self.size(ix) as f64).product()
    }

    /// Stable structural hash of the problem. Invariant under reordering of the
    /// inputs and of the legs within each input, and identical across platforms
    /// and builds since it keys persisted trial caches.
    pub fn fingerprint(&self) -> Fingerprint {
        let sized = |legs: &[EdgeIndex]| {
            legs.iter()
                .map(|&ix| (ix as u64, self.size(ix)))
                .sorted()
                .collect_vec()
        };
        let mut hasher = StableHasher::default();
        let inputs = self.inputs.iter().map(|legs| sized(legs)).sorted().collect_vec();
        let output = sized(&self.output);
        hasher.write_u64(inputs.len() as u64);
        for legs in inputs.iter().chain([&output]) {
            hasher.write_u64(legs.len() as u64);
            for &(ix, size) in legs {
                hasher.write_u64(ix);
                hasher.write_u64(size);
            }
        }
        Fingerprint(hasher.finish())
    }
}

/// Stable hash identifying a problem instance, used to key cached search trials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    /// Mixes an extra tag, such as a serialized objective, into the fingerprint.
    pub fn with_tag(self, tag: &str) -> Self {
        let mut hasher = StableHasher::default();
        hasher.write_u64(self.0);
        hasher.write_str(tag);
        Self(hasher.finish())
    }

    /// Keys the fingerprint by objective, so trials scored differently never mix.
    pub fn with_objective(self, objective: &Objective) -> Self {
        self.with_tag(&objective.key())
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A working copy of a contraction problem as a hypergraph of live nodes.
///
/// # Examples
/// ```
/// # use tnc_paths::hypergraph::HyperGraph;
/// # use rustc_hash::FxHashMap;
/// let sizes = FxHashMap::from_iter([('i', 2), ('j', 3), ('k', 4), ('l', 2)]);
/// let mut graph = HyperGraph::from_equation("ij,jk,kl->il", &sizes).unwrap();
/// let original = graph.clone();
/// let (node, legs) = graph.contract(0, 1).unwrap();
/// assert_eq!(node, 3);
/// assert_eq!(graph.remaining_node_count(), 2);
/// assert_eq!(original.remaining_node_count(), 3);
/// assert_eq!(legs.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct HyperGraph {
    problem: Arc<Problem>,
    nodes: FxHashMap<NodeId, Vec<EdgeIndex>>,
    edges: FxHashMap<EdgeIndex, Vec<NodeId>>,
    next_id: NodeId,
}

impl HyperGraph {
    /// Builds a hypergraph from the index lists of all inputs, the output indices
    /// and the size of every index.
    ///
    /// Repeated indices within one input are merged. Fails with
    /// [`Error::MalformedProblem`] if an index has no positive size, if the output
    /// repeats an index or uses one that no input carries, or if there are no
    /// inputs at all.
    pub fn build(
        inputs: Vec<Vec<EdgeIndex>>,
        output: Vec<EdgeIndex>,
        size_dict: FxHashMap<EdgeIndex, u64>,
    ) -> Result<Self> {
        Self::build_labelled(inputs, output, size_dict, FxHashMap::default())
    }

    fn build_labelled(
        inputs: Vec<Vec<EdgeIndex>>,
        output: Vec<EdgeIndex>,
        size_dict: FxHashMap<EdgeIndex, u64>,
        labels: FxHashMap<EdgeIndex, String>,
    ) -> Result<Self> {
        if inputs.is_empty() {
            return Err(Error::malformed("a contraction needs at least one input"));
        }

        let inputs = inputs
            .into_iter()
            .map(|legs| legs.into_iter().sorted().dedup().collect_vec())
            .collect_vec();

        let mut appearances = FxHashMap::with_capacity(size_dict.len());
        for legs in &inputs {
            for &ix in legs {
                *appearances.entry(ix).or_insert(0) += 1;
            }
        }

        let mut output_set = FxHashSet::with_capacity(output.len());
        for &ix in &output {
            if !output_set.insert(ix) {
                return Err(Error::malformed(format!(
                    "output index {ix} is listed twice"
                )));
            }
            match appearances.get_mut(&ix) {
                Some(count) => *count += 1,
                None => {
                    return Err(Error::malformed(format!(
                        "output index {ix} does not appear in any input"
                    )))
                }
            }
        }

        for &ix in appearances.keys() {
            match size_dict.get(&ix) {
                Some(&size) if size > 0 => {}
                Some(_) => {
                    return Err(Error::malformed(format!(
                        "index {ix} has size zero"
                    )))
                }
                None => {
                    return Err(Error::malformed(format!(
                        "index {ix} has no declared size"
                    )))
                }
            }
        }

        let mut nodes = FxHashMap::with_capacity(inputs.len());
        let mut edges: FxHashMap<EdgeIndex, Vec<NodeId>> =
            FxHashMap::with_capacity(appearances.len());
        for (node, legs) in inputs.iter().enumerate() {
            for &ix in legs {
                edges.entry(ix).or_default().push(node);
            }
            nodes.insert_new(node, legs.clone());
        }

        let next_id = inputs.len();
        Ok(Self {
            problem: Arc::new(Problem {
                inputs,
                output,
                output_set,
                size_dict,
                appearances,
                labels,
            }),
            nodes,
            edges,
            next_id,
        })
    }

    /// Builds a hypergraph from arbitrary labels. Labels are numbered in sorted
    /// order, so two problems differing only in the order of their inputs map to
    /// the same index numbers.
    pub fn from_labels<L, S>(
        inputs: &[Vec<L>],
        output: &[L],
        sizes: &HashMap<L, u64, S>,
    ) -> Result<Self>
    where
        L: Ord + Hash + Clone + Display,
        S: BuildHasher,
    {
        let ids: BTreeMap<&L, EdgeIndex> = inputs
            .iter()
            .flatten()
            .chain(output)
            .sorted()
            .dedup()
            .enumerate()
            .map(|(id, label)| (label, id))
            .collect();

        let mut size_dict = FxHashMap::with_capacity(ids.len());
        let mut labels = FxHashMap::with_capacity(ids.len());
        for (&label, &id) in &ids {
            let Some(&size) = sizes.get(label) else {
                return Err(Error::malformed(format!(
                    "index {label} has no declared size"
                )));
            };
            size_dict.insert(id, size);
            labels.insert(id, label.to_string());
        }

        let inputs = inputs
            .iter()
            .map(|legs| legs.iter().map(|label| ids[label]).collect_vec())
            .collect_vec();
        let output = output.iter().map(|label| ids[label]).collect_vec();
        Self::build_labelled(inputs, output, size_dict, labels)
    }

    /// Builds a hypergraph from an einsum equation such as `"ij,jk->ik"`. Without
    /// `->`, the output consists of the indices appearing exactly once, sorted.
    pub fn from_equation(equation: &str, sizes: &FxHashMap<char, u64>) -> Result<Self> {
        let equation = equation
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>();
        let (lhs, output) = match equation.split_once("->") {
            Some((lhs, rhs)) => (lhs, rhs.chars().collect_vec()),
            None => {
                let counts = equation.chars().filter(|c| *c != ',').counts();
                let implicit = counts
                    .into_iter()
                    .filter(|&(_, count)| count == 1)
                    .map(|(c, _)| c)
                    .sorted()
                    .collect_vec();
                (equation.as_str(), implicit)
            }
        };
        let inputs = lhs
            .split(',')
            .map(|term| term.chars().collect_vec())
            .collect_vec();
        Self::from_labels(&inputs, &output, sizes)
    }

    /// Returns a fresh hypergraph over the same inputs with a different output.
    pub fn with_output(&self, output: Vec<EdgeIndex>) -> Result<Self> {
        Self::build_labelled(
            self.problem.inputs.clone(),
            output,
            self.problem.size_dict.clone(),
            self.problem.labels.clone(),
        )
    }

    /// Returns an unmodified copy of the problem this graph was built from.
    pub fn pristine(&self) -> Self {
        let problem = Arc::clone(&self.problem);
        let mut nodes = FxHashMap::with_capacity(problem.num_inputs());
        let mut edges: FxHashMap<EdgeIndex, Vec<NodeId>> = FxHashMap::default();
        for (node, legs) in problem.inputs.iter().enumerate() {
            for &ix in legs {
                edges.entry(ix).or_default().push(node);
            }
            nodes.insert(node, legs.clone());
        }
        Self {
            next_id: problem.num_inputs(),
            problem,
            nodes,
            edges,
        }
    }

    #[inline]
    pub fn problem(&self) -> &Arc<Problem> {
        &self.problem
    }

    #[inline]
    pub fn num_inputs(&self) -> usize {
        self.problem.num_inputs()
    }

    #[inline]
    pub fn output(&self) -> &[EdgeIndex] {
        self.problem.output()
    }

    #[inline]
    pub fn size(&self, ix: EdgeIndex) -> u64 {
        self.problem.size(ix)
    }

    /// The external label of index `ix`.
    #[inline]
    pub fn index_label(&self, ix: EdgeIndex) -> String {
        self.problem.label(ix)
    }

    #[inline]
    pub fn remaining_node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Whether a single node is left and it carries exactly the output indices.
    pub fn is_complete(&self) -> bool {
        if self.nodes.len() != 1 {
            return false;
        }
        self.nodes.values().all(|legs| {
            let kept = legs
                .iter()
                .filter(|&&ix| self.problem.is_output(ix))
                .count();
            kept == legs.len() && kept == self.problem.output.len()
        })
    }

    #[inline]
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    /// The live node ids, sorted.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().sorted().collect()
    }

    /// The id the next merge will produce.
    #[inline]
    pub fn next_id(&self) -> NodeId {
        self.next_id
    }

    #[inline]
    pub fn node_legs(&self, node: NodeId) -> Option<&[EdgeIndex]> {
        self.nodes.get(&node).map(Vec::as_slice)
    }

    /// Live nodes touching index `ix`.
    #[inline]
    pub fn edge_nodes(&self, ix: EdgeIndex) -> &[NodeId] {
        self.edges.get(&ix).map_or(&[], Vec::as_slice)
    }

    /// Number of elements of the tensor at `node`.
    pub fn node_size(&self, node: NodeId) -> f64 {
        self.node_legs(node)
            .map_or(1.0, |legs| self.problem.legs_size(legs))
    }

    /// Live nodes sharing at least one index with `node`, sorted.
    pub fn neighbors(&self, node: NodeId) -> Vec<NodeId> {
        let Some(legs) = self.nodes.get(&node) else {
            return Vec::new();
        };
        legs.iter()
            .flat_map(|ix| self.edge_nodes(*ix))
            .copied()
            .filter(|&other| other != node)
            .sorted()
            .dedup()
            .collect()
    }

    fn check_pair(&self, a: NodeId, b: NodeId) -> Result<(&[EdgeIndex], &[EdgeIndex])> {
        match (self.nodes.get(&a), self.nodes.get(&b)) {
            (Some(a_legs), Some(b_legs)) if a != b => Ok((a_legs, b_legs)),
            _ => Err(Error::InvalidMerge { a, b }),
        }
    }

    /// The legs the merge of `a` and `b` would carry: everything from both
    /// parents that is either an output index or still referenced by another live
    /// node.
    fn contracted_legs(
        &self,
        a: NodeId,
        b: NodeId,
        a_legs: &[EdgeIndex],
        b_legs: &[EdgeIndex],
    ) -> Vec<EdgeIndex> {
        a_legs
            .iter()
            .merge(b_legs)
            .dedup()
            .copied()
            .filter(|&ix| {
                self.problem.is_output(ix)
                    || self
                        .edge_nodes(ix)
                        .iter()
                        .any(|&other| other != a && other != b)
            })
            .collect()
    }

    /// Cost of merging `a` and `b` without performing the merge.
    pub fn cost_of_contraction(&self, a: NodeId, b: NodeId) -> Result<ContractionCost> {
        let (a_legs, b_legs) = self.check_pair(a, b)?;
        let union = a_legs.iter().merge(b_legs).dedup().copied().collect_vec();
        let result = self.contracted_legs(a, b, a_legs, b_legs);
        let memory = self.problem.legs_size(&result);
        Ok(ContractionCost {
            flops: self.problem.legs_size(&union),
            memory,
            write: memory,
        })
    }

    /// Merges `a` and `b` into a new node and returns its id and legs.
    pub fn contract(&mut self, a: NodeId, b: NodeId) -> Result<(NodeId, Vec<EdgeIndex>)> {
        let (a_legs, b_legs) = self.check_pair(a, b)?;
        let legs = self.contracted_legs(a, b, a_legs, b_legs);
        self.pop_node(a);
        self.pop_node(b);
        let node = self.add_node(legs.clone());
        Ok((node, legs))
    }

    fn pop_node(&mut self, node: NodeId) -> Vec<EdgeIndex> {
        let legs = self.nodes.remove(&node).unwrap_or_default();
        for ix in &legs {
            if let Some(touching) = self.edges.get_mut(ix) {
                touching.retain(|&other| other != node);
                if touching.is_empty() {
                    self.edges.remove(ix);
                }
            }
        }
        legs
    }

    fn add_node(&mut self, legs: Vec<EdgeIndex>) -> NodeId {
        let node = self.next_id;
        self.next_id += 1;
        for &ix in &legs {
            self.edges.entry(ix).or_default().push(node);
        }
        self.nodes.insert_new(node, legs);
        node
    }

    /// Connected components of live nodes, each sorted, ordered by smallest id.
    pub fn subgraphs(&self) -> Vec<Vec<NodeId>> {
        let nodes = self.nodes();
        let position: FxHashMap<NodeId, usize> =
            nodes.iter().enumerate().map(|(i, &n)| (n, i)).collect();
        let mut uf = UnionFind::new(nodes.len());
        for touching in self.edges.values() {
            for window in touching.windows(2) {
                uf.union(position[&window[0]], position[&window[1]]);
            }
        }

        let mut groups: BTreeMap<usize, Vec<NodeId>> = BTreeMap::new();
        for (i, &node) in nodes.iter().enumerate() {
            groups.entry(uf.find(i)).or_default().push(node);
        }
        groups
            .into_values()
            .sorted_by_key(|group| group[0])
            .collect()
    }

    /// Performs merges that are never worse than leaving the nodes apart: scalars
    /// are absorbed into the smallest node and nodes with identical legs are
    /// merged (Hadamard products). Repeats until nothing changes and returns the
    /// merges in SSA form.
    pub fn simplify(&mut self) -> Result<SimplePath> {
        let mut path = Vec::new();
        loop {
            let before = path.len();
            self.simplify_scalars(&mut path)?;
            self.simplify_hadamard(&mut path)?;
            if path.len() == before {
                return Ok(path);
            }
        }
    }

    fn simplify_scalars(&mut self, path: &mut SimplePath) -> Result<()> {
        if self.nodes.len() < 2 {
            return Ok(());
        }
        let (mut scalars, others): (Vec<_>, Vec<_>) = self
            .nodes()
            .into_iter()
            .partition(|node| self.nodes[node].is_empty());
        if scalars.is_empty() {
            return Ok(());
        }
        if let Some(&target) = others
            .iter()
            .min_by_key(|&&node| (self.nodes[&node].len(), node))
        {
            scalars.push(target);
        }
        let mut current = scalars[0];
        for &next in &scalars[1..] {
            path.push((current, next));
            current = self.contract(current, next)?.0;
        }
        Ok(())
    }

    fn simplify_hadamard(&mut self, path: &mut SimplePath) -> Result<()> {
        let mut groups: BTreeMap<Vec<EdgeIndex>, Vec<NodeId>> = BTreeMap::new();
        for node in self.nodes() {
            groups.entry(self.nodes[&node].clone()).or_default().push(node);
        }
        for mut group in groups.into_values().filter(|group| group.len() > 1) {
            group.reverse();
            while group.len() > 1 {
                let (Some(a), Some(b)) = (group.pop(), group.pop()) else {
                    break;
                };
                path.push((a, b));
                let (merged, _) = self.contract(a, b)?;
                group.insert(0, merged);
            }
        }
        Ok(())
    }

    /// Joins all remaining nodes by repeatedly merging the two smallest ones.
    /// Used to combine disconnected components.
    pub fn optimize_remaining_by_size(&mut self) -> Result<SimplePath> {
        let mut queue = self
            .nodes()
            .into_iter()
            .map(|node| Reverse((OrderedFloat(self.node_size(node)), node)))
            .collect::<BinaryHeap<_>>();
        let mut path = Vec::with_capacity(queue.len().saturating_sub(1));
        while queue.len() > 1 {
            let (Some(Reverse((_, a))), Some(Reverse((_, b)))) = (queue.pop(), queue.pop())
            else {
                break;
            };
            path.push((a, b));
            let (merged, _) = self.contract(a, b)?;
            queue.push(Reverse((OrderedFloat(self.node_size(merged)), merged)));
        }
        Ok(path)
    }

    /// Hash of the multiset of live node legs. Two graphs with equal keys have the
    /// same remaining contraction problem, regardless of node ids.
    pub fn state_key(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.nodes.values().sorted().collect_vec().hash(&mut hasher);
        hasher.finish()
    }

    /// See [`Problem::fingerprint`].
    #[inline]
    pub fn fingerprint(&self) -> Fingerprint {
        self.problem.fingerprint()
    }
}
