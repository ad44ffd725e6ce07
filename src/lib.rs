//! Contraction path optimization for tensor networks.
//!
//! A contraction problem is a [`hypergraph::HyperGraph`] whose nodes are the input
//! tensors and whose edges are their indices. The path finders in
//! [`contractionpath::paths`] turn it into a
//! [`contractionpath::contraction_tree::ContractionTree`], which can be sliced to
//! fit a memory target and scored under an
//! [`contractionpath::contraction_cost::Objective`].

pub mod builders;
pub mod contractionpath;
pub mod error;
pub mod hypergraph;
mod utils;
