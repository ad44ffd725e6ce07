//! Error types shared by all path finders.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hypergraph::{EdgeIndex, NodeId};

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Fieldless discriminant of [`Error`], used to tally failures of search trials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorKind {
    MalformedProblem,
    InvalidMerge,
    IncompleteContraction,
    SearchInfeasible,
    MemoryTargetUnreachable,
    ExactSearchTooLarge,
    InvalidPath,
    UnknownMethod,
    AllTrialsFailed,
    Io,
    Serialization,
    ThreadPool,
}

/// Errors raised while building or searching contraction paths.
#[derive(Debug, Error)]
pub enum Error {
    /// The problem definition itself is invalid, e.g. an index without a size.
    #[error("malformed problem: {0}")]
    MalformedProblem(String),

    /// The two nodes are not both unparented roots of the tree.
    #[error("cannot merge nodes {a} and {b}: both must be distinct unparented roots")]
    InvalidMerge { a: NodeId, b: NodeId },

    /// Construction ended without reducing the problem to its declared output.
    #[error(
        "contraction ended with {remaining} node(s) and indices {found:?}, expected output {expected:?}"
    )]
    IncompleteContraction {
        remaining: usize,
        found: Vec<EdgeIndex>,
        expected: Vec<EdgeIndex>,
    },

    /// The exact searcher ran out of budget before proving optimality.
    #[error("exact search exhausted its budget, best cost found so far is {best_cost}")]
    SearchInfeasible { best_cost: f64 },

    /// No further slicing brings the peak memory below the target.
    #[error("memory target {target} is unreachable, best achievable peak is {best_peak}")]
    MemoryTargetUnreachable {
        target: f64,
        best_peak: f64,
        sliced: Vec<EdgeIndex>,
    },

    /// The exact searcher was asked to handle more inputs than a subset mask can hold.
    #[error("exact search supports at most {max} inputs, got {n}; partition the problem first")]
    ExactSearchTooLarge { n: usize, max: usize },

    /// A contraction path does not describe a valid sequence of merges.
    #[error("invalid contraction path: {0}")]
    InvalidPath(String),

    /// The trial loop was asked for a path finding method it does not know.
    #[error("unknown method `{0}`")]
    UnknownMethod(String),

    /// Every trial of a search run failed.
    #[error("all {failures} trials failed, most often with {dominant:?}")]
    AllTrialsFailed { failures: usize, dominant: ErrorKind },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedProblem(_) => ErrorKind::MalformedProblem,
            Self::InvalidMerge { .. } => ErrorKind::InvalidMerge,
            Self::IncompleteContraction { .. } => ErrorKind::IncompleteContraction,
            Self::SearchInfeasible { .. } => ErrorKind::SearchInfeasible,
            Self::MemoryTargetUnreachable { .. } => ErrorKind::MemoryTargetUnreachable,
            Self::ExactSearchTooLarge { .. } => ErrorKind::ExactSearchTooLarge,
            Self::InvalidPath(_) => ErrorKind::InvalidPath,
            Self::UnknownMethod(_) => ErrorKind::UnknownMethod,
            Self::AllTrialsFailed { .. } => ErrorKind::AllTrialsFailed,
            Self::Io(_) => ErrorKind::Io,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::ThreadPool(_) => ErrorKind::ThreadPool,
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedProblem(reason.into())
    }

    pub(crate) fn invalid_path(reason: impl Into<String>) -> Self {
        Self::InvalidPath(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind() {
        assert_eq!(
            Error::malformed("missing size").kind(),
            ErrorKind::MalformedProblem
        );
        assert_eq!(
            Error::InvalidMerge { a: 0, b: 1 }.kind(),
            ErrorKind::InvalidMerge
        );
        let io = Error::from(std::io::Error::other("disk full"));
        assert_eq!(io.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_display() {
        let err = Error::MemoryTargetUnreachable {
            target: 8.0,
            best_peak: 32.0,
            sliced: vec![1],
        };
        assert_eq!(
            err.to_string(),
            "memory target 8 is unreachable, best achievable peak is 32"
        );
    }
}
