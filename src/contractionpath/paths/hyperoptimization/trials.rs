use std::fmt::{self, Display};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{trace, warn};
use serde::{Deserialize, Serialize};

use crate::contractionpath::contraction_tree::ContractionTree;
use crate::contractionpath::SimplePath;
use crate::error::{ErrorKind, Result};
use crate::hypergraph::{EdgeIndex, Fingerprint, HyperGraph};

use super::space::ParameterSet;

/// The phases a single trial of the search loop goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialState {
    Idle,
    Proposing,
    Building,
    Scoring,
    Done,
}

impl TrialState {
    /// Whether the loop may move from `self` to `next`.
    pub fn can_enter(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Proposing)
                | (Self::Idle, Self::Done)
                | (Self::Proposing, Self::Building)
                | (Self::Proposing, Self::Done)
                | (Self::Building, Self::Scoring)
                | (Self::Building, Self::Idle)
                | (Self::Scoring, Self::Idle)
                | (Self::Scoring, Self::Done)
        )
    }
}

impl Display for TrialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Proposing => "proposing",
            Self::Building => "building",
            Self::Scoring => "scoring",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Tracks the state of one worker of the search loop and logs every transition.
#[derive(Debug)]
pub(crate) struct TrialMachine {
    worker: usize,
    state: TrialState,
}

impl TrialMachine {
    pub(crate) fn new(worker: usize) -> Self {
        Self {
            worker,
            state: TrialState::Idle,
        }
    }

    pub(crate) fn enter(&mut self, next: TrialState) {
        debug_assert!(
            self.state.can_enter(next),
            "invalid trial transition {} -> {next}",
            self.state
        );
        trace!(worker = self.worker, from:% = self.state, to:% = next; "Trial state");
        self.state = next;
    }

    pub(crate) fn state(&self) -> TrialState {
        self.state
    }
}

/// A finished trial, as stored in the [`TrialCache`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub fingerprint: Fingerprint,
    pub trial: usize,
    pub params: ParameterSet,
    /// `log2` of the objective, `None` if the trial failed.
    pub score: Option<f64>,
    pub flops: Option<f64>,
    pub peak: Option<f64>,
    /// The SSA path of the tree, if the trial succeeded.
    pub path: Option<SimplePath>,
    #[serde(default)]
    pub sliced: Vec<EdgeIndex>,
    pub error: Option<ErrorKind>,
}

impl TrialRecord {
    pub(crate) fn success(
        fingerprint: Fingerprint,
        trial: usize,
        params: ParameterSet,
        score: f64,
        tree: &ContractionTree,
    ) -> Self {
        Self {
            fingerprint,
            trial,
            params,
            score: Some(score),
            flops: Some(tree.total_flops()),
            peak: Some(tree.peak_size()),
            path: Some(tree.ssa_path()),
            sliced: tree.sliced_indices().to_vec(),
            error: None,
        }
    }

    pub(crate) fn failure(
        fingerprint: Fingerprint,
        trial: usize,
        params: ParameterSet,
        error: ErrorKind,
    ) -> Self {
        Self {
            fingerprint,
            trial,
            params,
            score: None,
            flops: None,
            peak: None,
            path: None,
            sliced: Vec::new(),
            error: Some(error),
        }
    }

    /// Rebuilds the tree of a successful trial, including its slices.
    pub fn rebuild(&self, graph: &HyperGraph) -> Result<Option<ContractionTree>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        let mut tree = ContractionTree::from_path(graph, path)?;
        for &ix in &self.sliced {
            tree.slice_index(ix)?;
        }
        Ok(Some(tree))
    }
}

/// Append-only JSON-lines file of [`TrialRecord`]s that lets a search resume.
///
/// Every record is written with a single `write_all` while holding a lock, so
/// concurrent workers never interleave lines.
#[derive(Debug)]
pub struct TrialCache {
    path: PathBuf,
    file: Mutex<File>,
}

impl TrialCache {
    /// Opens (or creates) the cache file at `path` for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &TrialRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = self
            .file
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Reads the records of `fingerprint` from the file at `path`. A missing file
    /// yields no records, lines that cannot be parsed (e.g. torn by a crash) are
    /// skipped.
    pub fn load(path: impl AsRef<Path>, fingerprint: Fingerprint) -> Result<Vec<TrialRecord>> {
        let content = match fs::read_to_string(path.as_ref()) {
            Ok(content) => content,
            Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut records = Vec::new();
        for (line_number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TrialRecord>(line) {
                Ok(record) if record.fingerprint == fingerprint => records.push(record),
                Ok(_) => {}
                Err(err) => {
                    warn!(line = line_number + 1, error:% = err; "Skipping unreadable trial record");
                }
            }
        }
        Ok(records)
    }
}
