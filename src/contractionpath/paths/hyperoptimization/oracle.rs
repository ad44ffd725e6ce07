use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::FxHashSet;

use super::space::{ParameterSet, ParameterSpace};
use super::trials::TrialRecord;

/// Proposes parameter sets to the trial loop and learns from their scores.
pub trait ParameterOracle: Send {
    /// The next parameter set to try, given all trials reported so far (including
    /// those loaded from a cache). `None` ends the search.
    fn suggest(&mut self, history: &[TrialRecord]) -> Option<ParameterSet>;

    /// Reports the score of a trial proposed by [`ParameterOracle::suggest`]. Failed
    /// trials are reported with `None`.
    fn report(&mut self, params: &ParameterSet, score: Option<f64>);
}

/// Samples the parameter space uniformly and never proposes the same parameter
/// set twice.
#[derive(Debug, Clone)]
pub struct RandomSampler {
    space: ParameterSpace,
    rng: StdRng,
    seen: FxHashSet<String>,
    max_attempts: usize,
}

impl RandomSampler {
    pub fn new(space: ParameterSpace, seed: u64) -> Self {
        Self {
            space,
            rng: StdRng::seed_from_u64(seed),
            seen: FxHashSet::default(),
            max_attempts: 64,
        }
    }

    /// Gives up once this many consecutive draws were all duplicates.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

impl ParameterOracle for RandomSampler {
    fn suggest(&mut self, history: &[TrialRecord]) -> Option<ParameterSet> {
        self.seen
            .extend(history.iter().map(|record| record.params.canonical_key()));
        for _ in 0..self.max_attempts {
            let params = self.space.sample(&mut self.rng)?;
            if self.seen.insert(params.canonical_key()) {
                return Some(params);
            }
        }
        None
    }

    fn report(&mut self, params: &ParameterSet, _score: Option<f64>) {
        self.seen.insert(params.canonical_key());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::contractionpath::paths::hyperoptimization::space::Method;

    #[test]
    fn test_no_repeats() {
        let space = ParameterSpace::for_methods(&[Method::Optimal, Method::Elimination]);
        let mut sampler = RandomSampler::new(space, 3);
        let first = sampler.suggest(&[]).unwrap();
        let second = sampler.suggest(&[]).unwrap();
        assert_ne!(first, second);
        // both parameter-free methods were proposed, nothing is left
        assert!(sampler.suggest(&[]).is_none());
    }

    #[test]
    fn test_seeded() {
        let space = ParameterSpace::for_methods(&[Method::Greedy, Method::BranchBound]);
        let mut a = RandomSampler::new(space.clone(), 11);
        let mut b = RandomSampler::new(space, 11);
        for _ in 0..5 {
            assert_eq!(a.suggest(&[]), b.suggest(&[]));
        }
    }

    #[test]
    fn test_reported_sets_are_skipped() {
        let space = ParameterSpace::for_methods(&[Method::Optimal]);
        let mut sampler = RandomSampler::new(space, 0);
        sampler.report(&ParameterSet::new(Method::Optimal), Some(3.0));
        assert!(sampler.suggest(&[]).is_none());
    }
}
