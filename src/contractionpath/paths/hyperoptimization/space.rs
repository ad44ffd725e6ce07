use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The path finding methods the trial loop can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Method {
    Greedy,
    Optimal,
    BranchBound,
    PartitionGreedy,
    Elimination,
}

impl Method {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Greedy => "greedy",
            Self::Optimal => "optimal",
            Self::BranchBound => "branch-bound",
            Self::PartitionGreedy => "partition-greedy",
            Self::Elimination => "elimination",
        }
    }

    /// The tunable parameters of this method and their ranges.
    pub fn space(&self) -> BTreeMap<String, ParamSpec> {
        let greedy = || {
            [
                (
                    "costmod".to_string(),
                    ParamSpec::Float {
                        low: 0.1,
                        high: 4.0,
                        log: false,
                    },
                ),
                (
                    "temperature".to_string(),
                    ParamSpec::Float {
                        low: 0.001,
                        high: 1.0,
                        log: true,
                    },
                ),
                (
                    "seed".to_string(),
                    ParamSpec::Int {
                        low: 0,
                        high: 1 << 30,
                    },
                ),
            ]
        };
        match self {
            Self::Greedy => greedy().into_iter().collect(),
            Self::Optimal | Self::Elimination => BTreeMap::new(),
            Self::BranchBound => BTreeMap::from([
                ("nbranch".to_string(), ParamSpec::Int { low: 1, high: 8 }),
                (
                    "cutoff_flops_factor".to_string(),
                    ParamSpec::Float {
                        low: 1.5,
                        high: 20.0,
                        log: true,
                    },
                ),
            ]),
            Self::PartitionGreedy => {
                let mut space = greedy().into_iter().collect::<BTreeMap<_, _>>();
                space.insert("cutoff".to_string(), ParamSpec::Int { low: 2, high: 16 });
                space.insert(
                    "imbalance".to_string(),
                    ParamSpec::Float {
                        low: 0.0,
                        high: 0.5,
                        log: false,
                    },
                );
                space
            }
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "greedy" => Ok(Self::Greedy),
            "optimal" => Ok(Self::Optimal),
            "branch-bound" => Ok(Self::BranchBound),
            "partition-greedy" => Ok(Self::PartitionGreedy),
            "elimination" => Ok(Self::Elimination),
            _ => Err(Error::UnknownMethod(s.to_string())),
        }
    }
}

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }
}

/// The range of values a parameter can take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParamSpec {
    /// One of a fixed set of values.
    Choice(Vec<ParamValue>),
    /// An integer in `low..=high`.
    Int { low: i64, high: i64 },
    /// A float in `low..high`, sampled uniformly in log space if `log` is set.
    Float { low: f64, high: f64, log: bool },
}

impl ParamSpec {
    /// Draws a value uniformly from this range.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<ParamValue> {
        match self {
            Self::Choice(values) if values.is_empty() => None,
            Self::Choice(values) => Some(values[rng.gen_range(0..values.len())].clone()),
            Self::Int { low, high } if low > high => None,
            Self::Int { low, high } => Some(ParamValue::Int(rng.gen_range(*low..=*high))),
            Self::Float { low, high, .. } if low.is_nan() || high.is_nan() || low > high => None,
            Self::Float { low, high, log } => {
                let unit = rng.gen::<f64>();
                let value = if *log && *low > 0.0 {
                    (low.ln() + unit * (high.ln() - low.ln())).exp()
                } else {
                    low + unit * (high - low)
                };
                Some(ParamValue::Float(value.clamp(*low, *high)))
            }
        }
    }
}

/// A method together with concrete values for its parameters.
///
/// Parameters are kept sorted by name, so equal sets always serialize to the same
/// JSON, see [`ParameterSet::canonical_key`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub method: Method,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}

impl ParameterSet {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            params: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, name: &str, value: ParamValue) -> Self {
        self.params.insert(name.to_string(), value);
        self
    }

    /// Canonical JSON encoding, used to detect repeated proposals.
    pub fn canonical_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }

    pub fn float(&self, name: &str, default: f64) -> f64 {
        self.params
            .get(name)
            .and_then(ParamValue::as_f64)
            .unwrap_or(default)
    }

    pub fn int(&self, name: &str, default: i64) -> i64 {
        self.params
            .get(name)
            .and_then(ParamValue::as_i64)
            .unwrap_or(default)
    }
}

/// The search space of the trial loop: a set of methods, each with its parameter
/// ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    pub methods: BTreeMap<Method, BTreeMap<String, ParamSpec>>,
}

impl ParameterSpace {
    /// The default ranges of the given methods.
    pub fn for_methods(methods: &[Method]) -> Self {
        Self {
            methods: methods
                .iter()
                .map(|method| (*method, method.space()))
                .collect(),
        }
    }

    /// Draws a method uniformly, then every parameter of it.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<ParameterSet> {
        if self.methods.is_empty() {
            return None;
        }
        let (method, specs) = self.methods.iter().nth(rng.gen_range(0..self.methods.len()))?;
        let mut params = BTreeMap::new();
        for (name, spec) in specs {
            params.insert(name.clone(), spec.sample(rng)?);
        }
        Some(ParameterSet {
            method: *method,
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use float_cmp::assert_approx_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::error::ErrorKind;

    #[test]
    fn test_method_names() {
        for method in [
            Method::Greedy,
            Method::Optimal,
            Method::BranchBound,
            Method::PartitionGreedy,
            Method::Elimination,
        ] {
            assert_eq!(method.name().parse::<Method>().unwrap(), method);
            assert_eq!(
                serde_json::to_string(&method).unwrap(),
                format!("\"{method}\"")
            );
        }
        let err = "annealing".parse::<Method>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownMethod);
    }

    #[test]
    fn test_samples_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let space = ParameterSpace::for_methods(&[Method::Greedy, Method::PartitionGreedy]);
        for _ in 0..100 {
            let params = space.sample(&mut rng).unwrap();
            let temperature = params.float("temperature", -1.0);
            assert!((0.001..=1.0).contains(&temperature));
            let costmod = params.float("costmod", -1.0);
            assert!((0.1..=4.0).contains(&costmod));
            if params.method == Method::PartitionGreedy {
                assert!((2..=16).contains(&params.int("cutoff", -1)));
            }
        }
    }

    #[test]
    fn test_canonical_key_is_order_independent() {
        let a = ParameterSet::new(Method::Greedy)
            .with("seed", ParamValue::Int(3))
            .with("costmod", ParamValue::Float(1.5));
        let b = ParameterSet::new(Method::Greedy)
            .with("costmod", ParamValue::Float(1.5))
            .with("seed", ParamValue::Int(3));
        assert_eq!(a.canonical_key(), b.canonical_key());

        let parsed: ParameterSet = serde_json::from_str(&a.canonical_key()).unwrap();
        assert_eq!(parsed, a);
        assert_eq!(parsed.int("seed", 0), 3);
        assert_approx_eq!(f64, parsed.float("costmod", 0.0), 1.5);
    }

    #[test]
    fn test_empty_spaces() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(ParameterSpace::for_methods(&[]).sample(&mut rng).is_none());
        let optimal = ParameterSpace::for_methods(&[Method::Optimal])
            .sample(&mut rng)
            .unwrap();
        assert_eq!(optimal, ParameterSet::new(Method::Optimal));
        assert!(ParamSpec::Choice(vec![]).sample(&mut rng).is_none());
    }
}
