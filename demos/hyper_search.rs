use std::error::Error;
use std::time::Duration;

use flexi_logger::{json_format, FlexiLoggerError, Logger, LoggerHandle};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tnc_paths::builders::{random_hypergraph, RandomOptions};
use tnc_paths::contractionpath::contraction_cost::Objective;
use tnc_paths::contractionpath::paths::hyperoptimization::{
    HyperOptimizer, HyperOptions, Method,
};
use tnc_paths::contractionpath::paths::TerminationCondition;
use tnc_paths::contractionpath::slicing::SliceOptions;

/// Json lines on stderr. `RUST_LOG` overrides the default of tracing every trial
/// of the search loop.
fn setup_logging() -> Result<LoggerHandle, FlexiLoggerError> {
    Logger::try_with_env_or_str(
        "info, tnc_paths::contractionpath::paths::hyperoptimization=debug",
    )?
    .format(json_format)
    .log_to_stderr()
    .start()
}

fn main() -> Result<(), Box<dyn Error>> {
    let _logger = setup_logging()?;

    let seed = 23;
    let problem = RandomOptions {
        inputs: 40,
        extra_edges: 30,
        max_arity: 3,
        outputs: 4,
        min_size: 2,
        max_size: 6,
    };
    info!(seed, problem:serde; "Configuration set");

    let mut rng = StdRng::seed_from_u64(seed);
    let graph = random_hypergraph(&problem, &mut rng)?;

    let options = HyperOptions {
        methods: vec![
            Method::Greedy,
            Method::BranchBound,
            Method::PartitionGreedy,
            Method::Elimination,
        ],
        objective: Objective::Combo { factor: 64.0 },
        termination: TerminationCondition::Time {
            max_time: Duration::from_secs(10),
        },
        seed,
        slicing: Some(SliceOptions {
            target_size: 2f64.powi(16),
            max_overhead: Some(4.0),
        }),
        cache: Some(std::env::temp_dir().join("hyper_search_trials.jsonl")),
    };
    info!(options:serde; "Starting search");

    let result = HyperOptimizer::new(&graph, options).run_parallel(4)?;
    info!(
        method:% = result.best.params.method,
        trials = result.trials,
        resumed = result.resumed,
        failures = result.failures,
        flops = result.tree.log2_flops(),
        width = result.tree.contraction_width(),
        sliced:serde = result.tree.sliced_indices();
        "Search finished"
    );
    info!(path:serde = result.tree.ssa_path(); "Best path");
    Ok(())
}
