//! Run driver.
//!
//! A run samples one cash/leverage draw, builds its network, and runs the
//! configured number of cascade trials over it. `run_all` repeats that for
//! every configured run with consecutive seeds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::config::SimulationConfig;
use crate::distribution::{clamp_cash, clamp_leverage};
use crate::error::{invalid, Result};
use crate::monte_carlo::{run_monte_carlo, Histogram, MonteCarloSummary, RunControl, TrialPlan};
use crate::network::{
    binarize_probabilities, cash_to_connectivity, distribute_liabilities, make_connections,
    NetworkMatrix, NetworkStats,
};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct RunResult {
    pub run: usize,
    pub seed: u64,
    pub network: NetworkStats,
    pub histogram: Histogram,
    pub summary: MonteCarloSummary,
    pub elapsed: Duration,
}

/// Samples cash and leverage and assembles the network for one run.
pub fn build_network(config: &SimulationConfig, rng: &mut impl Rng) -> Result<NetworkMatrix> {
    let n = config.institutions;

    let mut cash = config.cash.sample(n, rng)?;
    let clamped = clamp_cash(&mut cash);
    if clamped > 0 {
        warn!(clamped, "non-positive cash draws clamped");
    }

    let connectivity = cash_to_connectivity(&cash);
    let strength = make_connections(&connectivity);
    let adjacency = binarize_probabilities(&strength, rng);

    let mut leverage = config.leverage.sample(n, rng)?;
    let floored = clamp_leverage(&mut leverage);
    if floored > 0 {
        debug!(floored, "leverage draws floored");
    }

    let liabilities: Vec<f64> = cash.iter().zip(&leverage).map(|(c, l)| c * l).collect();
    let matrix = distribute_liabilities(&adjacency, &liabilities)?;
    NetworkMatrix::assemble(matrix, &cash)
}

/// Executes run number `run`.
pub fn run_model(config: &SimulationConfig, run: usize, control: &RunControl) -> Result<RunResult> {
    let start = Instant::now();
    let seed = config.seed.wrapping_add(run as u64);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let network = build_network(config, &mut rng)?;
    let stats = network.stats();
    info!(
        run,
        seed,
        edges = stats.edges,
        mean_out_degree = stats.mean_out_degree,
        isolated = stats.isolated,
        total_liabilities = stats.total_liabilities,
        "network built"
    );

    let plan = TrialPlan {
        trials: config.trials,
        chunk_size: config.chunk_size,
        seed: rng.gen(),
        shock: config.shock,
    };
    let control = match config.deadline_secs {
        Some(secs) => {
            let deadline = start
                .checked_add(Duration::from_secs(secs))
                .ok_or_else(|| invalid(format!("deadline_secs = {secs} is too large")))?;
            control.clone().with_deadline(deadline)
        }
        None => control.clone(),
    };
    control.reset_progress();

    let histogram = with_progress(&control, config.trials, || {
        run_monte_carlo(&network, config.policy, config.cascade, &plan, &control)
    })?;

    let summary = MonteCarloSummary::from_histogram(config.policy, config.institutions, &histogram);
    let elapsed = start.elapsed();
    info!(
        run,
        trials = summary.trials,
        mean_defaults = summary.mean_defaults,
        q99 = summary.q99,
        elapsed_ms = elapsed.as_millis() as u64,
        "run finished"
    );

    Ok(RunResult { run, seed, network: stats, histogram, summary, elapsed })
}

/// Executes every configured run, handing each result to `on_run` before the
/// next one starts. Stops at the first error.
pub fn run_all<F>(config: &SimulationConfig, control: &RunControl, mut on_run: F) -> Result<()>
where
    F: FnMut(RunResult) -> Result<()>,
{
    config.validate()?;
    info!(
        runs = config.runs,
        trials = config.trials,
        institutions = config.institutions,
        policy = ?config.policy,
        cash = config.cash.name(),
        leverage = config.leverage.name(),
        "starting simulation"
    );
    for run in 0..config.runs {
        let result = run_model(config, run, control)?;
        on_run(result)?;
    }
    Ok(())
}

/// Runs `work` while a scoped reporter thread logs trial progress.
fn with_progress<T>(control: &RunControl, total: u64, work: impl FnOnce() -> T) -> T {
    let finished = AtomicBool::new(false);
    thread::scope(|scope| {
        let reporter = scope.spawn(|| loop {
            thread::park_timeout(PROGRESS_INTERVAL);
            if finished.load(Ordering::Relaxed) || control.is_cancelled() {
                break;
            }
            let done = control.completed();
            if done < total {
                info!(completed = done, total, "trials in progress");
            }
        });
        let out = work();
        finished.store(true, Ordering::Relaxed);
        reporter.thread().unpark();
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::{CascadePolicy, ShockConfig};
    use crate::distribution::{Distribution, CASH_EPSILON, MIN_LEVERAGE};
    use crate::error::ContagionError;

    fn small_config() -> SimulationConfig {
        SimulationConfig {
            institutions: 20,
            trials: 2_000,
            chunk_size: 250,
            runs: 2,
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn test_build_network_is_seeded() {
        let config = small_config();
        let a = build_network(&config, &mut ChaCha8Rng::seed_from_u64(5)).unwrap();
        let b = build_network(&config, &mut ChaCha8Rng::seed_from_u64(5)).unwrap();
        assert_eq!(a.matrix(), b.matrix());
    }

    #[test]
    fn test_build_network_respects_clamps() {
        let config = SimulationConfig {
            institutions: 30,
            cash: Distribution::Normal { location: 0.0, scale: 5.0 },
            leverage: Distribution::Beta { alpha: 3.0, beta: 8.0 },
            ..small_config()
        };
        let network = build_network(&config, &mut ChaCha8Rng::seed_from_u64(8)).unwrap();
        for i in 0..network.size() {
            let capital = network.capital(i);
            assert!(capital >= CASH_EPSILON);
            // Beta draws are all below 5, so every liability uses the floor.
            if !network.creditors_of(i).is_empty() {
                assert!((network.owed_by(i) - capital * MIN_LEVERAGE).abs() <= 1e-9 * capital.max(1.0));
            }
        }
    }

    #[test]
    fn test_single_institution_run() {
        let config = SimulationConfig { institutions: 1, ..small_config() };
        let result = run_model(&config, 0, &RunControl::new()).unwrap();
        assert_eq!(result.network.edges, 0);
        assert_eq!(result.histogram.total(), config.trials);
        assert!(result.histogram.max_defaults().unwrap() <= 1);
    }

    #[test]
    fn test_run_model_is_reproducible() {
        let config = SimulationConfig { policy: CascadePolicy::DeterministicRatio, ..small_config() };
        let a = run_model(&config, 1, &RunControl::new()).unwrap();
        let b = run_model(&config, 1, &RunControl::new()).unwrap();
        assert_eq!(a.histogram, b.histogram);
        assert_eq!(a.seed, config.seed + 1);
    }

    #[test]
    fn test_run_all_visits_every_run() {
        let config = SimulationConfig { shock: ShockConfig::disabled(), ..small_config() };
        let mut seen = Vec::new();
        run_all(&config, &RunControl::new(), |result| {
            assert_eq!(result.histogram.total(), config.trials);
            // Without shocks every trial over a network is the same cascade.
            assert_eq!(result.histogram.len(), 1);
            seen.push(result.run);
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![0, 1]);
    }

    #[test]
    fn test_oversized_deadline_is_an_error() {
        let config = SimulationConfig {
            institutions: 3,
            trials: 10,
            deadline_secs: Some(u64::MAX),
            ..small_config()
        };
        assert!(config.validate().is_ok());
        let err = run_model(&config, 0, &RunControl::new()).unwrap_err();
        assert!(matches!(err, ContagionError::InvalidConfig(_)));
    }

    #[test]
    fn test_generous_deadline_completes() {
        let config = SimulationConfig { deadline_secs: Some(3600), ..small_config() };
        let result = run_model(&config, 0, &RunControl::new()).unwrap();
        assert_eq!(result.histogram.total(), config.trials);
    }

    #[test]
    fn test_run_all_rejects_invalid_config() {
        let config = SimulationConfig { trials: 0, ..small_config() };
        assert!(run_all(&config, &RunControl::new(), |_| Ok(())).is_err());
    }
}
