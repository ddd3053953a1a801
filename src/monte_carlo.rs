//! Monte Carlo Cascade Sizes
//!
//! Repeats cascade trials over one fixed network and tallies how many
//! institutions defaulted in each.
//!
//! ## Execution
//! - Trials are split into fixed-size chunks run in parallel with rayon
//! - Each chunk owns its engine and a ChaCha8 stream keyed by the chunk index,
//!   so a given seed yields the same histogram on any number of threads
//! - Chunk histograms are merged once at the end
//!
//! ## Metrics
//! - Mean defaults per trial
//! - 95% / 99% quantiles of the cascade size
//! - Systemic event probability (at least half the network defaults)

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cascade::{CascadeEngine, CascadeModel, CascadeParams, CascadePolicy, ShockConfig};
use crate::error::{ContagionError, Result};
use crate::network::NetworkMatrix;

/// How often the deadline is consulted inside a chunk.
const DEADLINE_CHECK_INTERVAL: u64 = 1024;

/// Total defaults -> number of trials with that many.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Histogram {
    counts: BTreeMap<usize, u64>,
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, defaults: usize) {
        *self.counts.entry(defaults).or_insert(0) += 1;
    }

    pub fn get(&self, defaults: usize) -> u64 {
        self.counts.get(&defaults).copied().unwrap_or(0)
    }

    pub fn merge(&mut self, other: &Histogram) {
        for (&k, &v) in &other.counts {
            *self.counts.entry(k).or_insert(0) += v;
        }
    }

    pub fn merged(mut self, other: Histogram) -> Self {
        self.merge(&other);
        self
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.counts.iter().map(|(&k, &v)| (k, v))
    }

    pub fn max_defaults(&self) -> Option<usize> {
        self.counts.keys().next_back().copied()
    }

    pub fn mean(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let weighted: f64 = self.iter().map(|(k, v)| k as f64 * v as f64).sum();
        weighted / total as f64
    }

    /// Smallest cascade size whose cumulative frequency reaches `p`.
    pub fn quantile(&self, p: f64) -> usize {
        let total = self.total();
        if total == 0 {
            return 0;
        }
        let target = ((total as f64) * p.clamp(0.0, 1.0)).ceil().max(1.0) as u64;
        let mut seen = 0;
        for (k, v) in self.iter() {
            seen += v;
            if seen >= target {
                return k;
            }
        }
        self.max_defaults().unwrap_or(0)
    }

    /// Fraction of trials with at least `threshold` defaults.
    pub fn tail_probability(&self, threshold: usize) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let tail: u64 = self.counts.range(threshold..).map(|(_, &v)| v).sum();
        tail as f64 / total as f64
    }
}

/// Trial-loop parameters for one run.
#[derive(Clone, Debug)]
pub struct TrialPlan {
    pub trials: u64,
    pub chunk_size: u64,
    pub seed: u64,
    pub shock: ShockConfig,
}

impl TrialPlan {
    fn chunks(&self) -> u64 {
        self.trials.div_ceil(self.chunk_size.max(1))
    }
}

/// Cancellation and progress shared with whoever launched the run.
#[derive(Clone, Debug, Default)]
pub struct RunControl {
    cancel: Arc<AtomicBool>,
    completed: Arc<AtomicU64>,
    deadline: Option<Instant>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn past_deadline(&self) -> bool {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.cancel();
                true
            }
            _ => false,
        }
    }

    /// Trials finished so far in the current run. Advisory.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn reset_progress(&self) {
        self.completed.store(0, Ordering::Relaxed);
    }

    fn add_completed(&self, n: u64) {
        self.completed.fetch_add(n, Ordering::Relaxed);
    }
}

/// Runs `plan.trials` trials with engines built by `make_model`.
///
/// Every trial resets its chunk's engine with a freshly drawn shock before
/// stepping, so no trial sees another's state.
pub fn run_trials<'n, M, F>(
    network: &'n NetworkMatrix,
    plan: &TrialPlan,
    control: &RunControl,
    make_model: F,
) -> Result<Histogram>
where
    M: CascadeModel,
    F: Fn(&'n NetworkMatrix) -> M + Sync,
{
    let n = network.size();
    let chunk_size = plan.chunk_size.max(1);

    let histogram = (0..plan.chunks())
        .into_par_iter()
        .map(|chunk| {
            let start = chunk * chunk_size;
            let len = chunk_size.min(plan.trials - start);

            let mut rng = ChaCha8Rng::seed_from_u64(plan.seed);
            rng.set_stream(chunk);
            let mut model = make_model(network);
            let mut local = Histogram::new();

            for t in 0..len {
                if control.is_cancelled()
                    || (t % DEADLINE_CHECK_INTERVAL == 0 && control.past_deadline())
                {
                    control.add_completed(t);
                    return Err(ContagionError::Cancelled {
                        completed: control.completed(),
                        requested: plan.trials,
                    });
                }
                model.reset(plan.shock.draw(n, &mut rng));
                local.record(model.step().total());
            }

            control.add_completed(len);
            debug!(chunk, trials = len, completed = control.completed(), "chunk finished");
            Ok(local)
        })
        .try_reduce(Histogram::new, |a, b| Ok(a.merged(b)));

    if let Err(ContagionError::Cancelled { completed, requested }) = &histogram {
        warn!(completed, requested, "monte carlo run cancelled");
    }
    histogram
}

/// Runs the trial loop with the engine for `policy`.
pub fn run_monte_carlo(
    network: &NetworkMatrix,
    policy: CascadePolicy,
    params: CascadeParams,
    plan: &TrialPlan,
    control: &RunControl,
) -> Result<Histogram> {
    run_trials(network, plan, control, |net| CascadeEngine::new(policy, net, params))
}

#[derive(Debug, Clone, Serialize)]
pub struct MonteCarloSummary {
    pub policy: CascadePolicy,
    pub institutions: usize,
    pub trials: u64,
    pub mean_defaults: f64,
    pub q95: usize,
    pub q99: usize,
    pub max_defaults: usize,
    pub no_default_probability: f64,
    pub systemic_probability: f64,
}

impl MonteCarloSummary {
    pub fn from_histogram(policy: CascadePolicy, institutions: usize, histogram: &Histogram) -> Self {
        let total = histogram.total();
        Self {
            policy,
            institutions,
            trials: total,
            mean_defaults: histogram.mean(),
            q95: histogram.quantile(0.95),
            q99: histogram.quantile(0.99),
            max_defaults: histogram.max_defaults().unwrap_or(0),
            no_default_probability: if total > 0 {
                histogram.get(0) as f64 / total as f64
            } else {
                0.0
            },
            systemic_probability: histogram.tail_probability(institutions.div_ceil(2).max(1)),
        }
    }

    pub fn print(&self) {
        println!("  Trials:                  {}", self.trials);
        println!("  Mean defaults:           {:.2}", self.mean_defaults);
        println!("  95% quantile:            {}", self.q95);
        println!("  99% quantile:            {}", self.q99);
        println!("  Max defaults:            {}", self.max_defaults);
        println!("  P(no default):           {:.2}%", self.no_default_probability * 100.0);
        println!("  P(systemic, >= 50%):     {:.4}%", self.systemic_probability * 100.0);
    }
}
