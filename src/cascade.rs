//! Default Cascade Engine
//!
//! Simulates one discrete default cascade over a [`NetworkMatrix`] and reports
//! how many institutions failed, split by cause.
//!
//! ## Cascade Mechanics
//! 1. Reset: every institution is solvent; an optional exogenous shock wipes a
//!    fraction of one institution's capital
//! 2. Ratio check: institutions whose capital is too thin for what they owe
//!    default on their own and seed the cascade
//! 3. Propagation: creditors of defaulted institutions lose their exposure
//!    (less recoveries) and default once their capital is gone
//! 4. Repeat 3 until a round adds nothing
//!
//! ## Policies
//! - `Network`: binary solvent/defaulted states, losses flow only from defaulted
//!   debtors
//! - `DeterministicRatio`: every round recomputes all health ratios at once and
//!   distressed debtors pass on losses in proportion to their lost equity
//!
//! The engine itself draws no random numbers. Trial-to-trial variation comes
//! from the [`Shock`] handed to `reset`.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::network::NetworkMatrix;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadePolicy {
    Network,
    DeterministicRatio,
}

impl CascadePolicy {
    pub fn all() -> Vec<Self> {
        vec![Self::Network, Self::DeterministicRatio]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Network => "Network (binary defaults)",
            Self::DeterministicRatio => "Deterministic Ratio (health ratios)",
        }
    }
}

impl std::str::FromStr for CascadePolicy {
    type Err = crate::error::ContagionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "network" => Ok(Self::Network),
            "deterministic_ratio" => Ok(Self::DeterministicRatio),
            other => Err(crate::error::invalid(format!(
                "unknown cascade policy '{other}' (expected network or deterministic_ratio)"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeParams {
    /// Capital / interbank liabilities below this is a ratio default. At the
    /// default of 1 an institution fails when it owes more than it holds.
    pub min_capital_ratio: f64,
    /// Fraction of a defaulted debtor's liability its creditors get back.
    pub recovery_rate: f64,
    /// Round cap for the deterministic-ratio iteration.
    pub max_rounds: usize,
    /// Convergence tolerance on health ratios.
    pub tolerance: f64,
}

impl Default for CascadeParams {
    fn default() -> Self {
        Self {
            min_capital_ratio: 1.0,
            recovery_rate: 0.0,
            max_rounds: 1000,
            tolerance: 1e-9,
        }
    }
}

/// Exogenous capital loss applied to one institution at the start of a trial.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Shock {
    pub institution: usize,
    pub loss_fraction: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShockConfig {
    /// Shock sizes are uniform on `[0, max_loss_fraction)`. Zero disables shocks.
    pub max_loss_fraction: f64,
}

impl Default for ShockConfig {
    fn default() -> Self {
        Self { max_loss_fraction: 1.0 }
    }
}

impl ShockConfig {
    pub fn disabled() -> Self {
        Self { max_loss_fraction: 0.0 }
    }

    /// Picks a uniformly random institution and shock size.
    pub fn draw(&self, institutions: usize, rng: &mut impl Rng) -> Option<Shock> {
        if institutions == 0 || self.max_loss_fraction <= 0.0 {
            return None;
        }
        Some(Shock {
            institution: rng.gen_range(0..institutions),
            loss_fraction: rng.gen_range(0.0..self.max_loss_fraction.min(1.0)),
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrialOutcome {
    pub cascade_defaults: usize,
    pub ratio_defaults: usize,
}

impl TrialOutcome {
    pub fn total(&self) -> usize {
        self.cascade_defaults + self.ratio_defaults
    }
}

/// One cascade trial: `reset`, then `step` to the fixed point.
pub trait CascadeModel {
    /// Clears all trial state and applies `shock` to the fresh capital copy.
    fn reset(&mut self, shock: Option<Shock>);

    /// Runs the cascade to its fixed point.
    fn step(&mut self) -> TrialOutcome;

    /// Propagation rounds used by the last `step`.
    fn rounds(&self) -> usize;
}

/// Post-shock capital and the ratio-default seeds shared by both policies.
fn initial_state(
    network: &NetworkMatrix,
    params: &CascadeParams,
    shock: Option<Shock>,
    capital: &mut Vec<f64>,
    ratio_defaulted: &mut Vec<bool>,
) {
    let n = network.size();
    capital.clear();
    capital.extend((0..n).map(|i| network.capital(i)));
    if let Some(shock) = shock {
        if shock.institution < n {
            capital[shock.institution] *= 1.0 - shock.loss_fraction.clamp(0.0, 1.0);
        }
    }

    ratio_defaulted.clear();
    ratio_defaulted.extend((0..n).map(|i| {
        let owed = network.owed_by(i);
        capital[i] <= 0.0 || (owed > 0.0 && capital[i] / owed < params.min_capital_ratio)
    }));
}

/// Binary-state cascade: an institution is either solvent or defaulted.
pub struct NetworkCascade<'a> {
    network: &'a NetworkMatrix,
    params: CascadeParams,
    capital: Vec<f64>,
    ratio_defaulted: Vec<bool>,
    defaulted: Vec<bool>,
    /// Defaulted count after each round, starting with the ratio seeds.
    history: Vec<usize>,
    finished: Option<TrialOutcome>,
}

impl<'a> NetworkCascade<'a> {
    pub fn new(network: &'a NetworkMatrix, params: CascadeParams) -> Self {
        let mut model = Self {
            network,
            params,
            capital: Vec::with_capacity(network.size()),
            ratio_defaulted: Vec::with_capacity(network.size()),
            defaulted: Vec::with_capacity(network.size()),
            history: Vec::new(),
            finished: None,
        };
        model.reset(None);
        model
    }

    pub fn defaulted(&self) -> &[bool] {
        &self.defaulted
    }

    pub fn history(&self) -> &[usize] {
        &self.history
    }
}

impl CascadeModel for NetworkCascade<'_> {
    fn reset(&mut self, shock: Option<Shock>) {
        initial_state(self.network, &self.params, shock, &mut self.capital, &mut self.ratio_defaulted);
        self.defaulted.clear();
        self.defaulted.extend_from_slice(&self.ratio_defaulted);
        self.history.clear();
        self.finished = None;
    }

    fn step(&mut self) -> TrialOutcome {
        if let Some(outcome) = self.finished {
            return outcome;
        }
        let n = self.network.size();
        let loss_given_default = 1.0 - self.params.recovery_rate;
        let ratio_defaults = self.ratio_defaulted.iter().filter(|&&d| d).count();

        let mut frontier: Vec<usize> = (0..n).filter(|&i| self.defaulted[i]).collect();
        let mut defaulted_count = frontier.len();
        let mut cascade_defaults = 0;
        self.history.push(defaulted_count);

        while !frontier.is_empty() && defaulted_count < n {
            for &debtor in &frontier {
                for &(creditor, exposure) in self.network.creditors_of(debtor) {
                    if !self.defaulted[creditor] {
                        self.capital[creditor] -= exposure * loss_given_default;
                    }
                }
            }

            let newly: Vec<usize> = (0..n)
                .filter(|&i| !self.defaulted[i] && self.capital[i] <= 0.0)
                .collect();
            for &i in &newly {
                self.defaulted[i] = true;
            }
            cascade_defaults += newly.len();
            defaulted_count += newly.len();
            self.history.push(defaulted_count);
            frontier = newly;
        }

        let outcome = TrialOutcome { cascade_defaults, ratio_defaults };
        self.finished = Some(outcome);
        outcome
    }

    fn rounds(&self) -> usize {
        self.history.len().saturating_sub(1)
    }
}

/// Health-ratio cascade: every institution carries `h` in `[0, 1]`, the
/// fraction of its pre-shock equity left. Debtors pass on `exposure * (1 - h)`
/// losses whether or not they have fully defaulted, so a shock is felt by
/// creditors even when it topples nobody.
pub struct DeterministicRatioCascade<'a> {
    network: &'a NetworkMatrix,
    params: CascadeParams,
    capital: Vec<f64>,
    ratio_defaulted: Vec<bool>,
    health: Vec<f64>,
    next: Vec<f64>,
    rounds: usize,
    finished: Option<TrialOutcome>,
}

impl<'a> DeterministicRatioCascade<'a> {
    pub fn new(network: &'a NetworkMatrix, params: CascadeParams) -> Self {
        let mut model = Self {
            network,
            params,
            capital: Vec::with_capacity(network.size()),
            ratio_defaulted: Vec::with_capacity(network.size()),
            health: Vec::with_capacity(network.size()),
            next: Vec::with_capacity(network.size()),
            rounds: 0,
            finished: None,
        };
        model.reset(None);
        model
    }

    pub fn health(&self) -> &[f64] {
        &self.health
    }
}

impl CascadeModel for DeterministicRatioCascade<'_> {
    fn reset(&mut self, shock: Option<Shock>) {
        initial_state(self.network, &self.params, shock, &mut self.capital, &mut self.ratio_defaulted);
        let network = self.network;
        self.health.clear();
        self.health.extend(self.capital.iter().enumerate().map(|(i, &c)| {
            if self.ratio_defaulted[i] {
                0.0
            } else {
                (c / network.capital(i)).clamp(0.0, 1.0)
            }
        }));
        self.rounds = 0;
        self.finished = None;
    }

    fn step(&mut self) -> TrialOutcome {
        if let Some(outcome) = self.finished {
            return outcome;
        }
        let n = self.network.size();
        let loss_given_default = 1.0 - self.params.recovery_rate;

        while self.rounds < self.params.max_rounds {
            self.next.clear();
            for j in 0..n {
                if self.ratio_defaulted[j] {
                    self.next.push(0.0);
                    continue;
                }
                let loss: f64 = self
                    .network
                    .debtors_of(j)
                    .iter()
                    .map(|&(i, exposure)| exposure * loss_given_default * (1.0 - self.health[i]))
                    .sum();
                let h = ((self.capital[j] - loss) / self.network.capital(j)).clamp(0.0, 1.0);
                // Losses only accumulate, so health never recovers within a trial.
                self.next.push(h.min(self.health[j]));
            }
            self.rounds += 1;

            let change = self
                .health
                .iter()
                .zip(&self.next)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0_f64, f64::max);
            std::mem::swap(&mut self.health, &mut self.next);
            if change <= self.params.tolerance {
                break;
            }
        }

        let ratio_defaults = self.ratio_defaulted.iter().filter(|&&d| d).count();
        let cascade_defaults = (0..n)
            .filter(|&i| !self.ratio_defaulted[i] && self.health[i] <= 0.0)
            .count();
        let outcome = TrialOutcome { cascade_defaults, ratio_defaults };
        self.finished = Some(outcome);
        outcome
    }

    fn rounds(&self) -> usize {
        self.rounds
    }
}

/// Either policy behind one type, chosen once per run.
pub enum CascadeEngine<'a> {
    Network(NetworkCascade<'a>),
    DeterministicRatio(DeterministicRatioCascade<'a>),
}

impl<'a> CascadeEngine<'a> {
    pub fn new(policy: CascadePolicy, network: &'a NetworkMatrix, params: CascadeParams) -> Self {
        match policy {
            CascadePolicy::Network => Self::Network(NetworkCascade::new(network, params)),
            CascadePolicy::DeterministicRatio => {
                Self::DeterministicRatio(DeterministicRatioCascade::new(network, params))
            }
        }
    }
}

impl CascadeModel for CascadeEngine<'_> {
    fn reset(&mut self, shock: Option<Shock>) {
        match self {
            Self::Network(m) => m.reset(shock),
            Self::DeterministicRatio(m) => m.reset(shock),
        }
    }

    fn step(&mut self) -> TrialOutcome {
        match self {
            Self::Network(m) => m.step(),
            Self::DeterministicRatio(m) => m.step(),
        }
    }

    fn rounds(&self) -> usize {
        match self {
            Self::Network(m) => m.rounds(),
            Self::DeterministicRatio(m) => m.rounds(),
        }
    }
}
