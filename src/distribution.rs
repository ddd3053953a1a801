//! Parametric sampling of cash and leverage vectors.
//!
//! Each family carries its own shape parameters, so a configuration can only
//! name a distribution that actually exists. Unknown families are rejected when
//! the configuration is parsed rather than silently replaced.

use std::fmt;

use rand::Rng;
use rand_distr::{Beta, ChiSquared, Distribution as _, FisherF, Gamma, LogNormal, Normal, Poisson};
use serde::{Deserialize, Serialize};

use crate::error::{invalid, Result};

/// Entries of the cash vector at or below zero are replaced with this.
pub const CASH_EPSILON: f64 = 1e-10;
/// Leverage draws are floored here.
pub const MIN_LEVERAGE: f64 = 5.0;

/// Which vector a distribution feeds. Only used for labelling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VectorRole {
    Cash,
    Leverage,
}

impl fmt::Display for VectorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cash => f.write_str("Cash"),
            Self::Leverage => f.write_str("Leverage"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Distribution {
    Beta { alpha: f64, beta: f64 },
    ChiSquare { df: f64 },
    F { dfnum: f64, dfden: f64 },
    Gamma { shape: f64, scale: f64 },
    LogNormal { mean: f64, sigma: f64 },
    Normal { location: f64, scale: f64 },
    Poisson { lambda: f64 },
}

impl Distribution {
    pub fn families() -> &'static [&'static str] {
        &["beta", "chisquare", "f", "gamma", "lognormal", "normal", "poisson"]
    }

    /// Default parameters for a family, looked up by its configuration name.
    pub fn family_default(name: &str, role: VectorRole) -> Result<Self> {
        let dist = match name.to_ascii_lowercase().as_str() {
            "beta" => Self::Beta { alpha: 3.0, beta: 8.0 },
            "chisquare" => Self::ChiSquare { df: 10.0 },
            "f" => Self::F { dfnum: 12.0, dfden: 12.0 },
            "gamma" => Self::Gamma { shape: 2.0, scale: 1.0 },
            "lognormal" => Self::LogNormal { mean: 0.0, sigma: 1.0 },
            "normal" => match role {
                VectorRole::Cash => Self::Normal { location: 10_000.0, scale: 10_000.0 },
                VectorRole::Leverage => Self::Normal { location: 10.0, scale: 2.0 },
            },
            "poisson" => Self::Poisson { lambda: 3.0 },
            other => {
                return Err(invalid(format!(
                    "unknown distribution '{}' (expected one of: {})",
                    other,
                    Self::families().join(", ")
                )))
            }
        };
        Ok(dist)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Beta { .. } => "beta",
            Self::ChiSquare { .. } => "chisquare",
            Self::F { .. } => "f",
            Self::Gamma { .. } => "gamma",
            Self::LogNormal { .. } => "lognormal",
            Self::Normal { .. } => "normal",
            Self::Poisson { .. } => "poisson",
        }
    }

    /// File-name fragment recording the family and its parameters,
    /// e.g. `BetaCash_Alpha3Beta8_`.
    pub fn label(&self, role: VectorRole) -> String {
        match self {
            Self::Beta { alpha, beta } => format!("Beta{role}_Alpha{alpha}Beta{beta}_"),
            Self::ChiSquare { df } => format!("Chisquare{role}_Df{df}_"),
            Self::F { dfnum, dfden } => format!("f{role}_Dfnum{dfnum}Dfden{dfden}_"),
            Self::Gamma { shape, scale } => format!("Gamma{role}_Shape{shape}Scale{scale}_"),
            Self::LogNormal { mean, sigma } => format!("Lognormal{role}_Mean{mean}Sigma{sigma}_"),
            Self::Normal { location, scale } => {
                format!("Normal{role}_location{location}Scale{scale}_")
            }
            Self::Poisson { lambda } => format!("Poisson{role}_Lambda{lambda}_"),
        }
    }

    /// Draws `n` independent values.
    pub fn sample(&self, n: usize, rng: &mut impl Rng) -> Result<Vec<f64>> {
        let values = match *self {
            Self::Beta { alpha, beta } => {
                let d = Beta::new(alpha, beta).map_err(|e| bad_params(self, e))?;
                draw(&d, n, rng)
            }
            Self::ChiSquare { df } => {
                let d = ChiSquared::new(df).map_err(|e| bad_params(self, e))?;
                draw(&d, n, rng)
            }
            Self::F { dfnum, dfden } => {
                let d = FisherF::new(dfnum, dfden).map_err(|e| bad_params(self, e))?;
                draw(&d, n, rng)
            }
            Self::Gamma { shape, scale } => {
                let d = Gamma::new(shape, scale).map_err(|e| bad_params(self, e))?;
                draw(&d, n, rng)
            }
            Self::LogNormal { mean, sigma } => {
                let d = LogNormal::new(mean, sigma).map_err(|e| bad_params(self, e))?;
                draw(&d, n, rng)
            }
            Self::Normal { location, scale } => {
                let d = Normal::new(location, scale).map_err(|e| bad_params(self, e))?;
                draw(&d, n, rng)
            }
            Self::Poisson { lambda } => {
                let d = Poisson::new(lambda).map_err(|e| bad_params(self, e))?;
                draw(&d, n, rng)
            }
        };
        Ok(values)
    }

    /// Checks the parameters without consuming randomness.
    pub fn validate(&self) -> Result<()> {
        let mut rng = rand::rngs::mock::StepRng::new(0, 0);
        self.sample(0, &mut rng).map(|_| ())
    }
}

fn draw<D: rand_distr::Distribution<f64>>(d: &D, n: usize, rng: &mut impl Rng) -> Vec<f64> {
    (0..n).map(|_| d.sample(rng)).collect()
}

fn bad_params(dist: &Distribution, err: impl fmt::Display) -> crate::error::ContagionError {
    invalid(format!("invalid parameters for {} distribution: {}", dist.name(), err))
}

/// Replaces non-positive cash with [`CASH_EPSILON`]. Returns how many entries changed.
pub fn clamp_cash(cash: &mut [f64]) -> usize {
    let mut clamped = 0;
    for c in cash.iter_mut() {
        if c.is_nan() || *c <= 0.0 {
            *c = CASH_EPSILON;
            clamped += 1;
        }
    }
    clamped
}

/// Floors leverage at [`MIN_LEVERAGE`]. Returns how many entries changed.
pub fn clamp_leverage(leverage: &mut [f64]) -> usize {
    let mut clamped = 0;
    for l in leverage.iter_mut() {
        if l.is_nan() || *l < MIN_LEVERAGE {
            *l = MIN_LEVERAGE;
            clamped += 1;
        }
    }
    clamped
}
