//! Financial Contagion Simulation Library
//!
//! Monte Carlo estimation of default-cascade sizes on random interbank
//! liability networks whose density and exposures follow each institution's
//! cash and leverage.
//!
//! ## Modules
//!
//! - `distribution`: parametric cash / leverage sampling
//! - `network`: connectivity, random link formation and the liability matrix
//! - `cascade`: default propagation (network-only and deterministic-ratio)
//! - `monte_carlo`: parallel trial loop and default-count histograms
//! - `simulation`: one run end to end, repeated per configured run
//! - `persist`: per-run JSON histogram files
//! - `config` / `error`: run configuration and the crate error type
//!
//! ## Usage
//!
//! ```bash
//! # Full sweep, one histogram file per run
//! cargo run --bin monte_carlo --release -- --runs=10 --trials=100000
//!
//! # Both cascade policies on the same sampled network
//! cargo run --bin cascade --release -- --cash=lognormal
//! ```

pub mod cascade;
pub mod config;
pub mod distribution;
pub mod error;
pub mod monte_carlo;
pub mod network;
pub mod persist;
pub mod simulation;

pub use error::{ContagionError, Result};
