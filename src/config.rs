//! Run configuration.
//!
//! Loaded once (defaults, then an optional JSON file, then `--key=value`
//! overrides) and passed by reference afterwards.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cascade::{CascadeParams, CascadePolicy, ShockConfig};
use crate::distribution::{Distribution, VectorRole};
use crate::error::{invalid, ContagionError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    pub institutions: usize,
    pub cash: Distribution,
    pub leverage: Distribution,
    /// Trials per run.
    pub trials: u64,
    pub runs: usize,
    pub policy: CascadePolicy,
    /// Run `r` uses `seed + r`.
    pub seed: u64,
    pub cascade: CascadeParams,
    pub shock: ShockConfig,
    /// Trials per parallel work unit.
    pub chunk_size: u64,
    pub out_dir: PathBuf,
    /// Wall-clock budget per run, in seconds.
    pub deadline_secs: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            institutions: 100,
            cash: Distribution::Poisson { lambda: 3.0 },
            leverage: Distribution::Poisson { lambda: 3.0 },
            trials: 1_000_000,
            runs: 1,
            policy: CascadePolicy::Network,
            seed: 1,
            cascade: CascadeParams::default(),
            shock: ShockConfig::default(),
            chunk_size: 10_000,
            out_dir: PathBuf::from("results"),
            deadline_secs: None,
        }
    }
}

impl SimulationConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|source| ContagionError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| invalid(format!("config JSON: {e}")))
    }

    /// Builds a config from command-line arguments: `--config=PATH` is applied
    /// first, every other `--key=value` overrides it.
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut cfg = Self::default();
        for arg in args {
            if let Some(path) = arg.strip_prefix("--config=") {
                cfg = Self::from_json_file(Path::new(path))?;
            }
        }
        cfg.apply_overrides(args)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_overrides(&mut self, args: &[String]) -> Result<()> {
        for arg in args {
            let rest = arg
                .strip_prefix("--")
                .ok_or_else(|| invalid(format!("unexpected argument '{arg}'")))?;
            let (key, val) = rest
                .split_once('=')
                .ok_or_else(|| invalid(format!("expected --key=value, got '{arg}'")))?;
            match key {
                "config" => {}
                "institutions" => self.institutions = parse(key, val)?,
                "trials" => self.trials = parse(key, val)?,
                "runs" => self.runs = parse(key, val)?,
                "seed" => self.seed = parse(key, val)?,
                "policy" => self.policy = val.parse()?,
                "cash" => self.cash = Distribution::family_default(val, VectorRole::Cash)?,
                "leverage" => {
                    self.leverage = Distribution::family_default(val, VectorRole::Leverage)?
                }
                "min_ratio" => self.cascade.min_capital_ratio = parse(key, val)?,
                "recovery" => self.cascade.recovery_rate = parse(key, val)?,
                "max_rounds" => self.cascade.max_rounds = parse(key, val)?,
                "max_shock" => self.shock.max_loss_fraction = parse(key, val)?,
                "chunk" => self.chunk_size = parse(key, val)?,
                "out" => self.out_dir = PathBuf::from(val),
                "deadline_secs" => self.deadline_secs = Some(parse(key, val)?),
                _ => return Err(invalid(format!("unknown option --{key}"))),
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.institutions == 0 {
            return Err(invalid("institutions must be at least 1"));
        }
        if self.trials == 0 {
            return Err(invalid("trials must be at least 1"));
        }
        if self.runs == 0 {
            return Err(invalid("runs must be at least 1"));
        }
        if self.chunk_size == 0 {
            return Err(invalid("chunk_size must be at least 1"));
        }
        check_unit("cascade.min_capital_ratio", self.cascade.min_capital_ratio, 1.0)?;
        check_unit("cascade.recovery_rate", self.cascade.recovery_rate, 1.0)?;
        check_unit("shock.max_loss_fraction", self.shock.max_loss_fraction, 1.0)?;
        if self.cascade.tolerance.is_nan() || self.cascade.tolerance <= 0.0 {
            return Err(invalid("cascade.tolerance must be positive"));
        }
        if self.cascade.max_rounds == 0 {
            return Err(invalid("cascade.max_rounds must be at least 1"));
        }
        self.cash.validate()?;
        self.leverage.validate()?;
        Ok(())
    }
}

fn parse<T: FromStr>(key: &str, val: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    val.parse()
        .map_err(|e| invalid(format!("bad value '{val}' for --{key}: {e}")))
}

fn check_unit(name: &str, value: f64, max: f64) -> Result<()> {
    if value.is_nan() || value < 0.0 || value > max {
        return Err(invalid(format!("{name} = {value} is out of range")));
    }
    Ok(())
}

/// Option reference printed by the binaries on `--help`.
pub fn usage() -> String {
    let options = [
        ("--config=PATH", "Load config from JSON file"),
        ("--institutions=N", "Institutions per network (default: 100)"),
        ("--trials=N", "Cascade trials per run (default: 1000000)"),
        ("--runs=N", "Independent networks to sample (default: 1)"),
        ("--seed=N", "Base seed; run r uses seed + r (default: 1)"),
        ("--policy=NAME", "network | deterministic_ratio (default: network)"),
        ("--cash=FAMILY", "Cash distribution family (default: poisson)"),
        ("--leverage=FAMILY", "Leverage distribution family (default: poisson)"),
        ("--min_ratio=X", "Capital/liabilities default threshold (default: 1.0)"),
        ("--recovery=X", "Recovery rate on defaulted claims (default: 0)"),
        ("--max_rounds=N", "Round cap for deterministic_ratio (default: 1000)"),
        ("--max_shock=X", "Largest per-trial capital shock (default: 1.0)"),
        ("--chunk=N", "Trials per parallel work unit (default: 10000)"),
        ("--out=DIR", "Output directory (default: results)"),
        ("--deadline_secs=N", "Cancel a run after N seconds"),
    ];
    let mut text = String::from("Options (--key=value):\n");
    for (flag, help) in options {
        text.push_str(&format!("  {flag:<20} {help}\n"));
    }
    text.push_str(&format!("\nFamilies: {}\n", Distribution::families().join(", ")));
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults_are_valid() {
        let cfg = SimulationConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.institutions, 100);
        assert_eq!(cfg.trials, 1_000_000);
    }

    #[test]
    fn test_overrides() {
        let cfg = SimulationConfig::from_args(&args(&[
            "--runs=3",
            "--trials=5000",
            "--policy=deterministic_ratio",
            "--cash=gamma",
            "--leverage=normal",
            "--min_ratio=0.05",
            "--out=/tmp/out",
        ]))
        .unwrap();
        assert_eq!(cfg.runs, 3);
        assert_eq!(cfg.trials, 5000);
        assert_eq!(cfg.policy, CascadePolicy::DeterministicRatio);
        assert_eq!(cfg.cash, Distribution::Gamma { shape: 2.0, scale: 1.0 });
        assert_eq!(cfg.leverage, Distribution::Normal { location: 10.0, scale: 2.0 });
        assert_eq!(cfg.cascade.min_capital_ratio, 0.05);
        assert_eq!(cfg.out_dir, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn test_unknown_inputs_fail_closed() {
        assert!(SimulationConfig::from_args(&args(&["--cash=uniform"])).is_err());
        assert!(SimulationConfig::from_args(&args(&["--policy=debtrank"])).is_err());
        assert!(SimulationConfig::from_args(&args(&["--bogus=1"])).is_err());
        assert!(SimulationConfig::from_args(&args(&["--trials=lots"])).is_err());
        assert!(SimulationConfig::from_args(&args(&["trials"])).is_err());
    }

    #[test]
    fn test_validation_rejects_out_of_range() {
        let mut cfg = SimulationConfig::default();
        cfg.cascade.recovery_rate = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = SimulationConfig::default();
        cfg.cascade.min_capital_ratio = 1.5;
        assert!(cfg.validate().is_err());
        cfg.cascade.min_capital_ratio = 1.0;
        assert!(cfg.validate().is_ok());

        let mut cfg = SimulationConfig::default();
        cfg.institutions = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = SimulationConfig::default();
        cfg.cash = Distribution::Beta { alpha: 0.0, beta: 1.0 };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_json_config() {
        let cfg = SimulationConfig::from_json_str(
            r#"{
                "institutions": 50,
                "cash": {"kind": "lognormal", "mean": 1.0, "sigma": 0.5},
                "policy": "deterministic_ratio",
                "cascade": {"recovery_rate": 0.4}
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.institutions, 50);
        assert_eq!(cfg.cash, Distribution::LogNormal { mean: 1.0, sigma: 0.5 });
        assert_eq!(cfg.leverage, Distribution::Poisson { lambda: 3.0 });
        assert_eq!(cfg.cascade.recovery_rate, 0.4);
        assert_eq!(cfg.cascade.min_capital_ratio, 1.0);

        assert!(SimulationConfig::from_json_str(r#"{"cash": {"kind": "uniform"}}"#).is_err());
        assert!(SimulationConfig::from_json_str(r#"{"sims": 3}"#).is_err());
    }

    #[test]
    fn test_usage_lists_every_family() {
        let text = usage();
        for family in Distribution::families() {
            assert!(text.contains(family));
        }
        assert!(text.contains("--deadline_secs=N"));
    }

    #[test]
    fn test_missing_config_file() {
        let err = SimulationConfig::from_args(&args(&["--config=/nonexistent/contagion.json"]))
            .unwrap_err();
        assert!(matches!(err, ContagionError::ConfigRead { .. }));
    }
}
