//! Histogram persistence.
//!
//! One JSON object per run, `{"<defaults>": <count>, ...}`, in a file whose
//! name records both distributions, their parameters and the time it was
//! written.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};

use crate::config::SimulationConfig;
use crate::distribution::VectorRole;
use crate::error::{ContagionError, Result};
use crate::monte_carlo::Histogram;

pub const TIMESTAMP_FORMAT: &str = "%d_%m_%y_%H%M%S";

/// `written` is the time the histogram is persisted, after its run finishes.
pub fn run_file_name<Tz>(config: &SimulationConfig, written: &DateTime<Tz>, run: usize) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!(
        "result_{}{}{}_run{}.json",
        config.cash.label(VectorRole::Cash),
        config.leverage.label(VectorRole::Leverage),
        written.format(TIMESTAMP_FORMAT),
        run,
    )
}

/// Writes `histogram` to `dir/name`, creating `dir` if needed.
pub fn write_histogram(dir: &Path, name: &str, histogram: &Histogram) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|source| ContagionError::Persist {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = dir.join(name);
    let json = serde_json::to_string(histogram)?;
    fs::write(&path, json).map_err(|source| ContagionError::Persist {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

pub fn read_histogram(path: &Path) -> Result<Histogram> {
    let json = fs::read_to_string(path).map_err(|source| ContagionError::Persist {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&json)?)
}
