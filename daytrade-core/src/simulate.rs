//! Sequential backtest simulation.
//!
//! Each day in `start..=end` the policy picks a ticker, the portfolio is
//! fully invested in it until the next day, and its value compounds by the
//! pick's forward return `label_{pick}_pdiff_1f[day]`.
//!
//! NaN forward returns are not errors: they make the value NaN from that
//! step on. Use [`usable_day_range`] to stay clear of the panel edges.

use crate::labels::forward_return_name;
use crate::panel::Panel;
use crate::policy::Policy;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq)]
pub enum SimulationError {
    #[error("start day {start} is after end day {end}")]
    InvertedRange { start: usize, end: usize },

    #[error("end day {end} is outside a panel of {height} rows")]
    EndOutOfRange { end: usize, height: usize },

    #[error("policy picked '{ticker}' on day {day} but '{column}' is not in the panel")]
    MissingForwardReturn {
        ticker: String,
        column: String,
        day: usize,
    },
}

/// Value path of one simulation.
///
/// `values[0]` is the initial value; `values[k + 1]` is the value after
/// holding `picks[k]` for one day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub start: usize,
    pub values: Vec<f64>,
    pub picks: Vec<String>,
}

impl Trajectory {
    pub fn final_value(&self) -> f64 {
        self.values.last().copied().unwrap_or(f64::NAN)
    }

    /// Number of simulated days.
    pub fn len(&self) -> usize {
        self.picks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.picks.is_empty()
    }

    /// Per-step returns in percent, in pick order.
    pub fn step_returns_pct(&self) -> Vec<f64> {
        self.values
            .windows(2)
            .map(|w| 100.0 * (w[1] - w[0]) / w[0])
            .collect()
    }
}

fn check_range(panel: &Panel, start: usize, end: usize) -> Result<(), SimulationError> {
    if start > end {
        return Err(SimulationError::InvertedRange { start, end });
    }
    if end >= panel.height() {
        return Err(SimulationError::EndOutOfRange {
            end,
            height: panel.height(),
        });
    }
    Ok(())
}

/// Drive `policy` over days `start..=end` and record every pick and value.
pub fn simulate(
    panel: &Panel,
    start: usize,
    end: usize,
    policy: &mut dyn Policy,
    initial_value: f64,
) -> Result<Trajectory, SimulationError> {
    check_range(panel, start, end)?;

    let days = end - start + 1;
    let mut values = Vec::with_capacity(days + 1);
    let mut picks = Vec::with_capacity(days);
    values.push(initial_value);

    let mut value = initial_value;
    for day in start..=end {
        let pick = policy.select(day);
        value = step(panel, pick, day, value)?;
        picks.push(pick.to_string());
        values.push(value);
    }

    debug!(policy = policy.name(), start, end, final_value = value, "simulated");
    Ok(Trajectory {
        start,
        values,
        picks,
    })
}

/// Like [`simulate`] but keeps only the terminal value.
pub fn final_value(
    panel: &Panel,
    start: usize,
    end: usize,
    policy: &mut dyn Policy,
    initial_value: f64,
) -> Result<f64, SimulationError> {
    check_range(panel, start, end)?;
    let mut value = initial_value;
    for day in start..=end {
        let pick = policy.select(day);
        value = step(panel, pick, day, value)?;
    }
    Ok(value)
}

fn step(panel: &Panel, pick: &str, day: usize, value: f64) -> Result<f64, SimulationError> {
    let column = forward_return_name(pick);
    let ret = panel
        .value(&column, day)
        .ok_or_else(|| SimulationError::MissingForwardReturn {
            ticker: pick.to_string(),
            column,
            day,
        })?;
    Ok(value * (1.0 + ret / 100.0))
}

/// Widest contiguous day range on which every ticker's forward return is finite.
///
/// Returns `None` when no such day exists.
pub fn usable_day_range(panel: &Panel, tickers: &[String]) -> Option<RangeInclusive<usize>> {
    let columns: Vec<&[f64]> = tickers
        .iter()
        .map(|t| panel.column(&forward_return_name(t)))
        .collect::<Option<_>>()?;

    let usable = |row: usize| columns.iter().all(|c| c[row].is_finite());

    let mut best: Option<(usize, usize)> = None;
    let mut run_start = None;
    for row in 0..=panel.height() {
        let ok = row < panel.height() && usable(row);
        match (ok, run_start) {
            (true, None) => run_start = Some(row),
            (false, Some(s)) => {
                if best.map_or(true, |(bs, be)| row - s > be - bs + 1) {
                    best = Some((s, row - 1));
                }
                run_start = None;
            }
            _ => {}
        }
    }
    best.map(|(s, e)| s..=e)
}
