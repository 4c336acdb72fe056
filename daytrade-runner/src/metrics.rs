//! Performance metrics: pure functions over a value path.
//!
//! Every metric takes the simulated values (first = initial value) and the
//! number of bars per year of the data's interval. No I/O, no panel access
//! except for the hit rate, which compares picks against the index.

use daytrade_core::{forward_return_name, Panel, Trajectory, INDEX};
use serde::{Deserialize, Serialize};

/// Aggregate performance metrics for one simulated policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    #[serde(with = "crate::nan_as_null")]
    pub final_value: f64,
    #[serde(with = "crate::nan_as_null")]
    pub total_return: f64,
    #[serde(with = "crate::nan_as_null")]
    pub annualized_return: f64,
    #[serde(with = "crate::nan_as_null")]
    pub sharpe: f64,
    #[serde(with = "crate::nan_as_null")]
    pub sortino: f64,
    #[serde(with = "crate::nan_as_null")]
    pub max_drawdown: f64,
    /// Fraction of days whose pick beat the equal-weighted index.
    pub hit_rate: Option<f64>,
    pub days: usize,
}

impl PerformanceMetrics {
    pub fn compute(trajectory: &Trajectory, panel: &Panel, periods_per_year: f64) -> Self {
        let values = &trajectory.values;
        Self {
            final_value: trajectory.final_value(),
            total_return: total_return(values),
            annualized_return: annualized_return(values, periods_per_year),
            sharpe: sharpe_ratio(values, periods_per_year),
            sortino: sortino_ratio(values, periods_per_year),
            max_drawdown: max_drawdown(values),
            hit_rate: hit_rate(trajectory, panel),
            days: trajectory.len(),
        }
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// Total return as a fraction: (final - initial) / initial.
pub fn total_return(values: &[f64]) -> f64 {
    match (values.first(), values.last()) {
        (Some(&initial), Some(&last)) if values.len() >= 2 && initial > 0.0 => {
            (last - initial) / initial
        }
        _ => 0.0,
    }
}

/// Compound annual growth over `values.len() - 1` periods.
pub fn annualized_return(values: &[f64], periods_per_year: f64) -> f64 {
    let (Some(&initial), Some(&last)) = (values.first(), values.last()) else {
        return 0.0;
    };
    let periods = values.len().saturating_sub(1);
    if periods == 0 || initial <= 0.0 || last <= 0.0 || periods_per_year <= 0.0 {
        return 0.0;
    }
    let years = periods as f64 / periods_per_year;
    (last / initial).powf(1.0 / years) - 1.0
}

/// Per-period rate equivalent to an annual rate: (1 + annual)^(1/n) - 1.
pub fn interval_rate(annual_rate: f64, periods_per_year: f64) -> f64 {
    (1.0 + annual_rate).powf(1.0 / periods_per_year) - 1.0
}

/// Annualized Sharpe ratio with a zero risk-free rate.
///
/// Returns 0.0 if variance is zero or there are fewer than 2 returns.
pub fn sharpe_ratio(values: &[f64], periods_per_year: f64) -> f64 {
    let returns = period_returns(values);
    if returns.len() < 2 {
        return 0.0;
    }
    let std = std_dev(&returns);
    if std < 1e-15 {
        return 0.0;
    }
    mean_f64(&returns) / std * periods_per_year.sqrt()
}

/// Annualized Sortino ratio (downside deviation only).
pub fn sortino_ratio(values: &[f64], periods_per_year: f64) -> f64 {
    let returns = period_returns(values);
    if returns.len() < 2 {
        return 0.0;
    }
    let downside: f64 = returns
        .iter()
        .filter(|&&r| r < 0.0)
        .map(|r| r * r)
        .sum::<f64>()
        / returns.len() as f64;
    let downside_std = downside.sqrt();
    if downside_std < 1e-15 {
        return 0.0;
    }
    mean_f64(&returns) / downside_std * periods_per_year.sqrt()
}

/// Maximum drawdown as a negative fraction (e.g., -0.15 = 15% drawdown).
pub fn max_drawdown(values: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd = 0.0_f64;
    for &v in values {
        if v > peak {
            peak = v;
        }
        if peak > 0.0 {
            max_dd = max_dd.min((v - peak) / peak);
        }
    }
    max_dd
}

/// Fraction of simulated days on which the pick's forward return beat the
/// index forward return. Days where either is undefined are skipped.
pub fn hit_rate(trajectory: &Trajectory, panel: &Panel) -> Option<f64> {
    let index = panel.column(&forward_return_name(INDEX))?;
    let mut hits = 0usize;
    let mut total = 0usize;
    for (k, pick) in trajectory.picks.iter().enumerate() {
        let day = trajectory.start + k;
        let (Some(r), Some(&idx)) = (panel.value(&forward_return_name(pick), day), index.get(day))
        else {
            continue;
        };
        if !(r.is_finite() && idx.is_finite()) {
            continue;
        }
        total += 1;
        if r > idx {
            hits += 1;
        }
    }
    (total > 0).then(|| hits as f64 / total as f64)
}

// ─── Helpers ────────────────────────────────────────────────────────

/// Simple returns between consecutive values.
pub fn period_returns(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

pub(crate) fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Linear-interpolated quantile of an ascending slice, `q` in [0, 1].
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        }
    }
}
