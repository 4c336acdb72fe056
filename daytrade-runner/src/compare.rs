//! Policy comparison against a Monte Carlo random baseline.
//!
//! Each configured policy is simulated once over the day range. The random
//! policy is simulated `trials` times in parallel, each trial seeded from the
//! master seed so the baseline is identical across thread counts. Every
//! policy is then ranked within that baseline and tested against the index.

use chrono::NaiveDate;
use daytrade_core::{
    final_value, simulate, usable_day_range, ControlPolicy, Panel, PolicyError, RandomPolicy,
    RngHierarchy, SimulationError, Trajectory, INDEX,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ConfigError, RunConfig};
use crate::metrics::{mean_f64, quantile, std_dev, PerformanceMetrics};
use crate::significance::{compare_samples, SignificanceReport};

/// RNG stream name of the random baseline.
const RANDOM_STREAM: &str = "random";

/// Version of the serialized [`ComparisonReport`].
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CompareError {
    #[error("no day has a finite forward return for every ticker")]
    NoUsableDays,

    #[error("day range {start}..={end} is outside a panel of {height} rows")]
    RangeOutOfBounds {
        start: usize,
        end: usize,
        height: usize,
    },

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Simulation(#[from] SimulationError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result of one configured policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyOutcome {
    pub name: String,
    #[serde(with = "crate::nan_as_null")]
    pub final_value: f64,
    /// Percent of random trials whose final value is at or below this one.
    pub percentile: Option<f64>,
    pub metrics: PerformanceMetrics,
    /// Daily step returns of this policy against those of the index.
    pub vs_index: SignificanceReport,
    #[serde(skip)]
    pub trajectory: Trajectory,
}

/// Distribution summary of the random-policy final values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomBaseline {
    pub trials: usize,
    pub seed: u64,
    #[serde(with = "crate::nan_as_null")]
    pub mean: f64,
    #[serde(with = "crate::nan_as_null")]
    pub std: f64,
    #[serde(with = "crate::nan_as_null")]
    pub median: f64,
    #[serde(with = "crate::nan_as_null")]
    pub p10: f64,
    #[serde(with = "crate::nan_as_null")]
    pub p90: f64,
    #[serde(skip)]
    pub finals: Vec<f64>,
}

impl RandomBaseline {
    fn from_finals(mut finals: Vec<f64>, seed: u64) -> Self {
        let trials = finals.len();
        finals.retain(|v| v.is_finite());
        finals.sort_by(f64::total_cmp);
        Self {
            trials,
            seed,
            mean: mean_f64(&finals),
            std: std_dev(&finals),
            median: quantile(&finals, 0.5),
            p10: quantile(&finals, 0.1),
            p90: quantile(&finals, 0.9),
            finals,
        }
    }

    /// Percent of finite trial values at or below `value`.
    pub fn percentile_of(&self, value: f64) -> Option<f64> {
        if !value.is_finite() || self.finals.is_empty() {
            return None;
        }
        let below = self.finals.partition_point(|&v| v <= value);
        Some(100.0 * below as f64 / self.finals.len() as f64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub schema_version: u32,
    pub run_id: String,
    pub tickers: Vec<String>,
    pub start: usize,
    pub end: usize,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(with = "crate::nan_as_null")]
    pub initial_value: f64,
    pub policies: Vec<PolicyOutcome>,
    pub random: RandomBaseline,
}

impl ComparisonReport {
    pub fn policy(&self, name: &str) -> Option<&PolicyOutcome> {
        self.policies.iter().find(|p| p.name == name)
    }

    /// Dates of the simulated days, `start..=end`.
    pub fn days<'p>(&self, panel: &'p Panel) -> &'p [NaiveDate] {
        panel.dates().get(self.start..=self.end).unwrap_or(&[])
    }
}

/// Resolve the simulated day range: configured bounds, falling back to the
/// widest range where every ticker and the index have a forward return.
pub fn day_range(
    panel: &Panel,
    tickers: &[String],
    start: Option<usize>,
    end: Option<usize>,
) -> Result<(usize, usize), CompareError> {
    let (start, end) = match (start, end) {
        (Some(s), Some(e)) => (s, e),
        _ => {
            let mut holdable = tickers.to_vec();
            holdable.push(INDEX.to_string());
            let usable = usable_day_range(panel, &holdable).ok_or(CompareError::NoUsableDays)?;
            (
                start.unwrap_or(*usable.start()),
                end.unwrap_or(*usable.end()),
            )
        }
    };
    if start > end || end >= panel.height() {
        return Err(CompareError::RangeOutOfBounds {
            start,
            end,
            height: panel.height(),
        });
    }
    Ok((start, end))
}

/// Final values of `trials` random-policy runs, in trial order.
pub fn random_finals(
    panel: &Panel,
    tickers: &[String],
    start: usize,
    end: usize,
    initial_value: f64,
    trials: usize,
    seed: u64,
) -> Result<Vec<f64>, CompareError> {
    let hierarchy = RngHierarchy::new(seed);
    (0..trials as u64)
        .into_par_iter()
        .map(|trial| {
            let mut policy =
                RandomPolicy::with_seed(tickers.to_vec(), hierarchy.sub_seed(RANDOM_STREAM, trial))?;
            Ok(final_value(panel, start, end, &mut policy, initial_value)?)
        })
        .collect()
}

/// Simulate every configured policy and rank it within the random baseline.
pub fn compare_policies(
    panel: &Panel,
    tickers: &[String],
    cfg: &RunConfig,
) -> Result<ComparisonReport, CompareError> {
    let bt = &cfg.backtest;
    let (start, end) = day_range(panel, tickers, bt.start, bt.end)?;
    let periods = cfg.data.interval.periods_per_year();
    info!(
        start,
        end,
        policies = bt.policies.len(),
        trials = cfg.monte_carlo.trials,
        "comparing policies"
    );

    let index = simulate(
        panel,
        start,
        end,
        &mut ControlPolicy::new(INDEX),
        bt.initial_value,
    )?;
    let index_returns = index.step_returns_pct();

    let finals = random_finals(
        panel,
        tickers,
        start,
        end,
        bt.initial_value,
        cfg.monte_carlo.trials,
        cfg.monte_carlo.seed,
    )?;
    let random = RandomBaseline::from_finals(finals, cfg.monte_carlo.seed);
    debug!(mean = random.mean, median = random.median, "random baseline");

    let mut policies = Vec::with_capacity(bt.policies.len());
    for spec in &bt.policies {
        let mut policy = spec.build(panel, tickers)?;
        let trajectory = simulate(panel, start, end, policy.as_mut(), bt.initial_value)?;
        let outcome = PolicyOutcome {
            name: policy.name().to_string(),
            final_value: trajectory.final_value(),
            percentile: random.percentile_of(trajectory.final_value()),
            metrics: PerformanceMetrics::compute(&trajectory, panel, periods),
            vs_index: compare_samples(&trajectory.step_returns_pct(), &index_returns),
            trajectory,
        };
        info!(
            policy = %outcome.name,
            final_value = outcome.final_value,
            percentile = ?outcome.percentile,
            "policy simulated"
        );
        policies.push(outcome);
    }

    let dates = panel.dates();
    Ok(ComparisonReport {
        schema_version: SCHEMA_VERSION,
        run_id: cfg.run_id()?,
        tickers: tickers.to_vec(),
        start,
        end,
        start_date: dates[start],
        end_date: dates[end],
        initial_value: bt.initial_value,
        policies,
        random,
    })
}
