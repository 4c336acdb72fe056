//! Stock-selection policies.
//!
//! A policy answers one question: which ticker to hold on a given day. It
//! lives for a single backtest run and may keep internal state (the random
//! policy advances its RNG on every pick).
//!
//! Policies see only the feature columns they were built against, never the
//! forward-looking `label_` columns, so a pick on day `i` depends on
//! information available at day `i`.

use crate::features::{FeatureAddress, FeatureError, FeatureKind};
use crate::labels::{forward_return_name, INDEX};
use crate::panel::Panel;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PolicyError {
    #[error("policy '{0}' needs at least one ticker to choose from")]
    NoChoices(&'static str),

    #[error("feature column '{column}' is not in the panel")]
    MissingFeature { column: String },

    #[error("'{ticker}' has no forward return column '{column}' and cannot be held")]
    NotHoldable { ticker: String, column: String },

    #[error(transparent)]
    Feature(#[from] FeatureError),
}

/// Daily stock selection.
pub trait Policy: Send {
    /// Short name used in reports.
    fn name(&self) -> &str;

    /// Ticker to hold from the close of `day` to the close of `day + 1`.
    fn select(&mut self, day: usize) -> &str;
}

/// Always holds the same ticker. The default holds the equal-weighted index.
#[derive(Debug, Clone)]
pub struct ControlPolicy {
    ticker: String,
    name: String,
}

impl ControlPolicy {
    pub fn new(ticker: impl Into<String>) -> Self {
        let ticker = ticker.into();
        let name = format!("control_{ticker}");
        Self { ticker, name }
    }
}

impl Default for ControlPolicy {
    fn default() -> Self {
        Self::new(INDEX)
    }
}

impl Policy for ControlPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn select(&mut self, _day: usize) -> &str {
        &self.ticker
    }
}

/// Uniform random pick among a fixed set of tickers.
#[derive(Debug, Clone)]
pub struct RandomPolicy {
    choices: Vec<String>,
    rng: StdRng,
}

impl RandomPolicy {
    /// Entropy-seeded; every run differs.
    pub fn new(choices: Vec<String>) -> Result<Self, PolicyError> {
        Self::build(choices, StdRng::from_entropy())
    }

    /// Reproducible: the same seed yields the same pick sequence.
    pub fn with_seed(choices: Vec<String>, seed: u64) -> Result<Self, PolicyError> {
        Self::build(choices, StdRng::seed_from_u64(seed))
    }

    fn build(choices: Vec<String>, rng: StdRng) -> Result<Self, PolicyError> {
        if choices.is_empty() {
            return Err(PolicyError::NoChoices("random"));
        }
        Ok(Self { choices, rng })
    }
}

impl Policy for RandomPolicy {
    fn name(&self) -> &str {
        "random"
    }

    fn select(&mut self, _day: usize) -> &str {
        let i = self.rng.gen_range(0..self.choices.len());
        &self.choices[i]
    }
}

/// Holds the ticker with the largest value of one feature on the day.
///
/// Ties go to the ticker listed first. NaN values are skipped; when every
/// value is NaN the first ticker is held.
#[derive(Debug, Clone)]
pub struct MaxFeaturePolicy<'a> {
    name: String,
    tickers: Vec<String>,
    columns: Vec<&'a [f64]>,
}

impl<'a> MaxFeaturePolicy<'a> {
    pub fn new(
        panel: &'a Panel,
        tickers: &[String],
        kind: FeatureKind,
        anchor: u32,
        lag: u32,
    ) -> Result<Self, PolicyError> {
        if tickers.is_empty() {
            return Err(PolicyError::NoChoices("max_feature"));
        }

        let mut columns = Vec::with_capacity(tickers.len());
        for ticker in tickers {
            let column = FeatureAddress::new(ticker.as_str(), kind, anchor, lag)?.name();
            let values = panel
                .column(&column)
                .ok_or(PolicyError::MissingFeature { column })?;
            columns.push(values);
        }

        Ok(Self {
            name: format!("max_{kind}_{anchor}d_{lag}d"),
            tickers: tickers.to_vec(),
            columns,
        })
    }
}

impl Policy for MaxFeaturePolicy<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn select(&mut self, day: usize) -> &str {
        let mut best: Option<(usize, f64)> = None;
        for (i, column) in self.columns.iter().enumerate() {
            let Some(&v) = column.get(day) else { continue };
            if v.is_nan() {
                continue;
            }
            if best.map_or(true, |(_, b)| v > b) {
                best = Some((i, v));
            }
        }
        &self.tickers[best.map_or(0, |(i, _)| i)]
    }
}

/// Serializable policy description, built into a policy against a panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicySpec {
    Control {
        #[serde(default = "default_control_ticker")]
        ticker: String,
    },
    MaxFeature {
        kind: FeatureKind,
        anchor: u32,
        lag: u32,
    },
    Random {
        #[serde(default)]
        seed: Option<u64>,
    },
}

fn default_control_ticker() -> String {
    INDEX.to_string()
}

impl PolicySpec {
    /// Name of the policy this spec builds.
    pub fn name(&self) -> String {
        match self {
            PolicySpec::Control { ticker } => format!("control_{ticker}"),
            PolicySpec::MaxFeature { kind, anchor, lag } => format!("max_{kind}_{anchor}d_{lag}d"),
            PolicySpec::Random { .. } => "random".to_string(),
        }
    }

    /// Build the policy for `tickers`, checking that every pick it can make
    /// has a forward return in `panel`.
    pub fn build<'a>(
        &self,
        panel: &'a Panel,
        tickers: &[String],
    ) -> Result<Box<dyn Policy + 'a>, PolicyError> {
        match self {
            PolicySpec::Control { ticker } => {
                ensure_holdable(panel, std::slice::from_ref(ticker))?;
                Ok(Box::new(ControlPolicy::new(ticker.as_str())))
            }
            PolicySpec::MaxFeature { kind, anchor, lag } => {
                ensure_holdable(panel, tickers)?;
                Ok(Box::new(MaxFeaturePolicy::new(
                    panel, tickers, *kind, *anchor, *lag,
                )?))
            }
            PolicySpec::Random { seed } => {
                ensure_holdable(panel, tickers)?;
                let choices = tickers.to_vec();
                let policy = match seed {
                    Some(seed) => RandomPolicy::with_seed(choices, *seed)?,
                    None => RandomPolicy::new(choices)?,
                };
                Ok(Box::new(policy))
            }
        }
    }
}

fn ensure_holdable(panel: &Panel, tickers: &[String]) -> Result<(), PolicyError> {
    for ticker in tickers {
        let column = forward_return_name(ticker);
        if !panel.contains(&column) {
            return Err(PolicyError::NotHoldable {
                ticker: ticker.clone(),
                column,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn panel(columns: &[(&str, Vec<f64>)]) -> Panel {
        let n = columns[0].1.len();
        let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut p =
            Panel::new((0..n).map(|i| base + chrono::Duration::days(i as i64)).collect()).unwrap();
        for (name, values) in columns {
            p.insert(*name, values.clone()).unwrap();
        }
        p
    }

    fn tickers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn control_always_picks_its_ticker() {
        let mut p = ControlPolicy::default();
        assert_eq!(p.select(0), "index");
        assert_eq!(p.select(100), "index");
        assert_eq!(p.name(), "control_index");
    }

    #[test]
    fn max_feature_picks_largest() {
        let data = panel(&[
            ("A_pdiff_0d_240d", vec![5.0]),
            ("B_pdiff_0d_240d", vec![3.0]),
        ]);
        let mut p =
            MaxFeaturePolicy::new(&data, &tickers(&["A", "B"]), FeatureKind::Pdiff, 0, 240)
                .unwrap();
        assert_eq!(p.select(0), "A");
        assert_eq!(p.name(), "max_pdiff_0d_240d");
    }

    #[test]
    fn max_feature_ties_and_nan() {
        let data = panel(&[
            ("A_lag_0d_1d", vec![1.0, f64::NAN, f64::NAN]),
            ("B_lag_0d_1d", vec![1.0, 2.0, f64::NAN]),
        ]);
        let mut p =
            MaxFeaturePolicy::new(&data, &tickers(&["A", "B"]), FeatureKind::Lag, 0, 1).unwrap();
        assert_eq!(p.select(0), "A"); // tie → first
        assert_eq!(p.select(1), "B"); // NaN skipped
        assert_eq!(p.select(2), "A"); // all NaN → first
    }

    #[test]
    fn max_feature_validates_columns() {
        let data = panel(&[("A_pdiff_0d_1d", vec![1.0])]);
        let err = MaxFeaturePolicy::new(&data, &tickers(&["A", "B"]), FeatureKind::Pdiff, 0, 1)
            .unwrap_err();
        assert_eq!(
            err,
            PolicyError::MissingFeature {
                column: "B_pdiff_0d_1d".into()
            }
        );

        let err = MaxFeaturePolicy::new(&data, &tickers(&["A"]), FeatureKind::Pdiff, 0, 0)
            .unwrap_err();
        assert_eq!(err, PolicyError::Feature(FeatureError::ZeroLag(0)));

        let err = MaxFeaturePolicy::new(&data, &tickers(&["label_A"]), FeatureKind::Pdiff, 0, 1)
            .unwrap_err();
        assert!(matches!(err, PolicyError::Feature(FeatureError::InvalidTicker(_))));
    }

    #[test]
    fn seeded_random_is_reproducible_and_in_range() {
        let choices = tickers(&["A", "B", "C"]);
        let mut a = RandomPolicy::with_seed(choices.clone(), 7).unwrap();
        let mut b = RandomPolicy::with_seed(choices.clone(), 7).unwrap();
        for day in 0..50 {
            let pa = a.select(day).to_string();
            assert_eq!(pa, b.select(day));
            assert!(choices.contains(&pa));
        }
    }

    #[test]
    fn random_needs_choices() {
        assert_eq!(
            RandomPolicy::new(Vec::new()).unwrap_err(),
            PolicyError::NoChoices("random")
        );
    }

    #[test]
    fn spec_build_checks_forward_returns() {
        let data = panel(&[("label_index_pdiff_1f", vec![0.0]), ("label_A_pdiff_1f", vec![0.0])]);
        let ts = tickers(&["A", "B"]);

        let control = PolicySpec::Control {
            ticker: "index".into(),
        };
        assert!(control.build(&data, &ts).is_ok());

        let err = PolicySpec::Random { seed: Some(1) }
            .build(&data, &ts)
            .err()
            .unwrap();
        assert!(matches!(err, PolicyError::NotHoldable { ticker, .. } if ticker == "B"));
    }

    #[test]
    fn spec_names_match_built_policies() {
        let data = panel(&[
            ("label_index_pdiff_1f", vec![0.0]),
            ("label_A_pdiff_1f", vec![0.0]),
            ("A_pdiff_0d_5d", vec![1.0]),
        ]);
        let ts = tickers(&["A"]);
        for spec in [
            PolicySpec::Control {
                ticker: "A".into(),
            },
            PolicySpec::MaxFeature {
                kind: FeatureKind::Pdiff,
                anchor: 0,
                lag: 5,
            },
            PolicySpec::Random { seed: Some(1) },
        ] {
            let policy = spec.build(&data, &ts).unwrap();
            assert_eq!(spec.name(), policy.name());
        }
    }

    #[test]
    fn spec_deserializes_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            policies: Vec<PolicySpec>,
        }
        let w: Wrapper = toml::from_str(
            r#"
            [[policies]]
            type = "control"

            [[policies]]
            type = "max_feature"
            kind = "pdiff"
            anchor = 0
            lag = 240

            [[policies]]
            type = "random"
            seed = 3
            "#,
        )
        .unwrap();
        assert_eq!(
            w.policies,
            vec![
                PolicySpec::Control {
                    ticker: "index".into()
                },
                PolicySpec::MaxFeature {
                    kind: FeatureKind::Pdiff,
                    anchor: 0,
                    lag: 240
                },
                PolicySpec::Random { seed: Some(3) },
            ]
        );
    }
}
