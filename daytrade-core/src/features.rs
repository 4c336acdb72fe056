//! Anchor-and-lag feature expansion.
//!
//! For every `(anchor, lag, ticker, kind)` the engine derives one column:
//!
//! - `cur  = shift(price, anchor)`: the series as it was `anchor` days ago
//! - `past = shift(cur, lag)`
//! - `lag`   → `past`
//! - `diff`  → `cur - past`
//! - `pdiff` → `100 * (cur - past) / past`
//!
//! Columns are named `{ticker}_{kind}_{anchor}d_{lag}d`. The name is a
//! reversible encoding of [`FeatureAddress`]; `lag >= 1` is enforced when an
//! address is built, so every feature reads strictly earlier rows than the
//! row it is stored on.

use crate::panel::{shift, Panel, PanelError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

/// Synthetic constant-price instrument injected before expansion.
pub const CASH: &str = "cash";

/// Prefix reserved for forward-looking label columns.
pub const LABEL_PREFIX: &str = "label_";

/// Tickers shown in "no matching columns" errors.
const ERROR_SAMPLE: usize = 5;

#[derive(Debug, Error, PartialEq)]
pub enum FeatureError {
    #[error("lag must be >= 1 trading day (got {0})")]
    ZeroLag(u32),

    #[error("invalid ticker '{0}' in feature address")]
    InvalidTicker(String),

    #[error("unknown feature kind '{0}' (expected lag, diff or pdiff)")]
    UnknownKind(String),

    #[error("cannot parse feature name '{0}'")]
    MalformedName(String),

    #[error("no feature windows configured")]
    NoWindows,

    #[error("anchor {0} has no lags")]
    EmptyWindow(u32),

    #[error("no feature kinds configured")]
    NoKinds,

    #[error("ticker '{0}' not present in the panel")]
    MissingTicker(String),

    #[error("no columns match suffix '{suffix}' for tickers [{sample}] ({total} requested)")]
    NoMatchingColumns {
        suffix: String,
        sample: String,
        total: usize,
    },

    #[error(transparent)]
    Panel(#[from] PanelError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Lag,
    Diff,
    Pdiff,
}

impl FeatureKind {
    pub const ALL: [FeatureKind; 3] = [FeatureKind::Lag, FeatureKind::Diff, FeatureKind::Pdiff];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKind::Lag => "lag",
            FeatureKind::Diff => "diff",
            FeatureKind::Pdiff => "pdiff",
        }
    }

    fn derive(&self, cur: &[f64], past: &[f64]) -> Vec<f64> {
        match self {
            FeatureKind::Lag => past.to_vec(),
            FeatureKind::Diff => cur.iter().zip(past).map(|(c, p)| c - p).collect(),
            FeatureKind::Pdiff => cur
                .iter()
                .zip(past)
                .map(|(c, p)| 100.0 * (c - p) / p)
                .collect(),
        }
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureKind {
    type Err = FeatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lag" => Ok(FeatureKind::Lag),
            "diff" => Ok(FeatureKind::Diff),
            "pdiff" => Ok(FeatureKind::Pdiff),
            other => Err(FeatureError::UnknownKind(other.to_string())),
        }
    }
}

/// Address of one derived column: (ticker, kind, anchor, lag).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeatureAddress {
    ticker: String,
    kind: FeatureKind,
    anchor: u32,
    lag: u32,
}

impl FeatureAddress {
    pub fn new(
        ticker: impl Into<String>,
        kind: FeatureKind,
        anchor: u32,
        lag: u32,
    ) -> Result<Self, FeatureError> {
        let ticker = ticker.into();
        if ticker.is_empty() || ticker.starts_with(LABEL_PREFIX) {
            return Err(FeatureError::InvalidTicker(ticker));
        }
        if lag == 0 {
            return Err(FeatureError::ZeroLag(lag));
        }
        Ok(Self {
            ticker,
            kind,
            anchor,
            lag,
        })
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn kind(&self) -> FeatureKind {
        self.kind
    }

    pub fn anchor(&self) -> u32 {
        self.anchor
    }

    pub fn lag(&self) -> u32 {
        self.lag
    }

    /// Oldest row offset this feature reads, relative to the row it lives on.
    pub fn lookback(&self) -> u32 {
        self.anchor + self.lag
    }

    pub fn name(&self) -> String {
        feature_name(&self.ticker, self.kind, self.anchor, self.lag)
    }

    /// Inverse of [`FeatureAddress::name`]. Splits from the right, so tickers
    /// containing underscores survive the round trip.
    pub fn parse(name: &str) -> Result<Self, FeatureError> {
        let malformed = || FeatureError::MalformedName(name.to_string());

        let mut parts = name.rsplitn(4, '_');
        let lag = parts.next().ok_or_else(malformed)?;
        let anchor = parts.next().ok_or_else(malformed)?;
        let kind = parts.next().ok_or_else(malformed)?;
        let ticker = parts.next().ok_or_else(malformed)?;

        let days = |s: &str| -> Result<u32, FeatureError> {
            let digits = s.strip_suffix('d').ok_or_else(malformed)?;
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(malformed());
            }
            digits.parse().map_err(|_| malformed())
        };

        Self::new(ticker, kind.parse()?, days(anchor)?, days(lag)?)
    }
}

impl fmt::Display for FeatureAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for FeatureAddress {
    type Err = FeatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Column name for `(ticker, kind, anchor, lag)`.
pub fn feature_name(ticker: &str, kind: FeatureKind, anchor: u32, lag: u32) -> String {
    format!("{ticker}_{kind}_{anchor}d_{lag}d")
}

/// Anchor offset (trading days) → set of lag offsets (trading days).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnchorLagMap {
    windows: BTreeMap<u32, BTreeSet<u32>>,
}

impl AnchorLagMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map with a single anchor.
    pub fn single(anchor: u32, lags: impl IntoIterator<Item = u32>) -> Self {
        let mut map = Self::new();
        map.insert(anchor, lags);
        map
    }

    /// Add lags to an anchor (merging with lags already present).
    pub fn insert(&mut self, anchor: u32, lags: impl IntoIterator<Item = u32>) {
        self.windows.entry(anchor).or_default().extend(lags);
    }

    pub fn validate(&self) -> Result<(), FeatureError> {
        if self.windows.is_empty() {
            return Err(FeatureError::NoWindows);
        }
        for (&anchor, lags) in &self.windows {
            if lags.is_empty() {
                return Err(FeatureError::EmptyWindow(anchor));
            }
            if lags.contains(&0) {
                return Err(FeatureError::ZeroLag(0));
            }
        }
        Ok(())
    }

    pub fn contains(&self, anchor: u32, lag: u32) -> bool {
        self.windows
            .get(&anchor)
            .is_some_and(|lags| lags.contains(&lag))
    }

    /// Windows in ascending (anchor, lag) order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.windows
            .iter()
            .flat_map(|(&anchor, lags)| lags.iter().map(move |&lag| (anchor, lag)))
    }

    pub fn anchors(&self) -> impl Iterator<Item = (u32, &BTreeSet<u32>)> + '_ {
        self.windows.iter().map(|(&a, lags)| (a, lags))
    }

    /// Total number of (anchor, lag) pairs.
    pub fn len(&self) -> usize {
        self.windows.values().map(|l| l.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Validated feature-engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureConfig {
    kinds: Vec<FeatureKind>,
    windows: AnchorLagMap,
}

impl FeatureConfig {
    /// Duplicate kinds are dropped, first occurrence wins.
    pub fn new(kinds: Vec<FeatureKind>, windows: AnchorLagMap) -> Result<Self, FeatureError> {
        if kinds.is_empty() {
            return Err(FeatureError::NoKinds);
        }
        windows.validate()?;
        let mut deduped = Vec::with_capacity(kinds.len());
        for kind in kinds {
            if !deduped.contains(&kind) {
                deduped.push(kind);
            }
        }
        Ok(Self {
            kinds: deduped,
            windows,
        })
    }

    pub fn kinds(&self) -> &[FeatureKind] {
        &self.kinds
    }

    pub fn windows(&self) -> &AnchorLagMap {
        &self.windows
    }

    pub fn has_kind(&self, kind: FeatureKind) -> bool {
        self.kinds.contains(&kind)
    }
}

/// Expand the panel with every (anchor, lag, ticker, kind) feature column.
///
/// A constant `cash` column is added first if the panel lacks one, and is
/// expanded after the given tickers. No rows are removed.
pub fn compute_features(
    mut panel: Panel,
    tickers: &[String],
    kinds: &[FeatureKind],
    windows: &AnchorLagMap,
) -> Result<Panel, FeatureError> {
    if kinds.is_empty() {
        return Err(FeatureError::NoKinds);
    }
    windows.validate()?;

    if !panel.contains(CASH) {
        panel.insert(CASH, vec![1.0; panel.height()])?;
    }

    let mut order: Vec<&str> = tickers.iter().map(|t| t.as_str()).collect();
    if !order.contains(&CASH) {
        order.push(CASH);
    }
    for ticker in &order {
        if !panel.contains(ticker) {
            return Err(FeatureError::MissingTicker(ticker.to_string()));
        }
    }

    let before = panel.width();
    for (anchor, lags) in windows.anchors() {
        // Anchored series are shared by every lag of this anchor.
        let anchored: Vec<Vec<f64>> = order
            .iter()
            .map(|t| {
                let raw = panel.require(t)?;
                Ok(if anchor > 0 {
                    shift(raw, i64::from(anchor))
                } else {
                    raw.to_vec()
                })
            })
            .collect::<Result<_, PanelError>>()?;

        for &lag in lags {
            for (ticker, cur) in order.iter().zip(&anchored) {
                let past = shift(cur, i64::from(lag));
                for kind in kinds {
                    panel.insert(
                        feature_name(ticker, *kind, anchor, lag),
                        kind.derive(cur, &past),
                    )?;
                }
            }
            debug!(anchor, lag, "expanded lag window");
        }
    }

    info!(
        tickers = order.len(),
        windows = windows.len(),
        kinds = kinds.len(),
        added = panel.width() - before,
        "computed features"
    );
    Ok(panel)
}

/// Names of the columns `{ticker}{suffix}` present in the panel, in panel order.
///
/// An empty result is treated as a naming mismatch and reported as an error
/// carrying a sample of the requested tickers.
pub fn feature_columns(
    panel: &Panel,
    suffix: &str,
    tickers: &[String],
) -> Result<Vec<String>, FeatureError> {
    let matches: Vec<String> = panel
        .column_names()
        .iter()
        .filter(|name| {
            name.strip_suffix(suffix)
                .is_some_and(|prefix| tickers.iter().any(|t| t == prefix))
        })
        .cloned()
        .collect();

    if matches.is_empty() {
        let sample = tickers
            .iter()
            .take(ERROR_SAMPLE)
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(FeatureError::NoMatchingColumns {
            suffix: suffix.to_string(),
            sample,
            total: tickers.len(),
        });
    }
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dates(n: usize) -> Vec<NaiveDate> {
        let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..n).map(|i| base + chrono::Duration::days(i as i64)).collect()
    }

    fn xyz_panel() -> Panel {
        Panel::new(dates(4))
            .unwrap()
            .with_column("XYZ", vec![1.1, 2.2, 3.3, 4.0])
            .unwrap()
    }

    fn tickers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn pdiff_boundary_scenario() {
        let out = compute_features(
            xyz_panel(),
            &tickers(&["XYZ"]),
            &[FeatureKind::Pdiff],
            &AnchorLagMap::single(0, [1]),
        )
        .unwrap();

        let pdiff = out.column("XYZ_pdiff_0d_1d").unwrap();
        assert!(pdiff[0].is_nan());
        assert!((pdiff[1] - 100.0).abs() < 1e-9);
        assert!((pdiff[2] - 50.0).abs() < 1e-9);
        assert!(((pdiff[3] * 100.0).round() / 100.0 - 21.21).abs() < 1e-9);
    }

    #[test]
    fn lag_and_diff_kinds() {
        let out = compute_features(
            xyz_panel(),
            &tickers(&["XYZ"]),
            &[FeatureKind::Lag, FeatureKind::Diff],
            &AnchorLagMap::single(0, [2]),
        )
        .unwrap();

        let lag = out.column("XYZ_lag_0d_2d").unwrap();
        assert!(lag[0].is_nan() && lag[1].is_nan());
        assert_eq!(&lag[2..], &[1.1, 2.2]);

        let diff = out.column("XYZ_diff_0d_2d").unwrap();
        assert!((diff[2] - 2.2).abs() < 1e-12);
        assert!((diff[3] - 1.8).abs() < 1e-12);
    }

    #[test]
    fn anchor_shifts_before_lagging() {
        let out = compute_features(
            xyz_panel(),
            &tickers(&["XYZ"]),
            &[FeatureKind::Lag, FeatureKind::Pdiff],
            &AnchorLagMap::single(1, [1]),
        )
        .unwrap();

        // cur = [NaN, 1.1, 2.2, 3.3], past = [NaN, NaN, 1.1, 2.2]
        let lag = out.column("XYZ_lag_1d_1d").unwrap();
        assert!(lag[1].is_nan());
        assert_eq!(&lag[2..], &[1.1, 2.2]);

        let pdiff = out.column("XYZ_pdiff_1d_1d").unwrap();
        assert!(pdiff[1].is_nan());
        assert!((pdiff[2] - 100.0).abs() < 1e-9);
        assert!((pdiff[3] - 50.0).abs() < 1e-9);
    }

    #[test]
    fn cash_is_injected_and_expanded() {
        let out = compute_features(
            xyz_panel(),
            &tickers(&["XYZ"]),
            &[FeatureKind::Pdiff],
            &AnchorLagMap::single(0, [1]),
        )
        .unwrap();

        assert_eq!(out.column(CASH).unwrap(), &[1.0; 4]);
        let cash = out.column("cash_pdiff_0d_1d").unwrap();
        assert!(cash[0].is_nan());
        assert!(cash[1..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn adds_expected_number_of_columns_in_stable_order() {
        let panel = Panel::new(dates(5))
            .unwrap()
            .with_column("B", vec![1.0, 2.0, 3.0, 4.0, 5.0])
            .unwrap()
            .with_column("A", vec![5.0, 4.0, 3.0, 2.0, 1.0])
            .unwrap();
        let mut windows = AnchorLagMap::single(0, [1, 2]);
        windows.insert(1, [1]);

        let out = compute_features(
            panel,
            &tickers(&["B", "A"]),
            &[FeatureKind::Pdiff, FeatureKind::Lag],
            &windows,
        )
        .unwrap();

        // 2 raw + cash + (3 windows * 3 tickers * 2 kinds)
        assert_eq!(out.width(), 3 + 18);
        assert_eq!(out.height(), 5);
        let derived = &out.column_names()[3..];
        assert_eq!(derived[0], "B_pdiff_0d_1d");
        assert_eq!(derived[1], "B_lag_0d_1d");
        assert_eq!(derived[2], "A_pdiff_0d_1d");
        assert_eq!(derived[4], "cash_pdiff_0d_1d");
        assert_eq!(derived[6], "B_pdiff_0d_2d");
        assert_eq!(derived[12], "B_pdiff_1d_1d");
    }

    #[test]
    fn zero_price_propagates_without_error() {
        let panel = Panel::new(dates(3))
            .unwrap()
            .with_column("Z", vec![0.0, 0.0, 1.0])
            .unwrap();
        let out = compute_features(
            panel,
            &tickers(&["Z"]),
            &[FeatureKind::Pdiff],
            &AnchorLagMap::single(0, [1]),
        )
        .unwrap();
        let p = out.column("Z_pdiff_0d_1d").unwrap();
        assert!(p[1].is_nan());
        assert!(p[2].is_infinite());
    }

    #[test]
    fn missing_ticker_is_rejected() {
        let err = compute_features(
            xyz_panel(),
            &tickers(&["NOPE"]),
            &[FeatureKind::Pdiff],
            &AnchorLagMap::single(0, [1]),
        )
        .unwrap_err();
        assert_eq!(err, FeatureError::MissingTicker("NOPE".into()));
    }

    #[test]
    fn invalid_windows_are_rejected() {
        assert_eq!(AnchorLagMap::new().validate(), Err(FeatureError::NoWindows));
        assert_eq!(
            AnchorLagMap::single(0, [0, 1]).validate(),
            Err(FeatureError::ZeroLag(0))
        );
        assert_eq!(
            FeatureConfig::new(vec![], AnchorLagMap::single(0, [1])),
            Err(FeatureError::NoKinds)
        );
    }

    #[test]
    fn feature_config_dedups_kinds() {
        let cfg = FeatureConfig::new(
            vec![FeatureKind::Pdiff, FeatureKind::Lag, FeatureKind::Pdiff],
            AnchorLagMap::single(0, [1]),
        )
        .unwrap();
        assert_eq!(cfg.kinds(), &[FeatureKind::Pdiff, FeatureKind::Lag]);
    }

    #[test]
    fn address_name_and_parse() {
        let addr = FeatureAddress::new("AAPL", FeatureKind::Pdiff, 0, 240).unwrap();
        assert_eq!(addr.name(), "AAPL_pdiff_0d_240d");
        assert_eq!(FeatureAddress::parse("AAPL_pdiff_0d_240d").unwrap(), addr);

        let odd = FeatureAddress::new("BRK_B", FeatureKind::Diff, 3, 1).unwrap();
        assert_eq!(FeatureAddress::parse(&odd.name()).unwrap(), odd);
    }

    #[test]
    fn address_rejects_forward_looking_or_malformed() {
        assert_eq!(
            FeatureAddress::new("AAPL", FeatureKind::Lag, 0, 0),
            Err(FeatureError::ZeroLag(0))
        );
        assert!(FeatureAddress::new("label_AAPL", FeatureKind::Pdiff, 0, 1).is_err());
        assert!(FeatureAddress::parse("AAPL_pdiff_0_1d").is_err());
        assert!(FeatureAddress::parse("AAPL_ratio_0d_1d").is_err());
        assert!(FeatureAddress::parse("pdiff_0d_1d").is_err());
        assert!(FeatureAddress::parse("AAPL_pdiff_0d_+1d").is_err());
    }

    #[test]
    fn feature_columns_filters_by_suffix_and_ticker() {
        let out = compute_features(
            xyz_panel(),
            &tickers(&["XYZ"]),
            &[FeatureKind::Pdiff, FeatureKind::Lag],
            &AnchorLagMap::single(0, [1]),
        )
        .unwrap();

        let cols = feature_columns(&out, "_pdiff_0d_1d", &tickers(&["XYZ", "cash"])).unwrap();
        assert_eq!(cols, vec!["XYZ_pdiff_0d_1d", "cash_pdiff_0d_1d"]);

        let only = feature_columns(&out, "_pdiff_0d_1d", &tickers(&["XYZ"])).unwrap();
        assert_eq!(only, vec!["XYZ_pdiff_0d_1d"]);
    }

    #[test]
    fn feature_columns_errors_with_ticker_sample() {
        let err = feature_columns(
            &xyz_panel(),
            "_pdiff_0d_5d",
            &tickers(&["A", "B", "C", "D", "E", "F", "G"]),
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("_pdiff_0d_5d"));
        assert!(msg.contains("A, B, C, D, E"));
        assert!(!msg.contains("F"));
        assert!(msg.contains("7 requested"));
    }
}
