//! Raw panel → labeled feature panel.
//!
//! Selects one price field from a raw `{field}.{ticker}` panel, expands the
//! configured features, labels every ticker against the equally weighted
//! index and materializes the `cash` forward return so cash can be held
//! during a backtest.

use crate::data::PriceField;
use crate::features::{compute_features, FeatureConfig, FeatureError, FeatureKind, CASH};
use crate::labels::{add_forward_return, label_beat_index_1d, LabelError};
use crate::panel::{Panel, PanelError};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error, PartialEq)]
pub enum PreprocessError {
    #[error("labeling requires the pdiff feature with lag 1 at anchor 0")]
    LabelFeatureMissing,

    #[error("raw panel has no '{field}' column for ticker '{ticker}'")]
    MissingPrice { field: PriceField, ticker: String },

    #[error("no tickers to preprocess")]
    NoTickers,

    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error(transparent)]
    Label(#[from] LabelError),

    #[error(transparent)]
    Panel(#[from] PanelError),
}

/// Validated preprocess settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocessConfig {
    price: PriceField,
    features: FeatureConfig,
}

impl PreprocessConfig {
    /// Fails unless the features include the one-day `pdiff` that labeling reads.
    pub fn new(price: PriceField, features: FeatureConfig) -> Result<Self, PreprocessError> {
        if !features.has_kind(FeatureKind::Pdiff) || !features.windows().contains(0, 1) {
            return Err(PreprocessError::LabelFeatureMissing);
        }
        Ok(Self { price, features })
    }

    pub fn price(&self) -> PriceField {
        self.price
    }

    pub fn features(&self) -> &FeatureConfig {
        &self.features
    }
}

/// Single-field panel keyed by bare ticker, in `tickers` order.
pub fn select_price(
    raw: &Panel,
    field: PriceField,
    tickers: &[String],
) -> Result<Panel, PreprocessError> {
    let mut out = Panel::new(raw.dates().to_vec())?;
    for ticker in tickers {
        let values = raw
            .column(&field.column(ticker))
            .ok_or_else(|| PreprocessError::MissingPrice {
                field,
                ticker: ticker.clone(),
            })?;
        out.insert(ticker.as_str(), values.to_vec())?;
    }
    Ok(out)
}

/// Full preprocess: price selection, features, labels, cash forward return.
pub fn preprocess(
    raw: &Panel,
    tickers: &[String],
    cfg: &PreprocessConfig,
) -> Result<Panel, PreprocessError> {
    if tickers.is_empty() {
        return Err(PreprocessError::NoTickers);
    }

    let prices = select_price(raw, cfg.price, tickers)?;
    info!(price = %cfg.price, tickers = tickers.len(), rows = prices.height(), "selected price field");

    let featured = compute_features(
        prices,
        tickers,
        cfg.features.kinds(),
        cfg.features.windows(),
    )?;
    let labeled = label_beat_index_1d(featured, tickers)?;
    let out = add_forward_return(labeled, CASH)?;

    info!(columns = out.width(), rows = out.height(), "preprocess complete");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::AnchorLagMap;
    use chrono::NaiveDate;

    fn raw() -> Panel {
        let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let dates = (0..4).map(|i| base + chrono::Duration::days(i)).collect();
        Panel::new(dates)
            .unwrap()
            .with_column("open.A", vec![10.0, 11.0, 12.0, 13.0])
            .unwrap()
            .with_column("close.A", vec![10.5, 11.5, 12.5, 13.5])
            .unwrap()
            .with_column("open.B", vec![20.0, 19.0, 21.0, 22.0])
            .unwrap()
    }

    fn cfg(kinds: Vec<FeatureKind>, windows: AnchorLagMap) -> Result<PreprocessConfig, PreprocessError> {
        PreprocessConfig::new(PriceField::Open, FeatureConfig::new(kinds, windows)?)
    }

    fn tickers() -> Vec<String> {
        vec!["A".to_string(), "B".to_string()]
    }

    #[test]
    fn select_price_uses_bare_ticker_names() {
        let p = select_price(&raw(), PriceField::Open, &tickers()).unwrap();
        assert_eq!(p.column_names(), &["A".to_string(), "B".to_string()]);
        assert_eq!(p.column("B").unwrap(), &[20.0, 19.0, 21.0, 22.0]);
    }

    #[test]
    fn missing_price_field_is_reported() {
        let err = select_price(&raw(), PriceField::Close, &tickers()).unwrap_err();
        assert_eq!(
            err,
            PreprocessError::MissingPrice {
                field: PriceField::Close,
                ticker: "B".into()
            }
        );
    }

    #[test]
    fn config_requires_one_day_pdiff() {
        assert_eq!(
            cfg(vec![FeatureKind::Lag], AnchorLagMap::single(0, [1])).unwrap_err(),
            PreprocessError::LabelFeatureMissing
        );
        assert_eq!(
            cfg(vec![FeatureKind::Pdiff], AnchorLagMap::single(0, [2])).unwrap_err(),
            PreprocessError::LabelFeatureMissing
        );
        assert!(cfg(vec![FeatureKind::Pdiff], AnchorLagMap::single(0, [1, 2])).is_ok());
    }

    #[test]
    fn preprocess_produces_features_labels_and_cash_return() {
        let c = cfg(
            vec![FeatureKind::Diff, FeatureKind::Pdiff],
            AnchorLagMap::single(0, [1, 2]),
        )
        .unwrap();
        let out = preprocess(&raw(), &tickers(), &c).unwrap();

        for name in [
            "A_pdiff_0d_1d",
            "B_diff_0d_2d",
            "cash_pdiff_0d_2d",
            "label_A",
            "label_B_pdiff_1f",
            "label_index_pdiff_1f",
            "label_cash_pdiff_1f",
        ] {
            assert!(out.contains(name), "missing {name}");
        }
        assert!(!out.contains("label_cash"));
        assert_eq!(out.height(), 4);
        // A day 0 → 1: +10%
        assert!((out.value("label_A_pdiff_1f", 0).unwrap() - 10.0).abs() < 1e-9);
    }
}
