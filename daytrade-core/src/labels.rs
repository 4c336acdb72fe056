//! Index-relative next-day labels.
//!
//! For every ticker `t` the labeling engine adds:
//!
//! - `label_{t}_pdiff_1f`: tomorrow's one-day percentage return, stored on
//!   today's row (the training target; deliberately forward-looking)
//! - `label_{t}`: 1.0 when that return beats the equally weighted index, else 0.0
//!
//! plus `label_index_pdiff_1f`, the cross-sectional mean of the forward
//! returns. The index is an equal-weight proxy, not a price- or cap-weighted
//! reconstruction of a real index.

use crate::features::{feature_name, FeatureKind, LABEL_PREFIX};
use crate::panel::{shift, Panel, PanelError};
use thiserror::Error;
use tracing::info;

/// Name of the equally weighted aggregate instrument.
pub const INDEX: &str = "index";

#[derive(Debug, Error, PartialEq)]
pub enum LabelError {
    #[error(
        "labeling needs the pdiff feature at anchor 0, lag 1; column '{column}' is missing \
         (add 'pdiff' to the feature kinds and lag 1 to anchor 0)"
    )]
    MissingOneDayReturn { column: String },

    #[error("no tickers to label")]
    NoTickers,

    #[error(transparent)]
    Panel(#[from] PanelError),
}

/// `label_{ticker}_pdiff_1f`
pub fn forward_return_name(ticker: &str) -> String {
    format!("{LABEL_PREFIX}{ticker}_pdiff_1f")
}

/// `label_{ticker}`
pub fn label_name(ticker: &str) -> String {
    format!("{LABEL_PREFIX}{ticker}")
}

fn one_day_return<'a>(panel: &'a Panel, ticker: &str) -> Result<&'a [f64], LabelError> {
    let column = feature_name(ticker, FeatureKind::Pdiff, 0, 1);
    panel
        .column(&column)
        .ok_or(LabelError::MissingOneDayReturn { column })
}

/// Add `label_{ticker}_pdiff_1f` for a single instrument without labeling it.
///
/// Used for instruments that can be held but take no part in the index, such
/// as `cash`.
pub fn add_forward_return(mut panel: Panel, ticker: &str) -> Result<Panel, LabelError> {
    let forward = shift(one_day_return(&panel, ticker)?, -1);
    panel.insert(forward_return_name(ticker), forward)?;
    Ok(panel)
}

/// Label each ticker by whether it beats the equally weighted index tomorrow.
///
/// Fails if any ticker lacks its `pdiff` anchor-0 lag-1 column.
pub fn label_beat_index_1d(mut panel: Panel, tickers: &[String]) -> Result<Panel, LabelError> {
    if tickers.is_empty() {
        return Err(LabelError::NoTickers);
    }

    let forwards: Vec<Vec<f64>> = tickers
        .iter()
        .map(|t| one_day_return(&panel, t).map(|r| shift(r, -1)))
        .collect::<Result<_, _>>()?;

    let n = tickers.len() as f64;
    let index: Vec<f64> = (0..panel.height())
        .map(|row| forwards.iter().map(|f| f[row]).sum::<f64>() / n)
        .collect();

    for (ticker, forward) in tickers.iter().zip(forwards) {
        let labels = forward
            .iter()
            .zip(&index)
            .map(|(r, idx)| if r > idx { 1.0 } else { 0.0 })
            .collect();
        panel.insert(forward_return_name(ticker), forward)?;
        panel.insert(label_name(ticker), labels)?;
    }
    panel.insert(forward_return_name(INDEX), index)?;

    info!(tickers = tickers.len(), "labeled next-day index outperformance");
    Ok(panel)
}

/// Fraction of positive labels over rows where every forward return is defined.
///
/// Returns `None` when no such row exists.
pub fn label_positive_rate(panel: &Panel, tickers: &[String]) -> Result<Option<f64>, LabelError> {
    let mut columns = Vec::with_capacity(tickers.len());
    for t in tickers {
        columns.push((
            panel.require(&forward_return_name(t))?,
            panel.require(&label_name(t))?,
        ));
    }

    let mut positives = 0usize;
    let mut total = 0usize;
    for row in 0..panel.height() {
        if columns.iter().any(|(fwd, _)| !fwd[row].is_finite()) {
            continue;
        }
        for (_, label) in &columns {
            total += 1;
            if label[row] > 0.5 {
                positives += 1;
            }
        }
    }

    Ok((total > 0).then(|| positives as f64 / total as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{compute_features, AnchorLagMap};
    use chrono::NaiveDate;

    fn featured(columns: &[(&str, Vec<f64>)]) -> (Panel, Vec<String>) {
        let n = columns[0].1.len();
        let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut panel =
            Panel::new((0..n).map(|i| base + chrono::Duration::days(i as i64)).collect()).unwrap();
        for (name, values) in columns {
            panel.insert(*name, values.clone()).unwrap();
        }
        let tickers: Vec<String> = columns.iter().map(|(n, _)| n.to_string()).collect();
        let panel = compute_features(
            panel,
            &tickers,
            &[FeatureKind::Pdiff],
            &AnchorLagMap::single(0, [1]),
        )
        .unwrap();
        (panel, tickers)
    }

    #[test]
    fn forward_return_is_tomorrows_pdiff() {
        let (panel, tickers) = featured(&[("A", vec![100.0, 110.0, 99.0])]);
        let out = label_beat_index_1d(panel, &tickers).unwrap();

        let fwd = out.column("label_A_pdiff_1f").unwrap();
        assert!((fwd[0] - 10.0).abs() < 1e-9);
        assert!((fwd[1] + 10.0).abs() < 1e-9);
        assert!(fwd[2].is_nan());
    }

    #[test]
    fn index_is_cross_sectional_mean() {
        let (panel, tickers) = featured(&[
            ("A", vec![100.0, 110.0, 121.0]),
            ("B", vec![100.0, 90.0, 99.0]),
        ]);
        let out = label_beat_index_1d(panel, &tickers).unwrap();

        let idx = out.column("label_index_pdiff_1f").unwrap();
        // Day 0: A +10%, B -10% → index 0%
        assert!(idx[0].abs() < 1e-9);
        // Day 1: A +10%, B +10% → index 10%
        assert!((idx[1] - 10.0).abs() < 1e-9);

        assert_eq!(out.value("label_A", 0), Some(1.0));
        assert_eq!(out.value("label_B", 0), Some(0.0));
        // Equal performance does not beat the index.
        assert_eq!(out.value("label_A", 1), Some(0.0));
        assert_eq!(out.value("label_B", 1), Some(0.0));
        // Last row has no tomorrow.
        assert_eq!(out.value("label_A", 2), Some(0.0));
    }

    #[test]
    fn missing_pdiff_is_a_configuration_error() {
        let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let panel = Panel::new(vec![base])
            .unwrap()
            .with_column("A", vec![1.0])
            .unwrap();
        let err = label_beat_index_1d(panel, &["A".to_string()]).unwrap_err();
        assert_eq!(
            err,
            LabelError::MissingOneDayReturn {
                column: "A_pdiff_0d_1d".into()
            }
        );
    }

    #[test]
    fn empty_ticker_list_is_rejected() {
        let (panel, _) = featured(&[("A", vec![1.0, 2.0])]);
        assert_eq!(label_beat_index_1d(panel, &[]).unwrap_err(), LabelError::NoTickers);
    }

    #[test]
    fn cash_forward_return_is_zero() {
        let (panel, _) = featured(&[("A", vec![1.0, 2.0, 3.0])]);
        let out = add_forward_return(panel, "cash").unwrap();
        let fwd = out.column("label_cash_pdiff_1f").unwrap();
        assert_eq!(&fwd[..2], &[0.0, 0.0]);
        assert!(fwd[2].is_nan());
        assert!(!out.contains("label_cash"));
    }

    #[test]
    fn positive_rate_over_defined_rows() {
        let (panel, tickers) = featured(&[
            ("A", vec![100.0, 110.0, 121.0]),
            ("B", vec![100.0, 90.0, 99.0]),
        ]);
        let out = label_beat_index_1d(panel, &tickers).unwrap();
        // Defined rows: 0 and 1 → labels (1,0) and (0,0).
        let rate = label_positive_rate(&out, &tickers).unwrap().unwrap();
        assert!((rate - 0.25).abs() < 1e-12);
    }
}
