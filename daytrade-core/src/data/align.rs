//! Multi-ticker time alignment.
//!
//! Given bars for several tickers, build one raw panel on the union of their
//! dates. A ticker with no bar on a date gets NaN in every field for that
//! row; no forward-fill is applied.

use super::provider::{PriceField, RawBar};
use crate::panel::{Panel, PanelError};
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};

/// Align per-ticker bars into a raw `{field}.{ticker}` panel.
///
/// Columns are emitted ticker by ticker in `order`, fields in
/// [`PriceField::ALL`] order. Tickers absent from `bars` are skipped.
pub fn align_bars(
    bars: &HashMap<String, Vec<RawBar>>,
    order: &[String],
) -> Result<Panel, PanelError> {
    let dates: Vec<NaiveDate> = bars
        .values()
        .flat_map(|b| b.iter().map(|bar| bar.date))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut panel = Panel::new(dates)?;

    for ticker in order {
        let Some(ticker_bars) = bars.get(ticker) else {
            continue;
        };
        let by_date: HashMap<NaiveDate, &RawBar> =
            ticker_bars.iter().map(|b| (b.date, b)).collect();

        for field in PriceField::ALL {
            let values = panel
                .dates()
                .iter()
                .map(|date| by_date.get(date).map_or(f64::NAN, |b| b.field(field)))
                .collect();
            panel.insert(field.column(ticker), values)?;
        }
    }

    Ok(panel)
}
