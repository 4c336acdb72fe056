//! Data source trait and structured error types.
//!
//! A `DataSource` turns (tickers, window, interval) into a raw panel whose
//! columns are named `{field}.{ticker}` (e.g. `open.AAPL`). The store sits
//! beside it; sources know nothing about persistence.

use crate::panel::{Panel, PanelError};
use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Raw daily OHLCV bar from a data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub adj_close: f64,
}

impl RawBar {
    pub fn field(&self, field: PriceField) -> f64 {
        match field {
            PriceField::Open => self.open,
            PriceField::High => self.high,
            PriceField::Low => self.low,
            PriceField::Close => self.close,
            PriceField::AdjClose => self.adj_close,
            PriceField::Volume => self.volume,
        }
    }
}

/// Structured error types for data operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("no stored snapshots in {dir}; run `download` first")]
    NoSnapshots { dir: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("parquet I/O error: {0}")]
    Parquet(String),

    #[error("invalid {what} '{value}'")]
    InvalidSetting { what: &'static str, value: String },

    #[error(transparent)]
    Panel(#[from] PanelError),

    #[error("data error: {0}")]
    Other(String),
}

/// Which bar field a raw column holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceField {
    Open,
    High,
    Low,
    Close,
    AdjClose,
    Volume,
}

impl PriceField {
    pub const ALL: [PriceField; 6] = [
        PriceField::Open,
        PriceField::High,
        PriceField::Low,
        PriceField::Close,
        PriceField::AdjClose,
        PriceField::Volume,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PriceField::Open => "open",
            PriceField::High => "high",
            PriceField::Low => "low",
            PriceField::Close => "close",
            PriceField::AdjClose => "adj_close",
            PriceField::Volume => "volume",
        }
    }

    /// Raw panel column holding this field for `ticker`.
    pub fn column(&self, ticker: &str) -> String {
        format!("{}.{ticker}", self.as_str())
    }
}

impl fmt::Display for PriceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bar interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interval {
    #[default]
    #[serde(rename = "1d")]
    Daily,
    #[serde(rename = "1wk")]
    Weekly,
    #[serde(rename = "1mo")]
    Monthly,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Daily => "1d",
            Interval::Weekly => "1wk",
            Interval::Monthly => "1mo",
        }
    }

    /// Number of bars in a year.
    pub fn periods_per_year(&self) -> f64 {
        match self {
            Interval::Daily => 252.0,
            Interval::Weekly => 52.0,
            Interval::Monthly => 12.0,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A relative lookback such as `5y`, `1mo`, `2wk` or `30d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Lookback {
    Days(u32),
    Weeks(u32),
    Months(u32),
    Years(u32),
}

/// Longest accepted lookback, in years.
pub const MAX_LOOKBACK_YEARS: u32 = 200;

impl Lookback {
    /// First date covered when looking back from `today`, clamped to the
    /// earliest representable date.
    pub fn start_from(&self, today: NaiveDate) -> NaiveDate {
        let start = match *self {
            Lookback::Days(n) => today.checked_sub_days(Days::new(u64::from(n))),
            Lookback::Weeks(n) => today.checked_sub_days(Days::new(7 * u64::from(n))),
            Lookback::Months(n) => today.checked_sub_months(Months::new(n)),
            Lookback::Years(n) => i32::try_from(n)
                .ok()
                .and_then(|n| today.year().checked_sub(n))
                .and_then(|year| today.with_year(year))
                .or_else(|| {
                    n.checked_mul(12)
                        .and_then(|months| today.checked_sub_months(Months::new(months)))
                }),
        };
        start.unwrap_or(NaiveDate::MIN)
    }
}

impl FromStr for Lookback {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DataError::InvalidSetting {
            what: "lookback period",
            value: s.to_string(),
        };
        let split = s.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
        let (digits, unit) = s.split_at(split);
        let n: u32 = digits.parse().map_err(|_| invalid())?;
        let (lookback, per_year) = match unit {
            "d" => (Lookback::Days(n), 366),
            "wk" => (Lookback::Weeks(n), 53),
            "mo" => (Lookback::Months(n), 12),
            "y" => (Lookback::Years(n), 1),
            _ => return Err(invalid()),
        };
        if n == 0 || n > MAX_LOOKBACK_YEARS * per_year {
            return Err(invalid());
        }
        Ok(lookback)
    }
}

impl TryFrom<String> for Lookback {
    type Error = DataError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Lookback> for String {
    fn from(value: Lookback) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Lookback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookback::Days(n) => write!(f, "{n}d"),
            Lookback::Weeks(n) => write!(f, "{n}wk"),
            Lookback::Months(n) => write!(f, "{n}mo"),
            Lookback::Years(n) => write!(f, "{n}y"),
        }
    }
}

/// How far back a fetch reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryWindow {
    /// Relative to today: used for a first download.
    Lookback(Lookback),
    /// Everything from this date on: used for incremental updates.
    Since(NaiveDate),
}

impl HistoryWindow {
    pub fn start(&self, today: NaiveDate) -> NaiveDate {
        match self {
            HistoryWindow::Lookback(lb) => lb.start_from(today),
            HistoryWindow::Since(date) => *date,
        }
    }
}

/// Source of raw price history.
pub trait DataSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Fetch a raw `{field}.{ticker}` panel. An empty panel means no data in the window.
    fn fetch_history(
        &self,
        tickers: &[String],
        window: HistoryWindow,
        interval: Interval,
    ) -> Result<Panel, DataError>;
}
