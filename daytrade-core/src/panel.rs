//! Time-by-column panel of daily values.
//!
//! A panel has one row per trading day (strictly increasing, no duplicates)
//! and any number of named `f64` columns of the same length. Missing values
//! are NaN. Column order is insertion order and is preserved by every
//! transformation, so positional logic downstream stays reproducible.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::ops::Range;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PanelError {
    #[error("dates must be strictly increasing: row {row} has {next} after {prev}")]
    UnorderedDates {
        row: usize,
        prev: NaiveDate,
        next: NaiveDate,
    },

    #[error("column '{name}' has {actual} rows but the panel has {expected}")]
    LengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("missing column '{0}'")]
    MissingColumn(String),

    #[error("row range {start}..{end} out of bounds for a panel of {height} rows")]
    RowsOutOfRange {
        start: usize,
        end: usize,
        height: usize,
    },
}

/// Which side wins when two panels carry a value for the same (date, column).
///
/// The losing side is still used when the winning value is NaN, so combining
/// never turns a known value into a missing one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Keep the value already held by the existing panel.
    #[default]
    PreferExisting,
    /// Overwrite with the value from the freshly fetched panel.
    PreferFresh,
}

#[derive(Debug, Clone, Default)]
pub struct Panel {
    dates: Vec<NaiveDate>,
    names: Vec<String>,
    columns: HashMap<String, Vec<f64>>,
}

impl Panel {
    /// Create a panel with the given row index and no columns.
    pub fn new(dates: Vec<NaiveDate>) -> Result<Self, PanelError> {
        for (row, pair) in dates.windows(2).enumerate() {
            if pair[1] <= pair[0] {
                return Err(PanelError::UnorderedDates {
                    row: row + 1,
                    prev: pair[0],
                    next: pair[1],
                });
            }
        }
        Ok(Self {
            dates,
            names: Vec::new(),
            columns: HashMap::new(),
        })
    }

    /// Builder form of [`Panel::insert`].
    pub fn with_column(
        mut self,
        name: impl Into<String>,
        values: Vec<f64>,
    ) -> Result<Self, PanelError> {
        self.insert(name, values)?;
        Ok(self)
    }

    pub fn height(&self) -> usize {
        self.dates.len()
    }

    pub fn width(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(|v| v.as_slice())
    }

    /// Like [`Panel::column`] but a missing column is an error.
    pub fn require(&self, name: &str) -> Result<&[f64], PanelError> {
        self.column(name)
            .ok_or_else(|| PanelError::MissingColumn(name.to_string()))
    }

    pub fn value(&self, name: &str, row: usize) -> Option<f64> {
        self.column(name).and_then(|c| c.get(row).copied())
    }

    pub fn max_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    pub fn min_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    /// Row index of a date, if present.
    pub fn row_of(&self, date: NaiveDate) -> Option<usize> {
        self.dates.binary_search(&date).ok()
    }

    /// Add a column, or replace an existing one in place (its position is kept).
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<(), PanelError> {
        let name = name.into();
        if values.len() != self.dates.len() {
            return Err(PanelError::LengthMismatch {
                name,
                expected: self.dates.len(),
                actual: values.len(),
            });
        }
        if !self.columns.contains_key(&name) {
            self.names.push(name.clone());
        }
        self.columns.insert(name, values);
        Ok(())
    }

    /// New panel holding only `names`, in the order given.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Panel, PanelError> {
        let mut out = Panel {
            dates: self.dates.clone(),
            names: Vec::with_capacity(names.len()),
            columns: HashMap::with_capacity(names.len()),
        };
        for name in names {
            let name = name.as_ref();
            out.insert(name, self.require(name)?.to_vec())?;
        }
        Ok(out)
    }

    /// Copy of the rows in `rows`.
    pub fn slice_rows(&self, rows: Range<usize>) -> Result<Panel, PanelError> {
        if rows.start > rows.end || rows.end > self.height() {
            return Err(PanelError::RowsOutOfRange {
                start: rows.start,
                end: rows.end,
                height: self.height(),
            });
        }
        let columns = self
            .columns
            .iter()
            .map(|(name, values)| (name.clone(), values[rows.clone()].to_vec()))
            .collect();
        Ok(Panel {
            dates: self.dates[rows].to_vec(),
            names: self.names.clone(),
            columns,
        })
    }

    /// Drop every row that has a NaN in any column.
    pub fn drop_incomplete_rows(self) -> Panel {
        let keep: Vec<usize> = (0..self.height())
            .filter(|&row| self.columns.values().all(|c| !c[row].is_nan()))
            .collect();
        if keep.len() == self.height() {
            return self;
        }
        self.take_rows(&keep)
    }

    fn take_rows(self, rows: &[usize]) -> Panel {
        let dates = rows.iter().map(|&r| self.dates[r]).collect();
        let columns = self
            .columns
            .into_iter()
            .map(|(name, values)| (name, rows.iter().map(|&r| values[r]).collect()))
            .collect();
        Panel {
            dates,
            names: self.names,
            columns,
        }
    }

    /// Merge a freshly fetched panel into this one.
    ///
    /// Rows are the union of both date sets, columns keep this panel's order
    /// followed by any columns only `fresh` has. Where both panels hold a
    /// value for the same cell, `policy` picks the winner.
    pub fn combine(self, fresh: Panel, policy: OverlapPolicy) -> Panel {
        if fresh.is_empty() {
            return self;
        }
        if self.is_empty() && self.width() == 0 {
            return fresh;
        }

        let dates: Vec<NaiveDate> = self
            .dates
            .iter()
            .chain(fresh.dates.iter())
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut names = self.names.clone();
        for name in &fresh.names {
            if !self.columns.contains_key(name) {
                names.push(name.clone());
            }
        }

        let mut columns = HashMap::with_capacity(names.len());
        for name in &names {
            let values = dates
                .iter()
                .map(|&date| {
                    let existing = self.cell(name, date);
                    let incoming = fresh.cell(name, date);
                    let (first, second) = match policy {
                        OverlapPolicy::PreferExisting => (existing, incoming),
                        OverlapPolicy::PreferFresh => (incoming, existing),
                    };
                    if first.is_nan() {
                        second
                    } else {
                        first
                    }
                })
                .collect();
            columns.insert(name.clone(), values);
        }

        Panel {
            dates,
            names,
            columns,
        }
    }

    fn cell(&self, name: &str, date: NaiveDate) -> f64 {
        match (self.row_of(date), self.column(name)) {
            (Some(row), Some(values)) => values[row],
            _ => f64::NAN,
        }
    }
}

/// Shift a series by `periods` rows.
///
/// Positive periods move values later in time (row `i` receives the value of
/// row `i - periods`), negative periods pull values from the future. Rows
/// with no source value become NaN.
pub fn shift(series: &[f64], periods: i64) -> Vec<f64> {
    let n = series.len();
    let mut out = vec![f64::NAN; n];
    if periods >= 0 {
        let p = periods as usize;
        if p < n {
            out[p..].copy_from_slice(&series[..n - p]);
        }
    } else {
        let p = periods.unsigned_abs() as usize;
        if p < n {
            out[..n - p].copy_from_slice(&series[p..]);
        }
    }
    out
}
