//! Parquet snapshot store.
//!
//! Layout: `{data_dir}/{group}/{YYYY-MM-DD}.parquet`, one file per snapshot
//! named by the snapshot's maximum date. Preprocessed panels live beside the
//! raw snapshots under `{data_dir}/{group}/preprocessed/`.
//!
//! - Atomic writes (write to .tmp, rename into place)
//! - Loading folds every snapshot oldest first, so later downloads extend
//!   earlier ones under the store's [`OverlapPolicy`]
//! - Corrupt snapshots are quarantined (`{file}.quarantined`) and skipped

use super::provider::DataError;
use crate::panel::{OverlapPolicy, Panel};
use chrono::NaiveDate;
use polars::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const DATE_COLUMN: &str = "date";
const PREPROCESSED_DIR: &str = "preprocessed";

/// Persistence for raw snapshots and preprocessed panels.
pub trait PanelStore {
    /// Merged view of every stored snapshot. Errors when nothing is stored.
    fn load_latest(&self) -> Result<Panel, DataError>;

    /// Persist a panel as a new snapshot keyed by its maximum date.
    ///
    /// Returns the written path, or `None` when the panel is empty.
    fn save(&self, panel: &Panel) -> Result<Option<PathBuf>, DataError>;

    /// Persist a preprocessed (feature + label) panel.
    fn save_preprocessed(&self, panel: &Panel) -> Result<Option<PathBuf>, DataError>;

    /// Most recent preprocessed panel.
    fn load_preprocessed(&self) -> Result<Panel, DataError>;
}

/// Parquet-backed store for one ticker group.
#[derive(Debug, Clone)]
pub struct ParquetStore {
    root: PathBuf,
    group: String,
    overlap: OverlapPolicy,
}

impl ParquetStore {
    pub fn new(data_dir: impl Into<PathBuf>, group: impl Into<String>) -> Self {
        Self {
            root: data_dir.into(),
            group: group.into(),
            overlap: OverlapPolicy::default(),
        }
    }

    pub fn with_overlap(mut self, overlap: OverlapPolicy) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn overlap(&self) -> OverlapPolicy {
        self.overlap
    }

    /// Directory holding this group's raw snapshots.
    pub fn dir(&self) -> PathBuf {
        self.root.join(&self.group)
    }

    fn preprocessed_dir(&self) -> PathBuf {
        self.dir().join(PREPROCESSED_DIR)
    }

    pub fn snapshot_path(&self, max_date: NaiveDate) -> PathBuf {
        snapshot_file(&self.dir(), max_date)
    }

    /// Raw snapshot files, oldest first.
    pub fn snapshots(&self) -> Result<Vec<PathBuf>, DataError> {
        list_snapshots(&self.dir())
    }
}

impl PanelStore for ParquetStore {
    fn load_latest(&self) -> Result<Panel, DataError> {
        let files = self.snapshots()?;
        let mut merged: Option<Panel> = None;

        for path in &files {
            match read_panel(path) {
                Ok(panel) => {
                    debug!(path = %path.display(), rows = panel.height(), "read snapshot");
                    merged = Some(match merged {
                        Some(acc) => acc.combine(panel, self.overlap),
                        None => panel,
                    });
                }
                Err(e) => quarantine(path, &e),
            }
        }

        let panel = merged.ok_or_else(|| DataError::NoSnapshots {
            dir: self.dir().display().to_string(),
        })?;
        info!(
            group = %self.group,
            snapshots = files.len(),
            rows = panel.height(),
            columns = panel.width(),
            "loaded stored panel"
        );
        Ok(panel)
    }

    fn save(&self, panel: &Panel) -> Result<Option<PathBuf>, DataError> {
        write_snapshot(&self.dir(), panel)
    }

    fn save_preprocessed(&self, panel: &Panel) -> Result<Option<PathBuf>, DataError> {
        write_snapshot(&self.preprocessed_dir(), panel)
    }

    fn load_preprocessed(&self) -> Result<Panel, DataError> {
        let dir = self.preprocessed_dir();
        let mut files = list_snapshots(&dir)?;
        while let Some(path) = files.pop() {
            match read_panel(&path) {
                Ok(panel) => {
                    info!(path = %path.display(), rows = panel.height(), "loaded preprocessed panel");
                    return Ok(panel);
                }
                Err(e) => quarantine(&path, &e),
            }
        }
        Err(DataError::NoSnapshots {
            dir: dir.display().to_string(),
        })
    }
}

fn snapshot_file(dir: &Path, max_date: NaiveDate) -> PathBuf {
    dir.join(format!("{}.parquet", max_date.format("%Y-%m-%d")))
}

fn snapshot_date(path: &Path) -> Option<NaiveDate> {
    if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}

fn list_snapshots(dir: &Path) -> Result<Vec<PathBuf>, DataError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(dir).map_err(|e| DataError::Store(format!("read dir: {e}")))?;

    let mut dated = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| DataError::Store(format!("dir entry: {e}")))?
            .path();
        // Skip .tmp, .quarantined and anything not named by a date
        if let Some(date) = snapshot_date(&path) {
            dated.push((date, path));
        }
    }
    dated.sort_by_key(|(date, _)| *date);
    Ok(dated.into_iter().map(|(_, p)| p).collect())
}

fn write_snapshot(dir: &Path, panel: &Panel) -> Result<Option<PathBuf>, DataError> {
    let Some(max_date) = panel.max_date() else {
        warn!(dir = %dir.display(), "refusing to store an empty panel");
        return Ok(None);
    };

    fs::create_dir_all(dir).map_err(|e| DataError::Store(format!("failed to create dir: {e}")))?;

    let path = snapshot_file(dir, max_date);
    let tmp_path = path.with_extension("parquet.tmp");
    let mut df = panel_to_dataframe(panel)?;
    write_parquet(&mut df, &tmp_path)?;

    fs::rename(&tmp_path, &path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        DataError::Store(format!("atomic rename failed: {e}"))
    })?;

    info!(path = %path.display(), rows = panel.height(), columns = panel.width(), "saved snapshot");
    Ok(Some(path))
}

fn quarantine(path: &Path, err: &DataError) {
    let target = path.with_extension("parquet.quarantined");
    warn!(path = %path.display(), error = %err, "quarantining corrupt snapshot");
    let _ = fs::rename(path, target);
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn epoch() -> NaiveDate {
    NaiveDate::default()
}

fn panel_to_dataframe(panel: &Panel) -> Result<DataFrame, DataError> {
    let days: Vec<i32> = panel
        .dates()
        .iter()
        .map(|d| (*d - epoch()).num_days() as i32)
        .collect();

    let mut columns = Vec::with_capacity(panel.width() + 1);
    columns.push(
        Column::new(DATE_COLUMN.into(), days)
            .cast(&DataType::Date)
            .map_err(|e| DataError::Parquet(format!("date cast: {e}")))?,
    );
    for name in panel.column_names() {
        let values = panel.require(name)?;
        columns.push(Column::new(name.as_str().into(), values));
    }

    DataFrame::new(columns).map_err(|e| DataError::Parquet(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), DataError> {
    let file = fs::File::create(path).map_err(|e| DataError::Parquet(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(|e| DataError::Parquet(format!("write parquet: {e}")))?;
    Ok(())
}

/// Load a snapshot and validate it: a date column, at least one row, f64 values.
fn read_panel(path: &Path) -> Result<Panel, DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::Parquet(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::Parquet(format!("read: {e}")))?;

    if df.height() == 0 {
        return Err(DataError::Store("empty snapshot".into()));
    }

    let date_ca = df
        .column(DATE_COLUMN)
        .map_err(|e| DataError::Store(format!("missing date column: {e}")))?
        .date()
        .map_err(|e| DataError::Parquet(format!("date column type: {e}")))?;

    let mut dates = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let days = date_ca
            .get(i)
            .ok_or_else(|| DataError::Parquet(format!("null date at row {i}")))?;
        dates.push(epoch() + chrono::Duration::days(i64::from(days)));
    }

    let mut panel = Panel::new(dates)?;
    for column in df.get_columns() {
        let name = column.name().as_str();
        if name == DATE_COLUMN {
            continue;
        }
        let ca = column
            .f64()
            .map_err(|e| DataError::Parquet(format!("column '{name}' type: {e}")))?;
        let values = ca.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect();
        panel.insert(name, values)?;
    }

    Ok(panel)
}
