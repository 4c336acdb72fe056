//! Download and preprocess stages.
//!
//! The refresh keeps the stored history growing: a first run fetches the
//! configured lookback, later runs fetch only the days after the last stored
//! date and fold them in under the configured overlap policy.

use chrono::{Duration, NaiveDate};
use daytrade_core::data::{DataError, DataSource, HistoryWindow, PanelStore};
use daytrade_core::{
    preprocess, Panel, PreprocessConfig, PreprocessError, RegistryError, TickerRegistry,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::DataConfig;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
}

/// Tickers of the configured group, truncated to `num_tickers` when set.
pub fn resolve_tickers(
    cfg: &DataConfig,
    registry: &TickerRegistry,
) -> Result<Vec<String>, PipelineError> {
    Ok(registry.resolve_limited(&cfg.group, cfg.num_tickers)?)
}

/// Bring the stored raw history up to date and return the merged panel.
pub fn refresh_raw(
    source: &dyn DataSource,
    store: &dyn PanelStore,
    tickers: &[String],
    cfg: &DataConfig,
    today: NaiveDate,
) -> Result<Panel, PipelineError> {
    let existing = match store.load_latest() {
        Ok(panel) => panel,
        Err(DataError::NoSnapshots { dir }) => {
            info!(%dir, "no stored snapshot, starting fresh");
            Panel::default()
        }
        Err(e) => return Err(e.into()),
    };

    let window = match existing.max_date() {
        None => HistoryWindow::Lookback(cfg.period),
        Some(last) => {
            let next = last + Duration::days(1);
            if next > today {
                info!(%last, "stored history is current");
                return Ok(existing);
            }
            HistoryWindow::Since(next)
        }
    };

    info!(
        source = source.name(),
        tickers = tickers.len(),
        from = %window.start(today),
        interval = %cfg.interval,
        "fetching history"
    );
    let fresh = source.fetch_history(tickers, window, cfg.interval)?;
    if fresh.is_empty() {
        warn!("fetch returned no rows, keeping stored history");
        return Ok(existing);
    }

    if let Some(path) = store.save(&fresh)? {
        info!(path = %path.display(), rows = fresh.height(), "saved snapshot");
    }
    let merged = existing.combine(fresh, cfg.overlap);
    info!(rows = merged.height(), columns = merged.width(), "raw history refreshed");
    Ok(merged)
}

/// Preprocess the stored raw history and persist the result.
pub fn run_preprocess(
    store: &dyn PanelStore,
    tickers: &[String],
    cfg: &PreprocessConfig,
) -> Result<Panel, PipelineError> {
    let raw = store.load_latest()?;
    let processed = preprocess(&raw, tickers, cfg)?;
    if let Some(path) = store.save_preprocessed(&processed)? {
        info!(path = %path.display(), "saved preprocessed panel");
    }
    Ok(processed)
}
