//! Market data acquisition and snapshot persistence.

pub mod align;
pub mod provider;
pub mod store;
pub mod yahoo;

pub use align::align_bars;
pub use provider::{
    DataError, DataSource, HistoryWindow, Interval, Lookback, PriceField, RawBar, MAX_LOOKBACK_YEARS,
};
pub use store::{PanelStore, ParquetStore};
pub use yahoo::YahooProvider;
