//! Daytrade core: panel, features, labels, policies and the backtest simulator.
//!
//! - Time-by-column panel with NaN-aware merge
//! - Ticker registry
//! - Anchor-and-lag feature expansion with reversible column names
//! - Next-day index-outperformance labels
//! - Stock-selection policies and the sequential simulator
//! - Data sources (Yahoo Finance) and the Parquet snapshot store

pub mod data;
pub mod features;
pub mod labels;
pub mod panel;
pub mod policy;
pub mod preprocess;
pub mod registry;
pub mod rng;
pub mod simulate;

pub use features::{
    compute_features, feature_columns, feature_name, AnchorLagMap, FeatureAddress, FeatureConfig,
    FeatureError, FeatureKind, CASH, LABEL_PREFIX,
};
pub use labels::{
    add_forward_return, forward_return_name, label_beat_index_1d, label_name,
    label_positive_rate, LabelError, INDEX,
};
pub use panel::{shift, OverlapPolicy, Panel, PanelError};
pub use policy::{ControlPolicy, MaxFeaturePolicy, Policy, PolicyError, PolicySpec, RandomPolicy};
pub use preprocess::{preprocess, select_price, PreprocessConfig, PreprocessError};
pub use registry::{RegistryError, TickerRegistry};
pub use rng::RngHierarchy;
pub use simulate::{final_value, simulate, usable_day_range, SimulationError, Trajectory};
