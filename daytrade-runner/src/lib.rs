//! Daytrade Runner: configuration, pipelines, policy comparison, metrics.
//!
//! This crate builds on `daytrade-core` to provide:
//! - Typed TOML run configuration with production and debug presets
//! - Download refresh and preprocess pipelines over a snapshot store
//! - Policy comparison against a parallel Monte Carlo random baseline
//! - Performance metrics and significance tests
//! - JSON, CSV and Markdown export

pub mod compare;
pub mod config;
pub mod export;
pub mod metrics;
mod nan_as_null;
pub mod pipeline;
pub mod significance;

pub use compare::{
    compare_policies, day_range, random_finals, CompareError, ComparisonReport, PolicyOutcome,
    RandomBaseline, SCHEMA_VERSION,
};
pub use config::{
    BacktestSection, ConfigError, DataConfig, MonteCarloConfig, PreprocessSection, RunConfig,
    WindowConfig, DEFAULT_LAGS,
};
pub use metrics::PerformanceMetrics;
pub use pipeline::{refresh_raw, resolve_tickers, run_preprocess, PipelineError};
pub use significance::{compare_samples, SignificanceReport, TestResult};
