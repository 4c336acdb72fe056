//! Typed TOML run configuration.
//!
//! One file drives every stage:
//!
//! ```toml
//! [data]
//! group = "dowjones"
//! period = "5y"
//! interval = "1d"
//! data_dir = "data"
//!
//! [preprocess]
//! price = "open"
//! kinds = ["diff", "pdiff", "lag"]
//! [[preprocess.windows]]
//! anchor = 0
//! lags = [1, 2, 3, 4, 5, 10, 240]
//!
//! [backtest]
//! initial_value = 1.0
//! [[backtest.policies]]
//! type = "max_feature"
//! kind = "pdiff"
//! anchor = 0
//! lag = 240
//!
//! [monte_carlo]
//! trials = 1000
//! seed = 42
//! ```
//!
//! Every section is optional and falls back to [`RunConfig::default`].
//! Validation runs once at load.

use daytrade_core::data::{Interval, Lookback, PriceField};
use daytrade_core::{
    AnchorLagMap, FeatureConfig, FeatureError, FeatureKind, OverlapPolicy, PolicySpec,
    PreprocessConfig, PreprocessError, INDEX,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Lags of the production feature set, in trading days.
pub const DEFAULT_LAGS: [u32; 17] = [
    1, 2, 3, 4, 5, 10, 15, 20, 25, 30, 60, 90, 120, 150, 180, 210, 240,
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(String),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub data: DataConfig,
    pub preprocess: PreprocessSection,
    pub backtest: BacktestSection,
    pub monte_carlo: MonteCarloConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataConfig {
    /// Ticker registry group.
    pub group: String,
    /// Lookback of a first download.
    pub period: Lookback,
    pub interval: Interval,
    pub data_dir: PathBuf,
    /// Keep only the first N tickers of the group. `None` keeps all.
    pub num_tickers: Option<usize>,
    pub overlap: OverlapPolicy,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            group: "dowjones".into(),
            period: Lookback::Years(5),
            interval: Interval::Daily,
            data_dir: PathBuf::from("data"),
            num_tickers: None,
            overlap: OverlapPolicy::PreferExisting,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WindowConfig {
    pub anchor: u32,
    pub lags: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreprocessSection {
    pub price: PriceField,
    pub kinds: Vec<FeatureKind>,
    pub windows: Vec<WindowConfig>,
}

impl Default for PreprocessSection {
    fn default() -> Self {
        Self {
            price: PriceField::Open,
            kinds: vec![FeatureKind::Diff, FeatureKind::Pdiff, FeatureKind::Lag],
            windows: vec![WindowConfig {
                anchor: 0,
                lags: DEFAULT_LAGS.to_vec(),
            }],
        }
    }
}

impl PreprocessSection {
    pub fn anchor_lag_map(&self) -> AnchorLagMap {
        let mut map = AnchorLagMap::new();
        for w in &self.windows {
            map.insert(w.anchor, w.lags.iter().copied());
        }
        map
    }

    /// Validated core settings.
    pub fn to_config(&self) -> Result<PreprocessConfig, ConfigError> {
        let features = FeatureConfig::new(self.kinds.clone(), self.anchor_lag_map())?;
        Ok(PreprocessConfig::new(self.price, features)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BacktestSection {
    pub initial_value: f64,
    /// First simulated row. Defaults to the first usable day.
    pub start: Option<usize>,
    /// Last simulated row (inclusive). Defaults to the last usable day.
    pub end: Option<usize>,
    pub policies: Vec<PolicySpec>,
}

impl Default for BacktestSection {
    fn default() -> Self {
        Self {
            initial_value: 1.0,
            start: None,
            end: None,
            policies: vec![
                PolicySpec::Control {
                    ticker: INDEX.to_string(),
                },
                PolicySpec::MaxFeature {
                    kind: FeatureKind::Pdiff,
                    anchor: 0,
                    lag: 240,
                },
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonteCarloConfig {
    /// Random-policy trials forming the baseline distribution.
    pub trials: usize,
    pub seed: u64,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            trials: 1000,
            seed: 42,
        }
    }
}

impl RunConfig {
    /// Small preset for quick iterations: one month of data, two tickers,
    /// short lags.
    pub fn debug() -> Self {
        let mut cfg = Self::default().with_debug_data();
        cfg.preprocess.windows = vec![WindowConfig {
            anchor: 0,
            lags: vec![1, 2, 3, 4, 5],
        }];
        cfg.backtest.policies = vec![
            PolicySpec::Control {
                ticker: INDEX.to_string(),
            },
            PolicySpec::MaxFeature {
                kind: FeatureKind::Pdiff,
                anchor: 0,
                lag: 5,
            },
        ];
        cfg.monte_carlo.trials = 100;
        cfg
    }

    /// Shrink only the data section: `1mo` lookback, first two tickers.
    pub fn with_debug_data(mut self) -> Self {
        self.data.period = Lookback::Months(1);
        self.data.num_tickers = Some(2);
        self
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let cfg: RunConfig = toml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Content hash identifying this configuration in reports.
    pub fn run_id(&self) -> Result<String, ConfigError> {
        let json = serde_json::to_string(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data.group.trim().is_empty() {
            return Err(ConfigError::Invalid("data.group must not be empty".into()));
        }
        if self.data.num_tickers == Some(0) {
            return Err(ConfigError::Invalid("data.num_tickers must be at least 1".into()));
        }

        let pre = self.preprocess.to_config()?;

        let bt = &self.backtest;
        if !(bt.initial_value.is_finite() && bt.initial_value > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "backtest.initial_value must be positive (got {})",
                bt.initial_value
            )));
        }
        if let (Some(start), Some(end)) = (bt.start, bt.end) {
            if start > end {
                return Err(ConfigError::Invalid(format!(
                    "backtest.start ({start}) is after backtest.end ({end})"
                )));
            }
        }
        if bt.policies.is_empty() {
            return Err(ConfigError::Invalid("backtest.policies must not be empty".into()));
        }
        let mut names = HashSet::with_capacity(bt.policies.len());
        for policy in &bt.policies {
            let name = policy.name();
            if !names.insert(name.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "backtest.policies lists '{name}' more than once"
                )));
            }
            if let PolicySpec::MaxFeature { kind, anchor, lag } = policy {
                if !pre.features().has_kind(*kind) || !pre.features().windows().contains(*anchor, *lag) {
                    return Err(ConfigError::Invalid(format!(
                        "max_feature policy uses {kind} at anchor {anchor}, lag {lag}, \
                         which preprocess does not compute"
                    )));
                }
            }
        }

        if self.monte_carlo.trials == 0 {
            return Err(ConfigError::Invalid("monte_carlo.trials must be at least 1".into()));
        }
        Ok(())
    }
}
