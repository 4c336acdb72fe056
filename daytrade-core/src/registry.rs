//! Ticker registry: named, ordered ticker groups.
//!
//! A group (e.g. an index constituent list) resolves to an ordered list of
//! symbols. Order matters: the feature engine and the max-feature policy
//! iterate tickers in registry order, so ties and column layout are
//! reproducible. Registries can be loaded from TOML:
//!
//! ```toml
//! [groups]
//! dowjones = ["AAPL", "AMGN", "AMZN"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown ticker group '{group}' (known: {known})")]
    UnknownGroup { group: String, known: String },

    #[error("ticker group '{0}' is empty")]
    EmptyGroup(String),

    #[error("read registry file: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse registry TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize registry: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Dow Jones Industrial Average constituents.
const DOW_JONES: [&str; 30] = [
    "AAPL", "AMGN", "AMZN", "AXP", "BA", "CAT", "CRM", "CSCO", "CVX", "DIS", "GS", "HD", "HON",
    "IBM", "JNJ", "JPM", "KO", "MCD", "MMM", "MRK", "MSFT", "NKE", "NVDA", "PG", "SHW", "TRV",
    "UNH", "V", "VZ", "WMT",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerRegistry {
    pub groups: BTreeMap<String, Vec<String>>,
}

impl TickerRegistry {
    /// Registry with the groups shipped in the binary.
    pub fn builtin() -> Self {
        let mut groups = BTreeMap::new();
        groups.insert(
            "dowjones".to_string(),
            DOW_JONES.iter().map(|s| s.to_string()).collect(),
        );
        groups.insert(
            "debug".to_string(),
            DOW_JONES[..2].iter().map(|s| s.to_string()).collect(),
        );
        Self { groups }
    }

    pub fn from_file(path: &Path) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, RegistryError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, RegistryError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Resolve a group to its ordered tickers.
    pub fn resolve(&self, group: &str) -> Result<&[String], RegistryError> {
        let tickers = self
            .groups
            .get(group)
            .ok_or_else(|| RegistryError::UnknownGroup {
                group: group.to_string(),
                known: self.group_names().join(", "),
            })?;
        if tickers.is_empty() {
            return Err(RegistryError::EmptyGroup(group.to_string()));
        }
        Ok(tickers)
    }

    /// Resolve a group, keeping only the first `limit` tickers when given.
    pub fn resolve_limited(
        &self,
        group: &str,
        limit: Option<usize>,
    ) -> Result<Vec<String>, RegistryError> {
        let tickers = self.resolve(group)?;
        let n = limit.unwrap_or(tickers.len()).min(tickers.len());
        Ok(tickers[..n].to_vec())
    }

    pub fn group_names(&self) -> Vec<&str> {
        self.groups.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for TickerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
