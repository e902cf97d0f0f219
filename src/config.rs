//! Engine configuration.
//!
//! Loaded once per process from a JSON file (camelCase keys), optionally
//! overridden from the environment, and validated before any pass runs.
use std::collections::BTreeSet;
use std::env;
use std::path::Path;
use std::time::Duration;

use eyre::{Result, WrapErr};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::arb::error::ArbError;
use crate::arb::optimizer::annealing::AnnealingConfig;
use crate::arb::types::{Asset, AssetPair, PriceTable};

/// Which ordered pairs the graph builder considers
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TradePairs {
    /// Every ordered pair of distinct priced assets
    #[default]
    AllPermutations,
    /// Exactly these ordered pairs
    Explicit(Vec<AssetPair>),
}

impl TradePairs {
    /// The candidate pairs for a price table, deduplicated and ordered
    #[must_use]
    pub fn resolve(&self, prices: &PriceTable) -> Vec<AssetPair> {
        match self {
            Self::AllPermutations => prices
                .assets()
                .permutations(2)
                .map(|pair| AssetPair::new(pair[0].clone(), pair[1].clone()))
                .collect(),
            Self::Explicit(pairs) => pairs
                .iter()
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
        }
    }
}

/// Solver used by the cycle strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OptimizerBackend {
    /// Branch and bound, optimal within its budget
    #[default]
    Exact,
    /// Seeded simulated annealing
    Heuristic,
}

/// What the optimizer searches for
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Strategy {
    /// Flow-conserving edge subsets, i.e. closed cycles
    #[default]
    Cycle,
    /// Best path from `pathStart` to `pathEnd`
    Path,
}

/// Configuration of the whole engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Candidate pairs
    pub trade_pairs: TradePairs,
    /// Trade size all costs are normalized against
    pub trade_size: f64,
    /// Minimum total weight for a selection to be dispatched
    pub min_profit_threshold: f64,
    /// Cycle or single path
    pub strategy: Strategy,
    /// Solver for the cycle strategy
    pub optimizer_backend: OptimizerBackend,
    /// Wall-clock budget of one solve, in milliseconds. A heuristic fallback
    /// only gets what the exact backend left over.
    pub optimizer_timeout_ms: u64,
    /// Search-node budget of one solve
    pub max_iterations: u64,
    /// Retry with the heuristic backend when the exact one runs out of budget
    pub fallback_to_heuristic: bool,
    /// Start asset of the path strategy
    pub path_start: Option<Asset>,
    /// End asset of the path strategy
    pub path_end: Option<Asset>,
    /// Heuristic backend tuning
    pub annealing: AnnealingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trade_pairs: TradePairs::AllPermutations,
            trade_size: 10.0,
            min_profit_threshold: 0.0,
            strategy: Strategy::Cycle,
            optimizer_backend: OptimizerBackend::Exact,
            optimizer_timeout_ms: 2_000,
            max_iterations: 1_000_000,
            fallback_to_heuristic: true,
            path_start: None,
            path_end: None,
            annealing: AnnealingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Loads the configuration from a JSON file, applies environment
    /// overrides and validates the result.
    ///
    /// # Errors
    /// * If the file cannot be read or parsed
    /// * If an override variable cannot be parsed
    /// * If the resulting configuration is invalid
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .wrap_err_with(|| format!("Failed to parse config {}", path.display()))?;
        let config = config.with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration with environment overrides applied
    ///
    /// # Errors
    /// * If an override variable cannot be parsed
    /// * If the resulting configuration is invalid
    pub fn from_env() -> Result<Self> {
        let config = Self::default().with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `ARB_*` overrides from the environment (and `.env`, if present)
    ///
    /// # Errors
    /// * If an override variable is set but cannot be parsed
    pub fn with_env_overrides(mut self) -> Result<Self> {
        dotenv::dotenv().ok();

        if let Some(value) = env_var("ARB_TRADE_SIZE") {
            self.trade_size = value
                .parse()
                .wrap_err_with(|| format!("ARB_TRADE_SIZE is not a number: {value}"))?;
        }
        if let Some(value) = env_var("ARB_MIN_PROFIT") {
            self.min_profit_threshold = value
                .parse()
                .wrap_err_with(|| format!("ARB_MIN_PROFIT is not a number: {value}"))?;
        }
        if let Some(value) = env_var("ARB_OPTIMIZER_BACKEND") {
            self.optimizer_backend = match value.to_ascii_lowercase().as_str() {
                "exact" => OptimizerBackend::Exact,
                "heuristic" => OptimizerBackend::Heuristic,
                other => eyre::bail!("ARB_OPTIMIZER_BACKEND must be exact or heuristic, got {other}"),
            };
        }
        if let Some(value) = env_var("ARB_OPTIMIZER_TIMEOUT_MS") {
            self.optimizer_timeout_ms = value
                .parse()
                .wrap_err_with(|| format!("ARB_OPTIMIZER_TIMEOUT_MS is not an integer: {value}"))?;
        }
        Ok(self)
    }

    /// Checks every field that could only fail later, mid-pass
    ///
    /// # Errors
    /// * If any field is out of range or a required field is missing
    pub fn validate(&self) -> Result<(), ArbError> {
        if !(self.trade_size.is_finite() && self.trade_size > 0.0) {
            return Err(invalid(format!("tradeSize must be positive, got {}", self.trade_size)));
        }
        if !self.min_profit_threshold.is_finite() {
            return Err(invalid("minProfitThreshold must be finite"));
        }
        if self.optimizer_timeout_ms == 0 {
            return Err(invalid("optimizerTimeoutMs must be positive"));
        }
        if self.max_iterations == 0 {
            return Err(invalid("maxIterations must be positive"));
        }
        if let TradePairs::Explicit(pairs) = &self.trade_pairs {
            if pairs.is_empty() {
                return Err(invalid("tradePairs must not be empty"));
            }
            if let Some(pair) = pairs.iter().find(|pair| pair.from == pair.to) {
                return Err(invalid(format!("tradePairs contains self pair {pair}")));
            }
        }
        if self.strategy == Strategy::Path && (self.path_start.is_none() || self.path_end.is_none()) {
            return Err(invalid("path strategy requires pathStart and pathEnd"));
        }
        self.annealing.validate()
    }

    /// Wall-clock budget of one solve
    #[must_use]
    pub const fn optimizer_timeout(&self) -> Duration {
        Duration::from_millis(self.optimizer_timeout_ms)
    }
}

/// A non-empty environment variable
fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// Shorthand for [`ArbError::InvalidConfig`]
fn invalid(reason: impl Into<String>) -> ArbError {
    ArbError::InvalidConfig(reason.into())
}
