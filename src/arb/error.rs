use std::time::Duration;

use thiserror::Error;

use super::types::{Asset, AssetPair};

/// Errors that abort an optimization pass.
///
/// Expected absences (a pair without liquidity, no feasible cycle, a selection
/// below the profit threshold) are not errors; they are reported as values by
/// the graph builder, optimizer and dispatcher respectively.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArbError {
    /// Malformed or inconsistent observation for an ordered pair
    #[error("Invalid market data for {pair}: {reason}")]
    PairData {
        /// The offending pair
        pair: AssetPair,
        /// What is wrong with it
        reason: String,
    },

    /// Malformed or inconsistent price for a single asset
    #[error("Invalid market data for {asset}: {reason}")]
    AssetData {
        /// The offending asset
        asset: Asset,
        /// What is wrong with it
        reason: String,
    },

    /// Configuration rejected at load time
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A solver ran out of its time or iteration budget
    #[error("{backend} optimizer exceeded its budget ({iterations} iterations, {elapsed:?})")]
    OptimizationTimeout {
        /// Name of the backend that gave up
        backend: &'static str,
        /// Iterations spent before giving up
        iterations: u64,
        /// Wall time spent before giving up
        elapsed: Duration,
    },

    /// A solver returned an edge set violating flow conservation
    #[error("{backend} optimizer returned a selection violating flow conservation")]
    InfeasibleSolution {
        /// Name of the backend whose output was rejected
        backend: &'static str,
    },

    /// An edge set handed to the dispatcher is not balanced at some asset
    #[error("Selection is unbalanced at {asset}: in-degree {in_degree}, out-degree {out_degree}")]
    UnbalancedSelection {
        /// The asset where in-degree and out-degree differ
        asset: Asset,
        /// Selected edges entering the asset
        in_degree: usize,
        /// Selected edges leaving the asset
        out_degree: usize,
    },
}

impl ArbError {
    /// Shorthand for a [`ArbError::PairData`] error
    pub fn pair_data(pair: &AssetPair, reason: impl Into<String>) -> Self {
        Self::PairData {
            pair: pair.clone(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`ArbError::AssetData`] error
    pub fn asset_data(asset: &Asset, reason: impl Into<String>) -> Self {
        Self::AssetData {
            asset: asset.clone(),
            reason: reason.into(),
        }
    }
}
