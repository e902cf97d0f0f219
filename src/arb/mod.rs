//! # Arbitrage Module
//!
//! Graph-based arbitrage detection over a single market snapshot: the cost
//! model weighs each ordered pair, the graph builder keeps the profitable
//! ones, the optimizer selects a path or a set of closed cycles and the
//! dispatcher turns that selection into ordered trade instructions.

/// Slippage and edge weight computation
pub mod cost;
/// Threshold gate and trade instruction ordering
pub mod dispatch;
/// One pass from snapshot to dispatch plan
pub mod engine;
/// Error taxonomy
pub mod error;
/// Weighted graph of profitable trades
pub mod graph;
/// Record of emitted trades and their realized profit
pub mod ledger;
/// Path and cycle selection
pub mod optimizer;
/// Test helpers and utilities
#[cfg(test)]
pub(crate) mod test_helpers;
/// Market data types
pub mod types;
