/*!
 * # Arbgraph - Graph-Based Arbitrage Detection
 *
 * Arbgraph looks for arbitrage opportunities across asset pairs by modelling
 * one market snapshot as a weighted directed graph and optimizing over it.
 *
 * ## Core Features
 *
 * - **Cost Model**: Constant-product slippage plus gas and bridging costs per trade
 * - **Graph Building**: One edge per ordered pair whose net rate is positive
 * - **Cycle Optimization**: Most profitable flow-conserving edge set, exact or heuristic
 * - **Path Search**: Most profitable path between two configured assets
 * - **Dispatch**: Threshold gating, ordered trade instructions and a reconciliation ledger
 *
 * ## Module Structure
 *
 * - `arb`: Cost model, graph, optimizer, dispatcher and ledger
 * - `config`: Engine configuration, loading and validation
 * - `utils`: Utility functions and helpers
 */

/// Arbitrage detection and dispatch
pub mod arb;
/// Configuration management for the engine
pub mod config;
/// Utility functions and helpers
pub mod utils;
