use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use super::graph::{ArbitrageGraph, Edge};
use super::optimizer::{Budget, Meter};
use super::types::{AssetPair, MarketSnapshot, PoolObservation, PriceTable};

#[allow(dead_code)]
pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

#[allow(dead_code)]
pub fn pair(from: &str, to: &str) -> AssetPair {
    AssetPair::new(from, to)
}

#[allow(dead_code)]
pub fn prices(prices: &[(&str, f64)]) -> PriceTable {
    prices.iter().map(|(asset, price)| (*asset, *price)).collect()
}

#[allow(dead_code)]
pub fn observation(from: &str, to: &str, reserve_a: f64, reserve_b: f64) -> PoolObservation {
    PoolObservation::new(pair(from, to), reserve_a, reserve_b, epoch())
}

#[allow(dead_code)]
pub fn snapshot(price_args: &[(&str, f64)], pool_args: &[(&str, &str, f64, f64)]) -> MarketSnapshot {
    let pools = pool_args
        .iter()
        .map(|(from, to, reserve_a, reserve_b)| observation(from, to, *reserve_a, *reserve_b));
    MarketSnapshot::new(epoch(), prices(price_args), pools).unwrap()
}

#[allow(dead_code)]
pub fn edge(from: &str, to: &str, weight: f64) -> Edge {
    Edge::with_weight(pair(from, to), weight)
}

#[allow(dead_code)]
pub fn graph(edges: &[(&str, &str, f64)]) -> ArbitrageGraph {
    ArbitrageGraph::from_edges(edges.iter().map(|(from, to, weight)| edge(from, to, *weight)))
}

/// A->B->C->A, total weight 0.10
#[allow(dead_code)]
pub fn triangle() -> ArbitrageGraph {
    graph(&[("A", "B", 0.03), ("B", "C", 0.05), ("C", "A", 0.02)])
}

/// The triangle plus an A->C chord that no balanced selection can use
#[allow(dead_code)]
pub fn triangle_with_chord() -> ArbitrageGraph {
    graph(&[("A", "B", 0.03), ("B", "C", 0.05), ("C", "A", 0.02), ("A", "C", 0.01)])
}

#[allow(dead_code)]
pub fn budget() -> Budget {
    Budget {
        max_iterations: 1_000_000,
        timeout: Duration::from_secs(10),
    }
}

#[allow(dead_code)]
pub fn meter() -> Meter {
    budget().start("test")
}
