//! Graph builder: turns one market snapshot into a weighted directed graph
//! with one node per asset and one edge per tradable, profitable ordered pair.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Debug};

use log::{debug, info};
use serde::{Serialize, Serializer};

use super::cost::{slippage, EdgeCosts};
use super::error::ArbError;
use super::types::{Asset, AssetPair, MarketSnapshot};
use crate::config::TradePairs;

/// A directed, positively weighted trade from one asset to another
#[derive(Clone, PartialEq, Serialize)]
pub struct Edge {
    /// The ordered pair traded along this edge
    #[serde(flatten)]
    pub pair: AssetPair,
    /// Net profit rate of the trade, always > 0 inside a graph
    pub weight: f64,
    /// The components `weight` was derived from
    pub costs: EdgeCosts,
}

impl Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Edge({} @ {:.6})", self.pair, self.weight)
    }
}

impl Edge {
    /// Creates an edge from its cost components
    #[must_use]
    pub fn new(pair: AssetPair, costs: EdgeCosts) -> Self {
        Self {
            weight: costs.weight(),
            pair,
            costs,
        }
    }

    /// Creates an edge with a bare weight and no cost breakdown
    #[must_use]
    pub fn with_weight(pair: AssetPair, weight: f64) -> Self {
        Self {
            pair,
            weight,
            costs: EdgeCosts {
                profitability: weight,
                slippage_cost: 0.0,
                gas_cost: 0.0,
                bridge_cost: 0.0,
            },
        }
    }

    /// The asset sold
    #[must_use]
    pub const fn source(&self) -> &Asset {
        &self.pair.from
    }

    /// The asset bought
    #[must_use]
    pub const fn target(&self) -> &Asset {
        &self.pair.to
    }
}

/// Directed graph of profitable trades, built fresh for every pass.
///
/// At most one edge exists per ordered pair and every stored edge has a
/// strictly positive weight. Nodes are implied by the edges.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ArbitrageGraph {
    /// Edges keyed by ordered pair
    edges: BTreeMap<AssetPair, Edge>,
}

impl ArbitrageGraph {
    /// Creates a graph from candidate edges, dropping every edge whose weight
    /// is not strictly positive. A later edge for the same pair replaces an
    /// earlier one.
    pub fn from_edges(edges: impl IntoIterator<Item = Edge>) -> Self {
        let edges = edges
            .into_iter()
            .filter(|edge| edge.weight > 0.0)
            .map(|edge| (edge.pair.clone(), edge))
            .collect();
        Self { edges }
    }

    /// All edges, ordered by pair
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    /// The edge for an ordered pair, if present
    #[must_use]
    pub fn edge(&self, pair: &AssetPair) -> Option<&Edge> {
        self.edges.get(pair)
    }

    /// Edges leaving `asset`, ordered by destination
    pub fn outgoing<'a>(&'a self, asset: &'a Asset) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.values().filter(move |edge| edge.source() == asset)
    }

    /// Assets touched by at least one edge
    #[must_use]
    pub fn assets(&self) -> BTreeSet<&Asset> {
        self.edges
            .values()
            .flat_map(|edge| [edge.source(), edge.target()])
            .collect()
    }

    /// Number of edges
    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Whether the graph has no edges
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Outgoing adjacency, ordered by source then destination
    #[must_use]
    pub fn adjacency(&self) -> BTreeMap<&Asset, Vec<&Edge>> {
        let mut adjacency: BTreeMap<&Asset, Vec<&Edge>> = BTreeMap::new();
        for edge in self.edges.values() {
            adjacency.entry(edge.source()).or_default().push(edge);
        }
        adjacency
    }
}

impl Serialize for ArbitrageGraph {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.edges.values())
    }
}

/// How many candidate pairs ended where during a build
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    /// Candidate pairs considered
    pub candidates: usize,
    /// Pairs that became edges
    pub admitted: usize,
    /// Pairs without a pool observation
    pub no_pool: usize,
    /// Pairs whose pool has a zero reserve
    pub no_liquidity: usize,
    /// Pairs with a missing price on either side
    pub missing_price: usize,
    /// Pairs whose weight came out zero or negative
    pub unprofitable: usize,
}

/// Builds arbitrage graphs for a fixed pair universe and trade size
#[derive(Clone, Debug)]
pub struct GraphBuilder {
    /// Which ordered pairs are candidates
    trade_pairs: TradePairs,
    /// Trade size every cost is normalized against
    trade_size: f64,
}

impl GraphBuilder {
    /// Creates a builder
    ///
    /// # Errors
    /// * If `trade_size` is not a positive finite number
    pub fn new(trade_pairs: TradePairs, trade_size: f64) -> Result<Self, ArbError> {
        if !(trade_size.is_finite() && trade_size > 0.0) {
            return Err(ArbError::InvalidConfig(format!(
                "trade size must be positive, got {trade_size}"
            )));
        }
        Ok(Self {
            trade_pairs,
            trade_size,
        })
    }

    /// Builds the graph for one snapshot.
    ///
    /// Pairs without a pool, without liquidity, without a price on either side
    /// or with a non-positive weight produce no edge. Malformed data is not
    /// skipped: the first offending pair or asset aborts the build.
    ///
    /// # Errors
    /// * If a reserve is negative or not finite
    /// * If a price is zero, negative or not finite
    /// * If a gas or bridge estimate is negative or not finite
    pub fn build(&self, snapshot: &MarketSnapshot) -> Result<(ArbitrageGraph, BuildReport), ArbError> {
        let candidates = self.trade_pairs.resolve(&snapshot.prices);
        let mut report = BuildReport {
            candidates: candidates.len(),
            ..BuildReport::default()
        };
        let mut edges = Vec::new();

        for pair in &candidates {
            match self.edge_for(snapshot, pair, &mut report)? {
                Some(edge) if edge.weight > 0.0 => {
                    debug!("graph: admitted {edge:?}");
                    edges.push(edge);
                }
                Some(edge) => {
                    debug!("graph: {pair} is unprofitable ({:.6})", edge.weight);
                    report.unprofitable += 1;
                }
                None => {}
            }
        }

        report.admitted = edges.len();
        let graph = ArbitrageGraph::from_edges(edges);
        info!(
            "graph: {} edges over {} assets from {} candidate pairs (no pool {}, no liquidity {}, missing price {}, unprofitable {})",
            graph.len(),
            graph.assets().len(),
            report.candidates,
            report.no_pool,
            report.no_liquidity,
            report.missing_price,
            report.unprofitable
        );
        Ok((graph, report))
    }

    /// Computes the candidate edge for a pair, or `None` when the pair is
    /// skipped for lack of a pool, liquidity or prices
    fn edge_for(
        &self,
        snapshot: &MarketSnapshot,
        pair: &AssetPair,
        report: &mut BuildReport,
    ) -> Result<Option<Edge>, ArbError> {
        let Some(pool) = snapshot.pool(pair) else {
            debug!("graph: {pair} has no pool");
            report.no_pool += 1;
            return Ok(None);
        };
        pool.validate()?;
        if !pool.has_liquidity() {
            debug!("graph: {pair} has no liquidity");
            report.no_liquidity += 1;
            return Ok(None);
        }

        let (Some(price_from), Some(price_to)) = (
            snapshot.prices.price(&pair.from),
            snapshot.prices.price(&pair.to),
        ) else {
            debug!("graph: {pair} is missing a price");
            report.missing_price += 1;
            return Ok(None);
        };
        validate_price(&pair.from, price_from)?;
        validate_price(&pair.to, price_to)?;

        let gas_cost = snapshot.gas_cost;
        let bridge_cost = snapshot.bridge_cost(pair);
        for (name, cost) in [("gas cost", gas_cost), ("bridge cost", bridge_cost)] {
            if !cost.is_finite() || cost < 0.0 {
                return Err(ArbError::pair_data(pair, format!("{name} is invalid ({cost})")));
            }
        }

        let slippage_percent = slippage(self.trade_size, pool.reserve_a, pool.reserve_b);
        let costs = EdgeCosts::new(
            price_from,
            price_to,
            slippage_percent,
            gas_cost,
            bridge_cost,
            self.trade_size,
        )?;
        Ok(Some(Edge::new(pair.clone(), costs)))
    }
}

/// Rejects prices that are not positive finite numbers
fn validate_price(asset: &Asset, price: f64) -> Result<(), ArbError> {
    if price.is_finite() && price > 0.0 {
        Ok(())
    } else {
        Err(ArbError::asset_data(asset, format!("price must be positive, got {price}")))
    }
}
