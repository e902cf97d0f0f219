use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

use super::error::ArbError;

/// Asset symbol, e.g. `ETH`. Used only as a graph node identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Asset(pub String);

impl From<&str> for Asset {
    fn from(symbol: &str) -> Self {
        Self(symbol.to_string())
    }
}

impl From<String> for Asset {
    fn from(symbol: String) -> Self {
        Self(symbol)
    }
}

impl Asset {
    /// The symbol as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// An ordered pair of assets. `(A, B)` and `(B, A)` are distinct pairs.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Display, Serialize, Deserialize)]
#[display("{from}->{to}")]
pub struct AssetPair {
    /// The asset sold
    pub from: Asset,
    /// The asset bought
    pub to: Asset,
}

impl AssetPair {
    /// Creates a new ordered pair
    pub fn new(from: impl Into<Asset>, to: impl Into<Asset>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// The same pair traded the other way round
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            from: self.to.clone(),
            to: self.from.clone(),
        }
    }
}

/// USD prices per asset, all as of one observation instant
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceTable(BTreeMap<Asset, f64>);

impl PriceTable {
    /// Creates an empty price table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the price of an asset, replacing any previous one
    pub fn insert(&mut self, asset: impl Into<Asset>, price: f64) {
        self.0.insert(asset.into(), price);
    }

    /// The price of an asset, if known
    #[must_use]
    pub fn price(&self, asset: &Asset) -> Option<f64> {
        self.0.get(asset).copied()
    }

    /// All priced assets, in symbol order
    pub fn assets(&self) -> impl Iterator<Item = &Asset> {
        self.0.keys()
    }

    /// Number of priced assets
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no asset is priced
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<A: Into<Asset>> FromIterator<(A, f64)> for PriceTable {
    fn from_iter<I: IntoIterator<Item = (A, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(a, p)| (a.into(), p)).collect())
    }
}

/// Reserves of the constant-product pool trading `pair.from` for `pair.to`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolObservation {
    /// The ordered pair this pool is observed for
    #[serde(flatten)]
    pub pair: AssetPair,
    /// Reserve of `pair.from`
    pub reserve_a: f64,
    /// Reserve of `pair.to`
    pub reserve_b: f64,
    /// When the reserves were read
    pub observed_at: DateTime<Utc>,
}

impl PoolObservation {
    /// Creates an observation stamped with the given instant
    pub fn new(pair: AssetPair, reserve_a: f64, reserve_b: f64, observed_at: DateTime<Utc>) -> Self {
        Self {
            pair,
            reserve_a,
            reserve_b,
            observed_at,
        }
    }

    /// Zero reserves mean there is no tradable pool
    #[must_use]
    pub fn has_liquidity(&self) -> bool {
        self.reserve_a > 0.0 && self.reserve_b > 0.0
    }

    /// Rejects negative or non-finite reserves
    ///
    /// # Errors
    /// * If either reserve is negative, NaN or infinite
    pub fn validate(&self) -> Result<(), ArbError> {
        for (name, reserve) in [("reserveA", self.reserve_a), ("reserveB", self.reserve_b)] {
            if !reserve.is_finite() {
                return Err(ArbError::pair_data(
                    &self.pair,
                    format!("{name} is not finite ({reserve})"),
                ));
            }
            if reserve < 0.0 {
                return Err(ArbError::pair_data(
                    &self.pair,
                    format!("{name} is negative ({reserve})"),
                ));
            }
        }
        Ok(())
    }
}

/// Bridge cost estimate for one ordered pair, as it appears in snapshot files
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BridgeCost {
    /// The pair the estimate applies to
    #[serde(flatten)]
    pub pair: AssetPair,
    /// Estimated cost, in the same units as the trade size
    pub cost: f64,
}

/// Snapshot file layout, before duplicate detection
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSnapshot {
    /// Instant the snapshot was assembled
    observed_at: DateTime<Utc>,
    /// Asset prices
    prices: PriceTable,
    /// Pool observations, at most one per ordered pair
    #[serde(default)]
    pools: Vec<PoolObservation>,
    /// Gas cost estimate
    #[serde(default)]
    gas_cost: f64,
    /// Bridge cost estimates
    #[serde(default)]
    bridge_costs: Vec<BridgeCost>,
}

/// One atomic view of the market: every input the graph builder needs.
///
/// The data collaborator assembles it completely before a pass starts. Pools
/// are keyed by ordered pair, so the order in which fetches completed has no
/// influence on the result.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "RawSnapshot")]
pub struct MarketSnapshot {
    /// Instant the snapshot was assembled
    pub observed_at: DateTime<Utc>,
    /// Asset prices
    pub prices: PriceTable,
    /// Pool observations keyed by ordered pair
    pub pools: BTreeMap<AssetPair, PoolObservation>,
    /// Gas cost applied to every trade, defaults to 0
    pub gas_cost: f64,
    /// Bridge cost per ordered pair, missing pairs cost 0
    pub bridge_costs: BTreeMap<AssetPair, f64>,
}

impl MarketSnapshot {
    /// Creates a snapshot from prices and pool observations
    ///
    /// # Errors
    /// * If two observations are given for the same ordered pair
    /// * If an observation pairs an asset with itself
    pub fn new(
        observed_at: DateTime<Utc>,
        prices: PriceTable,
        pools: impl IntoIterator<Item = PoolObservation>,
    ) -> Result<Self, ArbError> {
        let mut keyed = BTreeMap::new();
        for pool in pools {
            if pool.pair.from == pool.pair.to {
                return Err(ArbError::pair_data(&pool.pair, "pool trades an asset for itself"));
            }
            let pair = pool.pair.clone();
            if keyed.insert(pair.clone(), pool).is_some() {
                return Err(ArbError::pair_data(&pair, "duplicate pool observation"));
            }
        }

        Ok(Self {
            observed_at,
            prices,
            pools: keyed,
            gas_cost: 0.0,
            bridge_costs: BTreeMap::new(),
        })
    }

    /// Sets the gas cost estimate
    #[must_use]
    pub fn with_gas_cost(mut self, gas_cost: f64) -> Self {
        self.gas_cost = gas_cost;
        self
    }

    /// Sets the bridge cost estimate for one ordered pair
    #[must_use]
    pub fn with_bridge_cost(mut self, pair: AssetPair, cost: f64) -> Self {
        self.bridge_costs.insert(pair, cost);
        self
    }

    /// The pool observation for an ordered pair, if any
    #[must_use]
    pub fn pool(&self, pair: &AssetPair) -> Option<&PoolObservation> {
        self.pools.get(pair)
    }

    /// The bridge cost for an ordered pair, 0 when no estimate is available
    #[must_use]
    pub fn bridge_cost(&self, pair: &AssetPair) -> f64 {
        self.bridge_costs.get(pair).copied().unwrap_or(0.0)
    }
}

impl TryFrom<RawSnapshot> for MarketSnapshot {
    type Error = ArbError;

    fn try_from(raw: RawSnapshot) -> Result<Self, Self::Error> {
        let mut snapshot = Self::new(raw.observed_at, raw.prices, raw.pools)?.with_gas_cost(raw.gas_cost);
        for bridge in raw.bridge_costs {
            if snapshot.bridge_costs.contains_key(&bridge.pair) {
                return Err(ArbError::pair_data(&bridge.pair, "duplicate bridge cost estimate"));
            }
            snapshot = snapshot.with_bridge_cost(bridge.pair, bridge.cost);
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::arb::test_helpers::*;

    #[test]
    fn test_duplicate_pool_rejected() {
        let result = MarketSnapshot::new(
            epoch(),
            prices(&[("A", 1.0), ("B", 2.0)]),
            vec![observation("A", "B", 100.0, 200.0), observation("A", "B", 300.0, 400.0)],
        );
        assert_eq!(
            result.err().unwrap().to_string(),
            "Invalid market data for A->B: duplicate pool observation"
        );
    }

    #[test]
    fn test_reverse_pair_is_independent() {
        let snapshot = MarketSnapshot::new(
            epoch(),
            prices(&[("A", 1.0), ("B", 2.0)]),
            vec![observation("A", "B", 100.0, 200.0), observation("B", "A", 200.0, 100.0)],
        )
        .unwrap();
        assert_eq!(snapshot.pools.len(), 2);
        assert_eq!(snapshot.pool(&pair("B", "A")).unwrap().reserve_a, 200.0);
    }

    #[test]
    fn test_negative_reserve_rejected() {
        let err = observation("A", "B", -1.0, 200.0).validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid market data for A->B: reserveA is negative (-1)"
        );
    }

    #[test]
    fn test_snapshot_from_json() {
        let json = r#"{
            "observedAt": "2024-03-01T12:00:00Z",
            "prices": { "ETH": 2000.0, "USDT": 1.0 },
            "pools": [
                { "from": "ETH", "to": "USDT", "reserveA": 500.0, "reserveB": 1000000.0,
                  "observedAt": "2024-03-01T11:59:58Z" }
            ],
            "gasCost": 0.5,
            "bridgeCosts": [ { "from": "ETH", "to": "USDT", "cost": 0.25 } ]
        }"#;
        let snapshot: MarketSnapshot = serde_json::from_str(json).unwrap();

        assert_eq!(snapshot.prices.price(&Asset::from("ETH")), Some(2000.0));
        assert_eq!(snapshot.gas_cost, 0.5);
        assert_eq!(snapshot.bridge_cost(&pair("ETH", "USDT")), 0.25);
        assert_eq!(snapshot.bridge_cost(&pair("USDT", "ETH")), 0.0);
        assert!(snapshot.pool(&pair("ETH", "USDT")).unwrap().has_liquidity());
    }

    #[test]
    fn test_snapshot_json_duplicate_pool_fails() {
        let json = r#"{
            "observedAt": "2024-03-01T12:00:00Z",
            "prices": { "A": 1.0, "B": 1.0 },
            "pools": [
                { "from": "A", "to": "B", "reserveA": 1.0, "reserveB": 1.0, "observedAt": "2024-03-01T12:00:00Z" },
                { "from": "A", "to": "B", "reserveA": 2.0, "reserveB": 2.0, "observedAt": "2024-03-01T12:00:00Z" }
            ]
        }"#;
        let result = serde_json::from_str::<MarketSnapshot>(json);
        assert!(result.unwrap_err().to_string().contains("duplicate pool observation"));
    }
}
