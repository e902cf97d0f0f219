//! Cost model: price impact of a constant-product pool and the edge weight
//! combining profitability with slippage, gas and bridging costs.
//!
//! All functions are pure. Every cost term is expressed as a fraction of the
//! trade size so that it can be subtracted from the profitability rate.

use serde::Serialize;

use super::error::ArbError;

/// Slippage, in percent, of swapping `input_amount` into a constant-product
/// pool holding `reserve_in` / `reserve_out`.
///
/// The swap is simulated at the quoted price `reserve_out / reserve_in` and the
/// post-trade price is compared against it.
///
/// Returns `f64::INFINITY` when either reserve is zero: such a pool cannot be
/// traded and the caller must drop the edge.
#[must_use]
pub fn slippage(input_amount: f64, reserve_in: f64, reserve_out: f64) -> f64 {
    if reserve_in == 0.0 || reserve_out == 0.0 {
        return f64::INFINITY;
    }

    let expected_price = reserve_out / reserve_in;
    let new_reserve_in = reserve_in + input_amount;
    let new_reserve_out = reserve_out - input_amount * expected_price;
    let executed_price = new_reserve_out / new_reserve_in;

    ((executed_price - expected_price) / expected_price).abs() * 100.0
}

/// The raw components an edge weight is derived from
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeCosts {
    /// `price_to / price_from - 1`
    pub profitability: f64,
    /// Slippage as a fraction (percent / 100)
    pub slippage_cost: f64,
    /// Gas cost as a fraction of the trade size
    pub gas_cost: f64,
    /// Bridge cost as a fraction of the trade size
    pub bridge_cost: f64,
}

impl EdgeCosts {
    /// Normalizes the raw inputs to fractional rates of `trade_size`
    ///
    /// # Errors
    /// * If `trade_size` is not a positive finite number
    pub fn new(
        price_from: f64,
        price_to: f64,
        slippage_percent: f64,
        gas_cost: f64,
        bridge_cost: f64,
        trade_size: f64,
    ) -> Result<Self, ArbError> {
        if !(trade_size.is_finite() && trade_size > 0.0) {
            return Err(ArbError::InvalidConfig(format!(
                "trade size must be positive, got {trade_size}"
            )));
        }

        Ok(Self {
            profitability: price_to / price_from - 1.0,
            slippage_cost: slippage_percent / 100.0,
            gas_cost: gas_cost / trade_size,
            bridge_cost: bridge_cost / trade_size,
        })
    }

    /// Net rate of the edge
    #[must_use]
    pub fn weight(&self) -> f64 {
        self.profitability - self.slippage_cost - self.gas_cost - self.bridge_cost
    }
}

/// Edge weight for trading one unit priced `price_from` into one priced
/// `price_to`, net of slippage, gas and bridging.
///
/// # Errors
/// * If `trade_size` is not a positive finite number
pub fn edge_weight(
    price_from: f64,
    price_to: f64,
    slippage_percent: f64,
    gas_cost: f64,
    bridge_cost: f64,
    trade_size: f64,
) -> Result<f64, ArbError> {
    EdgeCosts::new(
        price_from,
        price_to,
        slippage_percent,
        gas_cost,
        bridge_cost,
        trade_size,
    )
    .map(|costs| costs.weight())
}
