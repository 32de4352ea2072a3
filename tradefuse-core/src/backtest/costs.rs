//! Per-trade transaction costs, charged against each simulated round trip.

use serde::{Deserialize, Serialize};

/// Proportional fee on both legs plus slippage on the entry leg.
///
/// `fee = fee_rate * (entry + exit)`, `slippage = slippage_pct * entry`.
/// Amounts are per unit of the traded asset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeCosts {
    pub fee_rate: f64,
    pub slippage_pct: f64,
}

impl TradeCosts {
    pub fn new(fee_rate: f64, slippage_pct: f64) -> Self {
        Self {
            fee_rate,
            slippage_pct,
        }
    }

    pub fn frictionless() -> Self {
        Self::default()
    }

    pub fn fee(&self, entry: f64, exit: f64) -> f64 {
        self.fee_rate * (entry + exit)
    }

    pub fn slippage(&self, entry: f64) -> f64 {
        self.slippage_pct * entry
    }

    /// Total round-trip cost.
    pub fn round_trip(&self, entry: f64, exit: f64) -> f64 {
        self.fee(entry, exit) + self.slippage(entry)
    }
}
