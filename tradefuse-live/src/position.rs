//! Tracked position record and the inputs that create or close one.

use serde::{Deserialize, Serialize};
use std::fmt;

use tradefuse_core::domain::{OrderId, PositionSide};

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    /// Opposite fused decision.
    Signal,
    Manual,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StopLoss => "stop_loss",
            Self::TakeProfit => "take_profit",
            Self::Signal => "signal",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked order and its lifecycle. Timestamps are ms since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: OrderId,
    pub symbol: Option<String>,
    pub side: PositionSide,
    pub entry_price: f64,
    pub amount: f64,
    pub opened_at: i64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub open: bool,
    pub exit_price: Option<f64>,
    pub exit_ts: Option<i64>,
    pub closed_reason: Option<CloseReason>,
    pub realized_pnl: Option<f64>,
    pub last_price: Option<f64>,
    pub last_updated: i64,
}

impl Position {
    pub fn stop_loss_price(&self) -> Option<f64> {
        (self.stop_loss_pct > 0.0).then(|| match self.side {
            PositionSide::Long => self.entry_price * (1.0 - self.stop_loss_pct),
            PositionSide::Short => self.entry_price * (1.0 + self.stop_loss_pct),
        })
    }

    pub fn take_profit_price(&self) -> Option<f64> {
        (self.take_profit_pct > 0.0).then(|| match self.side {
            PositionSide::Long => self.entry_price * (1.0 + self.take_profit_pct),
            PositionSide::Short => self.entry_price * (1.0 - self.take_profit_pct),
        })
    }

    /// PnL if closed at `exit`: `(exit - entry) * amount` long, mirrored short.
    pub fn pnl_at(&self, exit: f64) -> f64 {
        self.side.sign() * (exit - self.entry_price) * self.amount
    }

    /// Unrealized PnL at the last polled price.
    pub fn unrealized_pnl(&self) -> Option<f64> {
        if !self.open {
            return None;
        }
        self.last_price.map(|p| self.pnl_at(p))
    }
}

/// Loosely shaped order description, as returned by a venue or typed by an operator.
///
/// Missing fields keep whatever an existing record already holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderLike {
    pub id: String,
    #[serde(default)]
    pub symbol: Option<String>,
    /// `buy`/`long` is long; any other value is short.
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default, alias = "price", alias = "average")]
    pub entry_price: Option<f64>,
}

/// Per-position risk overrides. `None` uses the manager defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackOptions {
    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CloseRequest {
    pub exit_price: Option<f64>,
    pub reason: CloseReason,
}

impl CloseRequest {
    pub fn at(exit_price: f64, reason: CloseReason) -> Self {
        Self {
            exit_price: Some(exit_price),
            reason,
        }
    }

    pub fn without_price(reason: CloseReason) -> Self {
        Self {
            exit_price: None,
            reason,
        }
    }
}

/// A stop-loss or take-profit level crossed by a polled price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskTrigger {
    pub reason: CloseReason,
    pub price: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(side: PositionSide) -> Position {
        Position {
            id: OrderId::from("o-1"),
            symbol: Some("BTC/EUR".into()),
            side,
            entry_price: 100.0,
            amount: 2.0,
            opened_at: 0,
            stop_loss_pct: 0.05,
            take_profit_pct: 0.1,
            open: true,
            exit_price: None,
            exit_ts: None,
            closed_reason: None,
            realized_pnl: None,
            last_price: Some(104.0),
            last_updated: 0,
        }
    }

    #[test]
    fn levels_are_side_aware() {
        let long = position(PositionSide::Long);
        assert!((long.stop_loss_price().unwrap() - 95.0).abs() < 1e-9);
        assert!((long.take_profit_price().unwrap() - 110.0).abs() < 1e-9);

        let short = position(PositionSide::Short);
        assert!((short.stop_loss_price().unwrap() - 105.0).abs() < 1e-9);
        assert!((short.take_profit_price().unwrap() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn disabled_levels() {
        let mut p = position(PositionSide::Long);
        p.stop_loss_pct = 0.0;
        assert_eq!(p.stop_loss_price(), None);
    }

    #[test]
    fn unrealized_uses_last_price() {
        assert!((position(PositionSide::Long).unrealized_pnl().unwrap() - 8.0).abs() < 1e-9);
        assert!((position(PositionSide::Short).unrealized_pnl().unwrap() + 8.0).abs() < 1e-9);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(position(PositionSide::Long)).unwrap();
        assert!(json.get("entryPrice").is_some());
        assert!(json.get("takeProfitPct").is_some());
        assert_eq!(json["side"], "long");
    }

    #[test]
    fn order_like_accepts_venue_price_keys() {
        let o: OrderLike =
            serde_json::from_str(r#"{"id":"42","side":"BUY","amount":0.5,"average":101.5}"#).unwrap();
        assert_eq!(o.entry_price, Some(101.5));
    }
}
