//! Trading venue boundary. Transport lives behind [`VenueClient`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use tradefuse_core::domain::{PositionSide, Side};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub last: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub free: BTreeMap<String, f64>,
}

impl Balance {
    pub fn free(&self, asset: &str) -> f64 {
        self.free.get(asset).copied().unwrap_or(0.0)
    }
}

/// Venue acknowledgement of a market order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VenueOrder {
    pub id: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub average: Option<f64>,
    #[serde(default)]
    pub fee: Option<f64>,
    #[serde(default)]
    pub info: serde_json::Value,
}

impl VenueOrder {
    /// Average fill if reported, else the order price.
    pub fn fill_price(&self) -> Option<f64> {
        self.average
            .filter(|p| p.is_finite() && *p > 0.0)
            .or(self.price.filter(|p| p.is_finite() && *p > 0.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderAction {
    Buy,
    Sell,
}

impl OrderAction {
    pub fn from_side(side: Side) -> Option<Self> {
        match side {
            Side::Buy => Some(Self::Buy),
            Side::Sell => Some(Self::Sell),
            Side::Hold => None,
        }
    }

    /// Action that flattens a position on `side`.
    pub fn closing(side: PositionSide) -> Self {
        match side {
            PositionSide::Long => Self::Sell,
            PositionSide::Short => Self::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum VenueError {
    /// Network, timeout or rate limit. Safe to retry.
    #[error("transient venue error: {0}")]
    Transient(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("venue rejected request: {0}")]
    Permanent(String),
}

impl VenueError {
    /// Classify a raw venue message.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();
        const FUNDS: &[&str] = &["insufficient", "not enough", "balance too low"];
        const TRANSIENT: &[&str] = &[
            "timeout",
            "timed out",
            "network",
            "connection",
            "econnreset",
            "etimedout",
            "rate limit",
            "ratelimit",
            "too many requests",
            "429",
            "502",
            "503",
            "504",
            "temporarily unavailable",
            "service unavailable",
        ];
        if FUNDS.iter().any(|k| lower.contains(k)) {
            Self::InsufficientFunds(message)
        } else if TRANSIENT.iter().any(|k| lower.contains(k)) {
            Self::Transient(message)
        } else {
            Self::Permanent(message)
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[async_trait]
pub trait VenueClient: Send + Sync {
    async fn fetch_ticker(&self, pair: &str) -> Result<Ticker, VenueError>;

    async fn fetch_balance(&self) -> Result<Balance, VenueError>;

    async fn create_market_buy_order(&self, pair: &str, amount: f64) -> Result<VenueOrder, VenueError>;

    async fn create_market_sell_order(&self, pair: &str, amount: f64) -> Result<VenueOrder, VenueError>;

    async fn create_market_order(
        &self,
        pair: &str,
        action: OrderAction,
        amount: f64,
    ) -> Result<VenueOrder, VenueError> {
        match action {
            OrderAction::Buy => self.create_market_buy_order(pair, amount).await,
            OrderAction::Sell => self.create_market_sell_order(pair, amount).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_messages() {
        assert!(VenueError::classify("Request Timeout after 10000ms").is_transient());
        assert!(VenueError::classify("HTTP 429 Too Many Requests").is_transient());
        assert!(VenueError::classify("ECONNRESET").is_transient());
        assert_eq!(
            VenueError::classify("Insufficient funds for order"),
            VenueError::InsufficientFunds("Insufficient funds for order".into())
        );
        assert!(matches!(VenueError::classify("invalid symbol"), VenueError::Permanent(_)));
    }

    #[test]
    fn fill_price_prefers_average() {
        let o = VenueOrder {
            id: "1".into(),
            price: Some(100.0),
            average: Some(100.5),
            ..Default::default()
        };
        assert_eq!(o.fill_price(), Some(100.5));
        let o = VenueOrder {
            average: Some(0.0),
            price: Some(99.0),
            ..Default::default()
        };
        assert_eq!(o.fill_price(), Some(99.0));
        assert_eq!(VenueOrder::default().fill_price(), None);
    }

    #[test]
    fn action_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&OrderAction::Sell).unwrap(), "\"SELL\"");
        assert_eq!(OrderAction::closing(PositionSide::Short), OrderAction::Buy);
        assert_eq!(OrderAction::from_side(Side::Hold), None);
    }
}
