//! Direction types shared by the decision engine, the simulator and the live loop.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Output side of a fused decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
    Hold,
}

impl Side {
    /// Side implied by the sign of a score. Zero maps to `Hold`.
    pub fn from_score(score: f64) -> Self {
        if score > 0.0 {
            Side::Buy
        } else if score < 0.0 {
            Side::Sell
        } else {
            Side::Hold
        }
    }

    pub fn is_directional(&self) -> bool {
        !matches!(self, Side::Hold)
    }

    /// Signed unit: +1 buy, -1 sell, 0 hold.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
            Side::Hold => 0.0,
        }
    }

    /// Lenient parse used at provider boundaries: accepts buy/long and sell/short.
    pub fn parse_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" | "long" => Some(Side::Buy),
            "sell" | "short" => Some(Side::Sell),
            "hold" | "flat" | "none" => Some(Side::Hold),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
            Side::Hold => "hold",
        };
        f.write_str(s)
    }
}

/// Direction of an open position (simulated or live).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// `buy`/`long` (any case) is long; everything else is short.
    pub fn from_order_side(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" | "long" => PositionSide::Long,
            _ => PositionSide::Short,
        }
    }

    pub fn from_side(side: Side) -> Option<Self> {
        match side {
            Side::Buy => Some(PositionSide::Long),
            Side::Sell => Some(PositionSide::Short),
            Side::Hold => None,
        }
    }

    /// +1 for long, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            PositionSide::Long => 1.0,
            PositionSide::Short => -1.0,
        }
    }

    /// Decision side that opens this position.
    pub fn entry_side(&self) -> Side {
        match self {
            PositionSide::Long => Side::Buy,
            PositionSide::Short => Side::Sell,
        }
    }

    /// Decision side that closes this position.
    pub fn exit_side(&self) -> Side {
        match self {
            PositionSide::Long => Side::Sell,
            PositionSide::Short => Side::Buy,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::Long => f.write_str("long"),
            PositionSide::Short => f.write_str("short"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_from_score() {
        assert_eq!(Side::from_score(0.3), Side::Buy);
        assert_eq!(Side::from_score(-0.01), Side::Sell);
        assert_eq!(Side::from_score(0.0), Side::Hold);
    }

    #[test]
    fn position_side_from_order_side() {
        assert_eq!(PositionSide::from_order_side("BUY"), PositionSide::Long);
        assert_eq!(PositionSide::from_order_side("long"), PositionSide::Long);
        assert_eq!(PositionSide::from_order_side("sell"), PositionSide::Short);
        assert_eq!(PositionSide::from_order_side("anything"), PositionSide::Short);
    }

    #[test]
    fn entry_and_exit_sides_are_opposite() {
        for side in [PositionSide::Long, PositionSide::Short] {
            assert_eq!(side.entry_side().sign(), -side.exit_side().sign());
        }
    }

    #[test]
    fn loose_parse() {
        assert_eq!(Side::parse_loose(" Short "), Some(Side::Sell));
        assert_eq!(Side::parse_loose("maybe"), None);
    }
}
