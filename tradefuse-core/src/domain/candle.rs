//! Candle: the market data unit replayed by the backtest simulator.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::side::PositionSide;

/// Directional label attached to a candle by an external labeler/model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandleLabel {
    StrongBuy,
    Buy,
    Neutral,
    Sell,
    StrongSell,
}

impl CandleLabel {
    /// Lenient parse: `STRONG_BUY`, `strong buy`, `strong-buy` all map to `StrongBuy`.
    pub fn parse(s: &str) -> Option<Self> {
        let norm = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match norm.as_str() {
            "strong_buy" => Some(Self::StrongBuy),
            "buy" => Some(Self::Buy),
            "neutral" | "hold" => Some(Self::Neutral),
            "sell" => Some(Self::Sell),
            "strong_sell" => Some(Self::StrongSell),
            _ => None,
        }
    }

    /// Entry direction for strong labels; `None` for everything else.
    pub fn strong_direction(&self) -> Option<PositionSide> {
        match self {
            Self::StrongBuy => Some(PositionSide::Long),
            Self::StrongSell => Some(PositionSide::Short),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StrongBuy => "strong_buy",
            Self::Buy => "buy",
            Self::Neutral => "neutral",
            Self::Sell => "sell",
            Self::StrongSell => "strong_sell",
        }
    }
}

impl fmt::Display for CandleLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally computed per-candle inputs to the trade quality scorer.
///
/// No indicator math happens here: these arrive as plain numbers.
/// Fractions are in [0, 1]; `volatility` is a return fraction (0.02 = 2%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandleFeatures {
    pub signal_strength: f64,
    pub win_rate: f64,
    pub execution_quality: f64,
    pub volatility: f64,
    pub ensemble_confidence: f64,
    pub model_diversity: f64,
    pub signal_age_secs: f64,
    pub regime_alignment: f64,
    pub choppiness: f64,
    pub liquidity: f64,
}

impl Default for CandleFeatures {
    /// Neutral mid-range values, so a candle carrying only a label still scores sensibly.
    fn default() -> Self {
        Self {
            signal_strength: 0.5,
            win_rate: 0.5,
            execution_quality: 1.0,
            volatility: 0.02,
            ensemble_confidence: 0.5,
            model_diversity: 0.5,
            signal_age_secs: 0.0,
            regime_alignment: 0.5,
            choppiness: 0.5,
            liquidity: 1.0,
        }
    }
}

/// OHLCV candle with an optional label and scorer features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time, milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub label: Option<CandleLabel>,
    #[serde(default)]
    pub features: CandleFeatures,
}

impl Candle {
    /// Candle with flat OHLC at `close` and default features. Handy for tests and synthetic series.
    pub fn from_close(timestamp: i64, close: f64, label: Option<CandleLabel>) -> Self {
        Self {
            timestamp,
            open: close,
            high: close,
            low: close,
            close,
            volume: 0.0,
            label,
            features: CandleFeatures::default(),
        }
    }

    /// True if any price field is NaN.
    pub fn is_void(&self) -> bool {
        self.open.is_nan() || self.high.is_nan() || self.low.is_nan() || self.close.is_nan()
    }
}
