//! Backtest parameter set.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::RunId;
use crate::quality::QualityWeights;

#[derive(Debug, Error, PartialEq)]
pub enum BacktestError {
    #[error("invalid backtest parameter {field}: {reason}")]
    InvalidParam { field: &'static str, reason: String },

    #[error("parameter grid expands to zero runs")]
    EmptyGrid,
}

/// One backtest configuration. Percentages are fractions (0.005 = 0.5%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestParams {
    pub profit_pct: f64,
    pub loss_pct: f64,
    /// Candles after entry before a timeout exit.
    pub min_hold: usize,
    /// Minimum trade quality score (0..=100) required to enter.
    pub trade_quality: f64,
    #[serde(default)]
    pub fee_rate: f64,
    #[serde(default)]
    pub slippage_pct: f64,
    /// Fixed clock for signal-age derivation. When absent, candle features supply the age.
    #[serde(default)]
    pub now_ms: Option<i64>,
    #[serde(default)]
    pub weights: QualityWeights,
}

impl Default for BacktestParams {
    fn default() -> Self {
        Self {
            profit_pct: 0.005,
            loss_pct: 0.002,
            min_hold: 8,
            trade_quality: 50.0,
            fee_rate: 0.0,
            slippage_pct: 0.0,
            now_ms: None,
            weights: QualityWeights::default(),
        }
    }
}

impl BacktestParams {
    /// Planned reward per unit of risk, fed to the trade quality scorer.
    pub fn risk_reward(&self) -> f64 {
        if self.loss_pct > 0.0 {
            self.profit_pct / self.loss_pct
        } else {
            f64::INFINITY
        }
    }

    pub fn validate(&self) -> Result<(), BacktestError> {
        positive("profit_pct", self.profit_pct)?;
        positive("loss_pct", self.loss_pct)?;
        non_negative("fee_rate", self.fee_rate)?;
        non_negative("slippage_pct", self.slippage_pct)?;
        if !self.trade_quality.is_finite() {
            return Err(BacktestError::InvalidParam {
                field: "trade_quality",
                reason: format!("must be finite, got {}", self.trade_quality),
            });
        }
        Ok(())
    }

    /// Content hash of the parameter set. Stable across runs and platforms.
    pub fn run_id(&self) -> RunId {
        let bytes = serde_json::to_vec(self).unwrap_or_else(|_| format!("{self:?}").into_bytes());
        RunId::from_bytes(&bytes)
    }
}

fn positive(field: &'static str, v: f64) -> Result<(), BacktestError> {
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(BacktestError::InvalidParam {
            field,
            reason: format!("must be a positive number, got {v}"),
        })
    }
}

fn non_negative(field: &'static str, v: f64) -> Result<(), BacktestError> {
    if v.is_finite() && v >= 0.0 {
        Ok(())
    } else {
        Err(BacktestError::InvalidParam {
            field,
            reason: format!("must be zero or positive, got {v}"),
        })
    }
}
