//! Run statistics: realized-trade aggregates, equity tracking, signal histograms.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::trade::BacktestTrade;

/// Why a flat candle did not produce an entry (or why a candle was skipped while open).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoTradeReason {
    InPosition,
    BelowQuality,
    WrongLabel,
}

impl NoTradeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InPosition => "in_position",
            Self::BelowQuality => "below_quality",
            Self::WrongLabel => "wrong_label",
        }
    }
}

impl fmt::Display for NoTradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cumulative equity from realized PnL, starting at zero.
///
/// `max_drawdown` only ever grows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EquityTracker {
    equity: f64,
    peak: f64,
    max_drawdown: f64,
    curve: Vec<f64>,
}

impl EquityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, pnl: f64) {
        self.equity += pnl;
        self.peak = self.peak.max(self.equity);
        self.max_drawdown = self.max_drawdown.max(self.peak - self.equity);
        self.curve.push(self.equity);
    }

    pub fn equity(&self) -> f64 {
        self.equity
    }

    pub fn max_drawdown(&self) -> f64 {
        self.max_drawdown
    }

    pub fn curve(&self) -> &[f64] {
        &self.curve
    }

    fn into_curve(self) -> Vec<f64> {
        self.curve
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestStats {
    pub total_pnl: f64,
    pub win_rate: f64,
    pub num_trades: usize,
    pub max_drawdown: f64,
    pub avg_pnl: f64,
    pub avg_hold_time: f64,
    /// Equity after each closed trade.
    pub equity_curve: Vec<f64>,
    /// Candles seen per label; unlabeled candles count under `"none"`.
    pub signal_count: BTreeMap<String, usize>,
    pub no_trade_reasons: BTreeMap<String, usize>,
    /// Entry index of a position still open when the series ended. Not in realized stats.
    #[serde(default)]
    pub open_at_end: Option<usize>,
}

impl BacktestStats {
    pub(crate) fn from_trades(
        trades: &[BacktestTrade],
        equity: EquityTracker,
        signal_count: BTreeMap<String, usize>,
        no_trade_reasons: BTreeMap<String, usize>,
        open_at_end: Option<usize>,
    ) -> Self {
        let num_trades = trades.len();
        let total_pnl: f64 = trades.iter().map(|t| t.pnl).sum();
        let (win_rate, avg_pnl, avg_hold_time) = if num_trades == 0 {
            (0.0, 0.0, 0.0)
        } else {
            let n = num_trades as f64;
            let wins = trades.iter().filter(|t| t.is_win()).count() as f64;
            let hold: usize = trades.iter().map(|t| t.hold_time).sum();
            (wins / n, total_pnl / n, hold as f64 / n)
        };
        Self {
            total_pnl,
            win_rate,
            num_trades,
            max_drawdown: equity.max_drawdown(),
            avg_pnl,
            avg_hold_time,
            equity_curve: equity.into_curve(),
            signal_count,
            no_trade_reasons,
            open_at_end,
        }
    }
}
