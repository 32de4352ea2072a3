use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::{CandleLabel, PositionSide};

/// Why a simulated position was closed. First matching check wins, in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitReason {
    TP,
    SL,
    Timeout,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::TP => "TP",
            ExitReason::SL => "SL",
            ExitReason::Timeout => "Timeout",
        };
        f.write_str(s)
    }
}

/// A completed simulated round trip. Immutable once appended to a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestTrade {
    pub side: PositionSide,
    pub label: CandleLabel,
    pub entry_idx: usize,
    pub exit_idx: usize,
    pub entry_ts: i64,
    pub exit_ts: i64,
    pub entry: f64,
    pub exit: f64,
    /// Per-unit PnL after fees and slippage.
    pub pnl: f64,
    pub reason: ExitReason,
    pub trade_quality: f64,
    /// Candles between entry and exit.
    pub hold_time: usize,
}

impl BacktestTrade {
    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }
}

/// Position held by the simulator between entry and exit.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OpenTrade {
    pub side: PositionSide,
    pub label: CandleLabel,
    pub entry_idx: usize,
    pub entry_ts: i64,
    pub entry: f64,
    pub trade_quality: f64,
}

impl OpenTrade {
    /// TP, then SL, then timeout. `None` keeps the position open.
    pub fn exit_reason(
        &self,
        close: f64,
        idx: usize,
        profit_pct: f64,
        loss_pct: f64,
        min_hold: usize,
    ) -> Option<ExitReason> {
        let (tp_hit, sl_hit) = match self.side {
            PositionSide::Long => (
                close >= self.entry * (1.0 + profit_pct),
                close <= self.entry * (1.0 - loss_pct),
            ),
            PositionSide::Short => (
                close <= self.entry * (1.0 - profit_pct),
                close >= self.entry * (1.0 + loss_pct),
            ),
        };
        if tp_hit {
            Some(ExitReason::TP)
        } else if sl_hit {
            Some(ExitReason::SL)
        } else if idx.saturating_sub(self.entry_idx) >= min_hold {
            Some(ExitReason::Timeout)
        } else {
            None
        }
    }
}
