//! Candle-by-candle replay of label-driven entries with TP/SL/timeout exits.
//!
//! One position at a time, one unit per trade. Exits are only evaluated on
//! candles after the entry candle, and a candle that closes a position cannot
//! open a new one. A position still open at the end of the series is not
//! force-closed; it shows up in `stats.open_at_end` only.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use super::costs::TradeCosts;
use super::params::BacktestParams;
use super::stats::{BacktestStats, EquityTracker, NoTradeReason};
use super::trade::{BacktestTrade, OpenTrade};
use crate::domain::{Candle, RunId};
use crate::quality::{TradeQualityInputs, TradeQualityScorer};

/// Label key used in `signal_count` for candles without a label.
pub const UNLABELED: &str = "none";

/// Output of one backtest: parameters, closed trades, and aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRun {
    pub run_id: RunId,
    pub params: BacktestParams,
    pub trades: Vec<BacktestTrade>,
    pub stats: BacktestStats,
}

/// All runs for one data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub source: String,
    pub runs: Vec<BacktestRun>,
}

impl BacktestReport {
    pub fn new(source: impl Into<String>, runs: Vec<BacktestRun>) -> Self {
        Self {
            source: source.into(),
            runs,
        }
    }

    /// Run with the highest total PnL. Ties keep the earliest.
    pub fn best_by_pnl(&self) -> Option<&BacktestRun> {
        self.runs.iter().fold(None, |best, run| match best {
            Some(b) if b.stats.total_pnl >= run.stats.total_pnl => Some(b),
            _ => Some(run),
        })
    }
}

/// Replays candles with a fixed trade quality scorer.
#[derive(Debug, Clone, Default)]
pub struct Simulator {
    scorer: TradeQualityScorer,
}

impl Simulator {
    pub fn new(scorer: TradeQualityScorer) -> Self {
        Self { scorer }
    }

    pub fn scorer(&self) -> &TradeQualityScorer {
        &self.scorer
    }

    /// Replay `candles` with `params`.
    ///
    /// `params` must pass [`BacktestParams::validate`]; a zero `loss_pct`
    /// would stop out every entry on the next flat candle.
    pub fn run(&self, candles: &[Candle], params: &BacktestParams) -> BacktestRun {
        debug_assert!(params.validate().is_ok(), "backtest params must be validated");
        let costs = TradeCosts::new(params.fee_rate, params.slippage_pct);
        let risk_reward = params.risk_reward();

        let mut trades = Vec::new();
        let mut equity = EquityTracker::new();
        let mut signal_count: BTreeMap<String, usize> = BTreeMap::new();
        let mut no_trade: BTreeMap<String, usize> = BTreeMap::new();
        let mut open: Option<OpenTrade> = None;

        for (idx, candle) in candles.iter().enumerate() {
            let label_key = candle.label.map(|l| l.as_str()).unwrap_or(UNLABELED);
            *signal_count.entry(label_key.to_string()).or_insert(0) += 1;

            if candle.is_void() {
                continue;
            }

            if let Some(pos) = &open {
                if idx > pos.entry_idx {
                    if let Some(reason) = pos.exit_reason(
                        candle.close,
                        idx,
                        params.profit_pct,
                        params.loss_pct,
                        params.min_hold,
                    ) {
                        let exit = candle.close;
                        let pnl = pos.side.sign() * (exit - pos.entry) - costs.round_trip(pos.entry, exit);
                        equity.record(pnl);
                        trades.push(BacktestTrade {
                            side: pos.side,
                            label: pos.label,
                            entry_idx: pos.entry_idx,
                            exit_idx: idx,
                            entry_ts: pos.entry_ts,
                            exit_ts: candle.timestamp,
                            entry: pos.entry,
                            exit,
                            pnl,
                            reason,
                            trade_quality: pos.trade_quality,
                            hold_time: idx - pos.entry_idx,
                        });
                        open = None;
                        continue;
                    }
                }
                bump(&mut no_trade, NoTradeReason::InPosition);
                continue;
            }

            let Some((label, side)) = candle
                .label
                .and_then(|l| l.strong_direction().map(|side| (l, side)))
            else {
                bump(&mut no_trade, NoTradeReason::WrongLabel);
                continue;
            };

            let quality = self.quality(candle, risk_reward, params.now_ms);
            if quality < params.trade_quality {
                bump(&mut no_trade, NoTradeReason::BelowQuality);
                continue;
            }

            open = Some(OpenTrade {
                side,
                label,
                entry_idx: idx,
                entry_ts: candle.timestamp,
                entry: candle.close,
                trade_quality: quality,
            });
        }

        let open_at_end = open.map(|p| p.entry_idx);
        let stats = BacktestStats::from_trades(&trades, equity, signal_count, no_trade, open_at_end);
        let run_id = params.run_id();
        debug!(
            run_id = %run_id.short(),
            candles = candles.len(),
            trades = stats.num_trades,
            total_pnl = stats.total_pnl,
            "backtest complete"
        );

        BacktestRun {
            run_id,
            params: params.clone(),
            trades,
            stats,
        }
    }

    fn quality(&self, candle: &Candle, risk_reward: f64, now_ms: Option<i64>) -> f64 {
        let mut inputs = TradeQualityInputs::from_features(&candle.features, risk_reward);
        if let Some(now) = now_ms {
            inputs.signal_age_secs = (now.saturating_sub(candle.timestamp) as f64 / 1000.0).max(0.0);
        }
        self.scorer.score(&inputs).total_score
    }
}

fn bump(map: &mut BTreeMap<String, usize>, reason: NoTradeReason) {
    *map.entry(reason.as_str().to_string()).or_insert(0) += 1;
}

/// Run one backtest with a scorer built from `params.weights`.
pub fn run(candles: &[Candle], params: &BacktestParams) -> BacktestRun {
    Simulator::new(TradeQualityScorer::new(params.weights.clone())).run(candles, params)
}
