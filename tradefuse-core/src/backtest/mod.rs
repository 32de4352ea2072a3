//! Backtest simulator: replays labeled candles and reports realized trades.

pub mod costs;
pub mod params;
pub mod simulator;
pub mod stats;
pub mod sweep;
pub mod trade;

pub use costs::TradeCosts;
pub use params::{BacktestError, BacktestParams};
pub use simulator::{run, BacktestReport, BacktestRun, Simulator, UNLABELED};
pub use stats::{BacktestStats, EquityTracker, NoTradeReason};
pub use sweep::{sweep, ParamGrid};
pub use trade::{BacktestTrade, ExitReason};
