//! TradeFuse Core: decision logic with no I/O.
//!
//! - Domain types (signals, candles, sides, ids)
//! - Trade quality scorer (weighted [0, 100] score from plain-number inputs)
//! - Signal fusion engine (weighted evaluators, override rules, thresholds)
//! - Backtest simulator with parameter sweeps
//! - Order fingerprints for duplicate suppression

pub mod backtest;
pub mod domain;
pub mod fingerprint;
pub mod fusion;
pub mod quality;
