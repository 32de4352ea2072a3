//! Position/Order Manager: the lifecycle state machine for tracked orders.
//!
//! `track_order` opens or merges, `apply_price` reports SL/TP crossings,
//! `close_order` finalizes exactly once. The manager is owned by a single
//! worker, so none of this is synchronized.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use tradefuse_core::domain::{OrderId, PositionSide};

use crate::position::{CloseReason, CloseRequest, OrderLike, Position, RiskTrigger, TrackOptions};

#[derive(Debug, Error, PartialEq)]
pub enum PositionError {
    #[error("unknown order id {0}")]
    UnknownOrder(OrderId),

    #[error("order {0} is already closed")]
    AlreadyClosed(OrderId),

    #[error("order id must not be empty")]
    MissingId,
}

/// Wall clock in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Settable clock for tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self(AtomicI64::new(now_ms))
    }

    pub fn set(&self, now_ms: i64) {
        self.0.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: i64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Default SL/TP applied when `track_order` gets no override.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskDefaults {
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
}

pub struct PositionManager {
    positions: BTreeMap<OrderId, Position>,
    defaults: RiskDefaults,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for PositionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionManager")
            .field("positions", &self.positions.len())
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl PositionManager {
    pub fn new(defaults: RiskDefaults, clock: Arc<dyn Clock>) -> Self {
        Self {
            positions: BTreeMap::new(),
            defaults,
            clock,
        }
    }

    /// Replace in-memory state with a previously persisted snapshot.
    pub fn restore(&mut self, tracked: BTreeMap<OrderId, Position>) {
        self.positions = tracked;
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Start tracking an order, or merge new fields onto an open record.
    ///
    /// Non-finite or negative amounts become 0. `opened_at` is set only the
    /// first time. Closed records are terminal and cannot be re-tracked.
    pub fn track_order(&mut self, order: OrderLike, opts: TrackOptions) -> Result<Position, PositionError> {
        let id = order.id.trim();
        if id.is_empty() {
            return Err(PositionError::MissingId);
        }
        let id = OrderId::from(id);
        let now = self.clock.now_ms();
        let amount = order.amount.map(sanitize_amount);
        let side = order.side.as_deref().map(PositionSide::from_order_side);

        let position = match self.positions.get_mut(&id) {
            Some(existing) if !existing.open => return Err(PositionError::AlreadyClosed(id)),
            Some(existing) => {
                if let Some(symbol) = order.symbol {
                    existing.symbol = Some(symbol);
                }
                if let Some(side) = side {
                    existing.side = side;
                }
                if let Some(amount) = amount {
                    existing.amount = amount;
                }
                if let Some(price) = order.entry_price.filter(|p| p.is_finite()) {
                    existing.entry_price = price;
                }
                if let Some(sl) = opts.stop_loss_pct {
                    existing.stop_loss_pct = sl;
                }
                if let Some(tp) = opts.take_profit_pct {
                    existing.take_profit_pct = tp;
                }
                existing.last_updated = now;
                debug!(id = %id, "merged tracked order");
                existing.clone()
            }
            None => {
                let entry_price = order.entry_price.filter(|p| p.is_finite()).unwrap_or(0.0);
                let position = Position {
                    id: id.clone(),
                    symbol: order.symbol,
                    side: side.unwrap_or(PositionSide::Short),
                    entry_price,
                    amount: amount.unwrap_or(0.0),
                    opened_at: now,
                    stop_loss_pct: opts.stop_loss_pct.unwrap_or(self.defaults.stop_loss_pct),
                    take_profit_pct: opts.take_profit_pct.unwrap_or(self.defaults.take_profit_pct),
                    open: true,
                    exit_price: None,
                    exit_ts: None,
                    closed_reason: None,
                    realized_pnl: None,
                    last_price: None,
                    last_updated: now,
                };
                info!(
                    id = %id,
                    side = %position.side,
                    amount = position.amount,
                    entry = position.entry_price,
                    "tracking order"
                );
                self.positions.insert(id, position.clone());
                position
            }
        };
        Ok(position)
    }

    /// Close a tracked order. Idempotent: a closed record is returned unchanged.
    ///
    /// Exit price falls back to the last polled price, then to 0.
    pub fn close_order(&mut self, id: &OrderId, req: CloseRequest) -> Result<Position, PositionError> {
        let now = self.clock.now_ms();
        let position = self
            .positions
            .get_mut(id)
            .ok_or_else(|| PositionError::UnknownOrder(id.clone()))?;
        if !position.open {
            debug!(id = %id, "close ignored; already closed");
            return Ok(position.clone());
        }

        let exit = match req.exit_price.filter(|p| p.is_finite()).or(position.last_price) {
            Some(p) => p,
            None => {
                warn!(id = %id, "closing without exit or last price; exit recorded as 0");
                0.0
            }
        };
        let pnl = position.pnl_at(exit);

        position.open = false;
        position.exit_price = Some(exit);
        position.exit_ts = Some(now);
        position.closed_reason = Some(req.reason);
        position.realized_pnl = Some(pnl);
        position.last_updated = now;

        info!(id = %id, reason = %req.reason, exit, pnl, "position closed");
        Ok(position.clone())
    }

    /// Record a polled price and report a crossed risk level.
    ///
    /// Stop-loss is checked first; when it fires, take-profit is not evaluated.
    pub fn apply_price(&mut self, id: &OrderId, price: f64) -> Result<Option<RiskTrigger>, PositionError> {
        let now = self.clock.now_ms();
        let position = self
            .positions
            .get_mut(id)
            .ok_or_else(|| PositionError::UnknownOrder(id.clone()))?;
        if !position.open || !price.is_finite() {
            return Ok(None);
        }
        position.last_price = Some(price);
        position.last_updated = now;

        let long = position.side == PositionSide::Long;
        if let Some(sl) = position.stop_loss_price() {
            let hit = if long { price <= sl } else { price >= sl };
            if hit {
                return Ok(Some(RiskTrigger {
                    reason: CloseReason::StopLoss,
                    price,
                }));
            }
        }
        if let Some(tp) = position.take_profit_price() {
            let hit = if long { price >= tp } else { price <= tp };
            if hit {
                return Ok(Some(RiskTrigger {
                    reason: CloseReason::TakeProfit,
                    price,
                }));
            }
        }
        Ok(None)
    }

    pub fn get(&self, id: &OrderId) -> Option<&Position> {
        self.positions.get(id)
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values().filter(|p| p.open)
    }

    /// Open positions on `symbol`, as (id, side) pairs.
    pub fn open_on(&self, symbol: &str) -> Vec<(OrderId, PositionSide)> {
        self.open_positions()
            .filter(|p| p.symbol.as_deref() == Some(symbol))
            .map(|p| (p.id.clone(), p.side))
            .collect()
    }

    pub fn tracked(&self) -> &BTreeMap<OrderId, Position> {
        &self.positions
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

fn sanitize_amount(amount: f64) -> f64 {
    if amount.is_finite() && amount >= 0.0 {
        amount
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (PositionManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let mgr = PositionManager::new(
            RiskDefaults {
                stop_loss_pct: 0.02,
                take_profit_pct: 0.05,
            },
            clock.clone(),
        );
        (mgr, clock)
    }

    fn order(id: &str, side: &str, amount: f64, price: f64) -> OrderLike {
        OrderLike {
            id: id.into(),
            symbol: Some("BTC/EUR".into()),
            side: Some(side.into()),
            amount: Some(amount),
            entry_price: Some(price),
        }
    }

    #[test]
    fn track_canonicalizes_and_applies_defaults() {
        let (mut mgr, _) = manager();
        let p = mgr.track_order(order("a", "BUY", f64::NAN, 100.0), TrackOptions::default()).unwrap();
        assert_eq!(p.side, PositionSide::Long);
        assert_eq!(p.amount, 0.0);
        assert!(p.open);
        assert_eq!(p.stop_loss_pct, 0.02);
        assert_eq!(p.opened_at, 1_000);

        let p = mgr.track_order(order("b", "weird", -3.0, 50.0), TrackOptions::default()).unwrap();
        assert_eq!(p.side, PositionSide::Short);
        assert_eq!(p.amount, 0.0);
    }

    #[test]
    fn retrack_merges_and_keeps_opened_at() {
        let (mut mgr, clock) = manager();
        mgr.track_order(order("a", "buy", 1.0, 100.0), TrackOptions::default()).unwrap();
        clock.advance(5_000);
        let p = mgr
            .track_order(
                OrderLike {
                    id: "a".into(),
                    amount: Some(1.5),
                    ..Default::default()
                },
                TrackOptions {
                    take_profit_pct: Some(0.1),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(p.opened_at, 1_000);
        assert_eq!(p.last_updated, 6_000);
        assert_eq!(p.amount, 1.5);
        assert_eq!(p.entry_price, 100.0);
        assert_eq!(p.take_profit_pct, 0.1);
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn close_computes_side_sensitive_pnl() {
        let (mut mgr, _) = manager();
        mgr.track_order(order("l", "buy", 1.0, 100.0), TrackOptions::default()).unwrap();
        mgr.track_order(order("s", "sell", 1.0, 100.0), TrackOptions::default()).unwrap();

        let l = mgr.close_order(&"l".into(), CloseRequest::at(110.0, CloseReason::Manual)).unwrap();
        assert!((l.realized_pnl.unwrap() - 10.0).abs() < 1e-9);
        let s = mgr.close_order(&"s".into(), CloseRequest::at(90.0, CloseReason::Manual)).unwrap();
        assert!((s.realized_pnl.unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn close_is_idempotent() {
        let (mut mgr, clock) = manager();
        mgr.track_order(order("a", "buy", 1.0, 100.0), TrackOptions::default()).unwrap();
        let first = mgr.close_order(&"a".into(), CloseRequest::at(105.0, CloseReason::Manual)).unwrap();
        clock.advance(10_000);
        let second = mgr.close_order(&"a".into(), CloseRequest::at(1.0, CloseReason::StopLoss)).unwrap();
        assert_eq!(first, second);
        assert!(matches!(
            mgr.track_order(order("a", "buy", 1.0, 100.0), TrackOptions::default()),
            Err(PositionError::AlreadyClosed(_))
        ));
    }

    #[test]
    fn close_falls_back_to_last_price() {
        let (mut mgr, _) = manager();
        mgr.track_order(order("a", "buy", 2.0, 100.0), TrackOptions::default()).unwrap();
        mgr.apply_price(&"a".into(), 101.0).unwrap();
        let p = mgr.close_order(&"a".into(), CloseRequest::without_price(CloseReason::Manual)).unwrap();
        assert_eq!(p.exit_price, Some(101.0));
        assert!((p.realized_pnl.unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn close_without_any_price_records_zero() {
        let (mut mgr, _) = manager();
        mgr.track_order(
            OrderLike {
                id: "x".into(),
                side: Some("buy".into()),
                amount: Some(1.0),
                ..Default::default()
            },
            TrackOptions::default(),
        )
        .unwrap();
        let p = mgr.close_order(&"x".into(), CloseRequest::without_price(CloseReason::Manual)).unwrap();
        assert_eq!(p.exit_price, Some(0.0));
    }

    #[test]
    fn entry_price_is_not_a_close_fallback() {
        let (mut mgr, _) = manager();
        let tracked = mgr.track_order(order("a", "buy", 1.0, 100.0), TrackOptions::default()).unwrap();
        assert_eq!(tracked.last_price, None);

        let p = mgr.close_order(&"a".into(), CloseRequest::without_price(CloseReason::Manual)).unwrap();
        assert_eq!(p.exit_price, Some(0.0));
        assert_eq!(p.realized_pnl, Some(-100.0));
    }

    #[test]
    fn unknown_close_is_an_error() {
        let (mut mgr, _) = manager();
        assert_eq!(
            mgr.close_order(&"nope".into(), CloseRequest::without_price(CloseReason::Manual)),
            Err(PositionError::UnknownOrder("nope".into()))
        );
    }

    #[test]
    fn stop_loss_checked_before_take_profit() {
        let (mut mgr, _) = manager();
        // Overlapping levels: SL at 110, TP at 105. A price of 112 crosses both.
        mgr.track_order(
            order("a", "buy", 1.0, 100.0),
            TrackOptions {
                stop_loss_pct: Some(-0.1),
                take_profit_pct: Some(0.05),
            },
        )
        .unwrap();
        let trig = mgr.apply_price(&"a".into(), 112.0).unwrap().unwrap();
        assert_eq!(trig.reason, CloseReason::StopLoss);
    }

    #[test]
    fn short_levels_are_mirrored() {
        let (mut mgr, _) = manager();
        mgr.track_order(order("s", "sell", 1.0, 100.0), TrackOptions::default()).unwrap();
        assert_eq!(mgr.apply_price(&"s".into(), 101.0).unwrap(), None);
        assert_eq!(
            mgr.apply_price(&"s".into(), 94.0).unwrap().map(|t| t.reason),
            Some(CloseReason::TakeProfit)
        );
        assert_eq!(
            mgr.apply_price(&"s".into(), 103.0).unwrap().map(|t| t.reason),
            Some(CloseReason::StopLoss)
        );
    }

    #[test]
    fn disabled_levels_never_fire() {
        let (mut mgr, _) = manager();
        mgr.track_order(
            order("a", "buy", 1.0, 100.0),
            TrackOptions {
                stop_loss_pct: Some(0.0),
                take_profit_pct: Some(0.0),
            },
        )
        .unwrap();
        assert_eq!(mgr.apply_price(&"a".into(), 1.0).unwrap(), None);
        assert_eq!(mgr.apply_price(&"a".into(), 1_000.0).unwrap(), None);
    }

    #[test]
    fn open_on_filters_by_symbol() {
        let (mut mgr, _) = manager();
        mgr.track_order(order("a", "buy", 1.0, 100.0), TrackOptions::default()).unwrap();
        let mut other = order("b", "sell", 1.0, 10.0);
        other.symbol = Some("ETH/EUR".into());
        mgr.track_order(other, TrackOptions::default()).unwrap();
        assert_eq!(mgr.open_on("BTC/EUR"), vec![(OrderId::from("a"), PositionSide::Long)]);
    }
}
