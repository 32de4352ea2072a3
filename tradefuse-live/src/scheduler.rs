//! Tick scheduling for the live worker.
//!
//! At most one scheduled tick is pending; scheduling again aborts the previous
//! timer. A separate watchdog re-sends ticks on a fixed period so the loop
//! keeps running even if a completion never rescheduled it.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickSource {
    Scheduled,
    Watchdog,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub source: TickSource,
    pub issued_at: Instant,
}

impl Tick {
    pub fn now(source: TickSource) -> Self {
        Self {
            source,
            issued_at: Instant::now(),
        }
    }
}

#[derive(Debug)]
pub struct TickScheduler {
    tx: mpsc::Sender<Tick>,
    pending: Option<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
}

impl TickScheduler {
    pub fn new(tx: mpsc::Sender<Tick>) -> Self {
        Self {
            tx,
            pending: None,
            watchdog: None,
        }
    }

    /// Arm a tick after `delay`, replacing any pending one.
    pub fn schedule(&mut self, delay: Duration, source: TickSource) {
        self.cancel();
        let tx = self.tx.clone();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // A full channel already holds a tick; dropping this one is fine.
            let _ = tx.try_send(Tick::now(source));
        }));
        trace!(delay_ms = delay.as_millis() as u64, ?source, "tick scheduled");
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Start the watchdog. The first watchdog tick fires one `period` from now.
    pub fn spawn_watchdog(&mut self, period: Duration) {
        if let Some(old) = self.watchdog.take() {
            old.abort();
        }
        let tx = self.tx.clone();
        self.watchdog = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tx.is_closed() {
                    break;
                }
                let _ = tx.try_send(Tick::now(TickSource::Watchdog));
            }
        }));
        debug!(period_ms = period.as_millis() as u64, "watchdog started");
    }

    pub fn stop(&mut self) {
        self.cancel();
        if let Some(w) = self.watchdog.take() {
            w.abort();
        }
    }
}

impl Drop for TickScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Re-entrancy guard: a tick issued before the previous cycle ended is stale.
pub fn should_skip(tick: &Tick, last_cycle_end: Option<Instant>) -> bool {
    last_cycle_end.is_some_and(|end| tick.issued_at < end)
}
