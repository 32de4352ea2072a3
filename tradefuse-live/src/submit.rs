//! Order submission: duplicate suppression, dry-run fills, retry on transient errors.

use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use tradefuse_core::fingerprint::OrderFingerprint;

use crate::audit::{AuditRecord, JsonlSink, SubmitMode};
use crate::config::RetryConfig;
use crate::manager::Clock;
use crate::venue::{Balance, OrderAction, VenueClient, VenueError, VenueOrder};

/// Exponential backoff: `base · 2^(attempt-1)`, capped, plus up to 10% jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            jitter_ratio: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        let max_jitter = (base.as_millis() as f64 * self.jitter_ratio.max(0.0)) as u64;
        if max_jitter == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRequest {
    pub pair: String,
    pub action: OrderAction,
    pub amount: f64,
    /// Reference price: the decision price, used for the fingerprint and as
    /// the dry-run fallback fill.
    pub price: f64,
    pub reason: String,
    pub signal: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    Filled,
    Simulated,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmitReport {
    pub status: SubmitStatus,
    pub fingerprint: OrderFingerprint,
    pub order: Option<VenueOrder>,
    pub fill_price: Option<f64>,
    /// Venue-reported fee, or `fee_rate · price · amount` for a dry-run fill.
    pub fee: Option<f64>,
    pub attempts: u32,
}

impl SubmitReport {
    /// True when an order was placed or simulated (not a suppressed duplicate).
    pub fn executed(&self) -> bool {
        self.status != SubmitStatus::Duplicate
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SubmitError {
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("order rejected: {0}")]
    Permanent(String),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

pub struct OrderSubmitter {
    venue: Arc<dyn VenueClient>,
    audit: JsonlSink,
    clock: Arc<dyn Clock>,
    dry_run: bool,
    fee_rate: f64,
    retry: RetryPolicy,
    call_timeout: Duration,
    dedup_window: Duration,
    recent: HashMap<OrderFingerprint, Instant>,
    last_balance: Option<Balance>,
}

impl std::fmt::Debug for OrderSubmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderSubmitter")
            .field("dry_run", &self.dry_run)
            .field("retry", &self.retry)
            .field("recent", &self.recent.len())
            .finish()
    }
}

/// Submitter tunables, usually taken from `LiveConfig`.
#[derive(Debug, Clone)]
pub struct SubmitterSettings {
    pub dry_run: bool,
    /// Fee charged on simulated fills, as a fraction of notional.
    pub fee_rate: f64,
    pub retry: RetryPolicy,
    pub call_timeout: Duration,
    pub dedup_window: Duration,
}

impl OrderSubmitter {
    pub fn new(
        venue: Arc<dyn VenueClient>,
        audit: JsonlSink,
        clock: Arc<dyn Clock>,
        settings: SubmitterSettings,
    ) -> Self {
        Self {
            venue,
            audit,
            clock,
            dry_run: settings.dry_run,
            fee_rate: settings.fee_rate,
            retry: settings.retry,
            call_timeout: settings.call_timeout,
            dedup_window: settings.dedup_window,
            recent: HashMap::new(),
            last_balance: None,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn audit(&self) -> &JsonlSink {
        &self.audit
    }

    /// Balance from the most recent resync, if any.
    pub fn last_balance(&self) -> Option<&Balance> {
        self.last_balance.as_ref()
    }

    /// Submit one market order.
    ///
    /// The fingerprint is recorded before the first attempt, so a repeat of a
    /// failed order is also suppressed until the window passes.
    pub async fn submit(&mut self, req: SubmitRequest) -> Result<SubmitReport, SubmitError> {
        let fingerprint = OrderFingerprint::new(&req.pair, req.action.as_str(), req.price, req.amount);
        let now = Instant::now();
        let window = self.dedup_window;
        self.recent.retain(|_, at| now.duration_since(*at) < window);

        if self.recent.contains_key(&fingerprint) {
            debug!(fingerprint = %fingerprint, action = %req.action, "duplicate submission suppressed");
            return Ok(SubmitReport {
                status: SubmitStatus::Duplicate,
                fingerprint,
                order: None,
                fill_price: None,
                fee: None,
                attempts: 0,
            });
        }
        self.recent.insert(fingerprint.clone(), now);

        if self.dry_run {
            return Ok(self.simulate(req, fingerprint).await);
        }
        self.submit_live(req, fingerprint).await
    }

    async fn simulate(&mut self, req: SubmitRequest, fingerprint: OrderFingerprint) -> SubmitReport {
        let price = match self.call(self.venue.fetch_ticker(&req.pair)).await {
            Ok(t) if t.last.is_finite() && t.last > 0.0 => t.last,
            Ok(_) => req.price,
            Err(e) => {
                warn!(pair = %req.pair, error = %e, "ticker unavailable for dry-run fill; using decision price");
                req.price
            }
        };
        let fee = self.fee_rate * price * req.amount;
        info!(action = %req.action, pair = %req.pair, amount = req.amount, price, fee, "dry-run fill");
        self.record(
            &req,
            SubmitMode::Dry,
            1,
            Some(serde_json::json!({ "simulated": true, "price": price, "fee": fee })),
            None,
        );
        SubmitReport {
            status: SubmitStatus::Simulated,
            fingerprint,
            order: None,
            fill_price: Some(price),
            fee: Some(fee),
            attempts: 1,
        }
    }

    async fn submit_live(
        &mut self,
        req: SubmitRequest,
        fingerprint: OrderFingerprint,
    ) -> Result<SubmitReport, SubmitError> {
        let max = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .call(self.venue.create_market_order(&req.pair, req.action, req.amount))
                .await;
            match result {
                Ok(order) => {
                    let fill_price = order.fill_price().or(Some(req.price));
                    let fee = order.fee;
                    info!(
                        action = %req.action,
                        pair = %req.pair,
                        order_id = %order.id,
                        attempt,
                        "order filled"
                    );
                    self.record(&req, SubmitMode::Live, attempt, serde_json::to_value(&order).ok(), None);
                    return Ok(SubmitReport {
                        status: SubmitStatus::Filled,
                        fingerprint,
                        order: Some(order),
                        fill_price,
                        fee,
                        attempts: attempt,
                    });
                }
                Err(err) => {
                    self.record(&req, SubmitMode::Live, attempt, None, Some(err.to_string()));
                    match err {
                        VenueError::InsufficientFunds(msg) => {
                            warn!(action = %req.action, pair = %req.pair, error = %msg, "insufficient funds; resyncing balance");
                            self.resync_balance().await;
                            return Err(SubmitError::InsufficientFunds(msg));
                        }
                        VenueError::Permanent(msg) => {
                            warn!(action = %req.action, pair = %req.pair, error = %msg, "order rejected");
                            return Err(SubmitError::Permanent(msg));
                        }
                        VenueError::Transient(msg) if attempt >= max => {
                            warn!(attempts = attempt, error = %msg, "order retries exhausted");
                            return Err(SubmitError::RetriesExhausted {
                                attempts: attempt,
                                last: msg,
                            });
                        }
                        VenueError::Transient(msg) => {
                            let delay = self.retry.delay(attempt);
                            warn!(attempt, delay_ms = delay.as_millis() as u64, error = %msg, "transient order failure; retrying");
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }
    }

    async fn resync_balance(&mut self) {
        match self.call(self.venue.fetch_balance()).await {
            Ok(balance) => {
                info!(assets = balance.free.len(), "balance resynced");
                self.last_balance = Some(balance);
            }
            Err(e) => warn!(error = %e, "balance resync failed"),
        }
    }

    async fn call<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, VenueError>>,
    ) -> Result<T, VenueError> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(VenueError::Transient(format!(
                "venue call timed out after {}ms",
                self.call_timeout.as_millis()
            ))),
        }
    }

    fn record(
        &self,
        req: &SubmitRequest,
        mode: SubmitMode,
        attempt: u32,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) {
        self.audit.push(&AuditRecord {
            timestamp: self.clock.now_ms(),
            action: req.action,
            mode,
            pair: req.pair.clone(),
            amount: req.amount,
            reason: req.reason.clone(),
            signal: req.signal.clone(),
            result,
            error,
            attempt,
        });
    }

    /// Flush the audit queue and stop its writer.
    pub async fn close(self) {
        self.audit.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(3_000),
            jitter_ratio: 0.0,
        };
        let delays: Vec<u64> = (1..=5).map(|a| p.backoff(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![500, 1_000, 2_000, 3_000, 3_000]);
        assert_eq!(p.delay(2), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_stays_within_ratio() {
        let p = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(10_000),
            jitter_ratio: 0.1,
        };
        for _ in 0..50 {
            let d = p.delay(1).as_millis();
            assert!((1_000..=1_100).contains(&d), "{d}");
        }
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff(u32::MAX), p.max_delay);
    }
}
