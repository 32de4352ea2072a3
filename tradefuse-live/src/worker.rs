//! The live worker: one task owning every piece of mutable state.
//!
//! Callers talk to it through a cloneable [`WorkerHandle`]; ticks arrive from
//! the [`TickScheduler`]. Both feed one `select!` loop, so explicit closes and
//! poll-loop mutations never interleave.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use tradefuse_core::domain::{OrderId, PositionSide, Signal};
use tradefuse_core::fusion::{EvalContext, FinalDecision, FusionEngine};

use crate::audit::{CandidateEvent, CandidateType, JsonlSink};
use crate::config::LiveConfig;
use crate::manager::{Clock, PositionError, PositionManager, RiskDefaults};
use crate::position::{CloseReason, CloseRequest, OrderLike, Position, TrackOptions};
use crate::provider::SignalProvider;
use crate::scheduler::{should_skip, Tick, TickScheduler, TickSource};
use crate::store::{PersistedState, StateStore};
use crate::submit::{
    OrderSubmitter, RetryPolicy, SubmitError, SubmitReport, SubmitRequest, SubmitStatus, SubmitterSettings,
};
use crate::venue::{OrderAction, VenueClient};

const INBOX_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker has stopped")]
    Stopped,

    #[error(transparent)]
    Position(#[from] PositionError),

    #[error("cycle failed: {0}")]
    Cycle(String),
}

/// Commands accepted by the worker. Each carries its reply channel.
#[derive(Debug)]
pub enum WorkerCommand {
    TrackOrder {
        order: OrderLike,
        opts: TrackOptions,
        reply: oneshot::Sender<Result<Position, PositionError>>,
    },
    CloseOrder {
        id: OrderId,
        request: CloseRequest,
        reply: oneshot::Sender<Result<Position, PositionError>>,
    },
    Snapshot {
        reply: oneshot::Sender<PersistedState>,
    },
    RunCycle {
        reply: oneshot::Sender<Result<CycleSummary, WorkerError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleSummary {
    /// Positions closed by stop-loss or take-profit this cycle.
    pub risk_exits: Vec<OrderId>,
    pub decision: Option<FinalDecision>,
    pub candidate: Option<CandidateEvent>,
    /// Submission results, in order.
    pub submissions: Vec<SubmitStatus>,
    pub opened: Vec<OrderId>,
    pub closed: Vec<OrderId>,
}

#[derive(Debug, Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<WorkerCommand>,
}

impl WorkerHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> WorkerCommand,
    ) -> Result<T, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.map_err(|_| WorkerError::Stopped)?;
        rx.await.map_err(|_| WorkerError::Stopped)
    }

    pub async fn track_order(&self, order: OrderLike, opts: TrackOptions) -> Result<Position, WorkerError> {
        Ok(self
            .request(|reply| WorkerCommand::TrackOrder { order, opts, reply })
            .await??)
    }

    pub async fn close_order(&self, id: OrderId, request: CloseRequest) -> Result<Position, WorkerError> {
        Ok(self
            .request(|reply| WorkerCommand::CloseOrder { id, request, reply })
            .await??)
    }

    pub async fn snapshot(&self) -> Result<PersistedState, WorkerError> {
        self.request(|reply| WorkerCommand::Snapshot { reply }).await
    }

    /// Run one cycle now, outside the timer schedule.
    pub async fn run_cycle(&self) -> Result<CycleSummary, WorkerError> {
        self.request(|reply| WorkerCommand::RunCycle { reply }).await?
    }

    /// Flush state and sinks, then stop the worker.
    pub async fn shutdown(&self) -> Result<(), WorkerError> {
        self.request(|reply| WorkerCommand::Shutdown { reply }).await
    }
}

/// External collaborators of the worker.
pub struct WorkerDeps {
    pub venue: Arc<dyn VenueClient>,
    pub provider: Arc<dyn SignalProvider>,
    pub engine: FusionEngine,
    pub clock: Arc<dyn Clock>,
}

pub struct LiveWorker {
    config: LiveConfig,
    venue: Arc<dyn VenueClient>,
    provider: Arc<dyn SignalProvider>,
    engine: FusionEngine,
    clock: Arc<dyn Clock>,
    manager: PositionManager,
    store: StateStore,
    submitter: OrderSubmitter,
    events: JsonlSink,
    last_action: Option<Instant>,
    last_cycle_end: Option<Instant>,
}

impl LiveWorker {
    /// Load persisted state and start the JSONL writers.
    pub async fn new(config: LiveConfig, deps: WorkerDeps) -> anyhow::Result<Self> {
        config.validate().context("invalid live config")?;

        let store = StateStore::new(&config.state_path, config.save_throttle(), config.poll_timeout());
        let state = store.load().await.context("load position state")?;

        let mut manager = PositionManager::new(
            RiskDefaults {
                stop_loss_pct: config.stop_loss_pct,
                take_profit_pct: config.take_profit_pct,
            },
            deps.clock.clone(),
        );
        manager.restore(state.tracked);

        let submitter = OrderSubmitter::new(
            deps.venue.clone(),
            JsonlSink::spawn(&config.audit_path, config.queue_capacity),
            deps.clock.clone(),
            SubmitterSettings {
                dry_run: config.dry_run,
                fee_rate: config.fee_rate,
                retry: RetryPolicy::from(&config.retry),
                call_timeout: config.poll_timeout(),
                dedup_window: config.dedup_window(),
            },
        );
        let events = JsonlSink::spawn(&config.events_path, config.queue_capacity);

        let mut engine = deps.engine;
        let thresholds = config.fusion_config();
        if *engine.config() != thresholds {
            info!(
                decision_threshold = thresholds.decision_threshold,
                min_confidence = thresholds.min_confidence,
                "fusion thresholds taken from live config"
            );
            engine.set_config(thresholds);
        }

        info!(
            pair = %config.pair,
            timeframe = %config.timeframe,
            dry_run = config.dry_run,
            open = manager.open_positions().count(),
            evaluators = engine.evaluator_names().len(),
            "live worker ready"
        );

        Ok(Self {
            venue: deps.venue,
            provider: deps.provider,
            engine,
            clock: deps.clock,
            manager,
            store,
            submitter,
            events,
            last_action: None,
            last_cycle_end: None,
            config,
        })
    }

    /// Start the worker with the tick timer and watchdog armed.
    pub fn spawn(self) -> (WorkerHandle, JoinHandle<()>) {
        self.start(true)
    }

    /// Start the worker without timers; cycles run only on `run_cycle`.
    pub fn spawn_manual(self) -> (WorkerHandle, JoinHandle<()>) {
        self.start(false)
    }

    fn start(self, timers: bool) -> (WorkerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let task = tokio::spawn(self.run(rx, timers));
        (WorkerHandle { tx }, task)
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<WorkerCommand>, timers: bool) {
        // Capacity 1: a tick already waiting makes further ticks redundant.
        let (tick_tx, mut ticks) = mpsc::channel::<Tick>(1);
        let mut scheduler = TickScheduler::new(tick_tx);
        if timers {
            scheduler.schedule(Duration::ZERO, TickSource::Scheduled);
            scheduler.spawn_watchdog(self.config.watchdog_interval());
        }
        let mut save_timer = tokio::time::interval(self.config.save_throttle().max(Duration::from_millis(50)));

        let shutdown_reply = loop {
            tokio::select! {
                cmd = inbox.recv() => match cmd {
                    None => break None,
                    Some(WorkerCommand::Shutdown { reply }) => break Some(reply),
                    Some(cmd) => self.handle(cmd).await,
                },
                Some(tick) = ticks.recv() => {
                    if should_skip(&tick, self.last_cycle_end) {
                        debug!(source = ?tick.source, "stale tick skipped");
                        continue;
                    }
                    let delay = match self.cycle().await {
                        Ok(_) => self.config.tick_interval(),
                        Err(e) => {
                            error!(error = %format!("{e:#}"), "cycle failed; backing off");
                            self.config.error_backoff()
                        }
                    };
                    self.last_cycle_end = Some(Instant::now());
                    if timers {
                        scheduler.schedule(delay, TickSource::Scheduled);
                    }
                },
                _ = save_timer.tick() => {
                    if let Err(e) = self.store.flush_due().await {
                        warn!(error = %e, "deferred state save failed");
                    }
                },
            }
        };

        scheduler.stop();
        self.shutdown().await;
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    async fn handle(&mut self, cmd: WorkerCommand) {
        match cmd {
            WorkerCommand::TrackOrder { order, opts, reply } => {
                let result = self.manager.track_order(order, opts);
                if result.is_ok() {
                    self.persist().await;
                }
                let _ = reply.send(result);
            }
            WorkerCommand::CloseOrder { id, request, reply } => {
                let result = self.manager.close_order(&id, request);
                if result.is_ok() {
                    self.persist().await;
                }
                let _ = reply.send(result);
            }
            WorkerCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            WorkerCommand::RunCycle { reply } => {
                let result = self
                    .cycle()
                    .await
                    .map_err(|e| WorkerError::Cycle(format!("{e:#}")));
                self.last_cycle_end = Some(Instant::now());
                let _ = reply.send(result);
            }
            WorkerCommand::Shutdown { reply } => {
                // Intercepted by the run loop.
                let _ = reply.send(());
            }
        }
    }

    fn snapshot(&self) -> PersistedState {
        PersistedState::new(self.manager.tracked().clone(), self.clock.now_ms())
    }

    async fn persist(&mut self) {
        let state = self.snapshot();
        if let Err(e) = self.store.request_save(state).await {
            warn!(error = %e, "state save failed");
        }
    }

    async fn shutdown(mut self) {
        let state = self.snapshot();
        if let Err(e) = self.store.request_save(state).await {
            warn!(error = %e, "final state save failed");
        }
        if let Err(e) = self.store.flush().await {
            warn!(error = %e, "final state flush failed");
        }
        self.events.close().await;
        self.submitter.close().await;
        info!("live worker stopped");
    }

    /// One poll-evaluate-act pass.
    ///
    /// Price updates and risk exits are saved before the provider is asked
    /// for a signal, so a failing provider cannot hold them back.
    async fn cycle(&mut self) -> anyhow::Result<CycleSummary> {
        let mut summary = CycleSummary::default();
        if self.poll_positions(&mut summary).await {
            self.persist().await;
        }

        let acted = self.signal_step(&mut summary).await;
        // An error may follow a close already applied in memory.
        if !matches!(acted, Ok(false)) {
            self.persist().await;
        }
        if let Err(e) = self.store.flush_due().await {
            warn!(error = %e, "deferred state save failed");
        }
        acted.map(|_| summary)
    }

    /// Fetch the latest signal and act on it. `Ok(true)` when positions changed.
    async fn signal_step(&mut self, summary: &mut CycleSummary) -> anyhow::Result<bool> {
        let timeout = self.config.poll_timeout();
        let signal = tokio::time::timeout(timeout, self.provider.latest(&self.config.timeframe))
            .await
            .context("signal provider timed out")?
            .context("signal provider failed")?;

        match signal {
            Some(signal) => self.act_on_signal(&signal, summary).await,
            None => {
                debug!(timeframe = %self.config.timeframe, "no signal this tick");
                Ok(false)
            }
        }
    }

    /// Refresh prices of open positions and execute crossed SL/TP levels.
    async fn poll_positions(&mut self, summary: &mut CycleSummary) -> bool {
        let open: Vec<(OrderId, String, PositionSide, f64)> = self
            .manager
            .open_positions()
            .filter_map(|p| p.symbol.clone().map(|s| (p.id.clone(), s, p.side, p.amount)))
            .collect();
        if open.is_empty() {
            return false;
        }

        let mut prices: BTreeMap<String, Option<f64>> = BTreeMap::new();
        let mut dirty = false;
        for (id, symbol, side, amount) in open {
            let price = match prices.get(&symbol) {
                Some(p) => *p,
                None => {
                    let p = self.fetch_price(&symbol).await;
                    prices.insert(symbol.clone(), p);
                    p
                }
            };
            let Some(price) = price else { continue };

            let trigger = match self.manager.apply_price(&id, price) {
                Ok(t) => t,
                Err(e) => {
                    warn!(id = %id, error = %e, "price update failed");
                    continue;
                }
            };
            dirty = true;
            let Some(trigger) = trigger else { continue };

            info!(id = %id, reason = %trigger.reason, price, "risk level crossed");
            let action = OrderAction::closing(side);
            let event = CandidateEvent {
                timestamp: self.clock.now_ms(),
                candidate_type: CandidateType::Close,
                desired_action: action,
                timeframe: self.config.timeframe.clone(),
                price,
                reason: trigger.reason.as_str().to_string(),
                actionable: true,
                throttled: false,
            };
            self.events.push(&event);

            let req = SubmitRequest {
                pair: symbol.clone(),
                action,
                amount,
                price,
                reason: trigger.reason.as_str().to_string(),
                signal: None,
            };
            match self.submitter.submit(req).await {
                Ok(report) if report.executed() => {
                    summary.submissions.push(report.status);
                    let exit = report.fill_price.unwrap_or(price);
                    match self.manager.close_order(&id, CloseRequest::at(exit, trigger.reason)) {
                        Ok(_) => summary.risk_exits.push(id),
                        Err(e) => warn!(id = %id, error = %e, "close after risk exit failed"),
                    }
                }
                Ok(report) => {
                    summary.submissions.push(report.status);
                    debug!(id = %id, "risk exit already submitted recently");
                }
                Err(e) => warn!(id = %id, error = %e, "risk exit order failed; will retry next tick"),
            }
        }
        dirty
    }

    async fn fetch_price(&self, symbol: &str) -> Option<f64> {
        match tokio::time::timeout(self.config.poll_timeout(), self.venue.fetch_ticker(symbol)).await {
            Ok(Ok(t)) if t.last.is_finite() && t.last > 0.0 => Some(t.last),
            Ok(Ok(t)) => {
                warn!(symbol, last = t.last, "ignoring unusable ticker price");
                None
            }
            Ok(Err(e)) => {
                warn!(symbol, error = %e, "ticker fetch failed");
                None
            }
            Err(_) => {
                warn!(symbol, "ticker fetch timed out");
                None
            }
        }
    }

    /// Fuse the signal, emit the candidate, and submit if actionable.
    async fn act_on_signal(&mut self, signal: &Signal, summary: &mut CycleSummary) -> anyhow::Result<bool> {
        let pair = self.config.pair.clone();
        let held = self.manager.open_on(&pair);
        let now_ms = self.clock.now_ms();

        let ctx = EvalContext {
            now_ms,
            open_position: held.first().map(|(_, side)| *side),
            features: signal_features(signal),
        };
        let outcome = self.engine.evaluate(signal, &ctx);
        let decision = outcome.final_decision;
        summary.decision = Some(decision.clone());

        let Some(action) = OrderAction::from_side(decision.side) else {
            debug!(reason = %decision.reason, "hold");
            return Ok(false);
        };

        let opposing: Vec<OrderId> = held
            .iter()
            .filter(|(_, side)| side.exit_side() == decision.side)
            .map(|(id, _)| id.clone())
            .collect();
        let already_positioned = held.iter().any(|(_, side)| side.entry_side() == decision.side);
        let throttled = self
            .last_action
            .is_some_and(|at| at.elapsed() < self.config.action_cooldown());

        let candidate_type = if opposing.is_empty() {
            CandidateType::Open
        } else {
            CandidateType::Close
        };
        let actionable = !throttled && (candidate_type == CandidateType::Close || !already_positioned);
        let event = CandidateEvent {
            timestamp: now_ms,
            candidate_type,
            desired_action: action,
            timeframe: signal.timeframe.clone(),
            price: signal.price,
            reason: decision.reason.clone(),
            actionable,
            throttled,
        };
        self.events.push(&event);
        summary.candidate = Some(event);

        if !actionable {
            debug!(?candidate_type, throttled, already_positioned, "candidate not actionable");
            return Ok(false);
        }

        let raw = serde_json::to_value(signal).ok();
        let mut dirty = false;
        match candidate_type {
            CandidateType::Close => {
                for id in opposing {
                    let Some(amount) = self.manager.get(&id).map(|p| p.amount) else { continue };
                    let req = SubmitRequest {
                        pair: pair.clone(),
                        action,
                        amount,
                        price: signal.price,
                        reason: decision.reason.clone(),
                        signal: raw.clone(),
                    };
                    let Some(report) = self.submit_or_skip(req, summary).await? else { continue };
                    let exit = report.fill_price.unwrap_or(signal.price);
                    self.manager
                        .close_order(&id, CloseRequest::at(exit, CloseReason::Signal))
                        .context("close on opposite signal")?;
                    summary.closed.push(id);
                    dirty = true;
                }
            }
            CandidateType::Open => {
                let req = SubmitRequest {
                    pair: pair.clone(),
                    action,
                    amount: self.config.order_amount,
                    price: signal.price,
                    reason: decision.reason.clone(),
                    signal: raw,
                };
                if let Some(report) = self.submit_or_skip(req, summary).await? {
                    let id = match &report.order {
                        Some(order) if !order.id.is_empty() => order.id.clone(),
                        _ => format!("dry-{now_ms}-{}", report.fingerprint),
                    };
                    let position = self
                        .manager
                        .track_order(
                            OrderLike {
                                id,
                                symbol: Some(pair.clone()),
                                side: Some(action.as_str().to_string()),
                                amount: Some(self.config.order_amount),
                                entry_price: report.fill_price.or(Some(signal.price)),
                            },
                            TrackOptions::default(),
                        )
                        .context("track new position")?;
                    summary.opened.push(position.id);
                    dirty = true;
                }
            }
        }
        if dirty {
            self.last_action = Some(Instant::now());
        }
        Ok(dirty)
    }

    /// Submit; `Ok(None)` when nothing was executed and the cycle should go on.
    async fn submit_or_skip(
        &mut self,
        req: SubmitRequest,
        summary: &mut CycleSummary,
    ) -> anyhow::Result<Option<SubmitReport>> {
        match self.submitter.submit(req).await {
            Ok(report) => {
                summary.submissions.push(report.status);
                Ok(report.executed().then_some(report))
            }
            Err(SubmitError::InsufficientFunds(msg)) => {
                warn!(error = %msg, "skipping order: insufficient funds");
                Ok(None)
            }
            Err(e) => Err(e).context("order submission failed"),
        }
    }
}

/// Numeric fields of the signal payload, exposed to evaluators as features.
fn signal_features(signal: &Signal) -> BTreeMap<String, f64> {
    signal
        .raw
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_f64().filter(|x| x.is_finite()).map(|x| (k.clone(), x)))
                .collect()
        })
        .unwrap_or_default()
}
