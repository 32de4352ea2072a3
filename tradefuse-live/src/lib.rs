//! TradeFuse Live: the long-running side of the pipeline.
//!
//! - Position/Order Manager (`track_order`, `close_order`, SL/TP polling)
//! - Atomic, throttled state persistence
//! - Order submission with duplicate suppression and retry
//! - Venue and signal-provider traits
//! - JSONL audit/candidate sinks
//! - Tick scheduler and the single-owner worker

pub mod audit;
pub mod config;
pub mod logging;
pub mod manager;
pub mod position;
pub mod provider;
pub mod scheduler;
pub mod store;
pub mod submit;
pub mod venue;
pub mod worker;

pub use config::{ConfigError, LiveConfig, RetryConfig};
pub use manager::{Clock, ManualClock, PositionError, PositionManager, RiskDefaults, SystemClock};
pub use position::{CloseReason, CloseRequest, OrderLike, Position, RiskTrigger, TrackOptions};
pub use provider::{ProviderError, SignalProvider};
pub use store::{PersistedState, StateStore, StoreError};
pub use submit::{OrderSubmitter, RetryPolicy, SubmitError, SubmitReport, SubmitRequest, SubmitStatus};
pub use venue::{Balance, OrderAction, Ticker, VenueClient, VenueError, VenueOrder};
pub use worker::{CycleSummary, LiveWorker, WorkerDeps, WorkerError, WorkerHandle};
