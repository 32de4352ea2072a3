//! Domain types for TradeFuse

pub mod candle;
pub mod ids;
pub mod side;
pub mod signal;

pub use candle::{Candle, CandleFeatures, CandleLabel};
pub use ids::{OrderId, RunId};
pub use side::{PositionSide, Side};
pub use signal::{Signal, SignalRecord};
