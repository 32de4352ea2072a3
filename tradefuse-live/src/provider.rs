//! Signal source boundary.

use async_trait::async_trait;
use thiserror::Error;

use tradefuse_core::domain::Signal;

#[derive(Debug, Clone, Error, PartialEq)]
#[error("signal provider: {0}")]
pub struct ProviderError(pub String);

/// Latest prediction per timeframe. `Ok(None)` means no signal this tick.
#[async_trait]
pub trait SignalProvider: Send + Sync {
    async fn latest(&self, timeframe: &str) -> Result<Option<Signal>, ProviderError>;
}
