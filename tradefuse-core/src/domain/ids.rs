use serde::{Deserialize, Serialize};
use std::fmt;

/// Venue or caller assigned order identifier. Also keys tracked positions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OrderId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for OrderId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for OrderId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content hash of a backtest parameter set.
///
/// Uses BLAKE3 for stable hashing across builds/platforms, so the same params
/// always produce the same id in every report.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    /// First 12 hex chars, for log lines and file names.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_is_deterministic() {
        assert_eq!(RunId::from_bytes(b"abc"), RunId::from_bytes(b"abc"));
        assert_ne!(RunId::from_bytes(b"abc"), RunId::from_bytes(b"abd"));
    }

    #[test]
    fn run_id_short_prefix() {
        let id = RunId::from_bytes(b"params");
        assert_eq!(id.short().len(), 12);
        assert!(id.0.starts_with(id.short()));
    }

    #[test]
    fn order_id_serializes_as_plain_string() {
        let id = OrderId::from("abc-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc-1\"");
    }
}
