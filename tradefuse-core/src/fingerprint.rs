//! Order fingerprints for short-window duplicate suppression.
//!
//! The key is a BLAKE3 hash of a canonical JSON encoding of
//! `(pair, action, price, amount)`. Price and amount are fixed to 8 decimals
//! so that float noise below venue precision does not defeat deduplication.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize)]
struct CanonicalOrder<'a> {
    pair: &'a str,
    action: String,
    price: String,
    amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderFingerprint(String);

impl OrderFingerprint {
    /// `action` is case-insensitive (`buy` and `BUY` fingerprint the same).
    pub fn new(pair: &str, action: &str, price: f64, amount: f64) -> Self {
        let canonical = CanonicalOrder {
            pair: pair.trim(),
            action: action.trim().to_ascii_uppercase(),
            price: format!("{price:.8}"),
            amount: format!("{amount:.8}"),
        };
        let json = serde_json::to_string(&canonical)
            .unwrap_or_else(|_| format!("{}|{}|{}|{}", canonical.pair, canonical.action, canonical.price, canonical.amount));
        Self(blake3::hash(json.as_bytes()).to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0[..self.0.len().min(16)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_orders_match() {
        let a = OrderFingerprint::new("BTC/EUR", "BUY", 100.0, 0.01);
        let b = OrderFingerprint::new("BTC/EUR", "buy", 100.0, 0.01);
        assert_eq!(a, b);
    }

    #[test]
    fn sub_precision_noise_is_ignored() {
        let a = OrderFingerprint::new("BTC/EUR", "BUY", 100.0, 0.01);
        let b = OrderFingerprint::new("BTC/EUR", "BUY", 100.000_000_000_1, 0.01);
        assert_eq!(a, b);
    }

    #[test]
    fn any_field_change_differs() {
        let base = OrderFingerprint::new("BTC/EUR", "BUY", 100.0, 0.01);
        assert_ne!(base, OrderFingerprint::new("ETH/EUR", "BUY", 100.0, 0.01));
        assert_ne!(base, OrderFingerprint::new("BTC/EUR", "SELL", 100.0, 0.01));
        assert_ne!(base, OrderFingerprint::new("BTC/EUR", "BUY", 100.01, 0.01));
        assert_ne!(base, OrderFingerprint::new("BTC/EUR", "BUY", 100.0, 0.02));
    }

    #[test]
    fn hex_digest() {
        let fp = OrderFingerprint::new("BTC/EUR", "BUY", 1.0, 1.0);
        assert_eq!(fp.as_str().len(), 64);
        assert_eq!(fp.to_string().len(), 16);
    }
}
