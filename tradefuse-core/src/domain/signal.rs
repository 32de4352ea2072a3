//! Signal: the externally produced prediction record consumed by the fusion engine.
//!
//! Signals are immutable once read. Providers hand over loosely shaped
//! records (`label` or `side`, `confidence` or `win_rate`); they are
//! canonicalized here, at the boundary, so downstream code sees one shape.

use serde::{Deserialize, Serialize};

use super::side::Side;

/// A single prediction for one timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub timeframe: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub price: f64,
    pub side_hint: Side,
    /// Producer confidence, clamped to [0, 1].
    pub confidence: f64,
    /// Untouched provider payload, kept for evaluators and audit records.
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl Signal {
    /// Age in seconds relative to `now_ms`. Never negative.
    pub fn age_secs(&self, now_ms: i64) -> f64 {
        (now_ms.saturating_sub(self.timestamp) as f64 / 1000.0).max(0.0)
    }

    /// Numeric field from the raw payload, if present and finite.
    pub fn raw_f64(&self, key: &str) -> Option<f64> {
        self.raw
            .get(key)
            .and_then(|v| v.as_f64())
            .filter(|v| v.is_finite())
    }
}

/// Latest record per timeframe as returned by a signal provider.
///
/// Either `label` or `side` carries the direction; either `confidence` or
/// `win_rate` carries the conviction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalRecord {
    pub timestamp: i64,
    pub price: f64,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub win_rate: Option<f64>,
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl SignalRecord {
    /// Canonicalize into a [`Signal`].
    ///
    /// Labels such as `STRONG_BUY` or `sell` are reduced to their direction;
    /// unknown directions become `Hold`. Missing or non-finite confidence is 0.
    pub fn into_signal(self, timeframe: impl Into<String>) -> Signal {
        let side_hint = self
            .label
            .as_deref()
            .and_then(side_from_label)
            .or_else(|| self.side.as_deref().and_then(Side::parse_loose))
            .unwrap_or(Side::Hold);
        let confidence = self
            .confidence
            .or(self.win_rate)
            .filter(|c| c.is_finite())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);
        Signal {
            timeframe: timeframe.into(),
            timestamp: self.timestamp,
            price: self.price,
            side_hint,
            confidence,
            raw: self.raw,
        }
    }
}

fn side_from_label(label: &str) -> Option<Side> {
    let norm = label.trim().to_ascii_lowercase().replace([' ', '-'], "_");
    match norm.as_str() {
        "strong_buy" | "buy" | "long" => Some(Side::Buy),
        "strong_sell" | "sell" | "short" => Some(Side::Sell),
        "hold" | "neutral" | "flat" => Some(Side::Hold),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn label_takes_precedence_over_side() {
        let rec = SignalRecord {
            timestamp: 1_000,
            price: 100.0,
            label: Some("STRONG_SELL".into()),
            side: Some("buy".into()),
            confidence: Some(0.7),
            ..Default::default()
        };
        let sig = rec.into_signal("1h");
        assert_eq!(sig.side_hint, Side::Sell);
        assert_eq!(sig.timeframe, "1h");
    }

    #[test]
    fn win_rate_used_when_confidence_missing() {
        let rec = SignalRecord {
            side: Some("long".into()),
            win_rate: Some(1.4),
            ..Default::default()
        };
        let sig = rec.into_signal("5m");
        assert_eq!(sig.side_hint, Side::Buy);
        assert_eq!(sig.confidence, 1.0);
    }

    #[test]
    fn unknown_direction_is_hold() {
        let rec = SignalRecord {
            label: Some("sideways?".into()),
            ..Default::default()
        };
        assert_eq!(rec.into_signal("1h").side_hint, Side::Hold);
    }

    #[test]
    fn age_is_never_negative() {
        let sig = SignalRecord {
            timestamp: 10_000,
            ..Default::default()
        }
        .into_signal("1h");
        assert_eq!(sig.age_secs(4_000), 0.0);
        assert_eq!(sig.age_secs(70_000), 60.0);
        assert_eq!(sig.age_secs(i64::MIN), 0.0);
        assert!(sig.age_secs(i64::MAX).is_finite());
    }

    #[test]
    fn raw_numeric_lookup() {
        let sig = SignalRecord {
            raw: json!({"rsi": 71.5, "note": "x"}),
            ..Default::default()
        }
        .into_signal("1h");
        assert_eq!(sig.raw_f64("rsi"), Some(71.5));
        assert_eq!(sig.raw_f64("note"), None);
        assert_eq!(sig.raw_f64("missing"), None);
    }
}
