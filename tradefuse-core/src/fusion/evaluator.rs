//! Evaluator and override-rule contracts, and the normalized evaluator result.
//!
//! Evaluators may answer in several shapes (a bare number, a score with
//! confidence, or a side with strength). All of them are normalized here into
//! one [`EvaluatorResult`]; anything unrecognized is `NoOpinion` and simply
//! does not take part in aggregation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use super::engine::AggregatedDecision;
use crate::domain::{PositionSide, Side, Signal};

/// Failure reported by an evaluator or override rule. Isolated by the engine.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct EvalError(pub String);

impl From<&str> for EvalError {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EvalError {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Raw answer of an evaluator, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluatorOutput {
    /// Bare directional score; treated as full confidence.
    Number(f64),
    Scored { score: f64, confidence: f64 },
    Directional { side: Side, strength: f64 },
    NoOpinion,
}

impl EvaluatorOutput {
    /// Classify a loosely typed JSON answer (e.g. from a scripted or remote evaluator).
    pub fn from_json(value: &serde_json::Value) -> Self {
        if let Some(n) = value.as_f64() {
            return Self::Number(n);
        }
        let Some(obj) = value.as_object() else {
            return Self::NoOpinion;
        };
        if let Some(score) = obj.get("score").and_then(|v| v.as_f64()) {
            let confidence = obj
                .get("confidence")
                .and_then(|v| v.as_f64())
                .unwrap_or(1.0);
            return Self::Scored { score, confidence };
        }
        let side = obj
            .get("side")
            .and_then(|v| v.as_str())
            .and_then(Side::parse_loose);
        let strength = obj.get("strength").and_then(|v| v.as_f64());
        match (side, strength) {
            (Some(side), Some(strength)) => Self::Directional { side, strength },
            _ => Self::NoOpinion,
        }
    }

    /// Normalize into score ∈ [-1, 1], confidence ∈ [0, 1].
    ///
    /// Returns `None` for `NoOpinion` and for any non-finite component.
    pub fn normalize(&self) -> Option<EvaluatorResult> {
        let (score, confidence) = match *self {
            Self::Number(n) => (n, 1.0),
            Self::Scored { score, confidence } => (score, confidence),
            Self::Directional { side, strength } => {
                let strength = strength.clamp(0.0, 1.0);
                (side.sign() * strength, strength)
            }
            Self::NoOpinion => return None,
        };
        if !score.is_finite() || !confidence.is_finite() {
            return None;
        }
        Some(EvaluatorResult {
            score: score.clamp(-1.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
        })
    }
}

impl From<f64> for EvaluatorOutput {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

/// Normalized evaluator opinion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorResult {
    pub score: f64,
    pub confidence: f64,
}

/// Caller-supplied context for one evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalContext {
    /// Wall-clock reference for age-based rules, ms since epoch.
    pub now_ms: i64,
    /// Side of the currently open position on this pair, if any.
    pub open_position: Option<PositionSide>,
    /// Extra named inputs (indicator values, risk state) for evaluators and rules.
    pub features: BTreeMap<String, f64>,
}

impl EvalContext {
    pub fn feature(&self, key: &str) -> Option<f64> {
        self.features.get(key).copied()
    }
}

/// A weighted contributor to the fused decision.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, signal: &Signal, ctx: &EvalContext) -> Result<EvaluatorOutput, EvalError>;
}

impl<F> Evaluator for F
where
    F: Fn(&Signal, &EvalContext) -> Result<EvaluatorOutput, EvalError> + Send + Sync,
{
    fn evaluate(&self, signal: &Signal, ctx: &EvalContext) -> Result<EvaluatorOutput, EvalError> {
        self(signal, ctx)
    }
}

/// Decision produced by an override rule. Omitted score/confidence fall back
/// to the aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideDecision {
    pub side: Side,
    pub score: Option<f64>,
    pub confidence: Option<f64>,
    pub reason: String,
}

impl OverrideDecision {
    pub fn new(side: Side, reason: impl Into<String>) -> Self {
        Self {
            side,
            score: None,
            confidence: None,
            reason: reason.into(),
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// A rule that may replace the fused decision outright (e.g. a risk circuit-breaker).
pub trait OverrideRule: Send + Sync {
    fn check(
        &self,
        signal: &Signal,
        ctx: &EvalContext,
        aggregated: &AggregatedDecision,
    ) -> Result<Option<OverrideDecision>, EvalError>;
}

impl<F> OverrideRule for F
where
    F: Fn(&Signal, &EvalContext, &AggregatedDecision) -> Result<Option<OverrideDecision>, EvalError>
        + Send
        + Sync,
{
    fn check(
        &self,
        signal: &Signal,
        ctx: &EvalContext,
        aggregated: &AggregatedDecision,
    ) -> Result<Option<OverrideDecision>, EvalError> {
        self(signal, ctx, aggregated)
    }
}
