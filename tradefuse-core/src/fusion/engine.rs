//! Fusion engine: weighted aggregation of evaluators, override rules, thresholding.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;
use tracing::{debug, warn};

use super::evaluator::{EvalContext, Evaluator, EvaluatorResult, OverrideDecision, OverrideRule};
use crate::domain::{Side, Signal};

/// Scores at or above this magnitude survive low-confidence dampening.
pub const DAMPENING_SCORE_FLOOR: f64 = 0.5;

#[derive(Debug, Error, PartialEq)]
pub enum FusionError {
    #[error("evaluator '{0}' is already registered")]
    DuplicateEvaluator(String),

    #[error("override rule '{0}' is already registered")]
    DuplicateOverride(String),

    #[error("evaluator '{name}' has non-finite weight {weight}")]
    InvalidWeight { name: String, weight: f64 },
}

/// Decision thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// `|normalized_score|` below this is a hold.
    pub decision_threshold: f64,
    /// Aggregate confidence below this annotates (and may dampen) the decision.
    pub min_confidence: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            decision_threshold: 0.05,
            min_confidence: 0.3,
        }
    }
}

/// Weighted aggregate over all evaluators that produced an opinion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedDecision {
    pub raw_score: f64,
    pub normalized_score: f64,
    pub total_weight: f64,
    pub confidence: f64,
}

/// What one evaluator contributed to an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EvaluatorOutcome {
    Opinion(EvaluatorResult),
    NoOpinion,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorReport {
    pub name: String,
    pub weight: f64,
    pub outcome: EvaluatorOutcome,
}

/// The override that won, tagged with the rule that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiredOverride {
    pub rule: String,
    pub decision: OverrideDecision,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalDecision {
    pub side: Side,
    pub score: f64,
    pub confidence: f64,
    pub reason: String,
}

/// Full result of [`FusionEngine::evaluate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionOutcome {
    pub evaluator_results: Vec<EvaluatorReport>,
    pub aggregated: AggregatedDecision,
    pub override_decision: Option<FiredOverride>,
    pub final_decision: FinalDecision,
}

struct RegisteredEvaluator {
    name: String,
    weight: f64,
    evaluator: Box<dyn Evaluator>,
}

struct RegisteredOverride {
    name: String,
    rule: Box<dyn OverrideRule>,
}

/// Caller-owned registry of evaluators and override rules.
///
/// Evaluators and rules run in registration order. A failing or panicking
/// evaluator is logged and left out of the aggregate; a failing rule is
/// logged and skipped. `evaluate` itself never fails.
pub struct FusionEngine {
    config: FusionConfig,
    evaluators: Vec<RegisteredEvaluator>,
    overrides: Vec<RegisteredOverride>,
}

impl FusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        Self {
            config,
            evaluators: Vec::new(),
            overrides: Vec::new(),
        }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Replace the decision thresholds. Registrations are kept.
    pub fn set_config(&mut self, config: FusionConfig) {
        self.config = config;
    }

    pub fn register_evaluator(
        &mut self,
        name: impl Into<String>,
        evaluator: impl Evaluator + 'static,
        weight: f64,
    ) -> Result<(), FusionError> {
        let name = name.into();
        if self.evaluators.iter().any(|e| e.name == name) {
            return Err(FusionError::DuplicateEvaluator(name));
        }
        if !weight.is_finite() {
            return Err(FusionError::InvalidWeight { name, weight });
        }
        self.evaluators.push(RegisteredEvaluator {
            name,
            weight,
            evaluator: Box::new(evaluator),
        });
        Ok(())
    }

    pub fn register_override_rule(
        &mut self,
        name: impl Into<String>,
        rule: impl OverrideRule + 'static,
    ) -> Result<(), FusionError> {
        let name = name.into();
        if self.overrides.iter().any(|r| r.name == name) {
            return Err(FusionError::DuplicateOverride(name));
        }
        self.overrides.push(RegisteredOverride {
            name,
            rule: Box::new(rule),
        });
        Ok(())
    }

    pub fn evaluator_names(&self) -> Vec<&str> {
        self.evaluators.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn override_names(&self) -> Vec<&str> {
        self.overrides.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn evaluate(&self, signal: &Signal, ctx: &EvalContext) -> FusionOutcome {
        let evaluator_results: Vec<EvaluatorReport> = self
            .evaluators
            .iter()
            .map(|reg| EvaluatorReport {
                name: reg.name.clone(),
                weight: reg.weight,
                outcome: run_evaluator(reg, signal, ctx),
            })
            .collect();

        let aggregated = aggregate(evaluator_results.iter().filter_map(|r| match r.outcome {
            EvaluatorOutcome::Opinion(res) => Some((r.weight, res)),
            _ => None,
        }));

        let override_decision = self.first_override(signal, ctx, &aggregated);
        let final_decision = match &override_decision {
            Some(fired) => from_override(&fired.decision, &aggregated),
            None => threshold_decision(&aggregated, &self.config),
        };

        debug!(
            timeframe = %signal.timeframe,
            score = aggregated.normalized_score,
            confidence = aggregated.confidence,
            side = %final_decision.side,
            reason = %final_decision.reason,
            "fusion evaluated"
        );

        FusionOutcome {
            evaluator_results,
            aggregated,
            override_decision,
            final_decision,
        }
    }

    fn first_override(
        &self,
        signal: &Signal,
        ctx: &EvalContext,
        aggregated: &AggregatedDecision,
    ) -> Option<FiredOverride> {
        for reg in &self.overrides {
            let res = catch_unwind(AssertUnwindSafe(|| reg.rule.check(signal, ctx, aggregated)));
            match res {
                Ok(Ok(Some(decision))) => {
                    return Some(FiredOverride {
                        rule: reg.name.clone(),
                        decision,
                    })
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => warn!(rule = %reg.name, error = %e, "override rule failed"),
                Err(payload) => {
                    warn!(rule = %reg.name, panic = %panic_message(payload.as_ref()), "override rule panicked")
                }
            }
        }
        None
    }
}

impl Default for FusionEngine {
    fn default() -> Self {
        Self::new(FusionConfig::default())
    }
}

impl std::fmt::Debug for FusionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FusionEngine")
            .field("config", &self.config)
            .field("evaluators", &self.evaluator_names())
            .field("overrides", &self.override_names())
            .finish()
    }
}

fn run_evaluator(reg: &RegisteredEvaluator, signal: &Signal, ctx: &EvalContext) -> EvaluatorOutcome {
    match catch_unwind(AssertUnwindSafe(|| reg.evaluator.evaluate(signal, ctx))) {
        Ok(Ok(output)) => match output.normalize() {
            Some(res) => EvaluatorOutcome::Opinion(res),
            None => EvaluatorOutcome::NoOpinion,
        },
        Ok(Err(e)) => {
            warn!(evaluator = %reg.name, error = %e, "evaluator failed; excluded from aggregate");
            EvaluatorOutcome::Failed { error: e.to_string() }
        }
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            warn!(evaluator = %reg.name, panic = %msg, "evaluator panicked; excluded from aggregate");
            EvaluatorOutcome::Failed { error: format!("panic: {msg}") }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Weighted mean of `(weight, result)` pairs, normalized by `Σ|w|`.
///
/// Both score and confidence are 0 when the total weight is 0.
pub fn aggregate(results: impl IntoIterator<Item = (f64, EvaluatorResult)>) -> AggregatedDecision {
    let mut raw_score = 0.0;
    let mut raw_conf = 0.0;
    let mut total_weight = 0.0;
    for (w, r) in results {
        raw_score += w * r.score;
        raw_conf += w * r.confidence;
        total_weight += w.abs();
    }
    if total_weight <= 0.0 {
        return AggregatedDecision {
            raw_score,
            ..Default::default()
        };
    }
    AggregatedDecision {
        raw_score,
        normalized_score: (raw_score / total_weight).clamp(-1.0, 1.0),
        total_weight,
        confidence: (raw_conf / total_weight).clamp(0.0, 1.0),
    }
}

/// Threshold plus low-confidence dampening, applied when no override fired.
pub fn threshold_decision(agg: &AggregatedDecision, config: &FusionConfig) -> FinalDecision {
    let score = agg.normalized_score;
    let (mut side, mut reason) = if score.abs() < config.decision_threshold {
        (
            Side::Hold,
            format!("below_threshold({:.4}<{:.4})", score.abs(), config.decision_threshold),
        )
    } else {
        (Side::from_score(score), format!("score({score:.4})"))
    };

    if agg.confidence < config.min_confidence {
        reason.push_str(&format!(
            ";low_confidence({:.4}<{:.4})",
            agg.confidence, config.min_confidence
        ));
        if score.abs() < DAMPENING_SCORE_FLOOR {
            side = Side::Hold;
        }
    }

    FinalDecision {
        side,
        score,
        confidence: agg.confidence,
        reason,
    }
}

fn from_override(decision: &OverrideDecision, agg: &AggregatedDecision) -> FinalDecision {
    let score = decision
        .score
        .filter(|s| s.is_finite())
        .map(|s| s.clamp(-1.0, 1.0))
        .unwrap_or(agg.normalized_score);
    let confidence = decision
        .confidence
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(agg.confidence);
    FinalDecision {
        side: decision.side,
        score,
        confidence,
        reason: decision.reason.clone(),
    }
}
