//! Signal fusion: many weak evaluator opinions in, one buy/sell/hold decision out.

pub mod engine;
pub mod evaluator;

pub use engine::{
    aggregate, threshold_decision, AggregatedDecision, EvaluatorOutcome, EvaluatorReport,
    FinalDecision, FiredOverride, FusionConfig, FusionEngine, FusionError, FusionOutcome,
};
pub use evaluator::{
    EvalContext, EvalError, Evaluator, EvaluatorOutput, EvaluatorResult, OverrideDecision,
    OverrideRule,
};
