//! Trade quality scoring: weighted composite of normalized factors.
//!
//! Every factor is a pure function mapping one raw input to [0, 100]. The
//! composite is `Σ weight·factor + adjustment`. Weights are deliberately not
//! normalized: a score is only comparable to scores produced under the same
//! weight configuration.
//!
//! Used by the backtest simulator as its entry gate and by live callers as a
//! pre/post-trade confidence metric.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::domain::CandleFeatures;

/// Volatility at which the volatility factor peaks (2% per bar).
pub const DEFAULT_IDEAL_VOLATILITY: f64 = 0.02;

/// Signal age at which freshness reaches zero.
pub const DEFAULT_FRESHNESS_HORIZON_SECS: f64 = 900.0;

/// Raw scorer inputs. Fractions are in [0, 1]; `outcome` is a percent return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeQualityInputs {
    pub signal_strength: f64,
    pub win_rate: f64,
    pub risk_reward: f64,
    pub execution_quality: f64,
    pub volatility: f64,
    /// Realized outcome in percent. `None` while the trade is still open.
    pub outcome: Option<f64>,
    pub ensemble_confidence: f64,
    pub model_diversity: f64,
    pub signal_age_secs: f64,
    pub regime_alignment: f64,
    pub choppiness: f64,
    pub liquidity: f64,
}

impl TradeQualityInputs {
    /// Pre-trade inputs from candle features and a planned risk/reward ratio.
    pub fn from_features(features: &CandleFeatures, risk_reward: f64) -> Self {
        Self {
            signal_strength: features.signal_strength,
            win_rate: features.win_rate,
            risk_reward,
            execution_quality: features.execution_quality,
            volatility: features.volatility,
            outcome: None,
            ensemble_confidence: features.ensemble_confidence,
            model_diversity: features.model_diversity,
            signal_age_secs: features.signal_age_secs,
            regime_alignment: features.regime_alignment,
            choppiness: features.choppiness,
            liquidity: features.liquidity,
        }
    }
}

/// Per-factor weights. Callers tune these per strategy; the sum is not constrained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    pub signal_strength: f64,
    pub win_rate: f64,
    pub risk_reward: f64,
    pub execution_quality: f64,
    pub volatility: f64,
    pub outcome: f64,
    pub ensemble_confidence: f64,
    pub model_diversity: f64,
    pub freshness: f64,
    pub regime_alignment: f64,
    pub choppiness: f64,
    pub liquidity: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            signal_strength: 0.15,
            win_rate: 0.15,
            risk_reward: 0.15,
            execution_quality: 0.05,
            volatility: 0.10,
            outcome: 0.05,
            ensemble_confidence: 0.10,
            model_diversity: 0.05,
            freshness: 0.05,
            regime_alignment: 0.05,
            choppiness: 0.05,
            liquidity: 0.05,
        }
    }
}

impl QualityWeights {
    pub fn sum(&self) -> f64 {
        self.signal_strength
            + self.win_rate
            + self.risk_reward
            + self.execution_quality
            + self.volatility
            + self.outcome
            + self.ensemble_confidence
            + self.model_diversity
            + self.freshness
            + self.regime_alignment
            + self.choppiness
            + self.liquidity
    }
}

/// Normalized [0, 100] value of each factor, plus the custom adjustment applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityBreakdown {
    pub signal_strength: f64,
    pub win_rate: f64,
    pub risk_reward: f64,
    pub execution_quality: f64,
    pub volatility: f64,
    pub outcome: f64,
    pub ensemble_confidence: f64,
    pub model_diversity: f64,
    pub freshness: f64,
    pub regime_alignment: f64,
    pub choppiness: f64,
    pub liquidity: f64,
    pub adjustment: f64,
}

impl QualityBreakdown {
    fn weighted_sum(&self, w: &QualityWeights) -> f64 {
        w.signal_strength * self.signal_strength
            + w.win_rate * self.win_rate
            + w.risk_reward * self.risk_reward
            + w.execution_quality * self.execution_quality
            + w.volatility * self.volatility
            + w.outcome * self.outcome
            + w.ensemble_confidence * self.ensemble_confidence
            + w.model_diversity * self.model_diversity
            + w.freshness * self.freshness
            + w.regime_alignment * self.regime_alignment
            + w.choppiness * self.choppiness
            + w.liquidity * self.liquidity
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeQualityScore {
    pub total_score: f64,
    pub breakdown: QualityBreakdown,
}

/// Custom adjustment hook: sees the inputs and the normalized breakdown, returns
/// a value added to the weighted sum.
pub type QualityAdjustment = dyn Fn(&TradeQualityInputs, &QualityBreakdown) -> f64 + Send + Sync;

/// Configured scorer: weights, curve constants and an optional adjustment.
#[derive(Clone)]
pub struct TradeQualityScorer {
    pub weights: QualityWeights,
    pub ideal_volatility: f64,
    pub freshness_horizon_secs: f64,
    adjustment: Option<Arc<QualityAdjustment>>,
}

impl fmt::Debug for TradeQualityScorer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TradeQualityScorer")
            .field("weights", &self.weights)
            .field("ideal_volatility", &self.ideal_volatility)
            .field("freshness_horizon_secs", &self.freshness_horizon_secs)
            .field("adjustment", &self.adjustment.is_some())
            .finish()
    }
}

impl Default for TradeQualityScorer {
    fn default() -> Self {
        Self::new(QualityWeights::default())
    }
}

impl TradeQualityScorer {
    pub fn new(weights: QualityWeights) -> Self {
        Self {
            weights,
            ideal_volatility: DEFAULT_IDEAL_VOLATILITY,
            freshness_horizon_secs: DEFAULT_FRESHNESS_HORIZON_SECS,
            adjustment: None,
        }
    }

    pub fn with_ideal_volatility(mut self, ideal: f64) -> Self {
        self.ideal_volatility = ideal;
        self
    }

    pub fn with_adjustment<F>(mut self, f: F) -> Self
    where
        F: Fn(&TradeQualityInputs, &QualityBreakdown) -> f64 + Send + Sync + 'static,
    {
        self.adjustment = Some(Arc::new(f));
        self
    }

    /// Score one set of inputs. Deterministic, no side effects.
    pub fn score(&self, inputs: &TradeQualityInputs) -> TradeQualityScore {
        let mut breakdown = QualityBreakdown {
            signal_strength: fraction_factor(inputs.signal_strength),
            win_rate: win_rate_factor(inputs.win_rate),
            risk_reward: risk_reward_factor(inputs.risk_reward),
            execution_quality: fraction_factor(inputs.execution_quality),
            volatility: volatility_factor(inputs.volatility, self.ideal_volatility),
            outcome: outcome_factor(inputs.outcome),
            ensemble_confidence: fraction_factor(inputs.ensemble_confidence),
            model_diversity: fraction_factor(inputs.model_diversity),
            freshness: freshness_factor(inputs.signal_age_secs, self.freshness_horizon_secs),
            regime_alignment: fraction_factor(inputs.regime_alignment),
            choppiness: 100.0 - fraction_factor(inputs.choppiness),
            liquidity: fraction_factor(inputs.liquidity),
            adjustment: 0.0,
        };

        let mut total = breakdown.weighted_sum(&self.weights);
        if let Some(adjust) = &self.adjustment {
            let delta = adjust(inputs, &breakdown);
            if delta.is_finite() {
                breakdown.adjustment = delta;
                total += delta;
            }
        }

        TradeQualityScore {
            total_score: total,
            breakdown,
        }
    }
}

/// Score with the given weights and default curve constants, no adjustment.
pub fn score(inputs: &TradeQualityInputs, weights: &QualityWeights) -> TradeQualityScore {
    TradeQualityScorer::new(weights.clone()).score(inputs)
}

// ─── Factor curves ──────────────────────────────────────────────────

fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

/// Fraction in [0, 1] scaled to [0, 100] and clamped.
pub fn fraction_factor(x: f64) -> f64 {
    (finite_or_zero(x) * 100.0).clamp(0.0, 100.0)
}

/// Linear over [0.2, 1.0]: 0.2 and below → 0, 1.0 → 100.
pub fn win_rate_factor(win_rate: f64) -> f64 {
    ((finite_or_zero(win_rate) - 0.2) / 0.8 * 100.0).clamp(0.0, 100.0)
}

/// Piecewise: `≥2 → 100`, `[1,2) → 50 + 50·(rr−1)`, `<1 → rr·50` clamped to [0, 50].
pub fn risk_reward_factor(rr: f64) -> f64 {
    if rr.is_nan() {
        return 0.0;
    }
    if rr >= 2.0 {
        100.0
    } else if rr >= 1.0 {
        50.0 + 50.0 * (rr - 1.0)
    } else {
        (rr * 50.0).clamp(0.0, 50.0)
    }
}

/// Inverted V: 100 at `ideal`, falling linearly to 0 at 0 and at `2·ideal`.
pub fn volatility_factor(volatility: f64, ideal: f64) -> f64 {
    if !volatility.is_finite() || ideal.is_nan() || ideal <= 0.0 {
        return 0.0;
    }
    (100.0 * (1.0 - (volatility - ideal).abs() / ideal)).clamp(0.0, 100.0)
}

/// Linear over [−20, 20] percent; unresolved trades score a neutral 50.
pub fn outcome_factor(outcome: Option<f64>) -> f64 {
    match outcome {
        None => 50.0,
        Some(o) if !o.is_finite() => 50.0,
        Some(o) => ((o + 20.0) / 40.0 * 100.0).clamp(0.0, 100.0),
    }
}

/// Linear decay from 100 at age 0 to 0 at `horizon_secs`.
pub fn freshness_factor(age_secs: f64, horizon_secs: f64) -> f64 {
    if horizon_secs.is_nan() || horizon_secs <= 0.0 {
        return 0.0;
    }
    let age = finite_or_zero(age_secs).max(0.0);
    (100.0 * (1.0 - age / horizon_secs)).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> TradeQualityInputs {
        TradeQualityInputs::from_features(&CandleFeatures::default(), 2.5)
    }

    #[test]
    fn win_rate_curve() {
        assert_eq!(win_rate_factor(0.1), 0.0);
        assert_eq!(win_rate_factor(0.2), 0.0);
        assert!((win_rate_factor(0.6) - 50.0).abs() < 1e-9);
        assert_eq!(win_rate_factor(1.0), 100.0);
        assert_eq!(win_rate_factor(1.5), 100.0);
    }

    #[test]
    fn risk_reward_curve_is_piecewise() {
        assert_eq!(risk_reward_factor(3.0), 100.0);
        assert_eq!(risk_reward_factor(2.0), 100.0);
        assert!((risk_reward_factor(1.5) - 75.0).abs() < 1e-9);
        assert_eq!(risk_reward_factor(1.0), 50.0);
        assert!((risk_reward_factor(0.5) - 25.0).abs() < 1e-9);
        assert_eq!(risk_reward_factor(-1.0), 0.0);
        assert_eq!(risk_reward_factor(f64::INFINITY), 100.0);
        assert_eq!(risk_reward_factor(f64::NAN), 0.0);
    }

    #[test]
    fn volatility_penalizes_both_extremes() {
        let ideal = 0.02;
        assert_eq!(volatility_factor(ideal, ideal), 100.0);
        assert_eq!(volatility_factor(0.0, ideal), 0.0);
        assert_eq!(volatility_factor(0.04, ideal), 0.0);
        assert_eq!(volatility_factor(0.10, ideal), 0.0);
        let low = volatility_factor(0.01, ideal);
        let high = volatility_factor(0.03, ideal);
        assert!((low - 50.0).abs() < 1e-9);
        assert!((high - 50.0).abs() < 1e-9);
    }

    #[test]
    fn outcome_defaults_to_neutral_when_open() {
        assert_eq!(outcome_factor(None), 50.0);
        assert_eq!(outcome_factor(Some(-20.0)), 0.0);
        assert_eq!(outcome_factor(Some(0.0)), 50.0);
        assert_eq!(outcome_factor(Some(20.0)), 100.0);
        assert_eq!(outcome_factor(Some(45.0)), 100.0);
    }

    #[test]
    fn freshness_decays_to_zero_at_horizon() {
        assert_eq!(freshness_factor(0.0, 900.0), 100.0);
        assert!((freshness_factor(450.0, 900.0) - 50.0).abs() < 1e-9);
        assert_eq!(freshness_factor(900.0, 900.0), 0.0);
        assert_eq!(freshness_factor(5_000.0, 900.0), 0.0);
    }

    #[test]
    fn total_is_weighted_sum_of_breakdown() {
        let scorer = TradeQualityScorer::default();
        let result = scorer.score(&inputs());
        let b = &result.breakdown;
        let w = &scorer.weights;
        let expected = w.signal_strength * b.signal_strength
            + w.win_rate * b.win_rate
            + w.risk_reward * b.risk_reward
            + w.execution_quality * b.execution_quality
            + w.volatility * b.volatility
            + w.outcome * b.outcome
            + w.ensemble_confidence * b.ensemble_confidence
            + w.model_diversity * b.model_diversity
            + w.freshness * b.freshness
            + w.regime_alignment * b.regime_alignment
            + w.choppiness * b.choppiness
            + w.liquidity * b.liquidity;
        assert!((result.total_score - expected).abs() < 1e-9);
    }

    #[test]
    fn weights_are_not_normalized() {
        let mut doubled = QualityWeights::default();
        doubled.signal_strength *= 2.0;
        doubled.win_rate *= 2.0;
        doubled.risk_reward *= 2.0;
        doubled.execution_quality *= 2.0;
        doubled.volatility *= 2.0;
        doubled.outcome *= 2.0;
        doubled.ensemble_confidence *= 2.0;
        doubled.model_diversity *= 2.0;
        doubled.freshness *= 2.0;
        doubled.regime_alignment *= 2.0;
        doubled.choppiness *= 2.0;
        doubled.liquidity *= 2.0;

        let base = score(&inputs(), &QualityWeights::default()).total_score;
        let twice = score(&inputs(), &doubled).total_score;
        assert!((twice - 2.0 * base).abs() < 1e-9);
    }

    #[test]
    fn choppiness_is_a_penalty() {
        let scorer = TradeQualityScorer::default();
        let mut calm = inputs();
        calm.choppiness = 0.0;
        let mut choppy = inputs();
        choppy.choppiness = 1.0;
        assert_eq!(scorer.score(&calm).breakdown.choppiness, 100.0);
        assert_eq!(scorer.score(&choppy).breakdown.choppiness, 0.0);
    }

    #[test]
    fn custom_adjustment_is_added() {
        let base = TradeQualityScorer::default().score(&inputs()).total_score;
        let scorer = TradeQualityScorer::default().with_adjustment(|_, _| -7.5);
        let adjusted = scorer.score(&inputs());
        assert!((adjusted.total_score - (base - 7.5)).abs() < 1e-9);
        assert_eq!(adjusted.breakdown.adjustment, -7.5);
    }

    #[test]
    fn non_finite_adjustment_is_ignored() {
        let base = TradeQualityScorer::default().score(&inputs()).total_score;
        let scorer = TradeQualityScorer::default().with_adjustment(|_, _| f64::NAN);
        assert!((scorer.score(&inputs()).total_score - base).abs() < 1e-9);
    }

    #[test]
    fn scoring_is_deterministic() {
        let scorer = TradeQualityScorer::default();
        assert_eq!(scorer.score(&inputs()), scorer.score(&inputs()));
    }

    #[test]
    fn default_weights_sum_to_one() {
        assert!((QualityWeights::default().sum() - 1.0).abs() < 1e-9);
    }
}
