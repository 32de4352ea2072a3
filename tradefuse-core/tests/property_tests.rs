//! Property tests for decision invariants.
//!
//! 1. Fused score and confidence stay in range for any evaluator set
//! 2. Scores below the decision threshold always hold
//! 3. A firing override decides regardless of the aggregate
//! 4. Backtests are deterministic; max drawdown is non-negative and never shrinks
//! 5. Trade quality total stays within [0, 100] under default weights

use proptest::prelude::*;
use tradefuse_core::backtest::{run, BacktestParams, EquityTracker};
use tradefuse_core::domain::{Candle, CandleLabel, Side, Signal, SignalRecord};
use tradefuse_core::fusion::{
    aggregate, threshold_decision, AggregatedDecision, EvalContext, EvalError, EvaluatorOutput,
    EvaluatorResult, FusionConfig, FusionEngine, OverrideDecision,
};
use tradefuse_core::quality::{QualityWeights, TradeQualityInputs, TradeQualityScorer};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_result() -> impl Strategy<Value = (f64, EvaluatorResult)> {
    (-5.0..5.0_f64, -3.0..3.0_f64, -1.0..2.0_f64).prop_map(|(w, s, c)| {
        (
            w,
            EvaluatorResult {
                score: s.clamp(-1.0, 1.0),
                confidence: c.clamp(0.0, 1.0),
            },
        )
    })
}

fn arb_label() -> impl Strategy<Value = Option<CandleLabel>> {
    prop_oneof![
        4 => Just(None),
        1 => Just(Some(CandleLabel::StrongBuy)),
        1 => Just(Some(CandleLabel::StrongSell)),
        1 => Just(Some(CandleLabel::Buy)),
        1 => Just(Some(CandleLabel::Neutral)),
    ]
}

fn arb_candles() -> impl Strategy<Value = Vec<Candle>> {
    prop::collection::vec((-0.01..0.01_f64, arb_label()), 2..150).prop_map(|steps| {
        let mut price = 100.0;
        steps
            .into_iter()
            .enumerate()
            .map(|(i, (ret, label))| {
                price *= 1.0 + ret;
                Candle::from_close(i as i64 * 60_000, price, label)
            })
            .collect()
    })
}

fn arb_params() -> impl Strategy<Value = BacktestParams> {
    (0.001..0.02_f64, 0.001..0.02_f64, 1usize..20, 0.0..80.0_f64, 0.0..0.002_f64).prop_map(
        |(profit_pct, loss_pct, min_hold, trade_quality, fee_rate)| BacktestParams {
            profit_pct,
            loss_pct,
            min_hold,
            trade_quality,
            fee_rate,
            ..Default::default()
        },
    )
}

fn signal() -> Signal {
    SignalRecord {
        timestamp: 0,
        price: 100.0,
        side: Some("buy".into()),
        confidence: Some(0.5),
        ..Default::default()
    }
    .into_signal("1h")
}

// ── 1. Aggregate ranges ─────────────────────────────────────────────

proptest! {
    #[test]
    fn aggregate_is_bounded(results in prop::collection::vec(arb_result(), 0..12)) {
        let agg = aggregate(results);
        prop_assert!((-1.0..=1.0).contains(&agg.normalized_score));
        prop_assert!((0.0..=1.0).contains(&agg.confidence));
        prop_assert!(agg.total_weight >= 0.0);
    }

    #[test]
    fn engine_output_is_bounded(raw in prop::collection::vec((-10.0..10.0_f64, -10.0..10.0_f64, 0.0..3.0_f64), 1..8)) {
        let mut engine = FusionEngine::default();
        for (i, (score, confidence, weight)) in raw.into_iter().enumerate() {
            let ev = move |_: &Signal, _: &EvalContext| -> Result<EvaluatorOutput, EvalError> {
                Ok(EvaluatorOutput::Scored { score, confidence })
            };
            engine.register_evaluator(format!("ev{i}"), ev, weight).unwrap();
        }
        let out = engine.evaluate(&signal(), &EvalContext::default());
        prop_assert!((-1.0..=1.0).contains(&out.aggregated.normalized_score));
        prop_assert!((0.0..=1.0).contains(&out.aggregated.confidence));
    }
}

// ── 2. Threshold ────────────────────────────────────────────────────

proptest! {
    #[test]
    fn below_threshold_always_holds(
        score in -1.0..1.0_f64,
        threshold in 0.0..1.5_f64,
        confidence in 0.0..1.0_f64,
        min_confidence in 0.0..1.0_f64,
    ) {
        prop_assume!(score.abs() < threshold);
        let agg = AggregatedDecision {
            raw_score: score,
            normalized_score: score,
            total_weight: 1.0,
            confidence,
        };
        let d = threshold_decision(&agg, &FusionConfig { decision_threshold: threshold, min_confidence });
        prop_assert_eq!(d.side, Side::Hold);
    }
}

// ── 3. Override precedence ──────────────────────────────────────────

proptest! {
    #[test]
    fn override_ignores_aggregate(score in -1.0..1.0_f64, forced in prop_oneof![Just(Side::Buy), Just(Side::Sell), Just(Side::Hold)]) {
        let mut engine = FusionEngine::default();
        engine
            .register_evaluator(
                "fixed",
                move |_: &Signal, _: &EvalContext| -> Result<EvaluatorOutput, EvalError> {
                    Ok(EvaluatorOutput::Number(score))
                },
                1.0,
            )
            .unwrap();
        engine
            .register_override_rule(
                "force",
                move |_: &Signal, _: &EvalContext, _: &AggregatedDecision| -> Result<Option<OverrideDecision>, EvalError> {
                    Ok(Some(OverrideDecision::new(forced, "forced")))
                },
            )
            .unwrap();
        let out = engine.evaluate(&signal(), &EvalContext::default());
        prop_assert_eq!(out.final_decision.side, forced);
        prop_assert_eq!(out.final_decision.reason.as_str(), "forced");
    }
}

// ── 4. Backtest determinism and drawdown ────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn backtest_is_deterministic(candles in arb_candles(), params in arb_params()) {
        let a = run(&candles, &params);
        let b = run(&candles, &params);
        prop_assert_eq!(a, b);
    }

    #[test]
    fn max_drawdown_is_monotone(candles in arb_candles(), params in arb_params()) {
        let result = run(&candles, &params);
        prop_assert!(result.stats.max_drawdown >= 0.0);
        prop_assert_eq!(result.stats.equity_curve.len(), result.trades.len());

        let mut eq = EquityTracker::new();
        let mut last = 0.0;
        for t in &result.trades {
            eq.record(t.pnl);
            prop_assert!(eq.max_drawdown() >= last);
            last = eq.max_drawdown();
        }
        prop_assert!((last - result.stats.max_drawdown).abs() < 1e-9);
    }

    #[test]
    fn trades_never_overlap(candles in arb_candles(), params in arb_params()) {
        let result = run(&candles, &params);
        for pair in result.trades.windows(2) {
            prop_assert!(pair[0].exit_idx < pair[1].entry_idx);
        }
        for t in &result.trades {
            prop_assert!(t.exit_idx > t.entry_idx);
        }
    }
}

// ── 5. Trade quality range ──────────────────────────────────────────

proptest! {
    #[test]
    fn quality_total_within_bounds(
        fracs in prop::collection::vec(-0.5..1.5_f64, 8),
        rr in -1.0..10.0_f64,
        vol in 0.0..0.1_f64,
        age in 0.0..3_000.0_f64,
        outcome in prop::option::of(-50.0..50.0_f64),
    ) {
        let inputs = TradeQualityInputs {
            signal_strength: fracs[0],
            win_rate: fracs[1],
            risk_reward: rr,
            execution_quality: fracs[2],
            volatility: vol,
            outcome,
            ensemble_confidence: fracs[3],
            model_diversity: fracs[4],
            signal_age_secs: age,
            regime_alignment: fracs[5],
            choppiness: fracs[6],
            liquidity: fracs[7],
        };
        let score = TradeQualityScorer::new(QualityWeights::default()).score(&inputs);
        prop_assert!(score.total_score >= -1e-9);
        prop_assert!(score.total_score <= 100.0 + 1e-9);
    }
}
