use proptest::prelude::*;
use vantage_domain::entities::trade_stats::TradeStats;
use vantage_domain::services::engine::{EngineConfig, SimulationEngine};
use vantage_domain::services::sizing::{KellyBasis, KellyCalculator, SizingPolicy};
use vantage_domain::value_objects::bar::Bar;
use vantage_domain::value_objects::side::SignalSide;
use vantage_domain::value_objects::signal::Signal;

fn bar(ts: i64, close: f64) -> Bar {
    Bar {
        instrument: "BTCUSD".to_string(),
        timestamp: ts,
        open: close,
        high: close,
        low: close,
        close,
        volume: 1.0,
    }
}

fn sizing() -> impl Strategy<Value = SizingPolicy> {
    prop_oneof![
        (10.0f64..20_000.0).prop_map(|notional| SizingPolicy::Fixed { notional }),
        (0.01f64..1.0).prop_map(|fraction| SizingPolicy::Percent { fraction }),
        (0.1f64..1.0).prop_map(|multiplier| SizingPolicy::Kelly { multiplier }),
    ]
}

fn drive(
    prices: &[f64],
    actions: &[u8],
    policy: SizingPolicy,
    commission_rate: f64,
) -> SimulationEngine {
    let mut engine = SimulationEngine::new(EngineConfig {
        initial_capital: 10_000.0,
        commission_rate,
        sizing: policy,
        ..EngineConfig::default()
    })
    .unwrap();
    let bars = prices
        .iter()
        .copied()
        .enumerate()
        .map(|(idx, close)| bar(idx as i64 * 60, close))
        .collect();
    engine.load_series("BTCUSD", bars).unwrap();

    let mut idx = 0;
    while engine.step() {
        let ts = engine.current_time().unwrap();
        let side = match actions.get(idx).copied().unwrap_or(2) % 3 {
            0 => SignalSide::Buy,
            1 => SignalSide::Sell,
            _ => SignalSide::Hold,
        };
        engine.execute_signal(&Signal::new(ts, "BTCUSD", side, 1.0, "", "prop"));
        assert!(engine.cash() >= 0.0, "cash went negative: {}", engine.cash());
        idx += 1;
    }
    engine.close_all_positions();
    engine
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn cash_never_negative_and_equity_identity_holds(
        prices in prop::collection::vec(0.01f64..100_000.0, 2..80),
        actions in prop::collection::vec(0u8..3, 0..80),
        policy in sizing(),
        commission in 0.0f64..0.01,
    ) {
        let engine = drive(&prices, &actions, policy, commission);
        prop_assert!(engine.cash() >= 0.0);
        for point in engine.equity_curve() {
            prop_assert!(point.cash >= 0.0);
            let diff = point.equity - (point.cash + point.holdings_value);
            prop_assert!(diff.abs() <= 1e-6 * point.equity.abs().max(1.0));
        }
    }

    #[test]
    fn drawdown_is_bounded_and_peak_dominates_curve(
        prices in prop::collection::vec(0.01f64..100_000.0, 2..80),
        actions in prop::collection::vec(0u8..3, 0..80),
        policy in sizing(),
    ) {
        let engine = drive(&prices, &actions, policy, 0.001);
        prop_assert!((0.0..=100.0).contains(&engine.max_drawdown_pct()));
        prop_assert!(engine.max_drawdown() >= 0.0);

        let mut peak = engine.initial_capital();
        for point in engine.equity_curve() {
            let next = peak.max(point.equity);
            prop_assert!(next >= peak);
            peak = next;
        }
        prop_assert!((engine.peak_equity() - peak).abs() <= 1e-9 * peak.max(1.0));
    }

    #[test]
    fn kelly_notional_stays_within_floor_and_cap(
        wins in 1usize..200,
        losses in 1usize..200,
        avg_win in 0.01f64..10_000.0,
        avg_loss in 0.01f64..10_000.0,
        multiplier in 0.01f64..2.0,
        equity in 1.0f64..1_000_000.0,
        price in 0.01f64..100_000.0,
    ) {
        prop_assume!(wins + losses >= 30);
        let stats = TradeStats {
            closed_trades: wins + losses,
            wins,
            losses,
            gross_profit: avg_win * wins as f64,
            gross_loss: -avg_loss * losses as f64,
        };
        let rec = KellyCalculator::new(multiplier).recommend(&stats, equity, price);
        prop_assert_eq!(rec.basis, KellyBasis::Formula);
        let share = rec.notional / equity;
        prop_assert!(share >= 0.01 - 1e-12 && share <= 0.25 + 1e-12);
        prop_assert!((rec.quantity * price - rec.notional).abs() <= 1e-6 * rec.notional.max(1.0));
    }
}
