use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use options_supervisor::{
    Greeks, OptionLeg, OptionRight, PositionSnapshot, RiskAggregator, StrategyKind,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const SYMBOLS: [&str; 5] = ["SPY", "QQQ", "IWM", "AAPL", "TSLA"];

fn portfolio(n: usize) -> Vec<PositionSnapshot> {
    let expiry = NaiveDate::from_ymd_opt(2026, 12, 18).unwrap_or_default();
    (0..n)
        .map(|i| PositionSnapshot {
            id: format!("p{}", i),
            symbol: SYMBOLS[i % SYMBOLS.len()].to_string(),
            strategy: StrategyKind::VerticalSpread,
            legs: vec![
                OptionLeg {
                    strike: Decimal::from(400 + i as i64),
                    expiry,
                    right: OptionRight::Put,
                    quantity: -2,
                    greeks: Greeks::default(),
                },
                OptionLeg {
                    strike: Decimal::from(395 + i as i64),
                    expiry,
                    right: OptionRight::Put,
                    quantity: 2,
                    greeks: Greeks::default(),
                },
            ],
            upl_pct: 10.0,
            dte: 30,
            greeks: Greeks::new(0.1 * (i % 7) as f64 - 0.3, 0.02, 0.05, -0.1),
            current_premium: dec!(1.25) + Decimal::from(i % 4),
        })
        .collect()
}

/// Row path up to the threshold, columnar path above it
fn bench_aggregate(c: &mut Criterion) {
    let aggregator = RiskAggregator::with_buying_power(dec!(250000));
    let mut group = c.benchmark_group("aggregate");

    for size in [5, 10, 50, 500] {
        let positions = portfolio(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &positions, |b, positions| {
            b.iter(|| black_box(aggregator.aggregate(black_box(positions))));
        });
    }
    group.finish();
}

fn bench_symbol_slice(c: &mut Criterion) {
    let aggregator = RiskAggregator::new();
    let positions = portfolio(200);

    c.bench_function("greeks_for_symbol", |b| {
        b.iter(|| black_box(aggregator.greeks_for_symbol(&positions, black_box("QQQ"))));
    });
}

criterion_group!(benches, bench_aggregate, bench_symbol_slice);
criterion_main!(benches);
