//! Portfolio-level Greek and exposure aggregation.
//!
//! Pure functions of the position set: nothing is cached between calls.
//! Callers that want to reuse a result across readers hold a `RiskSnapshot`.

use crate::data::{Greeks, PositionSnapshot};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Above this many positions the column-wise path is used
pub const COLUMNAR_THRESHOLD: usize = 10;

/// Net portfolio Greeks with per-underlying breakdowns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioGreeks {
    pub net_delta: f64,
    pub net_gamma: f64,
    pub net_theta: f64,
    pub net_vega: f64,
    pub delta_by_symbol: HashMap<String, f64>,
    pub gamma_by_symbol: HashMap<String, f64>,
    pub position_count: usize,
}

impl PortfolioGreeks {
    pub fn symbol_delta(&self, symbol: &str) -> f64 {
        self.delta_by_symbol.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn symbol_gamma(&self, symbol: &str) -> f64 {
        self.gamma_by_symbol.get(symbol).copied().unwrap_or(0.0)
    }
}

/// Notional exposure figures
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExposureMetrics {
    pub total_exposure: Decimal,
    /// Largest single position / total exposure, 0 when flat
    pub largest_position_pct: f64,
    pub exposure_by_symbol: HashMap<String, Decimal>,
    /// Fraction of account buying power in use, 0 when unknown
    pub buying_power_used_pct: f64,
    pub buying_power_available_pct: f64,
}

/// Greeks for one underlying
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolGreeks {
    pub symbol: String,
    pub greeks: Greeks,
    pub exposure: Decimal,
    pub position_count: usize,
}

/// One aggregation result, stamped with its computation time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskSnapshot {
    pub greeks: PortfolioGreeks,
    pub exposure: ExposureMetrics,
    pub computed_at: Option<DateTime<Utc>>,
}

/// Rolls per-position sensitivities and values up to portfolio level
#[derive(Debug, Clone, Default)]
pub struct RiskAggregator {
    /// Account buying power for utilization figures; zero disables them
    buying_power: Decimal,
}

impl RiskAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buying_power(buying_power: Decimal) -> Self {
        Self {
            buying_power: buying_power.max(Decimal::ZERO),
        }
    }

    pub fn aggregate(&self, positions: &[PositionSnapshot]) -> (PortfolioGreeks, ExposureMetrics) {
        let (greeks, totals) = if positions.len() > COLUMNAR_THRESHOLD {
            self.aggregate_columnar(positions)
        } else {
            self.aggregate_rows(positions)
        };

        (greeks, self.exposure_metrics(totals))
    }

    /// Aggregate and stamp the result for sharing
    pub fn snapshot(&self, positions: &[PositionSnapshot]) -> RiskSnapshot {
        let (greeks, exposure) = self.aggregate(positions);
        RiskSnapshot {
            greeks,
            exposure,
            computed_at: Some(Utc::now()),
        }
    }

    /// Same aggregation scoped to one underlying
    pub fn greeks_for_symbol(&self, positions: &[PositionSnapshot], symbol: &str) -> SymbolGreeks {
        let mut out = SymbolGreeks {
            symbol: symbol.to_string(),
            ..Default::default()
        };

        for pos in positions.iter().filter(|p| p.symbol == symbol) {
            out.greeks += pos.greeks;
            out.exposure += pos.notional_value();
            out.position_count += 1;
        }

        out
    }

    fn aggregate_rows(&self, positions: &[PositionSnapshot]) -> (PortfolioGreeks, ExposureTotals) {
        let mut greeks = PortfolioGreeks::default();
        let mut totals = ExposureTotals::default();

        for pos in positions {
            let value = pos.notional_value();
            greeks.net_delta += pos.greeks.delta;
            greeks.net_gamma += pos.greeks.gamma;
            greeks.net_theta += pos.greeks.theta;
            greeks.net_vega += pos.greeks.vega;
            *greeks.delta_by_symbol.entry(pos.symbol.clone()).or_default() += pos.greeks.delta;
            *greeks.gamma_by_symbol.entry(pos.symbol.clone()).or_default() += pos.greeks.gamma;
            greeks.position_count += 1;

            totals.add(&pos.symbol, value);
        }

        (greeks, totals)
    }

    /// Column-wise group-by: extract each field once, then reduce per column.
    /// Same results as `aggregate_rows`.
    fn aggregate_columnar(&self, positions: &[PositionSnapshot]) -> (PortfolioGreeks, ExposureTotals) {
        let n = positions.len();

        // Dense symbol ids so per-symbol sums index into flat vectors
        let mut symbol_ids: HashMap<&str, usize> = HashMap::new();
        let mut symbols: Vec<&str> = Vec::new();
        let mut sym_col = Vec::with_capacity(n);
        let mut delta_col = Vec::with_capacity(n);
        let mut gamma_col = Vec::with_capacity(n);
        let mut theta_col = Vec::with_capacity(n);
        let mut vega_col = Vec::with_capacity(n);
        let mut value_col = Vec::with_capacity(n);

        for pos in positions {
            let id = *symbol_ids.entry(pos.symbol.as_str()).or_insert_with(|| {
                symbols.push(pos.symbol.as_str());
                symbols.len() - 1
            });
            sym_col.push(id);
            delta_col.push(pos.greeks.delta);
            gamma_col.push(pos.greeks.gamma);
            theta_col.push(pos.greeks.theta);
            vega_col.push(pos.greeks.vega);
            value_col.push(pos.notional_value());
        }

        let mut sym_delta = vec![0.0; symbols.len()];
        let mut sym_gamma = vec![0.0; symbols.len()];
        let mut sym_value = vec![Decimal::ZERO; symbols.len()];
        for (i, &id) in sym_col.iter().enumerate() {
            sym_delta[id] += delta_col[i];
            sym_gamma[id] += gamma_col[i];
            sym_value[id] += value_col[i];
        }

        let greeks = PortfolioGreeks {
            net_delta: delta_col.iter().sum(),
            net_gamma: gamma_col.iter().sum(),
            net_theta: theta_col.iter().sum(),
            net_vega: vega_col.iter().sum(),
            delta_by_symbol: symbols
                .iter()
                .zip(&sym_delta)
                .map(|(s, d)| (s.to_string(), *d))
                .collect(),
            gamma_by_symbol: symbols
                .iter()
                .zip(&sym_gamma)
                .map(|(s, g)| (s.to_string(), *g))
                .collect(),
            position_count: n,
        };

        let totals = ExposureTotals {
            total: value_col.iter().copied().sum(),
            largest: value_col.iter().copied().max().unwrap_or(Decimal::ZERO),
            by_symbol: symbols
                .iter()
                .zip(sym_value)
                .map(|(s, v)| (s.to_string(), v))
                .collect(),
        };

        (greeks, totals)
    }

    fn exposure_metrics(&self, totals: ExposureTotals) -> ExposureMetrics {
        let largest_position_pct = ratio(totals.largest, totals.total);
        let buying_power_used_pct = ratio(totals.total, self.buying_power).min(1.0);
        let buying_power_available_pct = if self.buying_power.is_zero() {
            0.0
        } else {
            1.0 - buying_power_used_pct
        };

        ExposureMetrics {
            total_exposure: totals.total,
            largest_position_pct,
            exposure_by_symbol: totals.by_symbol,
            buying_power_used_pct,
            buying_power_available_pct,
        }
    }
}

#[derive(Debug, Default)]
struct ExposureTotals {
    total: Decimal,
    largest: Decimal,
    by_symbol: HashMap<String, Decimal>,
}

impl ExposureTotals {
    fn add(&mut self, symbol: &str, value: Decimal) {
        self.total += value;
        self.largest = self.largest.max(value);
        *self.by_symbol.entry(symbol.to_string()).or_default() += value;
    }
}

/// numerator / denominator as f64, 0 for a zero denominator
fn ratio(numerator: Decimal, denominator: Decimal) -> f64 {
    if denominator.is_zero() {
        return 0.0;
    }
    (numerator / denominator).to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::position::fixtures::snapshot;
    use rust_decimal_macros::dec;

    fn position(id: &str, symbol: &str, delta: f64, premium: Decimal) -> PositionSnapshot {
        let mut snap = snapshot(id);
        snap.symbol = symbol.to_string();
        snap.greeks = Greeks::new(delta, 0.01, 0.5, -0.2);
        snap.current_premium = premium;
        snap
    }

    #[test]
    fn test_empty_portfolio_is_all_zero() {
        let agg = RiskAggregator::with_buying_power(dec!(10000));
        let (greeks, exposure) = agg.aggregate(&[]);

        assert_eq!(greeks, PortfolioGreeks::default());
        assert_eq!(exposure.total_exposure, Decimal::ZERO);
        assert_eq!(exposure.largest_position_pct, 0.0);
        assert_eq!(exposure.buying_power_used_pct, 0.0);
        assert!(exposure.exposure_by_symbol.is_empty());
    }

    #[test]
    fn test_same_symbol_deltas_net() {
        let agg = RiskAggregator::new();
        let positions = vec![
            position("a", "SPY", 0.1, dec!(1)),
            position("b", "SPY", -0.3, dec!(1)),
        ];

        let (greeks, _) = agg.aggregate(&positions);
        assert!((greeks.symbol_delta("SPY") - (-0.2)).abs() < 1e-12);
        assert!((greeks.net_delta - (-0.2)).abs() < 1e-12);
        assert_eq!(greeks.position_count, 2);
    }

    #[test]
    fn test_exposure_breakdown() {
        let agg = RiskAggregator::with_buying_power(dec!(4000));
        let positions = vec![
            position("a", "SPY", 0.1, dec!(2)),  // 200
            position("b", "QQQ", 0.2, dec!(6)),  // 600
            position("c", "SPY", -0.1, dec!(2)), // 200
        ];

        let (_, exposure) = agg.aggregate(&positions);
        assert_eq!(exposure.total_exposure, dec!(1000));
        assert_eq!(exposure.exposure_by_symbol["SPY"], dec!(400));
        assert!((exposure.largest_position_pct - 0.6).abs() < 1e-12);
        assert!((exposure.buying_power_used_pct - 0.25).abs() < 1e-12);
        assert!((exposure.buying_power_available_pct - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_columnar_path_matches_row_path() {
        let agg = RiskAggregator::with_buying_power(dec!(100000));
        let symbols = ["SPY", "QQQ", "IWM", "AAPL"];
        let positions: Vec<_> = (0..25)
            .map(|i| {
                position(
                    &format!("p{}", i),
                    symbols[i % symbols.len()],
                    (i as f64 - 12.0) * 0.03,
                    Decimal::from(i + 1) / dec!(4),
                )
            })
            .collect();

        let (g_col, e_col) = agg.aggregate(&positions);
        let (g_row, t_row) = agg.aggregate_rows(&positions);
        let e_row = agg.exposure_metrics(t_row);

        assert!((g_col.net_delta - g_row.net_delta).abs() < 1e-9);
        assert!((g_col.net_theta - g_row.net_theta).abs() < 1e-9);
        for s in symbols {
            assert!((g_col.symbol_delta(s) - g_row.symbol_delta(s)).abs() < 1e-9);
            assert!((g_col.symbol_gamma(s) - g_row.symbol_gamma(s)).abs() < 1e-9);
        }
        assert_eq!(e_col, e_row);
    }

    #[test]
    fn test_greeks_for_symbol() {
        let agg = RiskAggregator::new();
        let positions = vec![
            position("a", "SPY", 0.1, dec!(1)),
            position("b", "QQQ", 0.5, dec!(1)),
            position("c", "SPY", 0.2, dec!(3)),
        ];

        let spy = agg.greeks_for_symbol(&positions, "SPY");
        assert_eq!(spy.position_count, 2);
        assert!((spy.greeks.delta - 0.3).abs() < 1e-12);
        assert_eq!(spy.exposure, dec!(400));

        let none = agg.greeks_for_symbol(&positions, "TSLA");
        assert_eq!(none.position_count, 0);
        assert_eq!(none.greeks, Greeks::default());
    }
}
