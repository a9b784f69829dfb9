use crate::data::PositionSnapshot;
use crate::risk::aggregator::{RiskAggregator, RiskSnapshot};
use crate::utils::config::ConfigError;
use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Which limit rejected an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimitKind {
    /// Non-finite delta or negative position value
    InvalidEntry,
    PortfolioDelta,
    SymbolDelta,
    Concentration,
    TotalExposure,
}

/// Entry check result: a structured rejection, never an error
#[derive(Debug, Clone, PartialEq)]
pub struct EntryCheck {
    pub allowed: bool,
    pub reason: Option<String>,
    pub violation: Option<LimitKind>,
}

impl EntryCheck {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            violation: None,
        }
    }

    fn reject(kind: LimitKind, reason: String) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            violation: Some(kind),
        }
    }
}

/// Portfolio limits configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    /// Maximum absolute net portfolio delta after entry
    pub max_portfolio_delta: f64,
    /// Maximum absolute net delta per underlying after entry
    pub max_symbol_delta: f64,
    /// Maximum share of total exposure a single new position may take
    pub max_single_position_pct: f64,
    /// Optional absolute cap on total notional exposure
    pub max_total_exposure: Option<Decimal>,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_portfolio_delta: 50.0,
            max_symbol_delta: 25.0,
            max_single_position_pct: 0.25,
            max_total_exposure: None,
        }
    }
}

impl RiskLimits {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.max_portfolio_delta.is_finite() && self.max_portfolio_delta >= 0.0) {
            return Err(ConfigError::invalid("limits.max_portfolio_delta", "must be >= 0"));
        }
        if !(self.max_symbol_delta.is_finite() && self.max_symbol_delta >= 0.0) {
            return Err(ConfigError::invalid("limits.max_symbol_delta", "must be >= 0"));
        }
        if !(self.max_single_position_pct > 0.0 && self.max_single_position_pct <= 1.0) {
            return Err(ConfigError::invalid(
                "limits.max_single_position_pct",
                "must be in (0, 1]",
            ));
        }
        if matches!(self.max_total_exposure, Some(cap) if cap <= Decimal::ZERO) {
            return Err(ConfigError::invalid("limits.max_total_exposure", "must be > 0"));
        }
        Ok(())
    }
}

/// Pre-entry portfolio limit checks.
///
/// Holds the latest aggregation behind a read-write lock: the cycle driver
/// refreshes it once per cycle, any number of workers read it.
pub struct LimitsGate {
    limits: RiskLimits,
    aggregator: RiskAggregator,
    snapshot: RwLock<Arc<RiskSnapshot>>,
}

impl LimitsGate {
    pub fn new(limits: RiskLimits, aggregator: RiskAggregator) -> Result<Self, ConfigError> {
        limits.validate()?;
        Ok(Self {
            limits,
            aggregator,
            snapshot: RwLock::new(Arc::new(RiskSnapshot::default())),
        })
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Recompute the portfolio view from the current position set
    pub fn refresh(&self, positions: &[PositionSnapshot]) -> Arc<RiskSnapshot> {
        let fresh = Arc::new(self.aggregator.snapshot(positions));
        *self.snapshot.write() = Arc::clone(&fresh);
        debug!(
            positions = fresh.greeks.position_count,
            net_delta = fresh.greeks.net_delta,
            exposure = %fresh.exposure.total_exposure,
            "Risk snapshot refreshed"
        );
        fresh
    }

    /// Latest portfolio view
    pub fn snapshot(&self) -> Arc<RiskSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Check a proposed entry against the latest portfolio view
    pub fn check_entry_allowed(
        &self,
        new_position_delta: f64,
        symbol: &str,
        position_value: Decimal,
    ) -> EntryCheck {
        let snapshot = self.snapshot();
        let check = self.check_against(&snapshot, new_position_delta, symbol, position_value);
        if let Some(reason) = &check.reason {
            warn!(symbol, reason = %reason, "Entry rejected by limits gate");
        }
        check
    }

    /// Pure form: check a proposed entry against an explicit snapshot.
    /// Returns on the first failing limit.
    pub fn check_against(
        &self,
        current: &RiskSnapshot,
        new_position_delta: f64,
        symbol: &str,
        position_value: Decimal,
    ) -> EntryCheck {
        if !new_position_delta.is_finite() {
            return EntryCheck::reject(
                LimitKind::InvalidEntry,
                format!("Position delta {} is not a finite number", new_position_delta),
            );
        }
        if position_value < Decimal::ZERO {
            return EntryCheck::reject(
                LimitKind::InvalidEntry,
                format!("Position value {} is negative", position_value),
            );
        }

        // 1. Net portfolio delta
        let projected = current.greeks.net_delta + new_position_delta;
        if projected.abs() > self.limits.max_portfolio_delta {
            return EntryCheck::reject(
                LimitKind::PortfolioDelta,
                format!(
                    "Portfolio delta {:.2} would exceed limit {:.2}",
                    projected, self.limits.max_portfolio_delta
                ),
            );
        }

        // 2. Per-underlying delta
        let projected_symbol = current.greeks.symbol_delta(symbol) + new_position_delta;
        if projected_symbol.abs() > self.limits.max_symbol_delta {
            return EntryCheck::reject(
                LimitKind::SymbolDelta,
                format!(
                    "{} delta {:.2} would exceed limit {:.2}",
                    symbol, projected_symbol, self.limits.max_symbol_delta
                ),
            );
        }

        // 3. Concentration. The first position has nothing to be concentrated against.
        let current_exposure = current.exposure.total_exposure;
        let new_total = current_exposure + position_value;
        if !current_exposure.is_zero() && !new_total.is_zero() {
            let share = (position_value / new_total).to_f64().unwrap_or(0.0);
            if share > self.limits.max_single_position_pct {
                return EntryCheck::reject(
                    LimitKind::Concentration,
                    format!(
                        "Position value {} would be {:.1}% of exposure, limit {:.1}%",
                        position_value,
                        share * 100.0,
                        self.limits.max_single_position_pct * 100.0
                    ),
                );
            }
        }

        // 4. Absolute exposure cap
        if let Some(cap) = self.limits.max_total_exposure {
            if new_total > cap {
                return EntryCheck::reject(
                    LimitKind::TotalExposure,
                    format!("Total exposure {} would exceed cap {}", new_total, cap),
                );
            }
        }

        EntryCheck::allow()
    }
}
