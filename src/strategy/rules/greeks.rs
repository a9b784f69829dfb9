//! Greek exposure rules.

use super::{finite, finite_opt, require_positive, EvaluationContext, Rule, RuleError};
use crate::data::{keys, Action, Decision, PositionSnapshot, Urgency};
use crate::utils::config::ConfigError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltaRiskConfig {
    pub enabled: bool,
    /// Limit for defined-risk four-leg structures
    pub max_delta_four_leg: f64,
    /// Limit for two-leg spreads
    pub max_delta_two_leg: f64,
}

impl Default for DeltaRiskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_delta_four_leg: 0.30,
            max_delta_two_leg: 0.40,
        }
    }
}

/// Close spreads that have drifted directional
pub struct DeltaRiskRule {
    config: DeltaRiskConfig,
}

impl DeltaRiskRule {
    pub const NAME: &'static str = "delta_risk";
    pub const PRIORITY: f64 = 4.0;

    pub fn new(config: DeltaRiskConfig) -> Result<Self, ConfigError> {
        require_positive("delta_risk.max_delta_four_leg", config.max_delta_four_leg)?;
        require_positive("delta_risk.max_delta_two_leg", config.max_delta_two_leg)?;
        Ok(Self { config })
    }
}

impl Rule for DeltaRiskRule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> f64 {
        Self::PRIORITY
    }

    fn evaluate(
        &self,
        snapshot: &PositionSnapshot,
        _ctx: &EvaluationContext<'_>,
    ) -> Result<Option<Decision>, RuleError> {
        let limit = if snapshot.strategy.is_defined_risk_four_leg() {
            self.config.max_delta_four_leg
        } else if snapshot.strategy.is_two_leg_spread() {
            self.config.max_delta_two_leg
        } else {
            return Ok(None);
        };

        let delta = finite("greeks.delta", snapshot.greeks.delta)?;
        if delta.abs() > limit {
            return Ok(Some(
                Decision::new(
                    Action::Close,
                    format!("Net delta {:.3} beyond ±{:.2}", delta, limit),
                    Self::NAME,
                    Urgency::High,
                )
                .with_meta("delta", delta),
            ));
        }

        Ok(None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GammaRiskConfig {
    pub enabled: bool,
    pub max_gamma: f64,
    /// Gamma only matters inside this many days
    pub max_dte: i64,
}

impl Default for GammaRiskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_gamma: 0.10,
            max_dte: 14,
        }
    }
}

/// Short-dated gamma blowup protection
pub struct GammaRiskRule {
    config: GammaRiskConfig,
}

impl GammaRiskRule {
    pub const NAME: &'static str = "gamma_risk";
    pub const PRIORITY: f64 = 7.0;

    pub fn new(config: GammaRiskConfig) -> Result<Self, ConfigError> {
        require_positive("gamma_risk.max_gamma", config.max_gamma)?;
        if config.max_dte <= 0 {
            return Err(ConfigError::invalid("gamma_risk.max_dte", "must be > 0"));
        }
        Ok(Self { config })
    }
}

impl Rule for GammaRiskRule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> f64 {
        Self::PRIORITY
    }

    fn evaluate(
        &self,
        snapshot: &PositionSnapshot,
        _ctx: &EvaluationContext<'_>,
    ) -> Result<Option<Decision>, RuleError> {
        if snapshot.dte >= self.config.max_dte {
            return Ok(None);
        }

        let gamma = finite("greeks.gamma", snapshot.greeks.gamma)?;
        if gamma.abs() > self.config.max_gamma {
            return Ok(Some(
                Decision::new(
                    Action::Close,
                    format!("Gamma {:.3} at {} DTE", gamma, snapshot.dte),
                    Self::NAME,
                    Urgency::High,
                )
                .with_meta("gamma", gamma),
            ));
        }

        Ok(None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioHedgeConfig {
    /// Off by default: the standard table never hedges
    pub enabled: bool,
    pub max_portfolio_delta: f64,
    pub max_symbol_delta: f64,
}

impl Default for PortfolioHedgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_portfolio_delta: 50.0,
            max_symbol_delta: 25.0,
        }
    }
}

/// Recommend a delta hedge when cross-position exposure is out of bounds.
///
/// Prefers externally supplied deltas from the market context and falls back
/// to the live portfolio aggregation.
pub struct PortfolioHedgeRule {
    config: PortfolioHedgeConfig,
}

impl PortfolioHedgeRule {
    pub const NAME: &'static str = "portfolio_hedge";
    pub const PRIORITY: f64 = 4.5;

    pub fn new(config: PortfolioHedgeConfig) -> Result<Self, ConfigError> {
        require_positive("portfolio_hedge.max_portfolio_delta", config.max_portfolio_delta)?;
        require_positive("portfolio_hedge.max_symbol_delta", config.max_symbol_delta)?;
        Ok(Self { config })
    }

    fn hedge(&self, scope: &str, delta: f64, limit: f64) -> Decision {
        // Bring exposure back to the limit, not to zero
        let hedge_delta = -(delta - delta.signum() * limit);
        Decision::new(
            Action::Hedge,
            format!("{} delta {:.2} beyond ±{:.2}", scope, delta, limit),
            Self::NAME,
            Urgency::High,
        )
        .with_meta(keys::HEDGE_DELTA, hedge_delta)
    }
}

impl Rule for PortfolioHedgeRule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> f64 {
        Self::PRIORITY
    }

    fn evaluate(
        &self,
        snapshot: &PositionSnapshot,
        ctx: &EvaluationContext<'_>,
    ) -> Result<Option<Decision>, RuleError> {
        let portfolio_delta = finite_opt(
            "portfolio_delta",
            ctx.market
                .and_then(|m| m.portfolio_delta)
                .or_else(|| ctx.portfolio.map(|p| p.net_delta)),
        )?;
        let symbol_delta = finite_opt(
            "symbol_delta",
            ctx.market
                .and_then(|m| m.symbol_delta)
                .or_else(|| ctx.portfolio.map(|p| p.symbol_delta(&snapshot.symbol))),
        )?;

        if let Some(delta) = portfolio_delta {
            if delta.abs() > self.config.max_portfolio_delta {
                return Ok(Some(self.hedge("Portfolio", delta, self.config.max_portfolio_delta)));
            }
        }

        if let Some(delta) = symbol_delta {
            if delta.abs() > self.config.max_symbol_delta {
                return Ok(Some(self.hedge(&snapshot.symbol, delta, self.config.max_symbol_delta)));
            }
        }

        Ok(None)
    }
}
