//! Pluggable position rules.
//!
//! Each rule looks at one position snapshot plus optional context and either
//! produces a decision or stays silent. Rules hold configuration only; any
//! per-position state they read (peak UPL, portfolio Greeks) is passed in.
//!
//! Default table, highest priority first:
//!
//! | priority | rule                 | action       |
//! |----------|----------------------|--------------|
//! | 1        | catastrophe          | close        |
//! | 1.3      | single_leg_exit      | close        |
//! | 1.4      | peak_trailing_exit   | close        |
//! | 1.5      | vix_exit             | close        |
//! | 2        | take_profit          | close/reduce |
//! | 3        | stop_loss            | close        |
//! | 4        | delta_risk           | close        |
//! | 4.5      | portfolio_hedge      | hedge (opt-in) |
//! | 5        | iv_crush             | close        |
//! | 5.5      | iv_percentile_exit   | close        |
//! | 6        | dte_roll             | roll         |
//! | 7        | gamma_risk           | close        |
//! | 8        | time_exit            | close        |

pub mod market;
pub mod exits;
pub mod greeks;
pub mod roll;

pub use market::{
    CatastropheConfig, CatastropheRule, IvCrushConfig, IvCrushRule, IvPercentileConfig,
    IvPercentileExitRule, VixExitConfig, VixExitRule,
};
pub use exits::{
    PeakTrailingConfig, PeakTrailingExitRule, SingleLegExitConfig, SingleLegExitRule,
    StopLossConfig, StopLossRule, TakeProfitConfig, TakeProfitRule, TimeExitConfig, TimeExitRule,
};
pub use greeks::{
    DeltaRiskConfig, DeltaRiskRule, GammaRiskConfig, GammaRiskRule, PortfolioHedgeConfig,
    PortfolioHedgeRule,
};
pub use roll::{DteRollConfig, DteRollRule};

use crate::data::{Decision, MarketContext, PositionSnapshot};
use crate::risk::PortfolioGreeks;
use crate::utils::config::ConfigError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A rule could not evaluate its input
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuleError {
    #[error("field `{field}` is not a finite number ({value})")]
    NonFinite { field: &'static str, value: f64 },
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
    #[error("rule panicked during evaluation")]
    Panicked,
}

/// Optional context available to rules on top of the snapshot
#[derive(Debug, Clone, Copy, Default)]
pub struct EvaluationContext<'a> {
    pub market: Option<&'a MarketContext>,
    /// Live portfolio aggregation, when the caller has one
    pub portfolio: Option<&'a PortfolioGreeks>,
    /// Highest UPL percent seen for this position across cycles
    pub peak_upl_pct: Option<f64>,
}

impl<'a> EvaluationContext<'a> {
    pub fn with_market(market: &'a MarketContext) -> Self {
        Self {
            market: Some(market),
            ..Default::default()
        }
    }
}

/// One evaluator in the rule table
pub trait Rule: Send + Sync {
    /// Stable identifier, used for trigger statistics and re-registration
    fn name(&self) -> &str;

    /// Lower runs first. Fractional values slot between integer priorities.
    fn priority(&self) -> f64;

    fn evaluate(
        &self,
        snapshot: &PositionSnapshot,
        ctx: &EvaluationContext<'_>,
    ) -> Result<Option<Decision>, RuleError>;
}

/// Reject NaN/infinite inputs before comparing against thresholds
pub(crate) fn finite(field: &'static str, value: f64) -> Result<f64, RuleError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(RuleError::NonFinite { field, value })
    }
}

/// Finite check for optional market fields; `None` stays `None`
pub(crate) fn finite_opt(field: &'static str, value: Option<f64>) -> Result<Option<f64>, RuleError> {
    value.map(|v| finite(field, v)).transpose()
}

pub(crate) fn require_positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, "must be a positive number"))
    }
}

pub(crate) fn require_fraction(field: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, "must be in (0, 1]"))
    }
}

/// Thresholds for every rule in the table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub catastrophe: CatastropheConfig,
    pub single_leg_exit: SingleLegExitConfig,
    pub peak_trailing_exit: PeakTrailingConfig,
    pub vix_exit: VixExitConfig,
    pub take_profit: TakeProfitConfig,
    pub stop_loss: StopLossConfig,
    pub delta_risk: DeltaRiskConfig,
    pub portfolio_hedge: PortfolioHedgeConfig,
    pub iv_crush: IvCrushConfig,
    pub iv_percentile_exit: IvPercentileConfig,
    pub dte_roll: DteRollConfig,
    pub gamma_risk: GammaRiskConfig,
    pub time_exit: TimeExitConfig,
}

impl RulesConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        build_rules(self).map(|_| ())
    }
}

/// Build the enabled rules. Thresholds are validated here, at construction.
pub fn build_rules(config: &RulesConfig) -> Result<Vec<Box<dyn Rule>>, ConfigError> {
    let mut rules: Vec<Box<dyn Rule>> = Vec::new();

    macro_rules! push_if_enabled {
        ($cfg:expr, $rule:ty) => {
            if $cfg.enabled {
                rules.push(Box::new(<$rule>::new($cfg.clone())?));
            }
        };
    }

    push_if_enabled!(config.catastrophe, CatastropheRule);
    push_if_enabled!(config.single_leg_exit, SingleLegExitRule);
    push_if_enabled!(config.peak_trailing_exit, PeakTrailingExitRule);
    push_if_enabled!(config.vix_exit, VixExitRule);
    push_if_enabled!(config.take_profit, TakeProfitRule);
    push_if_enabled!(config.stop_loss, StopLossRule);
    push_if_enabled!(config.delta_risk, DeltaRiskRule);
    push_if_enabled!(config.portfolio_hedge, PortfolioHedgeRule);
    push_if_enabled!(config.iv_crush, IvCrushRule);
    push_if_enabled!(config.iv_percentile_exit, IvPercentileExitRule);
    push_if_enabled!(config.dte_roll, DteRollRule);
    push_if_enabled!(config.gamma_risk, GammaRiskRule);
    push_if_enabled!(config.time_exit, TimeExitRule);

    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_has_twelve_rules_in_priority_order() {
        let rules = build_rules(&RulesConfig::default()).unwrap();
        let names: Vec<_> = rules.iter().map(|r| r.name().to_string()).collect();
        assert_eq!(
            names,
            vec![
                "catastrophe",
                "single_leg_exit",
                "peak_trailing_exit",
                "vix_exit",
                "take_profit",
                "stop_loss",
                "delta_risk",
                "iv_crush",
                "iv_percentile_exit",
                "dte_roll",
                "gamma_risk",
                "time_exit",
            ]
        );

        let priorities: Vec<f64> = rules.iter().map(|r| r.priority()).collect();
        assert_eq!(
            priorities,
            vec![1.0, 1.3, 1.4, 1.5, 2.0, 3.0, 4.0, 5.0, 5.5, 6.0, 7.0, 8.0]
        );
    }

    #[test]
    fn test_disabled_rules_are_skipped_and_hedge_opt_in() {
        let mut config = RulesConfig::default();
        config.dte_roll.enabled = false;
        config.portfolio_hedge.enabled = true;

        let names: Vec<_> = build_rules(&config)
            .unwrap()
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        assert!(!names.contains(&"dte_roll".to_string()));
        assert!(names.contains(&"portfolio_hedge".to_string()));
    }

    #[test]
    fn test_invalid_threshold_fails_fast() {
        let mut config = RulesConfig::default();
        config.take_profit.partial_close_ratio = 1.5;
        assert!(config.validate().is_err());

        let mut config = RulesConfig::default();
        config.catastrophe.max_underlying_drop_1h_pct = -3.0;
        assert!(build_rules(&config).is_err());
    }

    #[test]
    fn test_rules_config_from_partial_toml() {
        let config: RulesConfig = toml::from_str(
            r#"
            [vix_exit]
            max_vix = 40.0

            [time_exit]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.vix_exit.max_vix, 40.0);
        assert!(config.vix_exit.enabled);
        assert!(!config.time_exit.enabled);
        assert_eq!(config.stop_loss.max_loss_pct, 200.0);
    }
}
