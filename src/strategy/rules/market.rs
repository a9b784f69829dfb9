//! Rules driven by the market context: crash moves, volatility regime shifts.
//! All of them stay silent when the fields they need are absent.

use super::{finite, finite_opt, require_positive, EvaluationContext, Rule, RuleError};
use crate::data::{Action, Decision, PositionSnapshot, Urgency};
use crate::utils::config::ConfigError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatastropheConfig {
    pub enabled: bool,
    /// Close when the underlying falls more than this in one hour, percent
    pub max_underlying_drop_1h_pct: f64,
    /// Close when IV rises more than this since entry, percent
    pub max_iv_spike_pct: f64,
}

impl Default for CatastropheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_underlying_drop_1h_pct: 3.0,
            max_iv_spike_pct: 50.0,
        }
    }
}

/// Crash protection: sharp underlying drop or IV explosion
pub struct CatastropheRule {
    config: CatastropheConfig,
}

impl CatastropheRule {
    pub const NAME: &'static str = "catastrophe";
    pub const PRIORITY: f64 = 1.0;

    pub fn new(config: CatastropheConfig) -> Result<Self, ConfigError> {
        require_positive("catastrophe.max_underlying_drop_1h_pct", config.max_underlying_drop_1h_pct)?;
        require_positive("catastrophe.max_iv_spike_pct", config.max_iv_spike_pct)?;
        Ok(Self { config })
    }
}

impl Rule for CatastropheRule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> f64 {
        Self::PRIORITY
    }

    fn evaluate(
        &self,
        _snapshot: &PositionSnapshot,
        ctx: &EvaluationContext<'_>,
    ) -> Result<Option<Decision>, RuleError> {
        let Some(market) = ctx.market else {
            return Ok(None);
        };

        if let Some(change) = finite_opt("underlying_change_1h_pct", market.underlying_change_1h_pct)? {
            if change < -self.config.max_underlying_drop_1h_pct {
                return Ok(Some(
                    Decision::new(
                        Action::Close,
                        format!("Underlying fell {:.2}% in 1h", change),
                        Self::NAME,
                        Urgency::Immediate,
                    )
                    .with_meta("underlying_change_1h_pct", change),
                ));
            }
        }

        if let Some(iv_change) = finite_opt("iv_change_since_entry_pct", market.iv_change_since_entry_pct)? {
            if iv_change > self.config.max_iv_spike_pct {
                return Ok(Some(
                    Decision::new(
                        Action::Close,
                        format!("IV spiked {:.1}% since entry", iv_change),
                        Self::NAME,
                        Urgency::Immediate,
                    )
                    .with_meta("iv_change_pct", iv_change),
                ));
            }
        }

        Ok(None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VixExitConfig {
    pub enabled: bool,
    /// Absolute VIX level that forces an exit
    pub max_vix: f64,
    /// VIX points gained since entry that force an exit
    pub max_vix_rise: f64,
}

impl Default for VixExitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_vix: 35.0,
            max_vix_rise: 5.0,
        }
    }
}

/// Volatility regime exit
pub struct VixExitRule {
    config: VixExitConfig,
}

impl VixExitRule {
    pub const NAME: &'static str = "vix_exit";
    pub const PRIORITY: f64 = 1.5;

    pub fn new(config: VixExitConfig) -> Result<Self, ConfigError> {
        require_positive("vix_exit.max_vix", config.max_vix)?;
        require_positive("vix_exit.max_vix_rise", config.max_vix_rise)?;
        Ok(Self { config })
    }
}

impl Rule for VixExitRule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> f64 {
        Self::PRIORITY
    }

    fn evaluate(
        &self,
        _snapshot: &PositionSnapshot,
        ctx: &EvaluationContext<'_>,
    ) -> Result<Option<Decision>, RuleError> {
        let Some(market) = ctx.market else {
            return Ok(None);
        };
        let Some(vix) = finite_opt("vix", market.vix)? else {
            return Ok(None);
        };

        if vix > self.config.max_vix {
            return Ok(Some(
                Decision::new(
                    Action::Close,
                    format!("VIX {:.1} above {:.1}", vix, self.config.max_vix),
                    Self::NAME,
                    Urgency::High,
                )
                .with_meta("vix", vix),
            ));
        }

        let entry = finite_opt("vix_at_entry", market.vix_at_entry)?;
        if let (Some(entry), Some(rise)) = (entry, market.vix_change()) {
            if rise >= self.config.max_vix_rise {
                return Ok(Some(
                    Decision::new(
                        Action::Close,
                        format!("VIX up {:.1} points since entry ({:.1} -> {:.1})", rise, entry, vix),
                        Self::NAME,
                        Urgency::High,
                    )
                    .with_meta("vix", vix)
                    .with_meta("vix_at_entry", entry),
                ));
            }
        }

        Ok(None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IvCrushConfig {
    pub enabled: bool,
    /// IV drop since entry, percent, beyond which remaining edge is gone
    pub min_iv_drop_pct: f64,
    pub min_profit_pct: f64,
}

impl Default for IvCrushConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_iv_drop_pct: 30.0,
            min_profit_pct: 20.0,
        }
    }
}

/// Take profits after a volatility crush
pub struct IvCrushRule {
    config: IvCrushConfig,
}

impl IvCrushRule {
    pub const NAME: &'static str = "iv_crush";
    pub const PRIORITY: f64 = 5.0;

    pub fn new(config: IvCrushConfig) -> Result<Self, ConfigError> {
        require_positive("iv_crush.min_iv_drop_pct", config.min_iv_drop_pct)?;
        require_positive("iv_crush.min_profit_pct", config.min_profit_pct)?;
        Ok(Self { config })
    }
}

impl Rule for IvCrushRule {
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
        let Some(iv_change) = finite_opt(
            "iv_change_since_entry_pct",
            ctx.market.and_then(|m| m.iv_change_since_entry_pct),
        )?
        else {
            return Ok(None);
        };
        let upl = finite("upl_pct", snapshot.upl_pct)?;

        if iv_change < -self.config.min_iv_drop_pct && upl > self.config.min_profit_pct {
            return Ok(Some(Decision::new(
                Action::Close,
                format!("IV down {:.1}% since entry with {:.1}% profit", -iv_change, upl),
                Self::NAME,
                Urgency::Normal,
            )));
        }

        Ok(None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IvPercentileConfig {
    pub enabled: bool,
    /// Exit when IV percentile falls below this
    pub max_iv_percentile: f64,
    pub min_profit_pct: f64,
}

impl Default for IvPercentileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_iv_percentile: 30.0,
            min_profit_pct: 20.0,
        }
    }
}

/// Premium sellers lose their edge in low-IV regimes
pub struct IvPercentileExitRule {
    config: IvPercentileConfig,
}

impl IvPercentileExitRule {
    pub const NAME: &'static str = "iv_percentile_exit";
    pub const PRIORITY: f64 = 5.5;

    pub fn new(config: IvPercentileConfig) -> Result<Self, ConfigError> {
        if !(config.max_iv_percentile > 0.0 && config.max_iv_percentile <= 100.0) {
            return Err(ConfigError::invalid(
                "iv_percentile_exit.max_iv_percentile",
                "must be in (0, 100]",
            ));
        }
        require_positive("iv_percentile_exit.min_profit_pct", config.min_profit_pct)?;
        Ok(Self { config })
    }
}

impl Rule for IvPercentileExitRule {
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
        let Some(percentile) = finite_opt("iv_percentile", ctx.market.and_then(|m| m.iv_percentile))?
        else {
            return Ok(None);
        };
        let upl = finite("upl_pct", snapshot.upl_pct)?;

        if percentile < self.config.max_iv_percentile && upl > self.config.min_profit_pct {
            return Ok(Some(
                Decision::new(
                    Action::Close,
                    format!("IV percentile {:.0} below {:.0} with {:.1}% profit", percentile, self.config.max_iv_percentile, upl),
                    Self::NAME,
                    Urgency::Normal,
                )
                .with_meta("iv_percentile", percentile),
            ));
        }

        Ok(None)
    }
}
