//! P&L and expiry driven exits.

use super::{finite, require_fraction, require_positive, EvaluationContext, Rule, RuleError};
use crate::data::{keys, Action, Decision, PositionSnapshot, Urgency};
use crate::utils::config::ConfigError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SingleLegExitConfig {
    pub enabled: bool,
    pub profit_target_pct: f64,
    /// Loss, in percent, that closes the position (50.0 = -50%)
    pub stop_loss_pct: f64,
    pub min_dte: i64,
}

impl Default for SingleLegExitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            profit_target_pct: 80.0,
            stop_loss_pct: 50.0,
            min_dte: 21,
        }
    }
}

/// Exit discipline for naked long/short options
pub struct SingleLegExitRule {
    config: SingleLegExitConfig,
}

impl SingleLegExitRule {
    pub const NAME: &'static str = "single_leg_exit";
    pub const PRIORITY: f64 = 1.3;

    pub fn new(config: SingleLegExitConfig) -> Result<Self, ConfigError> {
        require_positive("single_leg_exit.profit_target_pct", config.profit_target_pct)?;
        require_positive("single_leg_exit.stop_loss_pct", config.stop_loss_pct)?;
        if config.min_dte < 0 {
            return Err(ConfigError::invalid("single_leg_exit.min_dte", "must be >= 0"));
        }
        Ok(Self { config })
    }
}

impl Rule for SingleLegExitRule {
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
        if !snapshot.is_single_leg() {
            return Ok(None);
        }
        let upl = finite("upl_pct", snapshot.upl_pct)?;

        let reason = if upl >= self.config.profit_target_pct {
            format!("Single-leg profit target hit: {:.1}%", upl)
        } else if upl <= -self.config.stop_loss_pct {
            format!("Single-leg stop hit: {:.1}%", upl)
        } else if snapshot.dte <= self.config.min_dte {
            format!("Single-leg at {} DTE, inside {} DTE floor", snapshot.dte, self.config.min_dte)
        } else {
            return Ok(None);
        };

        Ok(Some(Decision::new(Action::Close, reason, Self::NAME, Urgency::High)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakTrailingConfig {
    pub enabled: bool,
    /// Peak UPL percent that arms the trail
    pub activation_pct: f64,
    /// Trail level as a fraction of peak UPL
    pub trail_fraction: f64,
}

impl Default for PeakTrailingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            activation_pct: 40.0,
            trail_fraction: 0.40,
        }
    }
}

/// Gives back at most down to a fraction of the best UPL seen.
///
/// Reads the per-position peak from the context; silent without one.
pub struct PeakTrailingExitRule {
    config: PeakTrailingConfig,
}

impl PeakTrailingExitRule {
    pub const NAME: &'static str = "peak_trailing_exit";
    pub const PRIORITY: f64 = 1.4;

    pub fn new(config: PeakTrailingConfig) -> Result<Self, ConfigError> {
        require_positive("peak_trailing_exit.activation_pct", config.activation_pct)?;
        require_fraction("peak_trailing_exit.trail_fraction", config.trail_fraction)?;
        Ok(Self { config })
    }
}

impl Rule for PeakTrailingExitRule {
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
        let Some(peak) = ctx.peak_upl_pct else {
            return Ok(None);
        };
        let peak = finite("peak_upl_pct", peak)?;
        let upl = finite("upl_pct", snapshot.upl_pct)?;

        if peak < self.config.activation_pct {
            return Ok(None);
        }

        let trail_level = peak * self.config.trail_fraction;
        if upl <= trail_level {
            return Ok(Some(
                Decision::new(
                    Action::Close,
                    format!("UPL {:.1}% fell to trail {:.1}% (peak {:.1}%)", upl, trail_level, peak),
                    Self::NAME,
                    Urgency::Immediate,
                )
                .with_meta(keys::TRAIL_LEVEL, trail_level)
                .with_meta("peak_upl_pct", peak),
            ));
        }

        Ok(None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TakeProfitConfig {
    pub enabled: bool,
    pub full_close_pct: f64,
    pub partial_pct: f64,
    /// Share of the position closed at the partial target
    pub partial_close_ratio: f64,
}

impl Default for TakeProfitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            full_close_pct: 80.0,
            partial_pct: 50.0,
            partial_close_ratio: 0.5,
        }
    }
}

/// Scale out at the first target, close at the second
pub struct TakeProfitRule {
    config: TakeProfitConfig,
}

impl TakeProfitRule {
    pub const NAME: &'static str = "take_profit";
    pub const PRIORITY: f64 = 2.0;

    pub fn new(config: TakeProfitConfig) -> Result<Self, ConfigError> {
        require_positive("take_profit.partial_pct", config.partial_pct)?;
        require_fraction("take_profit.partial_close_ratio", config.partial_close_ratio)?;
        if !(config.full_close_pct > config.partial_pct) {
            return Err(ConfigError::invalid(
                "take_profit.full_close_pct",
                "must be above partial_pct",
            ));
        }
        Ok(Self { config })
    }
}

impl Rule for TakeProfitRule {
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
        let upl = finite("upl_pct", snapshot.upl_pct)?;

        if upl >= self.config.full_close_pct {
            return Ok(Some(
                Decision::new(
                    Action::Close,
                    format!("Profit target {:.0}% reached ({:.1}%)", self.config.full_close_pct, upl),
                    Self::NAME,
                    Urgency::Normal,
                )
                .with_meta(keys::CLOSE_RATIO, 1.0),
            ));
        }

        if upl >= self.config.partial_pct {
            return Ok(Some(
                Decision::new(
                    Action::Reduce,
                    format!("Partial profit target {:.0}% reached ({:.1}%)", self.config.partial_pct, upl),
                    Self::NAME,
                    Urgency::Normal,
                )
                .with_meta(keys::CLOSE_RATIO, self.config.partial_close_ratio),
            ));
        }

        Ok(None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StopLossConfig {
    pub enabled: bool,
    /// Hard loss, percent (200.0 = -200%)
    pub max_loss_pct: f64,
    /// Below this DTE the tighter loss applies
    pub near_expiry_dte: i64,
    pub near_expiry_loss_pct: f64,
}

impl Default for StopLossConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_loss_pct: 200.0,
            near_expiry_dte: 7,
            near_expiry_loss_pct: 50.0,
        }
    }
}

/// Hard stop, tightened close to expiry
pub struct StopLossRule {
    config: StopLossConfig,
}

impl StopLossRule {
    pub const NAME: &'static str = "stop_loss";
    pub const PRIORITY: f64 = 3.0;

    pub fn new(config: StopLossConfig) -> Result<Self, ConfigError> {
        require_positive("stop_loss.max_loss_pct", config.max_loss_pct)?;
        require_positive("stop_loss.near_expiry_loss_pct", config.near_expiry_loss_pct)?;
        if config.near_expiry_dte < 0 {
            return Err(ConfigError::invalid("stop_loss.near_expiry_dte", "must be >= 0"));
        }
        Ok(Self { config })
    }
}

impl Rule for StopLossRule {
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
        let upl = finite("upl_pct", snapshot.upl_pct)?;

        let reason = if upl <= -self.config.max_loss_pct {
            format!("Max loss hit: {:.1}%", upl)
        } else if snapshot.dte < self.config.near_expiry_dte && upl <= -self.config.near_expiry_loss_pct {
            format!("Loss {:.1}% with only {} DTE left", upl, snapshot.dte)
        } else {
            return Ok(None);
        };

        Ok(Some(Decision::new(Action::Close, reason, Self::NAME, Urgency::Immediate)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeExitConfig {
    pub enabled: bool,
    pub max_dte: i64,
}

impl Default for TimeExitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_dte: 1,
        }
    }
}

/// Never carry into expiration day
pub struct TimeExitRule {
    config: TimeExitConfig,
}

impl TimeExitRule {
    pub const NAME: &'static str = "time_exit";
    pub const PRIORITY: f64 = 8.0;

    pub fn new(config: TimeExitConfig) -> Result<Self, ConfigError> {
        if config.max_dte < 0 {
            return Err(ConfigError::invalid("time_exit.max_dte", "must be >= 0"));
        }
        Ok(Self { config })
    }
}

impl Rule for TimeExitRule {
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
        if snapshot.dte <= self.config.max_dte {
            return Ok(Some(Decision::new(
                Action::Close,
                format!("{} DTE: closing before expiration", snapshot.dte),
                Self::NAME,
                Urgency::Immediate,
            )));
        }
        Ok(None)
    }
}
