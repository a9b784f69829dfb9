use super::{EvaluationContext, Rule, RuleError};
use crate::data::{keys, Action, Decision, PositionSnapshot, Urgency};
use crate::utils::config::ConfigError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DteRollConfig {
    pub enabled: bool,
    /// Inside this DTE a roll is recommended
    pub recommend_dte: i64,
    /// At or inside this DTE the roll is forced
    pub forced_dte: i64,
    /// Expiry distance to roll out to
    pub target_dte: i64,
}

impl Default for DteRollConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            recommend_dte: 25,
            forced_dte: 21,
            target_dte: 45,
        }
    }
}

/// Roll positions out before the last weeks of decay
pub struct DteRollRule {
    config: DteRollConfig,
}

impl DteRollRule {
    pub const NAME: &'static str = "dte_roll";
    pub const PRIORITY: f64 = 6.0;

    pub fn new(config: DteRollConfig) -> Result<Self, ConfigError> {
        if config.forced_dte < 0 {
            return Err(ConfigError::invalid("dte_roll.forced_dte", "must be >= 0"));
        }
        if config.recommend_dte < config.forced_dte {
            return Err(ConfigError::invalid(
                "dte_roll.recommend_dte",
                "must be >= forced_dte",
            ));
        }
        if config.target_dte <= config.recommend_dte {
            return Err(ConfigError::invalid(
                "dte_roll.target_dte",
                "must be beyond recommend_dte",
            ));
        }
        Ok(Self { config })
    }
}

impl Rule for DteRollRule {
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
        let dte = snapshot.dte;
        if dte > self.config.recommend_dte {
            return Ok(None);
        }

        let forced = dte <= self.config.forced_dte;
        let reason = if forced {
            format!("{} DTE: forced roll to {} DTE", dte, self.config.target_dte)
        } else {
            format!("{} DTE: roll to {} DTE recommended", dte, self.config.target_dte)
        };

        Ok(Some(
            Decision::new(Action::Roll, reason, Self::NAME, Urgency::Normal)
                .with_meta(keys::ROLL_TO_DTE, self.config.target_dte)
                .with_meta(keys::FORCED, forced),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::position::fixtures::snapshot;

    fn roll_at(dte: i64) -> Option<Decision> {
        let rule = DteRollRule::new(Default::default()).unwrap();
        let mut snap = snapshot("p");
        snap.dte = dte;
        rule.evaluate(&snap, &EvaluationContext::default()).unwrap()
    }

    #[test]
    fn test_roll_window() {
        assert!(roll_at(26).is_none());

        let recommend = roll_at(25).unwrap();
        assert_eq!(recommend.action, Action::Roll);
        assert_eq!(recommend.meta(keys::FORCED), Some(&serde_json::json!(false)));
        assert_eq!(recommend.meta(keys::ROLL_TO_DTE), Some(&serde_json::json!(45)));

        let forced = roll_at(21).unwrap();
        assert_eq!(forced.meta(keys::FORCED), Some(&serde_json::json!(true)));
        assert!(roll_at(3).unwrap().reason.contains("forced"));
    }

    #[test]
    fn test_inverted_window_rejected() {
        let config = DteRollConfig {
            recommend_dte: 20,
            forced_dte: 21,
            ..Default::default()
        };
        assert!(DteRollRule::new(config).is_err());
    }
}
