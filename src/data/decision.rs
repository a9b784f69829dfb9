use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// What to do with a position this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Hold,
    Close,
    Roll,
    Reduce,
    Hedge,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hold => "hold",
            Self::Close => "close",
            Self::Roll => "roll",
            Self::Reduce => "reduce",
            Self::Hedge => "hedge",
        }
    }

    /// Whether the decision needs an order
    pub fn is_actionable(&self) -> bool {
        !matches!(self, Self::Hold)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Immediate,
    High,
    Normal,
    Low,
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Immediate => "immediate",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        };
        f.write_str(s)
    }
}

/// Metadata keys shared between rules and executors
pub mod keys {
    pub const ROLL_TO_DTE: &str = "roll_to_dte";
    pub const FORCED: &str = "forced";
    pub const CLOSE_RATIO: &str = "close_ratio";
    pub const HEDGE_DELTA: &str = "hedge_delta";
    pub const STOP_PREMIUM: &str = "stop_premium";
    pub const TRAIL_LEVEL: &str = "trail_level";
}

/// Outcome of evaluating one position. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub reason: String,
    pub rule: String,
    pub urgency: Urgency,
    pub metadata: BTreeMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl Decision {
    pub fn new(
        action: Action,
        reason: impl Into<String>,
        rule: impl Into<String>,
        urgency: Urgency,
    ) -> Self {
        Self {
            action,
            reason: reason.into(),
            rule: rule.into(),
            urgency,
            metadata: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Neutral fallback when no rule fires
    pub fn hold() -> Self {
        Self::new(Action::Hold, "no rule triggered", "none", Urgency::Normal)
    }

    /// Builder-style metadata attachment
    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub fn meta_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(Value::as_f64)
    }

    pub fn is_hold(&self) -> bool {
        self.action == Action::Hold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hold_fallback_shape() {
        let d = Decision::hold();
        assert_eq!(d.action, Action::Hold);
        assert_eq!(d.reason, "no rule triggered");
        assert_eq!(d.rule, "none");
        assert_eq!(d.urgency, Urgency::Normal);
        assert!(d.metadata.is_empty());
    }

    #[test]
    fn test_metadata_builder() {
        let d = Decision::new(Action::Reduce, "take half", "take_profit", Urgency::Normal)
            .with_meta(keys::CLOSE_RATIO, 0.5);

        assert_eq!(d.meta_f64(keys::CLOSE_RATIO), Some(0.5));
        assert!(d.meta(keys::ROLL_TO_DTE).is_none());
    }

    #[test]
    fn test_serialized_action_is_lowercase() {
        let d = Decision::new(Action::Close, "r", "catastrophe", Urgency::Immediate);
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["action"], "close");
        assert_eq!(json["urgency"], "immediate");
    }
}
