use serde::{Deserialize, Serialize};

/// Ambient market state for one evaluation cycle.
///
/// Every field is optional: producers fill what they have, and rules that need
/// a missing field skip their check rather than fail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketContext {
    /// Underlying move over the last hour, percent (-3.5 = down 3.5%)
    pub underlying_change_1h_pct: Option<f64>,
    /// Implied volatility change since entry, percent
    pub iv_change_since_entry_pct: Option<f64>,
    pub vix: Option<f64>,
    pub vix_at_entry: Option<f64>,
    /// Current IV percentile, 0-100
    pub iv_percentile: Option<f64>,
    /// Externally supplied net portfolio delta
    pub portfolio_delta: Option<f64>,
    /// Externally supplied net delta for this position's underlying
    pub symbol_delta: Option<f64>,
}

impl MarketContext {
    /// VIX points gained since the position was opened
    pub fn vix_change(&self) -> Option<f64> {
        Some(self.vix? - self.vix_at_entry?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vix_change_requires_both_readings() {
        let mut ctx = MarketContext {
            vix: Some(24.0),
            ..Default::default()
        };
        assert_eq!(ctx.vix_change(), None);

        ctx.vix_at_entry = Some(18.5);
        assert_eq!(ctx.vix_change(), Some(5.5));
    }

    #[test]
    fn test_partial_json_tolerated() {
        let ctx: MarketContext = serde_json::from_str(r#"{"vix": 31.2}"#).unwrap();
        assert_eq!(ctx.vix, Some(31.2));
        assert!(ctx.iv_percentile.is_none());
    }
}
