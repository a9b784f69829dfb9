use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Standard equity option contract multiplier
pub const CONTRACT_MULTIPLIER: i64 = 100;

/// First/second-order sensitivities, already scaled to the position
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
}

impl Greeks {
    pub fn new(delta: f64, gamma: f64, theta: f64, vega: f64) -> Self {
        Self { delta, gamma, theta, vega }
    }

    pub fn is_finite(&self) -> bool {
        self.delta.is_finite()
            && self.gamma.is_finite()
            && self.theta.is_finite()
            && self.vega.is_finite()
    }
}

impl std::ops::AddAssign for Greeks {
    fn add_assign(&mut self, rhs: Self) {
        self.delta += rhs.delta;
        self.gamma += rhs.gamma;
        self.theta += rhs.theta;
        self.vega += rhs.vega;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionRight {
    Call,
    Put,
}

/// Strategy shape of an open position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    LongCall,
    LongPut,
    ShortCall,
    ShortPut,
    VerticalSpread,
    CalendarSpread,
    Straddle,
    Strangle,
    IronCondor,
    IronButterfly,
    Other,
}

impl StrategyKind {
    /// Single-option strategies (one leg, one strike)
    pub fn is_single_leg(&self) -> bool {
        matches!(
            self,
            Self::LongCall | Self::LongPut | Self::ShortCall | Self::ShortPut
        )
    }

    /// Four-leg structures with capped loss on both wings
    pub fn is_defined_risk_four_leg(&self) -> bool {
        matches!(self, Self::IronCondor | Self::IronButterfly)
    }

    /// Two-leg spreads
    pub fn is_two_leg_spread(&self) -> bool {
        matches!(self, Self::VerticalSpread | Self::CalendarSpread)
    }

    /// Debit position that gains as its premium rises. Structures that are
    /// not named long or short count as long only when every leg is bought.
    pub fn is_long_premium(&self, legs: &[OptionLeg]) -> bool {
        match self {
            Self::LongCall | Self::LongPut => true,
            Self::ShortCall | Self::ShortPut | Self::IronCondor | Self::IronButterfly => false,
            _ => !legs.is_empty() && legs.iter().all(|leg| leg.quantity > 0),
        }
    }
}

/// One option contract line of a position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionLeg {
    pub strike: Decimal,
    pub expiry: NaiveDate,
    pub right: OptionRight,
    /// Signed contract count: positive long, negative short
    pub quantity: i32,
    #[serde(default)]
    pub greeks: Greeks,
}

/// Read-only view of an open position for one evaluation cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// Stable position identifier (keys trailing-stop and peak state)
    pub id: String,
    /// Underlying symbol
    pub symbol: String,
    pub strategy: StrategyKind,
    pub legs: Vec<OptionLeg>,
    /// Unrealized P&L in percent of risk/premium (80.0 = +80%)
    pub upl_pct: f64,
    pub dte: i64,
    /// Aggregate position Greeks
    pub greeks: Greeks,
    /// Current mark of the position, per contract
    pub current_premium: Decimal,
}

impl PositionSnapshot {
    /// Single-leg check tolerant of snapshots tagged `Other`
    pub fn is_single_leg(&self) -> bool {
        self.strategy.is_single_leg()
            || (self.strategy == StrategyKind::Other && self.legs.len() == 1)
    }

    pub fn is_long_premium(&self) -> bool {
        self.strategy.is_long_premium(&self.legs)
    }

    /// Contract count of the widest leg
    pub fn contracts(&self) -> i64 {
        self.legs
            .iter()
            .map(|leg| i64::from(leg.quantity).abs())
            .max()
            .unwrap_or(1)
    }

    /// Market value of the position: premium × contracts × multiplier
    pub fn notional_value(&self) -> Decimal {
        self.current_premium.abs()
            * Decimal::from(self.contracts())
            * Decimal::from(CONTRACT_MULTIPLIER)
    }
}
