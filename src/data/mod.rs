pub mod position;
pub mod market;
pub mod decision;

pub use position::{
    Greeks, OptionLeg, OptionRight, PositionSnapshot, StrategyKind, CONTRACT_MULTIPLIER,
};
pub use market::MarketContext;
pub use decision::{keys, Action, Decision, Urgency};
