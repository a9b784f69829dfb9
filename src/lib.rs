pub mod data;
pub mod strategy;
pub mod risk;
pub mod supervisor;
pub mod utils;

// Re-export commonly used types
pub use data::{
    Action, Decision, Greeks, MarketContext, OptionLeg, OptionRight, PositionSnapshot,
    StrategyKind, Urgency,
};
pub use strategy::{DecisionEngine, EvaluationContext, Rule, RuleError, RulesConfig};
pub use risk::{
    CircuitBreaker, CircuitBreakerConfig, CircuitOpenError, CircuitState, EntryCheck, LimitsGate,
    PortfolioGreeks, RiskAggregator, RiskLimits, RiskSnapshot, TrailingAction, TrailingStopConfig,
    TrailingStopManager, TrailingStopTracker,
};
pub use supervisor::{
    Alert, OrderExecutor, PaperExecutor, PositionInput, PositionSource, Supervisor,
    SupervisorError,
};
pub use utils::{Config, ConfigError, SupervisorMetrics};
