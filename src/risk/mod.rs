pub mod aggregator;
pub mod circuit_breaker;
pub mod limits;
pub mod trailing;

pub use aggregator::{
    ExposureMetrics, PortfolioGreeks, RiskAggregator, RiskSnapshot, SymbolGreeks,
    COLUMNAR_THRESHOLD,
};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitOpenError, CircuitState};
pub use limits::{EntryCheck, LimitKind, LimitsGate, RiskLimits};
pub use trailing::{
    TrailingAction, TrailingStop, TrailingStopConfig, TrailingStopManager, TrailingStopTracker,
};
