pub mod config;
pub mod logger;
pub mod metrics;

pub use self::config::{Config, ConfigError, GeneralConfig, LoggingConfig, MetricsConfig};
pub use logger::{init_from_config, init_logger};
pub use metrics::SupervisorMetrics;
