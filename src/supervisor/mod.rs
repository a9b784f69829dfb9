pub mod alerts;
pub mod executor;
pub mod runner;
pub mod source;

pub use alerts::{
    Alert, AlertSink, AlertType, ChannelAlertSink, LogAlertSink, MemoryAlertSink, Severity,
};
pub use executor::{EntryOrder, ExitOrder, OrderAck, OrderExecutor, PaperExecutor};
pub use runner::{
    CycleReport, OrderOutcome, PositionOutcome, Supervisor, SupervisorError, TRAILING_STOP_RULE,
};
pub use source::{FilePositionSource, PositionInput, PositionSource, StaticPositionSource};
