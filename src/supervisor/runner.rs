use super::alerts::{Alert, AlertSink, LogAlertSink};
use super::executor::{EntryOrder, ExitOrder, OrderAck, OrderExecutor};
use super::source::{PositionInput, PositionSource};
use crate::data::{keys, Action, Decision, PositionSnapshot, Urgency};
use crate::risk::{
    CircuitBreaker, CircuitOpenError, CircuitState, LimitKind, LimitsGate, RiskAggregator,
    TrailingAction, TrailingStopManager,
};
use crate::strategy::{DecisionEngine, EvaluationContext};
use crate::utils::config::{Config, ConfigError};
use crate::utils::metrics::{outcome, SupervisorMetrics};
use dashmap::{DashMap, DashSet};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Rule name carried by decisions produced by the trailing-stop tracker
pub const TRAILING_STOP_RULE: &str = "trailing_stop";

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("entry rejected by {kind:?} limit: {reason}")]
    LimitBreach { kind: LimitKind, reason: String },

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error(transparent)]
    Execution(#[from] anyhow::Error),
}

/// What happened to the order side of a decision
#[derive(Debug, Clone, PartialEq)]
pub enum OrderOutcome {
    /// Hold, nothing to submit
    NotRequired,
    Submitted { order_id: String },
    /// Circuit breaker refused the submission
    Blocked { reason: String },
    /// Executor returned an error
    Failed { error: String },
    /// Same exit already executed for this position
    Skipped { reason: String },
}

#[derive(Debug, Clone)]
pub struct PositionOutcome {
    pub position_id: String,
    pub decision: Decision,
    pub order: OrderOutcome,
}

/// Summary of one evaluation cycle
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub outcomes: Vec<PositionOutcome>,
}

impl CycleReport {
    pub fn evaluated(&self) -> usize {
        self.outcomes.len()
    }

    pub fn actionable(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.decision.is_hold()).count()
    }

    pub fn submitted(&self) -> usize {
        self.count(|o| matches!(o, OrderOutcome::Submitted { .. }))
    }

    pub fn blocked(&self) -> usize {
        self.count(|o| matches!(o, OrderOutcome::Blocked { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, OrderOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, OrderOutcome::Skipped { .. }))
    }

    pub fn outcome(&self, position_id: &str) -> Option<&PositionOutcome> {
        self.outcomes.iter().find(|o| o.position_id == position_id)
    }

    fn count(&self, pred: impl Fn(&OrderOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.order)).count()
    }
}

/// Periodic position supervisor.
///
/// Each cycle: refresh the portfolio risk view, run every position through its
/// trailing stop and then the rule table, alert on actionable decisions and
/// submit the resulting orders through the circuit breaker.
///
/// Per-position state lives until the position is closed through an order or
/// drops out of the position set handed to `run_cycle`.
pub struct Supervisor {
    engine: DecisionEngine,
    breaker: CircuitBreaker,
    gate: LimitsGate,
    trailing: TrailingStopManager,
    /// Highest UPL percent seen per position
    peak_upl: DashMap<String, f64>,
    /// Largest close ratio already executed by a Reduce
    reduced: DashMap<String, f64>,
    /// Positions with a submitted Close or Roll, until they leave the source
    exited: DashSet<String>,
    executor: Arc<dyn OrderExecutor>,
    alert_sinks: Vec<Box<dyn AlertSink>>,
    metrics: Arc<SupervisorMetrics>,
    cadence: Duration,
}

impl Supervisor {
    pub fn new(config: &Config, executor: Arc<dyn OrderExecutor>) -> Result<Self, ConfigError> {
        config.validate()?;

        let metrics = Arc::new(SupervisorMetrics::new(&config.metrics.namespace)?);
        let engine = DecisionEngine::from_config(&config.rules)?.with_metrics(Arc::clone(&metrics));
        let aggregator = match config.general.buying_power {
            Some(buying_power) => RiskAggregator::with_buying_power(buying_power),
            None => RiskAggregator::new(),
        };

        info!(
            rules = engine.len(),
            cadence_secs = config.general.cadence_secs,
            environment = %config.general.environment,
            "Supervisor initialized"
        );

        Ok(Self {
            engine,
            breaker: CircuitBreaker::new(config.circuit_breaker.clone())?,
            gate: LimitsGate::new(config.limits.clone(), aggregator)?,
            trailing: TrailingStopManager::new(config.trailing_stop.clone())?,
            peak_upl: DashMap::new(),
            reduced: DashMap::new(),
            exited: DashSet::new(),
            executor,
            alert_sinks: vec![Box::new(LogAlertSink)],
            metrics,
            cadence: Duration::from_secs(config.general.cadence_secs),
        })
    }

    pub fn with_alert_sink(mut self, sink: impl AlertSink + 'static) -> Self {
        self.alert_sinks.push(Box::new(sink));
        self
    }

    pub fn with_cadence(mut self, cadence: Duration) -> Self {
        self.cadence = cadence;
        self
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn gate(&self) -> &LimitsGate {
        &self.gate
    }

    pub fn trailing(&self) -> &TrailingStopManager {
        &self.trailing
    }

    pub fn metrics(&self) -> &SupervisorMetrics {
        &self.metrics
    }

    pub fn peak_upl(&self, position_id: &str) -> Option<f64> {
        self.peak_upl.get(position_id).map(|p| *p)
    }

    /// Start trailing a newly opened position
    pub fn on_position_opened(
        &self,
        position_id: &str,
        entry_premium: Decimal,
    ) -> Result<(), ConfigError> {
        self.trailing.open(position_id, entry_premium)?;
        self.metrics.set_tracked_trailing_stops(self.trailing.len());
        Ok(())
    }

    /// Drop all per-position state
    pub fn on_position_closed(&self, position_id: &str) {
        self.trailing.remove(position_id);
        self.peak_upl.remove(position_id);
        self.reduced.remove(position_id);
        self.metrics.set_tracked_trailing_stops(self.trailing.len());
        debug!(position_id, "Position state released");
    }

    /// Evaluate every position once and act on the decisions
    pub async fn run_cycle(&self, inputs: &[PositionInput]) -> CycleReport {
        let snapshots: Vec<PositionSnapshot> = inputs.iter().map(|i| i.snapshot.clone()).collect();
        let risk = self.gate.refresh(&snapshots);

        let live: HashSet<&str> = snapshots.iter().map(|s| s.id.as_str()).collect();
        self.prune_departed(&live);

        let mut report = CycleReport::default();
        for input in inputs {
            let snapshot = &input.snapshot;
            self.track_new_position(input);
            let peak = self.track_peak(&snapshot.id, snapshot.upl_pct);

            let decision = match self.check_trailing_stop(snapshot) {
                Some(decision) => decision,
                None => {
                    let ctx = EvaluationContext {
                        market: input.market.as_ref(),
                        portfolio: Some(&risk.greeks),
                        peak_upl_pct: peak,
                    };
                    self.engine.evaluate(snapshot, &ctx)
                }
            };
            self.metrics.record_decision(&decision);

            let order = match ExitOrder::from_decision(snapshot, &decision) {
                Some(order) => match self.already_executed(&order) {
                    Some(reason) => {
                        self.metrics.record_order(outcome::SKIPPED);
                        debug!(
                            position_id = %snapshot.id,
                            rule = %decision.rule,
                            %reason,
                            "Exit not repeated"
                        );
                        OrderOutcome::Skipped { reason }
                    }
                    None => {
                        if let Some(alert) =
                            Alert::from_decision(&snapshot.id, &snapshot.symbol, &decision)
                        {
                            self.dispatch(&alert);
                        }
                        self.execute_exit(&order).await
                    }
                },
                None => OrderOutcome::NotRequired,
            };

            report.outcomes.push(PositionOutcome {
                position_id: snapshot.id.clone(),
                decision,
                order,
            });
        }

        self.metrics.set_circuit_state(self.breaker.state());
        self.metrics.set_tracked_trailing_stops(self.trailing.len());

        info!(
            evaluated = report.evaluated(),
            actionable = report.actionable(),
            submitted = report.submitted(),
            blocked = report.blocked(),
            failed = report.failed(),
            skipped = report.skipped(),
            "Cycle complete"
        );
        report
    }

    /// Drive cycles on the configured cadence until `shutdown` flips to true.
    /// Returns the number of cycles run.
    pub async fn run(&self, source: &dyn PositionSource, mut shutdown: watch::Receiver<bool>) -> usize {
        let mut ticker = tokio::time::interval(self.cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cycles = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match source.fetch().await {
                        Ok(inputs) => {
                            self.run_cycle(&inputs).await;
                            cycles += 1;
                        }
                        Err(e) => error!(error = %e, "Failed to fetch positions, skipping cycle"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(cycles, "Shutdown requested, supervisor stopping");
                        break;
                    }
                }
            }
        }

        cycles
    }

    /// Open a new position: limits first, then the breaker, then the broker
    pub async fn request_entry(&self, order: &EntryOrder) -> Result<OrderAck, SupervisorError> {
        if order.entry_premium <= Decimal::ZERO {
            return Err(anyhow::anyhow!("entry premium must be positive, got {}", order.entry_premium).into());
        }

        let check = self
            .gate
            .check_entry_allowed(order.delta, &order.symbol, order.position_value);
        if let Some(kind) = check.violation {
            let reason = check.reason.unwrap_or_default();
            self.metrics.record_order(outcome::REJECTED);
            self.dispatch(&Alert::entry_rejected(&order.symbol, &reason));
            return Err(SupervisorError::LimitBreach { kind, reason });
        }

        if let Err(e) = self.breaker.check() {
            self.metrics.record_order(outcome::BLOCKED);
            warn!(symbol = %order.symbol, error = %e, "Entry blocked by circuit breaker");
            return Err(e.into());
        }

        match self.executor.submit_entry(order).await {
            Ok(ack) => {
                self.breaker.record_success();
                self.metrics.record_order(outcome::SUBMITTED);
                // A rising premium is a loss on credit structures
                if order.strategy.is_long_premium(&order.legs) {
                    self.on_position_opened(&ack.position_id, order.entry_premium)
                        .map_err(anyhow::Error::from)?;
                }
                info!(
                    position_id = %ack.position_id,
                    symbol = %order.symbol,
                    latency_ms = ack.latency_ms,
                    "✅ Entry submitted"
                );
                Ok(ack)
            }
            Err(e) => {
                self.record_failure();
                self.metrics.record_order(outcome::FAILED);
                error!(symbol = %order.symbol, error = %e, "Entry submission failed");
                Err(e.into())
            }
        }
    }

    /// Forget state for positions no longer in the set
    fn prune_departed(&self, live: &HashSet<&str>) {
        self.peak_upl.retain(|id, _| live.contains(id.as_str()));
        self.reduced.retain(|id, _| live.contains(id.as_str()));
        self.exited.retain(|id| live.contains(id.as_str()));
        let dropped = self.trailing.retain(|id| live.contains(id));
        if dropped > 0 {
            debug!(dropped, "Trailing stops released for departed positions");
        }
    }

    /// Start a trailing stop for a long-premium position seen for the first time
    fn track_new_position(&self, input: &PositionInput) {
        let snapshot = &input.snapshot;
        let Some(entry_premium) = input.entry_premium else {
            return;
        };
        if self.trailing.contains(&snapshot.id)
            || self.exited.contains(&snapshot.id)
            || !snapshot.is_long_premium()
        {
            return;
        }
        if let Err(e) = self.on_position_opened(&snapshot.id, entry_premium) {
            warn!(position_id = %snapshot.id, error = %e, "Trailing stop not started");
        }
    }

    /// Why this exit must not be sent again, if it was already executed
    fn already_executed(&self, order: &ExitOrder) -> Option<String> {
        if self.exited.contains(&order.position_id) {
            return Some("position already exited".to_string());
        }
        if order.action != Action::Reduce {
            return None;
        }
        let done = self.reduced.get(&order.position_id).map(|r| *r)?;
        (order.close_ratio <= done).then(|| format!("already reduced by {:.0}%", done * 100.0))
    }

    fn track_peak(&self, position_id: &str, upl_pct: f64) -> Option<f64> {
        if !upl_pct.is_finite() {
            return self.peak_upl(position_id);
        }
        let mut peak = self
            .peak_upl
            .entry(position_id.to_string())
            .or_insert(upl_pct);
        if upl_pct > *peak {
            *peak = upl_pct;
        }
        Some(*peak)
    }

    /// A triggered trailing stop outranks the whole rule table
    fn check_trailing_stop(&self, snapshot: &PositionSnapshot) -> Option<Decision> {
        let (stop, action) = self.trailing.update(&snapshot.id, snapshot.current_premium)?;
        if action != TrailingAction::Trigger {
            return None;
        }

        let stop = stop.unwrap_or_default();
        Some(
            Decision::new(
                Action::Close,
                format!(
                    "Trailing stop {} hit at premium {}",
                    stop.round_dp(4),
                    snapshot.current_premium
                ),
                TRAILING_STOP_RULE,
                Urgency::Immediate,
            )
            .with_meta(keys::STOP_PREMIUM, stop.to_f64().unwrap_or_default()),
        )
    }

    async fn execute_exit(&self, order: &ExitOrder) -> OrderOutcome {
        if let Err(e) = self.breaker.check() {
            self.metrics.record_order(outcome::BLOCKED);
            warn!(
                position_id = %order.position_id,
                action = %order.action,
                error = %e,
                "Exit blocked by circuit breaker"
            );
            return OrderOutcome::Blocked {
                reason: e.to_string(),
            };
        }

        match self.executor.submit_exit(order).await {
            Ok(ack) => {
                self.breaker.record_success();
                self.metrics.record_order(outcome::SUBMITTED);
                if order.terminates_position() {
                    self.on_position_closed(&order.position_id);
                    self.exited.insert(order.position_id.clone());
                } else if order.action == Action::Reduce {
                    let mut done = self
                        .reduced
                        .entry(order.position_id.clone())
                        .or_insert(0.0);
                    *done = done.max(order.close_ratio);
                }
                OrderOutcome::Submitted {
                    order_id: ack.order_id,
                }
            }
            Err(e) => {
                self.record_failure();
                self.metrics.record_order(outcome::FAILED);
                error!(
                    position_id = %order.position_id,
                    action = %order.action,
                    error = %e,
                    "Exit submission failed"
                );
                OrderOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    fn record_failure(&self) {
        let before = self.breaker.state();
        self.breaker.record_failure();
        let after = self.breaker.state();
        self.metrics.set_circuit_state(after);

        if before != CircuitState::Open && after == CircuitState::Open {
            let config = self.breaker.config();
            self.dispatch(&Alert::circuit_opened(
                self.breaker.failure_count(),
                config.failure_window_secs,
            ));
        }
    }

    fn dispatch(&self, alert: &Alert) {
        for sink in &self.alert_sinks {
            sink.send(alert);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::position::fixtures::{single_leg, snapshot};
    use crate::data::StrategyKind;
    use crate::risk::CircuitBreakerConfig;
    use crate::supervisor::alerts::{AlertType, MemoryAlertSink, Severity};
    use crate::supervisor::executor::PaperExecutor;
    use crate::supervisor::source::StaticPositionSource;
    use rust_decimal_macros::dec;

    struct Harness {
        supervisor: Supervisor,
        executor: Arc<PaperExecutor>,
        alerts: Arc<MemoryAlertSink>,
    }

    fn harness(config: Config) -> Harness {
        let executor = Arc::new(PaperExecutor::new());
        let alerts = Arc::new(MemoryAlertSink::new());
        let supervisor = Supervisor::new(&config, executor.clone())
            .unwrap()
            .with_alert_sink(Arc::clone(&alerts));
        Harness {
            supervisor,
            executor,
            alerts,
        }
    }

    fn input(id: &str, upl_pct: f64) -> PositionInput {
        let mut snap = snapshot(id);
        snap.upl_pct = upl_pct;
        PositionInput::new(snap)
    }

    fn entry(delta: f64) -> EntryOrder {
        EntryOrder {
            symbol: "SPY".to_string(),
            strategy: StrategyKind::IronCondor,
            legs: snapshot("x").legs,
            delta,
            position_value: dec!(50),
            entry_premium: dec!(2.50),
        }
    }

    #[tokio::test]
    async fn test_cycle_holds_and_closes() {
        let h = harness(Config::default());
        h.supervisor.on_position_opened("winner", dec!(2.50)).unwrap();

        let report = h
            .supervisor
            .run_cycle(&[input("calm", 10.0), input("winner", 85.0)])
            .await;

        assert_eq!(report.evaluated(), 2);
        assert!(report.outcome("calm").unwrap().decision.is_hold());
        assert_eq!(report.outcome("calm").unwrap().order, OrderOutcome::NotRequired);

        let winner = report.outcome("winner").unwrap();
        assert_eq!(winner.decision.rule, "take_profit");
        assert!(matches!(winner.order, OrderOutcome::Submitted { .. }));

        // Close releases per-position state
        assert!(!h.supervisor.trailing().contains("winner"));
        assert_eq!(h.supervisor.peak_upl("winner"), None);
        assert_eq!(h.supervisor.peak_upl("calm"), Some(10.0));

        assert_eq!(h.executor.order_count(), 1);
        let alerts = h.alerts.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::PositionClose);
        assert_eq!(alerts[0].severity, Severity::Info);
    }

    #[tokio::test]
    async fn test_trailing_trigger_bypasses_rules() {
        let h = harness(Config::default());
        h.supervisor.on_position_opened("p", dec!(100)).unwrap();

        let at = |premium: Decimal| {
            let mut i = input("p", 0.0);
            i.snapshot.current_premium = premium;
            i
        };

        assert!(h.supervisor.run_cycle(&[at(dec!(103))]).await.outcomes[0].decision.is_hold());
        assert!(h.supervisor.run_cycle(&[at(dec!(110))]).await.outcomes[0].decision.is_hold());
        assert_eq!(
            h.supervisor.trailing().get("p").unwrap().stop_premium,
            Some(dec!(108.35))
        );

        let report = h.supervisor.run_cycle(&[at(dec!(108.30))]).await;
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.decision.rule, TRAILING_STOP_RULE);
        assert_eq!(outcome.decision.urgency, Urgency::Immediate);
        assert_eq!(outcome.decision.meta_f64(keys::STOP_PREMIUM), Some(108.35));
        assert!(matches!(outcome.order, OrderOutcome::Submitted { .. }));
        assert!(!h.supervisor.trailing().contains("p"));
        assert_eq!(h.alerts.alerts()[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_peak_upl_feeds_peak_trailing_rule() {
        let h = harness(Config::default());

        let first = h.supervisor.run_cycle(&[input("p", 60.0)]).await;
        assert_eq!(first.outcomes[0].decision.action, Action::Reduce);
        assert_eq!(h.supervisor.peak_upl("p"), Some(60.0));

        let second = h.supervisor.run_cycle(&[input("p", 20.0)]).await;
        assert_eq!(second.outcomes[0].decision.rule, "peak_trailing_exit");
        assert_eq!(second.outcomes[0].decision.action, Action::Close);
    }

    #[tokio::test]
    async fn test_partial_reduce_not_repeated() {
        let h = harness(Config::default());

        for cycle in 0..5 {
            let report = h.supervisor.run_cycle(&[input("p", 60.0)]).await;
            let outcome = report.outcome("p").unwrap();
            assert_eq!(outcome.decision.action, Action::Reduce);
            if cycle == 0 {
                assert!(matches!(outcome.order, OrderOutcome::Submitted { .. }));
            } else {
                assert!(matches!(outcome.order, OrderOutcome::Skipped { .. }));
            }
        }
        assert_eq!(h.executor.order_count(), 1);
        assert_eq!(h.alerts.alerts().len(), 1);

        // A full close is a different exit and still goes out, once
        let close = h.supervisor.run_cycle(&[input("p", 85.0)]).await;
        assert!(matches!(close.outcomes[0].order, OrderOutcome::Submitted { .. }));
        let again = h.supervisor.run_cycle(&[input("p", 85.0)]).await;
        assert_eq!(again.skipped(), 1);
        assert_eq!(h.executor.order_count(), 2);
        let text = h.supervisor.metrics().render().unwrap();
        assert!(text.contains("orders_total{outcome=\"skipped\"} 5"));

        // Leaving the source clears the exit record
        h.supervisor.run_cycle(&[]).await;
        let reopened = h.supervisor.run_cycle(&[input("p", 60.0)]).await;
        assert!(matches!(reopened.outcomes[0].order, OrderOutcome::Submitted { .. }));
    }

    #[tokio::test]
    async fn test_departed_positions_release_all_state() {
        let h = harness(Config::default());
        h.supervisor.on_position_opened("gone", dec!(2.50)).unwrap();
        h.supervisor.run_cycle(&[input("gone", 10.0), input("kept", 5.0)]).await;
        assert!(h.supervisor.trailing().contains("gone"));

        for _ in 0..3 {
            h.supervisor.run_cycle(&[input("kept", 5.0)]).await;
        }
        assert!(!h.supervisor.trailing().contains("gone"));
        assert_eq!(h.supervisor.peak_upl("gone"), None);
        assert_eq!(h.supervisor.peak_upl("kept"), Some(5.0));
        assert!(h.supervisor.trailing().is_empty());
    }

    #[tokio::test]
    async fn test_source_entry_premium_starts_trailing_stop() {
        let h = harness(Config::default());
        let long_call = |premium: Decimal| {
            let mut snap = single_leg("lc");
            snap.current_premium = premium;
            PositionInput::new(snap).with_entry_premium(dec!(100))
        };
        let condor = PositionInput::new(snapshot("ic")).with_entry_premium(dec!(2.50));

        h.supervisor.run_cycle(&[long_call(dec!(110)), condor.clone()]).await;
        assert!(h.supervisor.trailing().contains("lc"));
        assert!(!h.supervisor.trailing().contains("ic"));

        let report = h.supervisor.run_cycle(&[long_call(dec!(108.30)), condor]).await;
        let outcome = report.outcome("lc").unwrap();
        assert_eq!(outcome.decision.rule, TRAILING_STOP_RULE);
        assert!(matches!(outcome.order, OrderOutcome::Submitted { .. }));

        // Still listed after the close: not tracked again, not closed again
        let after = h.supervisor.run_cycle(&[long_call(dec!(108.30))]).await;
        assert!(!h.supervisor.trailing().contains("lc"));
        assert_eq!(after.submitted(), 0);
    }

    #[tokio::test]
    async fn test_failures_open_breaker_and_block_orders() {
        let config = Config {
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        let h = harness(config);
        h.executor.reject_next(10);

        let positions = [input("a", 90.0), input("b", 90.0)];
        let first = h.supervisor.run_cycle(&positions).await;
        assert_eq!(first.failed(), 2);
        assert_eq!(h.supervisor.breaker().state(), CircuitState::Open);
        assert!(h
            .alerts
            .alerts()
            .iter()
            .any(|a| a.alert_type == AlertType::CircuitBreaker));

        let second = h.supervisor.run_cycle(&positions).await;
        assert_eq!(second.blocked(), 2);
        assert_eq!(second.failed(), 0);

        let text = h.supervisor.metrics().render().unwrap();
        assert!(text.contains("orders_total{outcome=\"blocked\"} 2"));
        assert!(text.contains("circuit_state 2"));

        assert!(matches!(
            h.supervisor.request_entry(&entry(1.0)).await,
            Err(SupervisorError::CircuitOpen(_))
        ));
    }

    #[tokio::test]
    async fn test_entry_gated_by_limits() {
        let h = harness(Config::default());

        let err = h.supervisor.request_entry(&entry(60.0)).await.unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::LimitBreach {
                kind: LimitKind::PortfolioDelta,
                ..
            }
        ));
        assert_eq!(h.alerts.alerts()[0].alert_type, AlertType::EntryRejected);
        assert_eq!(h.executor.order_count(), 0);

        let ack = h.supervisor.request_entry(&entry(5.0)).await.unwrap();
        assert_eq!(h.executor.order_count(), 1);
        // Credit structure: no premium trailing stop
        assert!(!h.supervisor.trailing().contains(&ack.position_id));
    }

    #[tokio::test]
    async fn test_long_premium_entry_starts_trailing_stop() {
        let h = harness(Config::default());
        let order = EntryOrder {
            strategy: StrategyKind::LongCall,
            legs: single_leg("x").legs,
            ..entry(2.0)
        };

        let ack = h.supervisor.request_entry(&order).await.unwrap();
        let state = h.supervisor.trailing().get(&ack.position_id).unwrap();
        assert_eq!(state.entry_premium, dec!(2.50));
        assert!(!state.active);
    }

    #[tokio::test]
    async fn test_entry_rejects_non_positive_premium() {
        let h = harness(Config::default());
        let mut order = entry(1.0);
        order.entry_premium = Decimal::ZERO;
        assert!(matches!(
            h.supervisor.request_entry(&order).await,
            Err(SupervisorError::Execution(_))
        ));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = harness(Config::default());
        let supervisor = h.supervisor.with_cadence(Duration::from_millis(10));
        let source = StaticPositionSource::new(vec![input("p", 5.0)]);
        let (tx, rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            tx.send(true).ok();
        });

        let cycles = supervisor.run(&source, rx).await;
        assert!(cycles >= 1);
        assert_eq!(supervisor.peak_upl("p"), Some(5.0));
    }
}
