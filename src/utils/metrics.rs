//! Prometheus metrics for the supervisor.
//!
//! Each instance owns a private registry so several supervisors (and tests)
//! can coexist in one process.

use crate::data::Decision;
use crate::risk::CircuitState;
use anyhow::Result;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Order outcome labels for `orders_total`
pub mod outcome {
    pub const SUBMITTED: &str = "submitted";
    pub const FAILED: &str = "failed";
    pub const BLOCKED: &str = "blocked";
    pub const REJECTED: &str = "rejected";
    /// Exit already executed, not sent again
    pub const SKIPPED: &str = "skipped";
}

pub struct SupervisorMetrics {
    registry: Registry,
    rule_triggers: IntCounterVec,
    rule_errors: IntCounterVec,
    decisions: IntCounterVec,
    orders: IntCounterVec,
    circuit_state: IntGauge,
    tracked_trailing_stops: IntGauge,
}

impl SupervisorMetrics {
    pub fn new(namespace: &str) -> Result<Self, prometheus::Error> {
        let prefix = (!namespace.is_empty()).then(|| namespace.to_string());
        let registry = Registry::new_custom(prefix, None)?;

        let rule_triggers = IntCounterVec::new(
            Opts::new("rule_triggers_total", "Decisions won by each rule"),
            &["rule"],
        )?;
        let rule_errors = IntCounterVec::new(
            Opts::new("rule_errors_total", "Rule evaluations that failed and were skipped"),
            &["rule"],
        )?;
        let decisions = IntCounterVec::new(
            Opts::new("decisions_total", "Decisions produced, by action"),
            &["action"],
        )?;
        let orders = IntCounterVec::new(
            Opts::new("orders_total", "Order submissions, by outcome"),
            &["outcome"],
        )?;
        let circuit_state = IntGauge::new(
            "circuit_state",
            "Circuit breaker state: 0 closed, 1 half-open, 2 open",
        )?;
        let tracked_trailing_stops =
            IntGauge::new("tracked_trailing_stops", "Positions with a live trailing stop")?;

        registry.register(Box::new(rule_triggers.clone()))?;
        registry.register(Box::new(rule_errors.clone()))?;
        registry.register(Box::new(decisions.clone()))?;
        registry.register(Box::new(orders.clone()))?;
        registry.register(Box::new(circuit_state.clone()))?;
        registry.register(Box::new(tracked_trailing_stops.clone()))?;

        Ok(Self {
            registry,
            rule_triggers,
            rule_errors,
            decisions,
            orders,
            circuit_state,
            tracked_trailing_stops,
        })
    }

    pub fn rule_triggered(&self, rule: &str) {
        self.rule_triggers.with_label_values(&[rule]).inc();
    }

    pub fn rule_failed(&self, rule: &str) {
        self.rule_errors.with_label_values(&[rule]).inc();
    }

    pub fn record_decision(&self, decision: &Decision) {
        self.decisions
            .with_label_values(&[decision.action.as_str()])
            .inc();
    }

    pub fn record_order(&self, outcome: &str) {
        self.orders.with_label_values(&[outcome]).inc();
    }

    pub fn set_circuit_state(&self, state: CircuitState) {
        self.circuit_state.set(state.gauge_value());
    }

    pub fn set_tracked_trailing_stops(&self, count: usize) {
        self.tracked_trailing_stops.set(count as i64);
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Action, Urgency};

    #[test]
    fn test_render_contains_labelled_series() {
        let metrics = SupervisorMetrics::new("supervisor").unwrap();
        metrics.rule_triggered("stop_loss");
        metrics.rule_triggered("stop_loss");
        metrics.rule_failed("vix_exit");
        metrics.record_decision(&Decision::new(Action::Close, "x", "stop_loss", Urgency::Immediate));
        metrics.record_order(outcome::BLOCKED);
        metrics.set_circuit_state(CircuitState::Open);
        metrics.set_tracked_trailing_stops(3);

        let text = metrics.render().unwrap();
        assert!(text.contains("supervisor_rule_triggers_total{rule=\"stop_loss\"} 2"));
        assert!(text.contains("supervisor_rule_errors_total{rule=\"vix_exit\"} 1"));
        assert!(text.contains("supervisor_decisions_total{action=\"close\"} 1"));
        assert!(text.contains("supervisor_orders_total{outcome=\"blocked\"} 1"));
        assert!(text.contains("supervisor_circuit_state 2"));
        assert!(text.contains("supervisor_tracked_trailing_stops 3"));
    }

    #[test]
    fn test_instances_do_not_share_registries() {
        let a = SupervisorMetrics::new("").unwrap();
        let b = SupervisorMetrics::new("").unwrap();
        a.rule_triggered("take_profit");

        assert!(a.render().unwrap().contains("rule_triggers_total{rule=\"take_profit\"} 1"));
        assert!(!b.render().unwrap().contains("take_profit"));
    }
}
