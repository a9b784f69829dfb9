use crate::data::{Decision, PositionSnapshot};
use crate::strategy::rules::{build_rules, EvaluationContext, Rule, RuleError, RulesConfig};
use crate::utils::config::ConfigError;
use crate::utils::metrics::SupervisorMetrics;
use dashmap::DashMap;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

struct RegisteredRule {
    rule: Box<dyn Rule>,
    /// Registration sequence, breaks priority ties
    seq: u64,
}

/// Priority-ordered, first-wins rule evaluation.
///
/// Rules are sorted ascending by priority, ties broken by registration order.
/// The first rule that returns a decision wins and later rules are not
/// invoked. A rule that errors or panics is logged and skipped. Nothing fires → Hold.
///
/// `evaluate` takes `&self`; the engine can be shared across workers and the
/// trigger statistics are kept in concurrent maps.
pub struct DecisionEngine {
    rules: Vec<RegisteredRule>,
    next_seq: u64,
    trigger_counts: DashMap<String, u64>,
    error_counts: DashMap<String, u64>,
    metrics: Option<Arc<SupervisorMetrics>>,
}

impl DecisionEngine {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            next_seq: 0,
            trigger_counts: DashMap::new(),
            error_counts: DashMap::new(),
            metrics: None,
        }
    }

    /// Mirror trigger and error counts into prometheus
    pub fn with_metrics(mut self, metrics: Arc<SupervisorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Engine loaded with every enabled rule from the config
    pub fn from_config(config: &RulesConfig) -> Result<Self, ConfigError> {
        let mut engine = Self::new();
        for rule in build_rules(config)? {
            engine.register_rule(rule)?;
        }
        Ok(engine)
    }

    /// Add a rule. A rule with an existing name is replaced in place and keeps
    /// its original registration slot.
    pub fn register_rule(&mut self, rule: Box<dyn Rule>) -> Result<(), ConfigError> {
        if !rule.priority().is_finite() {
            return Err(ConfigError::invalid(
                &format!("rule `{}` priority", rule.name()),
                "must be a finite number",
            ));
        }

        if let Some(existing) = self.rules.iter_mut().find(|r| r.rule.name() == rule.name()) {
            debug!(rule = rule.name(), "Replacing registered rule");
            existing.rule = rule;
        } else {
            debug!(rule = rule.name(), priority = rule.priority(), "Registering rule");
            self.rules.push(RegisteredRule {
                rule,
                seq: self.next_seq,
            });
            self.next_seq += 1;
        }

        // Stable sort on (priority, seq) keeps ordering deterministic
        self.rules.sort_by(|a, b| {
            a.rule
                .priority()
                .total_cmp(&b.rule.priority())
                .then(a.seq.cmp(&b.seq))
        });
        Ok(())
    }

    pub fn unregister_rule(&mut self, name: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.rule.name() != name);
        self.rules.len() != before
    }

    /// Rule names in evaluation order
    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.rule.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Decide what to do with one position this cycle
    pub fn evaluate(&self, snapshot: &PositionSnapshot, ctx: &EvaluationContext<'_>) -> Decision {
        for registered in &self.rules {
            let rule = &registered.rule;
            // A panicking rule is treated like one that returned an error
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| rule.evaluate(snapshot, ctx)))
                .unwrap_or(Err(RuleError::Panicked));
            match outcome {
                Ok(Some(decision)) => {
                    *self.trigger_counts.entry(rule.name().to_string()).or_insert(0) += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.rule_triggered(rule.name());
                    }
                    debug!(
                        position_id = %snapshot.id,
                        rule = rule.name(),
                        action = %decision.action,
                        "Rule triggered"
                    );
                    return decision;
                }
                Ok(None) => {}
                Err(e) => {
                    *self.error_counts.entry(rule.name().to_string()).or_insert(0) += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.rule_failed(rule.name());
                    }
                    error!(
                        position_id = %snapshot.id,
                        rule = rule.name(),
                        error = %e,
                        "Rule evaluation failed, skipping"
                    );
                }
            }
        }

        Decision::hold()
    }

    /// How often each rule's decision has won
    pub fn trigger_counts(&self) -> HashMap<String, u64> {
        self.trigger_counts
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    pub fn trigger_count(&self, name: &str) -> u64 {
        self.trigger_counts.get(name).map(|c| *c).unwrap_or(0)
    }

    /// How often each rule has failed to evaluate
    pub fn error_counts(&self) -> HashMap<String, u64> {
        self.error_counts
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::position::fixtures::snapshot;
    use crate::data::{Action, MarketContext, Urgency};
    use parking_lot::Mutex;
    use proptest::prelude::*;

    /// Test rule that records its invocation and optionally fires or fails
    struct Scripted {
        name: String,
        priority: f64,
        outcome: Script,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[derive(Clone, Copy)]
    enum Script {
        Silent,
        Fire,
        Fail,
        Panic,
    }

    impl Rule for Scripted {
        fn name(&self) -> &str {
            &self.name
        }

        fn priority(&self) -> f64 {
            self.priority
        }

        fn evaluate(
            &self,
            _snapshot: &PositionSnapshot,
            _ctx: &EvaluationContext<'_>,
        ) -> Result<Option<Decision>, RuleError> {
            self.log.lock().push(self.name.clone());
            match self.outcome {
                Script::Silent => Ok(None),
                Script::Fire => Ok(Some(Decision::new(
                    Action::Close,
                    "scripted",
                    self.name.clone(),
                    Urgency::Normal,
                ))),
                Script::Fail => Err(RuleError::InvalidSnapshot("boom".into())),
                Script::Panic => panic!("rule panicked"),
            }
        }
    }

    fn scripted(
        name: &str,
        priority: f64,
        outcome: Script,
        log: &Arc<Mutex<Vec<String>>>,
    ) -> Box<dyn Rule> {
        Box::new(Scripted {
            name: name.to_string(),
            priority,
            outcome,
            log: Arc::clone(log),
        })
    }

    #[test]
    fn test_no_rules_holds() {
        let engine = DecisionEngine::new();
        let d = engine.evaluate(&snapshot("p"), &EvaluationContext::default());
        assert_eq!(d.action, Action::Hold);
        assert_eq!(d.rule, "none");
    }

    #[test]
    fn test_first_wins_and_later_rules_not_invoked() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut engine = DecisionEngine::new();
        engine.register_rule(scripted("late", 6.0, Script::Fire, &log)).unwrap();
        engine.register_rule(scripted("early", 1.0, Script::Silent, &log)).unwrap();
        engine.register_rule(scripted("mid", 3.0, Script::Fire, &log)).unwrap();

        let d = engine.evaluate(&snapshot("p"), &EvaluationContext::default());
        assert_eq!(d.rule, "mid");
        assert_eq!(*log.lock(), vec!["early", "mid"]);
        assert_eq!(engine.trigger_count("mid"), 1);
        assert_eq!(engine.trigger_count("late"), 0);
    }

    #[test]
    fn test_failing_rule_is_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut engine = DecisionEngine::new();
        engine.register_rule(scripted("broken", 1.0, Script::Fail, &log)).unwrap();
        engine.register_rule(scripted("next", 2.0, Script::Fire, &log)).unwrap();

        let d = engine.evaluate(&snapshot("p"), &EvaluationContext::default());
        assert_eq!(d.rule, "next");
        assert_eq!(engine.error_counts().get("broken"), Some(&1));
    }

    #[test]
    fn test_panicking_rule_is_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut engine = DecisionEngine::new();
        engine.register_rule(scripted("explodes", 1.0, Script::Panic, &log)).unwrap();
        engine.register_rule(scripted("next", 2.0, Script::Fire, &log)).unwrap();

        let d = engine.evaluate(&snapshot("p"), &EvaluationContext::default());
        assert_eq!(d.rule, "next");
        assert_eq!(engine.error_counts().get("explodes"), Some(&1));
    }

    #[test]
    fn test_metrics_mirror_counts() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let metrics = Arc::new(SupervisorMetrics::new("").unwrap());
        let mut engine = DecisionEngine::new().with_metrics(Arc::clone(&metrics));
        engine.register_rule(scripted("broken", 1.0, Script::Fail, &log)).unwrap();
        engine.register_rule(scripted("winner", 2.0, Script::Fire, &log)).unwrap();

        engine.evaluate(&snapshot("p"), &EvaluationContext::default());
        let text = metrics.render().unwrap();
        assert!(text.contains("rule_errors_total{rule=\"broken\"} 1"));
        assert!(text.contains("rule_triggers_total{rule=\"winner\"} 1"));
    }

    #[test]
    fn test_ties_break_by_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut engine = DecisionEngine::new();
        engine.register_rule(scripted("first", 2.0, Script::Silent, &log)).unwrap();
        engine.register_rule(scripted("second", 2.0, Script::Silent, &log)).unwrap();
        engine.register_rule(scripted("zero", 0.5, Script::Silent, &log)).unwrap();

        assert_eq!(engine.rule_names(), vec!["zero", "first", "second"]);

        // Re-registering keeps the original slot
        engine.register_rule(scripted("first", 2.0, Script::Fire, &log)).unwrap();
        assert_eq!(engine.rule_names(), vec!["zero", "first", "second"]);
        assert_eq!(engine.len(), 3);
    }

    #[test]
    fn test_nan_priority_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut engine = DecisionEngine::new();
        assert!(engine
            .register_rule(scripted("bad", f64::NAN, Script::Silent, &log))
            .is_err());
        assert!(engine.is_empty());
    }

    #[test]
    fn test_unregister() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut engine = DecisionEngine::new();
        engine.register_rule(scripted("a", 1.0, Script::Fire, &log)).unwrap();
        assert!(engine.unregister_rule("a"));
        assert!(!engine.unregister_rule("a"));
        assert!(engine.evaluate(&snapshot("p"), &EvaluationContext::default()).is_hold());
    }

    #[test]
    fn test_stop_loss_beats_dte_roll() {
        let engine = DecisionEngine::from_config(&RulesConfig::default()).unwrap();
        let mut snap = snapshot("p");
        snap.upl_pct = -250.0;
        snap.dte = 10;

        let d = engine.evaluate(&snap, &EvaluationContext::default());
        assert_eq!(d.rule, "stop_loss");
        assert_eq!(d.urgency, Urgency::Immediate);
    }

    #[test]
    fn test_default_table_scenarios() {
        let engine = DecisionEngine::from_config(&RulesConfig::default()).unwrap();

        let mut calm = snapshot("calm");
        calm.upl_pct = 10.0;
        assert!(engine.evaluate(&calm, &EvaluationContext::default()).is_hold());

        // Catastrophe outranks a take-profit that is also true
        let mut winner = snapshot("w");
        winner.upl_pct = 85.0;
        let crash = MarketContext {
            underlying_change_1h_pct: Some(-4.0),
            ..Default::default()
        };
        let d = engine.evaluate(&winner, &EvaluationContext::with_market(&crash));
        assert_eq!(d.rule, "catastrophe");

        let d = engine.evaluate(&winner, &EvaluationContext::default());
        assert_eq!(d.rule, "take_profit");

        let mut expiring = snapshot("e");
        expiring.dte = 23;
        let d = engine.evaluate(&expiring, &EvaluationContext::default());
        assert_eq!(d.action, Action::Roll);

        assert_eq!(engine.trigger_count("take_profit"), 1);
        assert_eq!(engine.trigger_count("catastrophe"), 1);
    }

    #[test]
    fn test_engine_is_shareable_across_threads() {
        let engine = Arc::new(DecisionEngine::from_config(&RulesConfig::default()).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    let mut snap = snapshot(&format!("p{}", i));
                    snap.upl_pct = 90.0;
                    engine.evaluate(&snap, &EvaluationContext::default())
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap().rule, "take_profit");
        }
        assert_eq!(engine.trigger_count("take_profit"), 4);
    }

    proptest! {
        #[test]
        fn prop_invocation_order_is_non_decreasing(
            specs in prop::collection::vec((0u32..40, 0u8..3), 1..12)
        ) {
            let log = Arc::new(Mutex::new(Vec::new()));
            let mut engine = DecisionEngine::new();
            let mut priorities = HashMap::new();
            let mut expected_winner: Option<(f64, usize)> = None;

            for (i, (p, kind)) in specs.iter().enumerate() {
                let priority = f64::from(*p) / 4.0;
                let outcome = match kind {
                    0 => Script::Silent,
                    1 => Script::Fire,
                    _ => Script::Fail,
                };
                let name = format!("r{}", i);
                priorities.insert(name.clone(), priority);
                engine.register_rule(scripted(&name, priority, outcome, &log)).unwrap();

                if matches!(outcome, Script::Fire)
                    && expected_winner.map_or(true, |(best, _)| priority < best)
                {
                    expected_winner = Some((priority, i));
                }
            }

            let decision = engine.evaluate(&snapshot("p"), &EvaluationContext::default());
            let invoked = log.lock().clone();

            for pair in invoked.windows(2) {
                prop_assert!(priorities[&pair[0]] <= priorities[&pair[1]]);
            }

            match expected_winner {
                Some((_, idx)) => {
                    let winner = format!("r{}", idx);
                    prop_assert_eq!(&decision.rule, &winner);
                    prop_assert_eq!(invoked.last(), Some(&winner));
                }
                None => {
                    prop_assert!(decision.is_hold());
                    prop_assert_eq!(invoked.len(), specs.len());
                }
            }
        }
    }
}
