pub mod rules;
pub mod engine;

pub use rules::{build_rules, EvaluationContext, Rule, RuleError, RulesConfig};
pub use engine::DecisionEngine;
