//! Order placement seam. The broker integration lives behind `OrderExecutor`;
//! `PaperExecutor` acknowledges orders locally.

use crate::data::{keys, Action, Decision, OptionLeg, PositionSnapshot, StrategyKind, Urgency};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{info, warn};

/// Exit-side order derived from an actionable decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitOrder {
    pub position_id: String,
    pub symbol: String,
    pub action: Action,
    /// Share of the position to close (0.0 for a hedge)
    pub close_ratio: f64,
    pub roll_to_dte: Option<i64>,
    pub hedge_delta: Option<f64>,
    pub urgency: Urgency,
    pub rule: String,
    pub reason: String,
}

impl ExitOrder {
    /// `None` for Hold
    pub fn from_decision(snapshot: &PositionSnapshot, decision: &Decision) -> Option<Self> {
        let close_ratio = match decision.action {
            Action::Hold => return None,
            Action::Close | Action::Roll => 1.0,
            Action::Reduce => decision.meta_f64(keys::CLOSE_RATIO).unwrap_or(0.5),
            Action::Hedge => 0.0,
        };

        Some(Self {
            position_id: snapshot.id.clone(),
            symbol: snapshot.symbol.clone(),
            action: decision.action,
            close_ratio,
            roll_to_dte: decision.meta(keys::ROLL_TO_DTE).and_then(|v| v.as_i64()),
            hedge_delta: decision.meta_f64(keys::HEDGE_DELTA),
            urgency: decision.urgency,
            rule: decision.rule.clone(),
            reason: decision.reason.clone(),
        })
    }

    /// Whether a fill ends the life of the tracked position
    pub fn terminates_position(&self) -> bool {
        matches!(self.action, Action::Close | Action::Roll)
    }
}

/// New position request, checked against limits before submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryOrder {
    pub symbol: String,
    pub strategy: StrategyKind,
    pub legs: Vec<OptionLeg>,
    /// Net delta the position adds to the portfolio
    pub delta: f64,
    /// Notional value the position adds to exposure
    pub position_value: Decimal,
    /// Premium paid per contract, seeds the trailing stop
    pub entry_premium: Decimal,
}

/// Broker acknowledgement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub position_id: String,
    pub latency_ms: u64,
    pub submitted_at: DateTime<Utc>,
}

#[async_trait]
pub trait OrderExecutor: Send + Sync {
    async fn submit_exit(&self, order: &ExitOrder) -> Result<OrderAck>;

    /// The returned `position_id` identifies the newly opened position
    async fn submit_entry(&self, order: &EntryOrder) -> Result<OrderAck>;
}

/// Acknowledges every order locally. Can be told to reject the next N orders
/// to rehearse broker outages.
#[derive(Debug, Default)]
pub struct PaperExecutor {
    next_id: AtomicU64,
    reject_remaining: AtomicUsize,
    history: Mutex<Vec<OrderAck>>,
}

impl PaperExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` submissions
    pub fn reject_next(&self, count: usize) {
        self.reject_remaining.store(count, Ordering::SeqCst);
    }

    pub fn history(&self) -> Vec<OrderAck> {
        self.history.lock().clone()
    }

    pub fn order_count(&self) -> usize {
        self.history.lock().len()
    }

    fn acknowledge(&self, position_id: String, started: Instant) -> Result<OrderAck> {
        let rejected = self
            .reject_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            warn!(position_id = %position_id, "Paper order rejected");
            return Err(anyhow!("paper broker rejected order for {}", position_id));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let ack = OrderAck {
            order_id: format!("paper-{}", id),
            position_id,
            latency_ms: started.elapsed().as_millis() as u64,
            submitted_at: Utc::now(),
        };
        self.history.lock().push(ack.clone());
        Ok(ack)
    }
}

#[async_trait]
impl OrderExecutor for PaperExecutor {
    async fn submit_exit(&self, order: &ExitOrder) -> Result<OrderAck> {
        let started = Instant::now();
        let ack = self.acknowledge(order.position_id.clone(), started)?;
        info!(
            order_id = %ack.order_id,
            position_id = %order.position_id,
            action = %order.action,
            close_ratio = order.close_ratio,
            rule = %order.rule,
            "📝 Paper exit order acknowledged"
        );
        Ok(ack)
    }

    async fn submit_entry(&self, order: &EntryOrder) -> Result<OrderAck> {
        let started = Instant::now();
        let position_id = format!(
            "{}-{}",
            order.symbol.to_lowercase(),
            self.next_id.load(Ordering::SeqCst) + 1
        );
        let ack = self.acknowledge(position_id, started)?;
        info!(
            order_id = %ack.order_id,
            position_id = %ack.position_id,
            symbol = %order.symbol,
            strategy = ?order.strategy,
            "📝 Paper entry order acknowledged"
        );
        Ok(ack)
    }
}
