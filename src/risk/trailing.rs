use crate::utils::config::ConfigError;
use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Trailing stop configuration. All values are fractions of option premium.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailingStopConfig {
    /// Gain over entry premium that arms the stop (0.02 = 2%)
    pub activation_threshold: Decimal,
    /// Distance of the stop below the peak premium
    pub trailing_fraction: Decimal,
    /// Minimum relative stop move; smaller moves are ignored as noise
    pub min_move: Decimal,
}

impl Default for TrailingStopConfig {
    fn default() -> Self {
        Self {
            activation_threshold: dec!(0.02),
            trailing_fraction: dec!(0.015),
            min_move: dec!(0.005),
        }
    }
}

impl TrailingStopConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.activation_threshold < Decimal::ZERO {
            return Err(ConfigError::invalid(
                "trailing_stop.activation_threshold",
                "must be >= 0",
            ));
        }
        if self.trailing_fraction <= Decimal::ZERO || self.trailing_fraction >= Decimal::ONE {
            return Err(ConfigError::invalid(
                "trailing_stop.trailing_fraction",
                "must be in (0, 1)",
            ));
        }
        if self.min_move < Decimal::ZERO {
            return Err(ConfigError::invalid("trailing_stop.min_move", "must be >= 0"));
        }
        Ok(())
    }
}

/// Result of feeding one premium observation to a tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrailingAction {
    /// Nothing changed
    Hold,
    /// Stop armed for the first time
    Activate,
    /// Stop ratcheted up
    Update,
    /// Premium fell through the stop: close now
    Trigger,
}

/// Persistent trailing state for one position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingStop {
    pub entry_premium: Decimal,
    /// Peak premium seen so far, never decreases
    pub highest_premium: Decimal,
    /// Absent until activated
    pub stop_premium: Option<Decimal>,
    pub active: bool,
}

/// Whipsaw-resistant premium trailing stop
#[derive(Debug, Clone)]
pub struct TrailingStopTracker {
    config: TrailingStopConfig,
    state: TrailingStop,
}

impl TrailingStopTracker {
    pub fn new(entry_premium: Decimal, config: TrailingStopConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        if entry_premium <= Decimal::ZERO {
            return Err(ConfigError::invalid("entry_premium", "must be > 0"));
        }

        Ok(Self {
            config,
            state: TrailingStop {
                entry_premium,
                highest_premium: entry_premium,
                stop_premium: None,
                active: false,
            },
        })
    }

    pub fn state(&self) -> &TrailingStop {
        &self.state
    }

    pub fn stop_premium(&self) -> Option<Decimal> {
        self.state.stop_premium
    }

    pub fn is_active(&self) -> bool {
        self.state.active
    }

    fn stop_for_peak(&self) -> Decimal {
        self.state.highest_premium * (Decimal::ONE - self.config.trailing_fraction)
    }

    /// Feed the latest premium and get the (possibly new) stop with the action taken.
    ///
    /// A `Trigger` must be handled as an immediate close, ahead of any rule.
    pub fn update(&mut self, current_premium: Decimal) -> (Option<Decimal>, TrailingAction) {
        // 1. Track the peak
        if current_premium > self.state.highest_premium {
            self.state.highest_premium = current_premium;
        }

        let mut action = TrailingAction::Hold;
        if !self.state.active {
            // 2. Arm once the peak gain clears the activation threshold
            let gain = (self.state.highest_premium - self.state.entry_premium)
                / self.state.entry_premium;
            if gain < self.config.activation_threshold {
                return (None, TrailingAction::Hold);
            }

            let stop = self.stop_for_peak();
            self.state.active = true;
            self.state.stop_premium = Some(stop);
            action = TrailingAction::Activate;
            debug!(
                peak = %self.state.highest_premium,
                stop = %stop,
                "Trailing stop activated"
            );
        } else {
            // 3. Ratchet up, ignoring moves inside the dead-band
            let candidate = self.stop_for_peak();
            if let Some(stop) = self.state.stop_premium {
                if candidate > stop && (candidate - stop) / stop >= self.config.min_move {
                    self.state.stop_premium = Some(candidate);
                    action = TrailingAction::Update;
                }
            }
        }

        // 4. Breach check, also on the update that arms the stop
        match self.state.stop_premium {
            Some(stop) if current_premium <= stop => (Some(stop), TrailingAction::Trigger),
            stop => (stop, action),
        }
    }

    /// Disarm and restart tracking from the entry premium
    pub fn reset(&mut self) {
        self.state.highest_premium = self.state.entry_premium;
        self.state.stop_premium = None;
        self.state.active = false;
    }

    /// Disarm and restart tracking from a new entry premium (strategy re-entry)
    pub fn reset_with_entry(&mut self, entry_premium: Decimal) -> Result<(), ConfigError> {
        if entry_premium <= Decimal::ZERO {
            return Err(ConfigError::invalid("entry_premium", "must be > 0"));
        }
        self.state.entry_premium = entry_premium;
        self.reset();
        Ok(())
    }
}

/// Trailing stops for all open positions, keyed by position id.
///
/// Backed by a sharded map so updates for different positions never contend.
/// Entries are added on open, updated every cycle and removed on close.
pub struct TrailingStopManager {
    config: TrailingStopConfig,
    stops: DashMap<String, TrailingStopTracker>,
}

impl TrailingStopManager {
    pub fn new(config: TrailingStopConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            stops: DashMap::new(),
        })
    }

    /// Start tracking a newly opened position. Replaces any stale entry.
    pub fn open(&self, position_id: &str, entry_premium: Decimal) -> Result<(), ConfigError> {
        let tracker = TrailingStopTracker::new(entry_premium, self.config.clone())?;
        if self.stops.insert(position_id.to_string(), tracker).is_some() {
            warn!(position_id, "Replaced existing trailing stop on open");
        }
        info!(position_id, entry = %entry_premium, "Trailing stop tracking started");
        Ok(())
    }

    /// Update a tracked position. `None` when the position is not tracked.
    pub fn update(
        &self,
        position_id: &str,
        current_premium: Decimal,
    ) -> Option<(Option<Decimal>, TrailingAction)> {
        let mut tracker = self.stops.get_mut(position_id)?;
        let result = tracker.update(current_premium);

        match result.1 {
            TrailingAction::Activate | TrailingAction::Update => {
                info!(
                    position_id,
                    action = ?result.1,
                    stop = ?result.0,
                    peak = %tracker.state().highest_premium,
                    "Trailing stop moved"
                );
            }
            TrailingAction::Trigger => {
                warn!(
                    position_id,
                    premium = %current_premium,
                    stop = ?result.0,
                    "🚨 Trailing stop triggered"
                );
            }
            TrailingAction::Hold => {}
        }

        Some(result)
    }

    pub fn get(&self, position_id: &str) -> Option<TrailingStop> {
        self.stops.get(position_id).map(|t| t.state().clone())
    }

    pub fn reset(&self, position_id: &str) -> bool {
        match self.stops.get_mut(position_id) {
            Some(mut tracker) => {
                tracker.reset();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, position_id: &str) -> Option<TrailingStop> {
        self.stops
            .remove(position_id)
            .map(|(_, tracker)| tracker.state().clone())
    }

    /// Drop trackers whose position fails `keep`. Returns how many were dropped.
    pub fn retain(&self, keep: impl Fn(&str) -> bool) -> usize {
        let before = self.stops.len();
        self.stops.retain(|id, _| keep(id));
        before.saturating_sub(self.stops.len())
    }

    pub fn contains(&self, position_id: &str) -> bool {
        self.stops.contains_key(position_id)
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }
}
