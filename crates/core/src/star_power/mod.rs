//! Star-power meter.
//!
//! `Idle → Active` on a successful activation (meter at or above the
//! threshold), `Active → Idle(cooldown)` when the timer runs out or the meter
//! empties, and the cooldown clears on the following update.
//!
//! An active meter drains at a fixed rate: a full meter lasts exactly the
//! configured duration. Hits keep charging it while active, so a long streak
//! can hold star power until the timer ends it.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::StarPowerConfig;

pub const METER_MAX: f64 = 100.0;

/// Why an activation request was refused.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActivationRejected {
    #[error("star power is already active")]
    AlreadyActive,
    #[error("star power is cooling down")]
    CoolingDown,
    #[error("star power meter at {meter:.1}, needs {required:.1}")]
    InsufficientCharge { meter: f64, required: f64 },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StarPowerState {
    meter: f64,
    is_active: bool,
    remaining_ms: u64,
    cooldown: bool,
    drain_per_ms: f64,
    started: bool,
}

impl StarPowerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Meter level in [0, 100].
    pub fn meter(&self) -> f64 {
        self.meter
    }

    /// True between a successful activation and the tick that ends it.
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Time left on the activation timer, zero when idle.
    pub fn remaining_ms(&self) -> u64 {
        self.remaining_ms
    }

    pub fn cooldown(&self) -> bool {
        self.cooldown
    }

    pub fn can_activate(&self, config: &StarPowerConfig) -> bool {
        self.check_activation(config).is_ok()
    }

    /// Adds `amount` to the meter, saturating at 100.
    pub fn charge(&mut self, amount: f64) {
        if amount.is_finite() && amount > 0.0 {
            self.meter = (self.meter + amount).min(METER_MAX);
        }
    }

    /// Starts star power if the meter allows it.
    ///
    /// The timer starts on the first [`update`](Self::update) after this call,
    /// so the tick during which the button was pressed is not drained.
    pub fn activate(
        &mut self,
        config: &StarPowerConfig,
    ) -> std::result::Result<(), ActivationRejected> {
        self.check_activation(config)?;
        self.is_active = true;
        self.started = false;
        self.remaining_ms = config.active_duration_ms;
        self.drain_per_ms = METER_MAX / config.active_duration_ms.max(1) as f64;
        info!(meter = self.meter, duration_ms = self.remaining_ms, "star power activated");
        Ok(())
    }

    /// Advances the state machine by one tick covering `elapsed_ms`.
    pub fn update(&mut self, elapsed_ms: u64) {
        if self.cooldown {
            self.cooldown = false;
            return;
        }
        if !self.is_active {
            return;
        }
        if !self.started {
            self.started = true;
            return;
        }

        let drained = self.drain_per_ms * elapsed_ms as f64;
        self.meter = (self.meter - drained).clamp(0.0, METER_MAX);
        self.remaining_ms = self.remaining_ms.saturating_sub(elapsed_ms);

        if self.remaining_ms == 0 {
            self.deactivate("timer expired");
        } else if self.meter <= f64::EPSILON {
            self.deactivate("meter empty");
        }
    }

    fn deactivate(&mut self, reason: &'static str) {
        self.is_active = false;
        self.started = false;
        self.remaining_ms = 0;
        self.drain_per_ms = 0.0;
        self.meter = 0.0;
        self.cooldown = true;
        info!(reason, "star power ended");
    }

    fn check_activation(
        &self,
        config: &StarPowerConfig,
    ) -> std::result::Result<(), ActivationRejected> {
        if self.is_active {
            return Err(ActivationRejected::AlreadyActive);
        }
        if self.cooldown {
            return Err(ActivationRejected::CoolingDown);
        }
        if self.meter < config.activation_threshold {
            return Err(ActivationRejected::InsufficientCharge {
                meter: self.meter,
                required: config.activation_threshold,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StarPowerConfig {
        StarPowerConfig {
            activation_threshold: 50.0,
            active_duration_ms: 1_000,
            ..Default::default()
        }
    }

    fn charged(amount: f64) -> StarPowerState {
        let mut state = StarPowerState::new();
        state.charge(amount);
        state
    }

    fn assert_invariants(state: &StarPowerState) {
        assert!((0.0..=METER_MAX).contains(&state.meter()), "meter {}", state.meter());
        assert!(!(state.is_active() && state.cooldown()));
    }

    #[test]
    fn charge_saturates_at_full() {
        let mut state = charged(80.0);
        state.charge(45.0);
        assert_eq!(state.meter(), METER_MAX);
        state.charge(-10.0);
        state.charge(f64::NAN);
        assert_eq!(state.meter(), METER_MAX);
    }

    #[test]
    fn refuses_activation_below_threshold() {
        let mut state = charged(20.0);
        let err = state.activate(&config()).unwrap_err();
        assert_eq!(
            err,
            ActivationRejected::InsufficientCharge {
                meter: 20.0,
                required: 50.0
            }
        );
        assert!(!state.is_active());
    }

    #[test]
    fn drains_linearly_until_the_meter_empties() {
        let config = config();
        let mut state = charged(60.0);
        state.activate(&config).unwrap();
        assert_eq!(state.activate(&config), Err(ActivationRejected::AlreadyActive));

        // The tick the button was pressed on is free.
        state.update(16);
        assert_eq!(state.meter(), 60.0);
        assert_eq!(state.remaining_ms(), 1_000);

        state.update(250);
        assert!((state.meter() - 35.0).abs() < 1e-9);
        assert_eq!(state.remaining_ms(), 750);

        state.update(250);
        assert!((state.meter() - 10.0).abs() < 1e-9);
        assert!(state.is_active());

        state.update(120);
        assert!(!state.is_active());
        assert!(state.cooldown());
        assert_eq!(state.meter(), 0.0);

        state.charge(70.0);
        assert_eq!(state.activate(&config), Err(ActivationRejected::CoolingDown));

        state.update(16);
        assert!(!state.cooldown());
        state.activate(&config).unwrap();
    }

    #[test]
    fn charging_while_active_runs_until_the_timer() {
        let config = config();
        let mut state = charged(100.0);
        state.activate(&config).unwrap();
        state.update(0);

        state.update(400);
        assert!((state.meter() - 60.0).abs() < 1e-9);
        state.charge(50.0);
        assert_eq!(state.meter(), METER_MAX);

        state.update(400);
        assert!(state.is_active());
        assert_eq!(state.remaining_ms(), 200);

        state.update(200);
        assert!(!state.is_active());
        assert!(state.cooldown());
        assert_eq!(state.meter(), 0.0);
        assert_eq!(state.remaining_ms(), 0);
    }

    #[test]
    fn holds_invariants_over_mixed_sequences() {
        let config = config();
        let mut state = StarPowerState::new();
        for step in 0..500u64 {
            state.charge((step % 7) as f64 * 3.5);
            if step % 11 == 0 {
                let _ = state.activate(&config);
            }
            state.update(step % 40);
            assert_invariants(&state);
        }
    }

    #[test]
    fn idle_updates_do_nothing() {
        let mut state = charged(30.0);
        state.update(1_000);
        assert_eq!(state.meter(), 30.0);
        assert!(!state.cooldown());
    }
}
