//! Minimum interval between guarded actions.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct CooldownEnforcer {
    last_action: Option<DateTime<Utc>>,
    cooldown: Duration,
}

impl CooldownEnforcer {
    /// With `enforce_from_now` the first action must wait a full cooldown
    /// from `now`; otherwise the first action is always allowed.
    pub fn new(cooldown: Duration, enforce_from_now: bool, now: DateTime<Utc>) -> Self {
        Self {
            last_action: enforce_from_now.then_some(now),
            cooldown,
        }
    }

    pub fn last_action_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_action
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Fail with `CooldownNotElapsed` if the cooldown is still running.
    pub fn check(&self, now: DateTime<Utc>) -> Result<()> {
        let Some(last_action) = self.last_action else {
            return Ok(());
        };
        let ready_at = last_action
            .checked_add_signed(self.cooldown)
            .ok_or(Error::ArithmeticOverflow)?;
        if now < ready_at {
            warn!(
                %last_action,
                cooldown_secs = self.cooldown.num_seconds(),
                %now,
                "Cooldown not elapsed"
            );
            return Err(Error::CooldownNotElapsed {
                last_action,
                cooldown: self.cooldown,
                now,
            });
        }
        Ok(())
    }

    pub fn record_action(&mut self, now: DateTime<Utc>) {
        self.last_action = Some(now);
    }

    /// Check, then record `now` as the latest action.
    pub fn enforce_cooldown(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.check(now)?;
        self.record_action(now);
        Ok(())
    }

    pub fn update_cooldown(&mut self, cooldown: Duration) {
        debug!(
            old_secs = self.cooldown.num_seconds(),
            new_secs = cooldown.num_seconds(),
            "Cooldown updated"
        );
        self.cooldown = cooldown;
    }
}
