//! Reconnection state machine
//!
//! `Disconnected -> Connecting -> Connected -> Disconnected`. At most one
//! attempt is in flight and at most one retry is scheduled at a time. The
//! delay sequence is an `ExponentialBackoff` without jitter: floor, then
//! multiplied by the growth factor up to the ceiling, back to the floor
//! after every successful open.

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};

use crate::config::ClientSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Backoff parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub floor: Duration,
    pub factor: f64,
    pub ceiling: Duration,
}

impl ReconnectPolicy {
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            floor: Duration::from_millis(settings.reconnect_floor_ms),
            factor: settings.reconnect_factor,
            ceiling: Duration::from_millis(settings.reconnect_ceiling_ms),
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_settings(&ClientSettings::default())
    }
}

pub struct ReconnectManager {
    state: ConnectionState,
    active: bool,
    retry_scheduled: bool,
    attempts: u32,
    backoff: ExponentialBackoff,
}

impl ReconnectManager {
    pub fn new(policy: ReconnectPolicy) -> Self {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(policy.floor)
            .with_randomization_factor(0.0)
            .with_multiplier(policy.factor)
            .with_max_interval(policy.ceiling)
            .with_max_elapsed_time(None)
            .build();

        Self {
            state: ConnectionState::Disconnected,
            active: true,
            retry_scheduled: false,
            attempts: 0,
            backoff,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn retry_scheduled(&self) -> bool {
        self.retry_scheduled
    }

    /// Failed attempts since the last successful open
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Start an attempt. Returns `false` when one is already in flight, the
    /// link is up, or the manager was shut down.
    pub fn begin_connect(&mut self) -> bool {
        if !self.active || self.state != ConnectionState::Disconnected {
            return false;
        }
        self.retry_scheduled = false;
        self.state = ConnectionState::Connecting;
        true
    }

    /// The transport opened
    pub fn on_open(&mut self) {
        self.state = ConnectionState::Connected;
        self.retry_scheduled = false;
        self.attempts = 0;
        self.backoff.reset();
    }

    /// The transport closed or the attempt failed.
    ///
    /// Returns the delay before the next attempt when a retry should be
    /// scheduled, `None` when one already is or the manager is shut down.
    pub fn on_closed(&mut self) -> Option<Duration> {
        self.state = ConnectionState::Disconnected;
        if !self.active || self.retry_scheduled {
            return None;
        }
        self.retry_scheduled = true;
        self.attempts += 1;
        self.backoff.next_backoff()
    }

    /// Stop for good; later closes schedule nothing
    pub fn shutdown(&mut self) {
        self.active = false;
        self.retry_scheduled = false;
        self.state = ConnectionState::Disconnected;
    }
}

impl Default for ReconnectManager {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}
