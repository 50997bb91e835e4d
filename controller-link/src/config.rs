//! Link configuration and the context object handed to a controller.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::ControllerClock;
use crate::criteria::Criteria;
use crate::ota::{NoWakeLock, WakeLock};

/// Timeouts and thresholds for one controller link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Timeout for commands without their own.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub scan_duration: Duration,
    /// Period of the reconnection supervisor.
    pub supervisor_period: Duration,
    /// Delay before the single reconnect attempt after a drop.
    pub drop_backoff: Duration,
    /// Programs longer than this are preceded by an erase.
    pub program_erase_threshold: usize,
    /// Capacity of the event bus.
    pub event_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            scan_duration: Duration::from_secs(3),
            supervisor_period: Duration::from_secs(10),
            drop_backoff: Duration::from_secs(2),
            program_erase_threshold: 8192,
            event_capacity: 64,
        }
    }
}

/// How to pick and connect to a controller.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub criteria: Criteria,
    /// Scan and take the strongest match instead of asking the transport
    /// to select directly.
    pub automatic: bool,
    /// `None` uses [`LinkConfig::scan_duration`].
    pub scan_duration: Option<Duration>,
    /// `None` uses [`LinkConfig::connect_timeout`].
    pub connect_timeout: Option<Duration>,
    /// Let the supervisor reconnect after an unexpected drop.
    pub autonomous_reconnection: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            criteria: Criteria::any(),
            automatic: true,
            scan_duration: None,
            connect_timeout: None,
            autonomous_reconnection: true,
        }
    }
}

/// Collaborators shared by everything a controller does.
#[derive(Clone)]
pub struct LinkContext {
    pub config: LinkConfig,
    pub clock: Arc<ControllerClock>,
    pub wake_lock: Arc<dyn WakeLock>,
}

impl LinkContext {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            clock: Arc::new(ControllerClock::new()),
            wake_lock: Arc::new(NoWakeLock),
        }
    }

    pub fn with_wake_lock(mut self, wake_lock: Arc<dyn WakeLock>) -> Self {
        self.wake_lock = wake_lock;
        self
    }
}

impl Default for LinkContext {
    fn default() -> Self {
        Self::new(LinkConfig::default())
    }
}
