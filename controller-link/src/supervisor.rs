//! Reconnection supervisor.
//!
//! A fixed-period task, independent of any single connect attempt.  On
//! every tick it sweeps expired requests and asks the link to reconnect; the
//! link itself decides whether the conditions for that hold (not updating,
//! transport assigned, disconnected, reconnection enabled).
//!
//! The task only holds a weak reference and ends once the controller is gone.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::connection::Shared;

pub(crate) fn spawn(shared: Weak<Shared>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let shared = match shared.upgrade() {
                Some(shared) => shared,
                None => break,
            };
            shared.supervise().await;
        }
        log::debug!("[link] supervisor stopped");
    })
}
