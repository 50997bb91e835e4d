//! Firmware update session.
//!
//! ```text
//!  Idle ─▶ Resetting ─▶ Beginning ─settle─▶ Writing* ─settle─▶ Ending ─settle─▶ Rebooting
//!                                                                                  │
//!            any step fails / session budget exceeded ──▶ Failed      Succeeded ◀──┘
//! ```
//!
//! | step   | frame                        |
//! |--------|------------------------------|
//! | reset  | `[253]`                      |
//! | begin  | `[255][size u32]`            |
//! | write  | `[0][offset u32][chunk ...]` |
//! | end    | `[254][written u32]`         |
//! | reboot | `[5]`                        |
//!
//! Every step goes through the guaranteed-delivery path and is awaited
//! before the next one starts.  The updating flag and the wake lock are held
//! by an [`UpdateGuard`] and released on every exit path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::LinkError;
use crate::flags;
use crate::protocol::CommandProtocol;
use crate::state::{LinkEvent, StateCell};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaState {
    Idle,
    Resetting,
    Beginning,
    Writing,
    Ending,
    Rebooting,
    Succeeded,
    Failed,
}

impl OtaState {
    pub fn is_terminal(self) -> bool {
        matches!(self, OtaState::Succeeded | OtaState::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct OtaOptions {
    /// Pause after begin, after the last chunk and after end.
    pub settle_delay: Duration,
    /// Limit for each delivered frame.
    pub step_timeout: Duration,
    /// Limit for the whole session.
    pub session_budget: Duration,
    pub max_firmware_size: usize,
    /// `None` uses the transport's chunk size.
    pub chunk_size: Option<usize>,
}

impl Default for OtaOptions {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(100),
            step_timeout: Duration::from_secs(10),
            session_budget: Duration::from_secs(20 * 60),
            max_firmware_size: 16 * 1024 * 1024,
            chunk_size: None,
        }
    }
}

/// Keeps the host awake while an update runs.
pub trait WakeLock: Send + Sync {
    fn acquire(&self) -> Result<(), LinkError>;
    fn release(&self);
}

/// For hosts without a wake lock.
pub struct NoWakeLock;

impl WakeLock for NoWakeLock {
    fn acquire(&self) -> Result<(), LinkError> {
        Ok(())
    }

    fn release(&self) {}
}

/// Holds the updating flag and the wake lock for one session.
pub struct UpdateGuard<'a> {
    updating: &'a AtomicBool,
    wake_lock: Arc<dyn WakeLock>,
    holds_wake_lock: bool,
}

impl<'a> UpdateGuard<'a> {
    /// Fails with [`LinkError::Busy`] when another session holds the flag.
    /// A wake lock that cannot be taken is logged and the update goes on.
    pub fn acquire(
        updating: &'a AtomicBool,
        wake_lock: Arc<dyn WakeLock>,
    ) -> Result<Self, LinkError> {
        if updating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(LinkError::Busy);
        }
        let holds_wake_lock = match wake_lock.acquire() {
            Ok(()) => true,
            Err(e) => {
                log::warn!("[ota] wake lock unavailable: {}", e);
                false
            }
        };
        Ok(Self {
            updating,
            wake_lock,
            holds_wake_lock,
        })
    }
}

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        if self.holds_wake_lock {
            self.wake_lock.release();
        }
        self.updating.store(false, Ordering::Release);
    }
}

/// `floor(written * 10000 / total) / 100`
pub fn progress_percent(written: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    let basis_points = (written as u128 * 10_000) / total as u128;
    basis_points as f64 / 100.0
}

pub struct OtaSession<'a> {
    protocol: &'a CommandProtocol,
    transport: &'a dyn Transport,
    events: &'a StateCell,
    options: &'a OtaOptions,
    state: OtaState,
    written: usize,
}

impl<'a> OtaSession<'a> {
    pub fn new(
        protocol: &'a CommandProtocol,
        transport: &'a dyn Transport,
        events: &'a StateCell,
        options: &'a OtaOptions,
    ) -> Self {
        Self {
            protocol,
            transport,
            events,
            options,
            state: OtaState::Idle,
            written: 0,
        }
    }

    pub fn state(&self) -> OtaState {
        self.state
    }

    pub fn written(&self) -> usize {
        self.written
    }

    fn enter(&mut self, state: OtaState) {
        log::info!("[ota] {:?} -> {:?}", self.state, state);
        self.state = state;
        self.events.emit(LinkEvent::Ota(state));
    }

    async fn step(&self, name: &'static str, flag: u8, payload: &[u8]) -> Result<(), LinkError> {
        let delivery = self.protocol.deliver(self.transport, flag, payload);
        match tokio::time::timeout(self.options.step_timeout, delivery).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(LinkError::Ota {
                step: name,
                reason: e.to_string(),
            }),
            Err(_) => Err(LinkError::Ota {
                step: name,
                reason: format!("no delivery within {:?}", self.options.step_timeout),
            }),
        }
    }

    /// Run the whole sequence and finish in `Succeeded` or `Failed`.
    pub async fn run(&mut self, firmware: &[u8], chunk_size: usize) -> Result<(), LinkError> {
        let budget = self.options.session_budget;
        let result = match tokio::time::timeout(budget, self.sequence(firmware, chunk_size)).await
        {
            Ok(result) => result,
            Err(_) => Err(LinkError::Ota {
                step: "session",
                reason: format!("exceeded budget of {:?}", budget),
            }),
        };
        match &result {
            Ok(()) => self.enter(OtaState::Succeeded),
            Err(e) => {
                log::warn!("[ota] failed after {} bytes: {}", self.written, e);
                self.enter(OtaState::Failed);
            }
        }
        result
    }

    async fn sequence(&mut self, firmware: &[u8], chunk_size: usize) -> Result<(), LinkError> {
        let total = u32::try_from(firmware.len())
            .map_err(|_| LinkError::FirmwareRejected("image larger than 4 GiB".into()))?;
        let chunk_size = chunk_size.max(1);
        let settle = self.options.settle_delay;

        self.enter(OtaState::Resetting);
        self.step("reset", flags::OTA_RESET, &[]).await?;

        self.enter(OtaState::Beginning);
        self.step("begin", flags::OTA_BEGIN, &total.to_le_bytes())
            .await?;
        tokio::time::sleep(settle).await;

        self.enter(OtaState::Writing);
        for chunk in firmware.chunks(chunk_size) {
            let mut payload = Vec::with_capacity(4 + chunk.len());
            payload.extend_from_slice(&(self.written as u32).to_le_bytes());
            payload.extend_from_slice(chunk);
            self.step("write", flags::OTA_WRITE, &payload).await?;

            self.written += chunk.len();
            let percent = progress_percent(self.written, firmware.len());
            log::debug!("[ota] {}/{} bytes ({:.2}%)", self.written, total, percent);
            self.events.emit(LinkEvent::OtaProgress(percent));
        }
        tokio::time::sleep(settle).await;

        self.enter(OtaState::Ending);
        self.step("end", flags::OTA_END, &(self.written as u32).to_le_bytes())
            .await?;
        tokio::time::sleep(settle).await;

        self.enter(OtaState::Rebooting);
        self.step("reboot", flags::REBOOT, &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn progress_truncates_to_two_decimals() {
        assert_eq!(progress_percent(0, 3), 0.0);
        assert_eq!(progress_percent(1, 3), 33.33);
        assert_eq!(progress_percent(2, 3), 66.66);
        assert_eq!(progress_percent(3, 3), 100.0);
    }

    #[derive(Default)]
    struct CountingLock {
        held: AtomicUsize,
    }

    impl WakeLock for CountingLock {
        fn acquire(&self) -> Result<(), LinkError> {
            self.held.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn release(&self) {
            self.held.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn guard_is_exclusive_and_releases_on_drop() {
        let updating = AtomicBool::new(false);
        let lock = Arc::new(CountingLock::default());

        let guard = UpdateGuard::acquire(&updating, lock.clone()).unwrap();
        assert!(updating.load(Ordering::SeqCst));
        assert_eq!(lock.held.load(Ordering::SeqCst), 1);
        assert!(matches!(
            UpdateGuard::acquire(&updating, lock.clone()),
            Err(LinkError::Busy)
        ));

        drop(guard);
        assert!(!updating.load(Ordering::SeqCst));
        assert_eq!(lock.held.load(Ordering::SeqCst), 0);
    }
}
