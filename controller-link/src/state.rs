//! Connection state and the events observers see.
//!
//! ```text
//!  Disconnected ──connect──▶ Connecting ──linked + handshake──▶ Connected
//!       ▲                        │                                  │
//!       │        failure/cancel  │                 disconnect/drop  │
//!       └────────────────────────┴──────── Disconnecting ◀──────────┘
//! ```
//!
//! [`StateCell`] is the single authoritative value.  Every write goes through
//! [`StateCell::set`], which emits one [`LinkEvent::State`] per real
//! transition and nothing when the state is re-entered from itself.

use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::cache::Subsystem;
use crate::ota::OtaState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// Everything a [`crate::connection::Controller`] reports to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    State(ConnectionState),
    Ota(OtaState),
    /// Percent with two decimals.
    OtaProgress(f64),
    Resynced(Subsystem),
    ResyncFailed(Subsystem),
}

pub struct StateCell {
    current: Mutex<ConnectionState>,
    events: broadcast::Sender<LinkEvent>,
}

impl StateCell {
    pub fn new(events: broadcast::Sender<LinkEvent>) -> Self {
        Self {
            current: Mutex::new(ConnectionState::Disconnected),
            events,
        }
    }

    pub fn get(&self) -> ConnectionState {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move to `next`; returns `false` (and emits nothing) when already there.
    pub fn set(&self, next: ConnectionState) -> bool {
        {
            let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
            if *current == next {
                return false;
            }
            log::info!("[link] state {} -> {}", *current, next);
            *current = next;
        }
        // No receivers is fine.
        let _ = self.events.send(LinkEvent::State(next));
        true
    }

    /// Move to `next` only if the current state is `from`.
    pub fn transition(&self, from: ConnectionState, next: ConnectionState) -> bool {
        {
            let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
            if *current != from || from == next {
                return false;
            }
            log::info!("[link] state {} -> {}", *current, next);
            *current = next;
        }
        let _ = self.events.send(LinkEvent::State(next));
        true
    }

    pub fn emit(&self, event: LinkEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reentering_a_state_emits_nothing() {
        let (tx, mut rx) = broadcast::channel(8);
        let cell = StateCell::new(tx);
        assert!(!cell.set(ConnectionState::Disconnected));
        assert!(cell.set(ConnectionState::Connecting));
        assert!(!cell.set(ConnectionState::Connecting));
        assert!(cell.set(ConnectionState::Connected));

        assert_eq!(
            rx.try_recv().unwrap(),
            LinkEvent::State(ConnectionState::Connecting)
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            LinkEvent::State(ConnectionState::Connected)
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn guarded_transition_checks_the_source_state() {
        let (tx, _rx) = broadcast::channel(8);
        let cell = StateCell::new(tx);
        assert!(!cell.transition(ConnectionState::Connected, ConnectionState::Disconnecting));
        assert_eq!(cell.get(), ConnectionState::Disconnected);
        cell.set(ConnectionState::Connected);
        assert!(cell.transition(ConnectionState::Connected, ConnectionState::Disconnecting));
        assert_eq!(cell.get(), ConnectionState::Disconnecting);
    }
}
