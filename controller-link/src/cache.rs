//! Local copies of controller-side data, keyed by subsystem.
//!
//! Each subsystem holds the last bytes read from (or written to) the
//! controller and their SHA-256 fingerprint.  The connect handshake compares
//! these fingerprints with the ones the controller reports and resyncs only
//! the subsystems that differ.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sha2::{Digest, Sha256};

use crate::controller_info::{ControllerInfo, Fingerprint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    Program,
    EventHistory,
    Config,
}

impl Subsystem {
    pub const ALL: [Subsystem; 3] = [
        Subsystem::Program,
        Subsystem::EventHistory,
        Subsystem::Config,
    ];

    /// The fingerprint the controller reports for this subsystem.
    pub fn reported(self, info: &ControllerInfo) -> Fingerprint {
        match self {
            Subsystem::Program => info.program_fingerprint,
            Subsystem::EventHistory => info.event_history_fingerprint,
            Subsystem::Config => info.config_fingerprint,
        }
    }
}

impl std::fmt::Display for Subsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Subsystem::Program => "program",
            Subsystem::EventHistory => "event history",
            Subsystem::Config => "config",
        })
    }
}

/// SHA-256 of `bytes`; empty content has the all-zero fingerprint.
pub fn fingerprint(bytes: &[u8]) -> Fingerprint {
    if bytes.is_empty() {
        return [0u8; 32];
    }
    Sha256::digest(bytes).into()
}

#[derive(Clone)]
struct CacheEntry {
    bytes: Vec<u8>,
    fingerprint: Fingerprint,
}

/// Thread-safe subsystem cache.
#[derive(Clone, Default)]
pub struct LocalCache {
    inner: Arc<RwLock<HashMap<Subsystem, CacheEntry>>>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fingerprint of the cached bytes; all zero when nothing is cached.
    pub fn fingerprint(&self, subsystem: Subsystem) -> Fingerprint {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .get(&subsystem)
            .map(|e| e.fingerprint)
            .unwrap_or([0u8; 32])
    }

    pub fn bytes(&self, subsystem: Subsystem) -> Option<Vec<u8>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.get(&subsystem).map(|e| e.bytes.clone())
    }

    pub fn store(&self, subsystem: Subsystem, bytes: Vec<u8>) {
        let entry = CacheEntry {
            fingerprint: fingerprint(&bytes),
            bytes,
        };
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.insert(subsystem, entry);
    }

    /// Record a program that was just written to the controller.
    pub fn write_program(&self, bytes: &[u8]) {
        self.store(Subsystem::Program, bytes.to_vec());
    }

    pub fn wipe(&self, subsystem: Subsystem) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.remove(&subsystem);
    }

    pub fn wipe_all(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.clear();
    }

    /// Subsystems whose cached fingerprint differs from the controller's.
    pub fn stale_subsystems(&self, info: &ControllerInfo) -> Vec<Subsystem> {
        Subsystem::ALL
            .into_iter()
            .filter(|s| self.fingerprint(*s) != s.reported(info))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_cache_is_stale_against_any_content() {
        let cache = LocalCache::new();
        let info = ControllerInfo {
            program_fingerprint: fingerprint(b"program"),
            event_history_fingerprint: [0; 32],
            config_fingerprint: fingerprint(b"{}"),
            ..Default::default()
        };
        assert_eq!(
            cache.stale_subsystems(&info),
            vec![Subsystem::Program, Subsystem::Config]
        );
    }

    #[test]
    fn written_program_is_no_longer_stale() {
        let cache = LocalCache::new();
        cache.write_program(&[17, 1, 0, 254, 255]);
        let info = ControllerInfo {
            program_fingerprint: fingerprint(&[17, 1, 0, 254, 255]),
            ..Default::default()
        };
        assert!(!cache.stale_subsystems(&info).contains(&Subsystem::Program));
    }

    #[test]
    fn wipe_all_forgets_everything() {
        let cache = LocalCache::new();
        cache.store(Subsystem::Config, b"{}".to_vec());
        cache.wipe_all();
        assert_eq!(cache.bytes(Subsystem::Config), None);
        assert_eq!(cache.fingerprint(Subsystem::Config), [0; 32]);
    }
}
