//! Transport contract.
//!
//! [`Transport`] is the seam between the protocol layers and a physical (or
//! simulated) link.  It moves opaque frames; every byte of framing lives in
//! [`crate::frame`].  Implementations report link changes asynchronously
//! through [`Transport::subscribe`].

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::criteria::{ControllerAdvert, Criteria};
use crate::error::LinkError;

/// OTA chunk size used when a transport does not say otherwise.
pub const DEFAULT_OTA_CHUNK_SIZE: usize = 4992;

/// Link changes reported by a transport at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs (`"simulated"`, `"serial"`, ...).
    fn kind(&self) -> &'static str;

    /// Collect adverts of controllers matching `criteria` for `duration`.
    async fn scan(
        &self,
        criteria: &Criteria,
        duration: Duration,
    ) -> Result<Vec<ControllerAdvert>, LinkError>;

    /// Pick the controller the next `connect` talks to.
    async fn select(
        &self,
        criteria: &Criteria,
        timeout: Duration,
    ) -> Result<ControllerAdvert, LinkError>;

    async fn connect(&self, timeout: Duration) -> Result<(), LinkError>;

    /// Always resolves, also when already disconnected.
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Guaranteed-delivery send; resolves once the link accepted the frame.
    async fn deliver(&self, frame: &[u8]) -> Result<(), LinkError>;

    /// Best-effort send.
    async fn transmit(&self, frame: &[u8]) -> Result<(), LinkError>;

    /// Send `frame` and wait for the controller's answer.  `Ok(None)` means
    /// the link completed the exchange without any response bytes.
    async fn request(&self, frame: &[u8], timeout: Duration) -> Result<Option<Vec<u8>>, LinkError>;

    /// Controller clock in milliseconds.
    async fn read_clock(&self) -> Result<u64, LinkError>;

    async fn write_clock(&self, clock_ms: u64) -> Result<(), LinkError>;

    fn ota_chunk_size(&self) -> usize {
        DEFAULT_OTA_CHUNK_SIZE
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}
