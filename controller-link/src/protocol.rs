//! Request/response correlation over a [`Transport`].
//!
//! # Pending table
//!
//! ```text
//!  send_and_await ──insert(id)──▶ pending { id → expected flag, deadline, cancel }
//!        │                                 ▲             │
//!        │ transport.request(frame)        │ remove      │ fail_all(reason)
//!        ▼                                 │             ▼
//!   response ──validate(flag, id, code)────┘     every waiter rejects
//! ```
//!
//! Every awaiting call owns exactly one correlation id.  Responses are matched
//! by id only, so independent calls may complete in any order.  An entry
//! leaves the table when its call completes, times out, is dropped by the
//! caller, or the link goes down; a response arriving after that is ignored.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::command::{Command, CommandKind, Reply};
use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::flags;
use crate::frame;
use crate::transport::Transport;

struct PendingRequest {
    flag: u8,
    expected_flag: u8,
    started: Instant,
    deadline: Instant,
    cancel: oneshot::Sender<LinkError>,
}

pub struct CommandProtocol {
    next_id: AtomicU32,
    pending: Mutex<HashMap<u32, PendingRequest>>,
    default_timeout: Duration,
    erase_threshold: usize,
}

/// Removes a pending entry when the awaiting future ends, however it ends.
struct PendingGuard<'a> {
    protocol: &'a CommandProtocol,
    id: u32,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.protocol.take(self.id);
    }
}

impl CommandProtocol {
    pub fn new(config: &LinkConfig) -> Self {
        Self::with_seed(config, rand::random())
    }

    /// Start the correlation counter at `seed`.
    pub fn with_seed(config: &LinkConfig, seed: u32) -> Self {
        Self {
            next_id: AtomicU32::new(seed),
            pending: Mutex::new(HashMap::new()),
            default_timeout: config.request_timeout,
            erase_threshold: config.program_erase_threshold,
        }
    }

    /// Next id from the wrapping counter; 0 is never handed out.
    pub fn next_correlation_id(&self) -> u32 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u32, PendingRequest>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take(&self, id: u32) -> Option<PendingRequest> {
        self.lock().remove(&id)
    }

    /// Reject every pending request with `reason` and empty the table.
    pub fn fail_all(&self, reason: LinkError) -> usize {
        let drained: Vec<(u32, PendingRequest)> = self.lock().drain().collect();
        let count = drained.len();
        for (id, request) in drained {
            log::debug!(
                "[link] cancel id={:#010x} awaiting flag={}: {}",
                id,
                request.expected_flag,
                reason
            );
            let _ = request.cancel.send(reason.clone());
        }
        count
    }

    /// Reject requests whose deadline has passed.  Their own timeout normally
    /// gets there first; this catches waiters that were never polled again.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let expired: Vec<(u32, PendingRequest)> = {
            let mut pending = self.lock();
            let ids: Vec<u32> = pending
                .iter()
                .filter(|(_, r)| r.deadline <= now)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|r| (id, r)))
                .collect()
        };
        let count = expired.len();
        for (id, request) in expired {
            let after = now.saturating_duration_since(request.started);
            log::debug!("[link] ✗ flag={} id={:#010x} expired", request.flag, id);
            let _ = request.cancel.send(LinkError::Timeout {
                flag: request.flag,
                after,
            });
        }
        count
    }

    // -----------------------------------------------------------------------
    // Exchanges
    // -----------------------------------------------------------------------

    /// Send `[flag][id][payload]` and wait for the matching response.
    pub async fn send_and_await(
        &self,
        transport: &dyn Transport,
        flag: u8,
        payload: &[u8],
        response_flag: u8,
        timeout: Duration,
    ) -> Result<Vec<u8>, LinkError> {
        let id = self.next_correlation_id();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let started = Instant::now();
        self.lock().insert(
            id,
            PendingRequest {
                flag,
                expected_flag: response_flag,
                started,
                deadline: started + timeout,
                cancel: cancel_tx,
            },
        );
        let _guard = PendingGuard { protocol: self, id };

        let request = frame::encode_request(flag, id, payload);
        log::debug!(
            "[link] → flag={} id={:#010x} len={}",
            flag,
            id,
            payload.len()
        );

        let exchange = async {
            tokio::select! {
                biased;
                reason = cancel_rx => Err(reason.unwrap_or(LinkError::Disconnected)),
                response = transport.request(&request, timeout) => response,
            }
        };

        let response = match tokio::time::timeout(timeout, exchange).await {
            Ok(response) => response?,
            Err(_) => {
                log::debug!("[link] ✗ flag={} id={:#010x} timed out", flag, id);
                return Err(LinkError::Timeout {
                    flag,
                    after: timeout,
                });
            }
        };

        // A drop that raced the response already emptied the table.
        if self.take(id).is_none() {
            return Err(LinkError::Disconnected);
        }

        let bytes = response.ok_or(LinkError::NoResponseReceived)?;
        let body = frame::validate_response(&bytes, response_flag, id)?;
        log::debug!(
            "[link] ← flag={} id={:#010x} len={}",
            response_flag,
            id,
            body.len()
        );
        Ok(body)
    }

    /// Guaranteed-delivery send without correlation id.  Resolves when the
    /// transport accepted the frame, not when the controller processed it.
    pub async fn deliver(
        &self,
        transport: &dyn Transport,
        flag: u8,
        payload: &[u8],
    ) -> Result<(), LinkError> {
        log::debug!("[link] ⇒ flag={} len={}", flag, payload.len());
        transport
            .deliver(&frame::encode_delivery(flag, payload))
            .await
    }

    /// Best-effort send without correlation id.
    pub async fn send(
        &self,
        transport: &dyn Transport,
        flag: u8,
        payload: &[u8],
    ) -> Result<(), LinkError> {
        log::debug!("[link] ⇢ flag={} len={}", flag, payload.len());
        transport
            .transmit(&frame::encode_delivery(flag, payload))
            .await
    }

    /// Hand raw bytecode to the controller's interpreter.
    pub async fn execute(&self, transport: &dyn Transport, bytes: &[u8]) -> Result<(), LinkError> {
        self.deliver(transport, flags::EXECUTE, bytes).await
    }

    /// Run any command from the schema table.
    pub async fn call(
        &self,
        transport: &dyn Transport,
        command: &Command,
    ) -> Result<Reply, LinkError> {
        let kind = command.kind();
        if let Command::WriteProgram { bytes, .. } = command {
            if bytes.len() > self.erase_threshold {
                log::debug!(
                    "[link] program of {} bytes exceeds {}, erasing first",
                    bytes.len(),
                    self.erase_threshold
                );
                self.await_kind(transport, CommandKind::EraseProgram, &[])
                    .await?;
            }
        }

        let payload = command.encode_payload()?;
        if !kind.expects_reply() {
            self.deliver(transport, kind.request_flag(), &payload).await?;
            return Ok(Reply::Ack);
        }
        let body = self.await_kind(transport, kind, &payload).await?;
        Reply::decode(kind, &body)
    }

    async fn await_kind(
        &self,
        transport: &dyn Transport,
        kind: CommandKind,
        payload: &[u8],
    ) -> Result<Vec<u8>, LinkError> {
        let response_flag = kind
            .response_flag()
            .ok_or_else(|| LinkError::InvalidArgument(format!("{} has no reply", kind.name())))?;
        let timeout = kind.timeout().unwrap_or(self.default_timeout);
        self.send_and_await(transport, kind.request_flag(), payload, response_flag, timeout)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_ids_wrap_past_zero() {
        let protocol = CommandProtocol::with_seed(&LinkConfig::default(), u32::MAX - 1);
        assert_eq!(protocol.next_correlation_id(), u32::MAX - 1);
        assert_eq!(protocol.next_correlation_id(), u32::MAX);
        assert_eq!(protocol.next_correlation_id(), 1);
    }

    /// Never answers, so only the sweep or the caller's timeout ends a request.
    struct SilentTransport {
        events: tokio::sync::broadcast::Sender<crate::transport::TransportEvent>,
    }

    #[async_trait::async_trait]
    impl Transport for SilentTransport {
        fn kind(&self) -> &'static str {
            "silent"
        }

        async fn scan(
            &self,
            _: &crate::criteria::Criteria,
            _: Duration,
        ) -> Result<Vec<crate::criteria::ControllerAdvert>, LinkError> {
            Ok(Vec::new())
        }

        async fn select(
            &self,
            _: &crate::criteria::Criteria,
            _: Duration,
        ) -> Result<crate::criteria::ControllerAdvert, LinkError> {
            Err(LinkError::SelectionFailed)
        }

        async fn connect(&self, _: Duration) -> Result<(), LinkError> {
            Ok(())
        }

        async fn disconnect(&self) {}

        fn is_connected(&self) -> bool {
            true
        }

        async fn deliver(&self, _: &[u8]) -> Result<(), LinkError> {
            Ok(())
        }

        async fn transmit(&self, _: &[u8]) -> Result<(), LinkError> {
            Ok(())
        }

        async fn request(&self, _: &[u8], _: Duration) -> Result<Option<Vec<u8>>, LinkError> {
            std::future::pending().await
        }

        async fn read_clock(&self) -> Result<u64, LinkError> {
            Ok(0)
        }

        async fn write_clock(&self, _: u64) -> Result<(), LinkError> {
            Ok(())
        }

        fn subscribe(&self) -> tokio::sync::broadcast::Receiver<crate::transport::TransportEvent> {
            self.events.subscribe()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn swept_requests_time_out_like_awaited_ones() {
        let protocol = std::sync::Arc::new(CommandProtocol::new(&LinkConfig::default()));
        let (events, _) = tokio::sync::broadcast::channel(1);
        let transport = std::sync::Arc::new(SilentTransport { events });

        let waiter = {
            let protocol = protocol.clone();
            let transport = transport.clone();
            tokio::spawn(async move {
                protocol
                    .send_and_await(
                        transport.as_ref(),
                        flags::FW_VERSION_REQUEST,
                        &[],
                        flags::FW_VERSION_RESPONSE,
                        Duration::from_secs(60),
                    )
                    .await
            })
        };
        while protocol.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        let started = Instant::now();
        assert_eq!(protocol.sweep_expired(started), 0);
        let later = started + Duration::from_secs(90);
        assert_eq!(protocol.sweep_expired(later), 1);

        assert_eq!(
            waiter.await.unwrap(),
            Err(LinkError::Timeout {
                flag: flags::FW_VERSION_REQUEST,
                after: Duration::from_secs(90),
            })
        );
        assert_eq!(protocol.pending_count(), 0);
    }

    #[test]
    fn fail_all_on_empty_table_is_harmless() {
        let protocol = CommandProtocol::new(&LinkConfig::default());
        assert_eq!(protocol.fail_all(LinkError::Disconnected), 0);
        assert_eq!(protocol.pending_count(), 0);
    }
}
