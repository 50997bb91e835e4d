//! The controller client: selection, connect, handshake, drop handling.
//!
//! # Architecture
//!
//! ```text
//!  Controller ──Arc──▶ Shared
//!                        ├── transport slot      (Arc<dyn Transport>)
//!                        ├── CommandProtocol     (pending table, ids)
//!                        ├── StateCell           (state + event bus)
//!                        ├── LocalCache / Timeline
//!                        └── updating / reconnection flags
//!
//!  listener task   ── Weak<Shared> ── transport events ─▶ on_drop()
//!  supervisor task ── Weak<Shared> ── every period     ─▶ try_reconnect()
//! ```
//!
//! # Connect sequence
//!
//! Each step settles before the next starts:
//!
//! 1. select: scan and take the strongest match, or let the transport pick
//! 2. erase the local timeline
//! 3. transport connect
//! 4. handshake: compare fingerprints, resync stale subsystems in the
//!    background (legacy firmware: wipe all, resync all in order)
//! 5. verify the transport still reports connected
//!
//! The whole sequence races [`Controller::cancel`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use tngl_compiler::Program;

use crate::cache::{LocalCache, Subsystem};
use crate::clock::Timeline;
use crate::command::{Command, Reply, TimelineState};
use crate::config::{ConnectOptions, LinkContext};
use crate::controller_info::ControllerInfo;
use crate::criteria::{self, ControllerAdvert};
use crate::error::LinkError;
use crate::ota::{OtaOptions, OtaSession, UpdateGuard};
use crate::protocol::CommandProtocol;
use crate::state::{ConnectionState, LinkEvent, StateCell};
use crate::supervisor;
use crate::transport::{Transport, TransportEvent};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub(crate) struct Shared {
    context: LinkContext,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    protocol: CommandProtocol,
    state: StateCell,
    cache: LocalCache,
    timeline: Timeline,
    updating: AtomicBool,
    reconnection: AtomicBool,
    reconnect_scheduled: AtomicBool,
    last_options: Mutex<Option<ConnectOptions>>,
    active: Mutex<Option<ControllerAdvert>>,
    cancel: watch::Sender<u64>,
    connect_lock: tokio::sync::Mutex<()>,
    listener: Mutex<Option<JoinHandle<()>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// All conditions for an unattended reconnect.
    fn should_reconnect(&self) -> bool {
        !self.updating.load(Ordering::Acquire)
            && self.transport().is_some()
            && self.state.get() == ConnectionState::Disconnected
            && self.reconnection.load(Ordering::Acquire)
    }

    pub(crate) async fn supervise(self: &Arc<Self>) {
        let expired = self.protocol.sweep_expired(Instant::now());
        if expired > 0 {
            log::debug!("[link] swept {} expired requests", expired);
        }
        self.try_reconnect("supervisor").await;
    }

    async fn try_reconnect(self: &Arc<Self>, reason: &str) {
        if !self.should_reconnect() {
            return;
        }
        let options = locked(&self.last_options).clone();
        let Some(options) = options else { return };
        log::info!("[link] reconnecting ({})", reason);
        if let Err(e) = self.establish(&options).await {
            log::warn!("[link] reconnect ({}) failed: {}", reason, e);
        }
    }

    // -----------------------------------------------------------------------
    // Connect
    // -----------------------------------------------------------------------

    async fn establish(
        self: &Arc<Self>,
        options: &ConnectOptions,
    ) -> Result<ControllerAdvert, LinkError> {
        // Subscribe before queueing on the lock so a cancel issued while
        // waiting still reaches this attempt.
        let mut cancelled = self.cancel.subscribe();
        let _serial = self.connect_lock.lock().await;
        let transport = self.transport().ok_or(LinkError::NoTransport)?;

        if self.state.get() == ConnectionState::Connected && transport.is_connected() {
            let active = locked(&self.active).clone();
            if let Some(active) = active {
                return Ok(active);
            }
        }

        self.state.set(ConnectionState::Connecting);

        let result = tokio::select! {
            result = self.connect_sequence(&transport, options) => result,
            _ = cancelled.changed() => Err(LinkError::Cancelled),
        };

        match result {
            Ok(advert) => {
                log::info!(
                    "[link] connected to {} ({}) over {}",
                    advert.name,
                    advert.mac_string(),
                    transport.kind()
                );
                *locked(&self.active) = Some(advert.clone());
                self.state.set(ConnectionState::Connected);
                Ok(advert)
            }
            Err(e) => {
                log::warn!("[link] connect failed: {}", e);
                transport.disconnect().await;
                self.protocol.fail_all(LinkError::Disconnected);
                *locked(&self.active) = None;
                self.state.set(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn connect_sequence(
        self: &Arc<Self>,
        transport: &Arc<dyn Transport>,
        options: &ConnectOptions,
    ) -> Result<ControllerAdvert, LinkError> {
        let config = &self.context.config;
        let connect_timeout = options.connect_timeout.unwrap_or(config.connect_timeout);

        let advert = if options.automatic {
            let duration = options.scan_duration.unwrap_or(config.scan_duration);
            let adverts = transport.scan(&options.criteria, duration).await?;
            let best = criteria::strongest(&adverts, &options.criteria)
                .ok_or(LinkError::SelectionFailed)?;
            log::debug!(
                "[link] strongest of {} adverts: {} ({} dBm)",
                adverts.len(),
                best.mac_string(),
                best.rssi
            );
            transport
                .select(&options.criteria.narrowed_to(best.mac), connect_timeout)
                .await?
        } else {
            transport.select(&options.criteria, connect_timeout).await?
        };

        self.timeline.erase();
        transport.connect(connect_timeout).await?;
        self.handshake(transport).await;

        if !transport.is_connected() {
            return Err(LinkError::ConnectionFailed(format!(
                "{} transport not connected after handshake",
                transport.kind()
            )));
        }
        Ok(advert)
    }

    /// Best effort; never fails the connect by itself.
    async fn handshake(self: &Arc<Self>, transport: &Arc<dyn Transport>) {
        match self
            .protocol
            .call(transport.as_ref(), &Command::ReadControllerInfo)
            .await
        {
            Ok(Reply::ControllerInfo(info)) => {
                for subsystem in self.cache.stale_subsystems(&info) {
                    log::debug!("[link] {} fingerprint differs, resyncing", subsystem);
                    let weak = Arc::downgrade(self);
                    let transport = Arc::clone(transport);
                    tokio::spawn(async move {
                        if let Some(shared) = weak.upgrade() {
                            shared.resync(transport.as_ref(), subsystem).await;
                        }
                    });
                }
            }
            Ok(other) => log::warn!("[link] unexpected handshake reply: {:?}", other),
            Err(LinkError::Unsupported) => {
                log::warn!("[link] controller info unsupported, resyncing everything");
                self.cache.wipe_all();
                for subsystem in Subsystem::ALL {
                    self.resync(transport.as_ref(), subsystem).await;
                }
            }
            Err(e) => log::warn!("[link] handshake failed: {}", e),
        }
    }

    async fn resync(&self, transport: &dyn Transport, subsystem: Subsystem) {
        let command = match subsystem {
            Subsystem::Program => Command::ReadProgram,
            Subsystem::EventHistory => Command::ReadEventHistory,
            Subsystem::Config => Command::ReadConfig,
        };
        let bytes = match self.protocol.call(transport, &command).await {
            Ok(Reply::Program(bytes)) | Ok(Reply::EventHistory(bytes)) => Ok(bytes),
            Ok(Reply::Config(json)) => Ok(json.into_bytes()),
            Ok(other) => Err(LinkError::Malformed(format!("{:?}", other))),
            Err(e) => Err(e),
        };
        match bytes {
            Ok(bytes) => {
                log::debug!("[link] resynced {} ({} bytes)", subsystem, bytes.len());
                self.cache.store(subsystem, bytes);
                self.state.emit(LinkEvent::Resynced(subsystem));
            }
            Err(e) => {
                log::warn!("[link] resync of {} failed: {}", subsystem, e);
                self.state.emit(LinkEvent::ResyncFailed(subsystem));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Drops
    // -----------------------------------------------------------------------

    fn on_drop(self: &Arc<Self>) {
        let failed = self.protocol.fail_all(LinkError::Disconnected);
        let was_connected = self
            .state
            .transition(ConnectionState::Connected, ConnectionState::Disconnected);
        log::info!(
            "[link] transport dropped ({} pending requests failed)",
            failed
        );
        if !was_connected {
            return;
        }
        *locked(&self.active) = None;
        if self.reconnection.load(Ordering::Acquire) && !self.updating.load(Ordering::Acquire) {
            self.schedule_reconnect();
        }
    }

    /// One delayed attempt; the supervisor takes over if it fails.
    fn schedule_reconnect(self: &Arc<Self>) {
        if self.reconnect_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let weak = Arc::downgrade(self);
        let backoff = self.context.config.drop_backoff;
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            if let Some(shared) = weak.upgrade() {
                shared.reconnect_scheduled.store(false, Ordering::Release);
                shared.try_reconnect("drop").await;
            }
        });
    }

    fn spawn_listener(self: &Arc<Self>, transport: &Arc<dyn Transport>) -> JoinHandle<()> {
        let mut events = transport.subscribe();
        let weak: Weak<Shared> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        log::warn!("[link] missed {} transport events", missed);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let shared = match weak.upgrade() {
                    Some(shared) => shared,
                    None => break,
                };
                match event {
                    TransportEvent::Connected => log::debug!("[link] transport up"),
                    TransportEvent::Disconnected => shared.on_drop(),
                }
            }
        })
    }

    /// Tear the link down and land in `Disconnected`.
    async fn close(&self, transport: &dyn Transport) {
        self.state.set(ConnectionState::Disconnecting);
        transport.disconnect().await;
        self.protocol.fail_all(LinkError::Disconnected);
        *locked(&self.active) = None;
        self.state.set(ConnectionState::Disconnected);
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        for slot in [&self.listener, &self.supervisor] {
            if let Some(handle) = locked(slot).take() {
                handle.abort();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Client for one controller at a time.
///
/// Cheap to clone; clones share the same link.  Background tasks need a
/// tokio runtime, so transports must be assigned from within one.
#[derive(Clone)]
pub struct Controller {
    shared: Arc<Shared>,
}

impl Controller {
    pub fn new(context: LinkContext) -> Self {
        let (events, _) = broadcast::channel(context.config.event_capacity.max(1));
        let (cancel, _) = watch::channel(0u64);
        let protocol = CommandProtocol::new(&context.config);
        Self {
            shared: Arc::new(Shared {
                protocol,
                state: StateCell::new(events),
                cache: LocalCache::new(),
                timeline: Timeline::new(),
                transport: RwLock::new(None),
                updating: AtomicBool::new(false),
                reconnection: AtomicBool::new(false),
                reconnect_scheduled: AtomicBool::new(false),
                last_options: Mutex::new(None),
                active: Mutex::new(None),
                cancel,
                connect_lock: tokio::sync::Mutex::new(()),
                listener: Mutex::new(None),
                supervisor: Mutex::new(None),
                context,
            }),
        }
    }

    /// Attach a transport and start listening to it.  The reconnection
    /// supervisor starts with the first transport.
    pub fn assign_transport(&self, transport: Arc<dyn Transport>) {
        let shared = &self.shared;
        log::debug!("[link] assigned {} transport", transport.kind());
        let listener = shared.spawn_listener(&transport);
        *shared.transport.write().unwrap_or_else(|e| e.into_inner()) = Some(transport);
        if let Some(previous) = locked(&shared.listener).replace(listener) {
            previous.abort();
        }

        let mut supervisor = locked(&shared.supervisor);
        if supervisor.is_none() {
            *supervisor = Some(supervisor::spawn(
                Arc::downgrade(shared),
                shared.context.config.supervisor_period,
            ));
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.shared.state.subscribe()
    }

    pub fn cache(&self) -> &LocalCache {
        &self.shared.cache
    }

    pub fn timeline(&self) -> &Timeline {
        &self.shared.timeline
    }

    pub fn context(&self) -> &LinkContext {
        &self.shared.context
    }

    pub fn pending_requests(&self) -> usize {
        self.shared.protocol.pending_count()
    }

    pub fn is_updating(&self) -> bool {
        self.shared.updating.load(Ordering::Acquire)
    }

    pub fn reconnection_enabled(&self) -> bool {
        self.shared.reconnection.load(Ordering::Acquire)
    }

    /// The controller the link is connected to.
    pub fn active_controller(&self) -> Option<ControllerAdvert> {
        locked(&self.shared.active).clone()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub async fn connect(&self, options: ConnectOptions) -> Result<ControllerAdvert, LinkError> {
        let shared = &self.shared;
        shared
            .reconnection
            .store(options.autonomous_reconnection, Ordering::Release);
        *locked(&shared.last_options) = Some(options.clone());
        shared.establish(&options).await
    }

    /// Abort an in-flight selection, scan or connect.
    pub fn cancel(&self) {
        log::debug!("[link] cancel requested");
        self.shared.cancel.send_modify(|generation| *generation += 1);
    }

    /// Disconnect on request; turns autonomous reconnection off.
    pub async fn disconnect(&self) -> Result<(), LinkError> {
        let shared = &self.shared;
        shared.reconnection.store(false, Ordering::Release);
        let transport = shared.transport().ok_or(LinkError::NoTransport)?;
        if shared.state.get() == ConnectionState::Disconnected && !transport.is_connected() {
            return Ok(());
        }
        shared.close(transport.as_ref()).await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    fn connected_transport(&self) -> Result<Arc<dyn Transport>, LinkError> {
        let transport = self.shared.transport().ok_or(LinkError::NoTransport)?;
        if !transport.is_connected() {
            return Err(LinkError::NotConnected);
        }
        Ok(transport)
    }

    /// Send any command and keep the local cache in step with it.
    pub async fn request(&self, command: &Command) -> Result<Reply, LinkError> {
        let transport = self.connected_transport()?;
        let reply = self.shared.protocol.call(transport.as_ref(), command).await?;

        let cache = &self.shared.cache;
        match command {
            Command::WriteProgram { bytes, .. } => cache.write_program(bytes),
            Command::EraseProgram => cache.wipe(Subsystem::Program),
            Command::EraseEventHistory => cache.wipe(Subsystem::EventHistory),
            Command::WriteConfig(json) => cache.store(Subsystem::Config, json.clone().into_bytes()),
            Command::WriteTimeline(state) => self.shared.timeline.set(*state),
            _ => {}
        }
        Ok(reply)
    }

    pub async fn read_controller_info(&self) -> Result<ControllerInfo, LinkError> {
        match self.request(&Command::ReadControllerInfo).await? {
            Reply::ControllerInfo(info) => Ok(*info),
            other => Err(LinkError::Malformed(format!("{:?}", other))),
        }
    }

    pub async fn read_firmware_version(&self) -> Result<String, LinkError> {
        match self.request(&Command::ReadFirmwareVersion).await? {
            Reply::FirmwareVersion(version) => Ok(version),
            other => Err(LinkError::Malformed(format!("{:?}", other))),
        }
    }

    pub async fn write_program(&self, program: &Program) -> Result<(), LinkError> {
        let command = Command::WriteProgram {
            clock_ms: self.shared.context.clock.millis(),
            bytes: program.bytes.clone(),
        };
        self.request(&command).await.map(|_| ())
    }

    /// Compile TNGL source and write the program.
    pub async fn upload_tngl(&self, source: &str) -> Result<Program, LinkError> {
        let program = tngl_compiler::compile(source)?;
        self.write_program(&program).await?;
        Ok(program)
    }

    /// Run bytecode right away without storing it.
    pub async fn execute(&self, bytes: &[u8]) -> Result<(), LinkError> {
        let transport = self.connected_transport()?;
        self.shared.protocol.execute(transport.as_ref(), bytes).await
    }

    /// Pull the controller clock into the shared clock.
    pub async fn sync_clock(&self) -> Result<u64, LinkError> {
        let transport = self.connected_transport()?;
        let millis = transport.read_clock().await?;
        self.shared.context.clock.set_millis(millis);
        Ok(millis)
    }

    /// Push the local timeline to the controller.
    pub async fn sync_timeline(&self) -> Result<TimelineState, LinkError> {
        let clock_ms = self.shared.context.clock.millis();
        let local = self.shared.timeline.state();
        let state = TimelineState {
            clock_ms,
            millis: self.shared.timeline.millis_at(clock_ms),
            paused: local.paused,
        };
        self.request(&Command::WriteTimeline(state)).await?;
        Ok(state)
    }

    // -----------------------------------------------------------------------
    // Firmware update
    // -----------------------------------------------------------------------

    /// Upload and install firmware, then disconnect.  The reconnection
    /// setting is left as it was, so the supervisor picks the controller up
    /// again after it rebooted.
    pub async fn update_firmware(
        &self,
        firmware: &[u8],
        options: &OtaOptions,
    ) -> Result<(), LinkError> {
        if firmware.is_empty() {
            return Err(LinkError::FirmwareRejected("empty image".into()));
        }
        if firmware.len() > options.max_firmware_size {
            return Err(LinkError::FirmwareRejected(format!(
                "{} bytes exceeds the {} byte limit",
                firmware.len(),
                options.max_firmware_size
            )));
        }

        let shared = &self.shared;
        let _guard = UpdateGuard::acquire(&shared.updating, shared.context.wake_lock.clone())?;
        let transport = self.connected_transport()?;
        let chunk_size = options
            .chunk_size
            .unwrap_or_else(|| transport.ota_chunk_size())
            .max(1);
        log::info!(
            "[ota] updating {} bytes in chunks of {}",
            firmware.len(),
            chunk_size
        );

        let result = {
            let mut session =
                OtaSession::new(&shared.protocol, transport.as_ref(), &shared.state, options);
            session.run(firmware, chunk_size).await
        };

        shared.close(transport.as_ref()).await;
        result
    }
}
