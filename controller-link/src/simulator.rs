//! In-process controllers behind a simulated transport.
//!
//! [`SimulatedTransport`] implements [`Transport`] over a set of
//! [`SimulatedController`]s and applies a configurable fault model:
//!
//! | Fault              | Description                                          |
//! |--------------------|------------------------------------------------------|
//! | Latency            | Every exchange waits `latency`, or the per-flag value |
//! | Transient failure  | Requests and deliveries fail with `failure_rate`     |
//! | Device error       | Selected request flags answer with an error code     |
//! | Stall              | Selected request flags never answer                  |
//! | Legacy firmware    | Controller info answers with the unsupported marker  |
//! | Phantom connect    | `connect` succeeds but the link never comes up       |
//! | Drop               | [`SimulatedTransport::drop_connection`]               |
//!
//! All randomness comes from a seeded RNG so runs are reproducible.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::broadcast;

use tngl_compiler::{TnglReader, TnglWriter};

use crate::cache::fingerprint;
use crate::clock::ControllerClock;
use crate::command::{
    decode_timeline, encode_timeline, CommandKind, Peer, TimelineState, IO_LABEL_LEN,
};
use crate::controller_info::{ControllerInfo, NAME_LEN, SIGNATURE_LEN};
use crate::criteria::{ControllerAdvert, Criteria};
use crate::error::LinkError;
use crate::flags;
use crate::frame::{encode_response, RequestFrame};
use crate::transport::{Transport, TransportEvent, DEFAULT_OTA_CHUNK_SIZE};

/// Error code a simulated controller answers malformed requests with.
pub const ERROR_MALFORMED: u8 = 1;

/// Fault model of the simulated link.
///
/// Probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub seed: u64,
    /// Probability that a request or delivery fails in transit.
    pub failure_rate: f64,
    /// Delay of every exchange without a per-flag value.
    pub latency: Duration,
    /// Delay keyed by request flag.
    pub flag_latency: HashMap<u8, Duration>,
    /// Error code answered for a request flag.
    pub error_codes: HashMap<u8, u8>,
    /// Request flags that never get an answer.
    pub stalled_flags: HashSet<u8>,
    /// Delivered flags that fail in transit.
    pub failing_deliveries: HashSet<u8>,
    /// Controllers answer controller-info with the unsupported marker.
    pub legacy_firmware: bool,
    /// `connect` reports success without the link coming up.
    pub phantom_connect: bool,
    pub ota_chunk_size: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults: a transparent link.
        Self {
            seed: 0,
            failure_rate: 0.0,
            latency: Duration::from_millis(5),
            flag_latency: HashMap::new(),
            error_codes: HashMap::new(),
            stalled_flags: HashSet::new(),
            failing_deliveries: HashSet::new(),
            legacy_firmware: false,
            phantom_connect: false,
            ota_chunk_size: DEFAULT_OTA_CHUNK_SIZE,
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// OTA bookkeeping on the controller side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OtaRecord {
    pub expected: Option<u32>,
    pub received: Vec<u8>,
    pub write_offsets: Vec<u32>,
    /// Image accepted by the last `END`.
    pub installed: Option<Vec<u8>>,
    pub rejected_writes: usize,
}

/// One controller and everything it stores.
#[derive(Debug, Clone)]
pub struct SimulatedController {
    pub info: ControllerInfo,
    pub rssi: i16,
    pub program: Vec<u8>,
    pub event_history: Vec<u8>,
    pub config: String,
    pub timeline: TimelineState,
    pub io_variants: HashMap<String, String>,
    pub io_mappings: HashMap<String, Vec<i16>>,
    pub peers: Vec<Peer>,
    pub network_key: [u8; 16],
    pub ota: OtaRecord,
    pub executed: Vec<Vec<u8>>,
    pub reboots: u32,
    pub datarate: u32,
    /// Request flags seen, in arrival order.
    pub received_flags: Vec<u8>,
}

impl SimulatedController {
    pub fn new(name: &str, mac: [u8; 6]) -> Self {
        let info = ControllerInfo {
            name: name.into(),
            label: "sim".into(),
            mac,
            commissionable: true,
            pcb_code: 1,
            product_code: 1,
            fw_version_code: 0x0C04,
            fw_platform_code: 1,
            fw_compilation_unix: 1_700_000_000_000,
            fw_version: "UNIVERSAL_0.12.4_20231114".into(),
            ..Default::default()
        };
        Self {
            info,
            rssi: -60,
            program: Vec::new(),
            event_history: Vec::new(),
            config: String::new(),
            timeline: TimelineState::default(),
            io_variants: HashMap::new(),
            io_mappings: HashMap::new(),
            peers: Vec::new(),
            network_key: [0; 16],
            ota: OtaRecord::default(),
            executed: Vec::new(),
            reboots: 0,
            datarate: 1_000_000,
            received_flags: Vec::new(),
        }
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = rssi;
        self
    }

    pub fn with_program(mut self, program: Vec<u8>) -> Self {
        self.program = program;
        self
    }

    pub fn with_event_history(mut self, history: Vec<u8>) -> Self {
        self.event_history = history;
        self
    }

    pub fn with_config(mut self, config: &str) -> Self {
        self.config = config.into();
        self
    }

    /// Controller info with fingerprints of the current content.
    pub fn current_info(&self) -> ControllerInfo {
        ControllerInfo {
            program_fingerprint: fingerprint(&self.program),
            event_history_fingerprint: fingerprint(&self.event_history),
            config_fingerprint: fingerprint(self.config.as_bytes()),
            ..self.info.clone()
        }
    }

    pub fn advert(&self) -> ControllerAdvert {
        ControllerAdvert {
            name: self.info.name.clone(),
            mac: self.info.mac,
            network: self.info.network_signature,
            fw_version: self.info.fw_version.clone(),
            product_code: self.info.product_code,
            commissionable: self.info.commissionable,
            rssi: self.rssi,
        }
    }

    /// Answer a request frame.  `None` when the frame has no header at all.
    pub fn respond(&mut self, frame: &[u8], legacy: bool) -> Option<Vec<u8>> {
        let request = RequestFrame::decode(frame).ok()?;
        self.received_flags.push(request.flag);

        let kind = CommandKind::ALL
            .iter()
            .copied()
            .find(|k| k.expects_reply() && k.request_flag() == request.flag);
        let kind = match kind {
            Some(kind) if !(legacy && kind == CommandKind::ReadControllerInfo) => kind,
            _ => return Some(vec![flags::UNSUPPORTED_MARKER]),
        };
        let response_flag = kind.response_flag()?;

        let (code, payload) = match self.answer(kind, request.payload) {
            Ok(payload) => (flags::SUCCESS, payload),
            Err(code) => (code, Vec::new()),
        };
        Some(encode_response(
            response_flag,
            request.correlation_id,
            code,
            &payload,
        ))
    }

    fn answer(&mut self, kind: CommandKind, payload: &[u8]) -> Result<Vec<u8>, u8> {
        let mut reader = TnglReader::new(payload);
        let mut out = Vec::new();
        match kind {
            CommandKind::WriteConfig => {
                let len = read(reader.read_value(4))? as usize;
                let bytes = read(reader.read_bytes(len))?;
                self.config = String::from_utf8(bytes.to_vec()).map_err(|_| ERROR_MALFORMED)?;
            }
            CommandKind::ReadConfig => put_blob(&mut out, self.config.as_bytes(), 4),
            CommandKind::ReadControllerInfo => {
                out = self.current_info().encode().map_err(|_| ERROR_MALFORMED)?;
            }
            CommandKind::ReadConnectedPeers => {
                out.extend_from_slice(&(self.peers.len() as u16).to_le_bytes());
                for peer in &self.peers {
                    out.extend_from_slice(&peer.mac);
                    out.extend_from_slice(&peer.rssi.to_le_bytes());
                }
            }
            CommandKind::ReadIoVariant => {
                let label = read(reader.read_string(IO_LABEL_LEN))?;
                let variant = self.io_variants.get(&label).cloned().unwrap_or_default();
                put_blob(&mut out, variant.as_bytes(), 2);
            }
            CommandKind::WriteIoVariant => {
                let label = read(reader.read_string(IO_LABEL_LEN))?;
                let len = read(reader.read_value(2))? as usize;
                let variant = read(reader.read_bytes(len))?;
                let variant = String::from_utf8(variant.to_vec()).map_err(|_| ERROR_MALFORMED)?;
                put_blob(&mut out, variant.as_bytes(), 2);
                self.io_variants.insert(label, variant);
            }
            CommandKind::ReadIoMapping => {
                let label = read(reader.read_string(IO_LABEL_LEN))?;
                let mapping = self.io_mappings.get(&label).cloned().unwrap_or_default();
                put_mapping(&mut out, &mapping);
            }
            CommandKind::WriteIoMapping => {
                let label = read(reader.read_string(IO_LABEL_LEN))?;
                let count = read(reader.read_value(2))? as usize;
                let mut mapping = Vec::with_capacity(count);
                for _ in 0..count {
                    mapping.push(read(reader.read_signed(2))? as i16);
                }
                put_mapping(&mut out, &mapping);
                self.io_mappings.insert(label, mapping);
            }
            CommandKind::ReadEventHistory => put_blob(&mut out, &self.event_history, 4),
            CommandKind::EraseEventHistory => self.event_history.clear(),
            CommandKind::ReadProgram => put_blob(&mut out, &self.program, 4),
            CommandKind::WriteProgram => {
                let _clock = read(reader.read_value(6))?;
                let len = read(reader.read_value(4))? as usize;
                self.program = read(reader.read_bytes(len))?.to_vec();
            }
            CommandKind::WriteControllerName => {
                self.info.name = read(reader.read_string(NAME_LEN))?;
                out = fixed_string(&self.info.name, NAME_LEN)?;
            }
            CommandKind::ReadControllerName => out = fixed_string(&self.info.name, NAME_LEN)?,
            CommandKind::ReadControllerCodes => {
                out.extend_from_slice(&self.info.pcb_code.to_le_bytes());
                out.extend_from_slice(&self.info.product_code.to_le_bytes());
            }
            CommandKind::WriteControllerCodes => {
                self.info.pcb_code = read(reader.read_value(2))? as u16;
                self.info.product_code = read(reader.read_value(2))? as u16;
                out.extend_from_slice(&self.info.pcb_code.to_le_bytes());
                out.extend_from_slice(&self.info.product_code.to_le_bytes());
            }
            CommandKind::ReadNetworkSignature => {
                out.extend_from_slice(&self.info.network_signature)
            }
            CommandKind::EraseProgram => self.program.clear(),
            CommandKind::Sleep => {
                read(reader.read_value(4))?;
            }
            CommandKind::SaveState => {}
            CommandKind::ChangeDatarate => {
                self.datarate = read(reader.read_value(4))? as u32;
            }
            CommandKind::ReadPinVoltage => {
                let pin = read(reader.read_flag())?;
                out.extend_from_slice(&(3300 - pin as i32).to_le_bytes());
            }
            CommandKind::ReadAnalogPin => {
                let pin = read(reader.read_flag())?;
                out.extend_from_slice(&(512u16 + pin as u16).to_le_bytes());
            }
            CommandKind::EraseNetwork => {
                self.info.network_signature = [0; SIGNATURE_LEN];
                self.network_key = [0; 16];
                self.info.commissionable = true;
            }
            CommandKind::ReadProgramFingerprint => {
                out.extend_from_slice(&fingerprint(&self.program))
            }
            CommandKind::ReadTimeline => {
                out = encode_timeline(&self.timeline).map_err(|_| ERROR_MALFORMED)?
            }
            CommandKind::WriteTimeline => {
                self.timeline = decode_timeline(&mut reader).map_err(|_| ERROR_MALFORMED)?;
                out = encode_timeline(&self.timeline).map_err(|_| ERROR_MALFORMED)?;
            }
            CommandKind::EraseTimeline => {
                self.timeline = TimelineState {
                    clock_ms: 0,
                    millis: 0,
                    paused: true,
                };
                out = encode_timeline(&self.timeline).map_err(|_| ERROR_MALFORMED)?;
            }
            CommandKind::AdoptNetwork => {
                let mut signature = [0u8; SIGNATURE_LEN];
                signature.copy_from_slice(read(reader.read_bytes(SIGNATURE_LEN))?);
                let mut key = [0u8; 16];
                key.copy_from_slice(read(reader.read_bytes(16))?);
                let name = read(reader.read_string(NAME_LEN))?;
                self.info.network_signature = signature;
                self.network_key = key;
                self.info.commissionable = false;
                if !name.is_empty() {
                    self.info.name = name;
                }
                out = fixed_string(&self.info.name, NAME_LEN)?;
            }
            CommandKind::ReadFirmwareVersion => out = fixed_string(&self.info.fw_version, 32)?,
            CommandKind::Reboot | CommandKind::Disconnect | CommandKind::Execute => {
                return Err(ERROR_MALFORMED)
            }
        }
        Ok(out)
    }

    /// Apply a delivered frame.  Returns `true` when the controller drops the
    /// link afterwards (reboot, disconnect).
    pub fn deliver(&mut self, frame: &[u8]) -> bool {
        let (&flag, payload) = match frame.split_first() {
            Some(split) => split,
            None => return false,
        };
        self.received_flags.push(flag);
        let word = |bytes: &[u8]| -> Option<u32> {
            bytes.get(..4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        };
        match flag {
            flags::OTA_RESET => self.ota = OtaRecord::default(),
            flags::OTA_BEGIN => {
                self.ota.expected = word(payload);
                self.ota.received.clear();
            }
            flags::OTA_WRITE => match word(payload) {
                Some(offset) if offset as usize == self.ota.received.len() => {
                    self.ota.write_offsets.push(offset);
                    self.ota.received.extend_from_slice(&payload[4..]);
                }
                _ => self.ota.rejected_writes += 1,
            },
            flags::OTA_END => {
                let written = word(payload);
                if written.is_some()
                    && written == self.ota.expected
                    && written == Some(self.ota.received.len() as u32)
                {
                    self.ota.installed = Some(self.ota.received.clone());
                }
            }
            flags::REBOOT => {
                self.reboots += 1;
                return true;
            }
            flags::DISCONNECT => return true,
            flags::EXECUTE => self.executed.push(payload.to_vec()),
            _ => {}
        }
        false
    }
}

fn read<T>(result: Result<T, tngl_compiler::CodecError>) -> Result<T, u8> {
    result.map_err(|_| ERROR_MALFORMED)
}

fn put_blob(out: &mut Vec<u8>, bytes: &[u8], width: usize) {
    out.extend_from_slice(&(bytes.len() as u64).to_le_bytes()[..width]);
    out.extend_from_slice(bytes);
}

fn put_mapping(out: &mut Vec<u8>, mapping: &[i16]) {
    out.extend_from_slice(&(mapping.len() as u16).to_le_bytes());
    for value in mapping {
        out.extend_from_slice(&value.to_le_bytes());
    }
}

fn fixed_string(text: &str, len: usize) -> Result<Vec<u8>, u8> {
    let mut writer = TnglWriter::with_capacity(len);
    writer.write_string(text, len).map_err(|_| ERROR_MALFORMED)?;
    Ok(writer.into_bytes())
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

struct LinkState {
    controllers: Vec<SimulatedController>,
    selected: Option<usize>,
    connected: bool,
    connects: usize,
    rng: StdRng,
}

/// Transport over in-process controllers.
#[derive(Clone)]
pub struct SimulatedTransport {
    config: Arc<SimulatorConfig>,
    inner: Arc<Mutex<LinkState>>,
    clock: Arc<ControllerClock>,
    events: broadcast::Sender<TransportEvent>,
}

impl SimulatedTransport {
    pub fn new(config: SimulatorConfig, controllers: Vec<SimulatedController>) -> Self {
        let (events, _) = broadcast::channel(32);
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(LinkState {
                controllers,
                selected: None,
                connected: false,
                connects: 0,
                rng,
            })),
            clock: Arc::new(ControllerClock::starting_at(1_000_000)),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Inspect or change a controller.
    pub fn with_controller<R>(
        &self,
        index: usize,
        f: impl FnOnce(&mut SimulatedController) -> R,
    ) -> Option<R> {
        self.lock().controllers.get_mut(index).map(f)
    }

    /// Index of the controller the link is attached to.
    pub fn selected(&self) -> Option<usize> {
        self.lock().selected
    }

    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    /// Lose the link as if the controller went out of range.
    pub fn drop_connection(&self) {
        let was_connected = {
            let mut state = self.lock();
            std::mem::replace(&mut state.connected, false)
        };
        if was_connected {
            log::debug!("[sim] link dropped");
            let _ = self.events.send(TransportEvent::Disconnected);
        }
    }

    fn latency(&self, flag: u8) -> Duration {
        self.config
            .flag_latency
            .get(&flag)
            .copied()
            .unwrap_or(self.config.latency)
    }

    fn transient_failure(&self) -> bool {
        let rate = self.config.failure_rate;
        rate > 0.0 && self.lock().rng.random_bool(rate.min(1.0))
    }

    fn matching(&self, criteria: &Criteria) -> Vec<(usize, ControllerAdvert)> {
        self.lock()
            .controllers
            .iter()
            .enumerate()
            .map(|(i, c)| (i, c.advert()))
            .filter(|(_, advert)| criteria.matches(advert))
            .collect()
    }

    async fn deliver_frame(&self, frame: &[u8]) -> Result<(), LinkError> {
        let flag = frame.first().copied().unwrap_or_default();
        tokio::time::sleep(self.latency(flag)).await;
        if self.config.failing_deliveries.contains(&flag) || self.transient_failure() {
            return Err(LinkError::Transport(format!(
                "delivery of flag {} failed",
                flag
            )));
        }
        let drops = {
            let mut state = self.lock();
            if !state.connected {
                return Err(LinkError::Disconnected);
            }
            let index = state.selected.ok_or(LinkError::NotConnected)?;
            match state.controllers.get_mut(index) {
                Some(controller) => controller.deliver(frame),
                None => return Err(LinkError::NotConnected),
            }
        };
        if drops {
            self.drop_connection();
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    fn kind(&self) -> &'static str {
        "simulated"
    }

    async fn scan(
        &self,
        criteria: &Criteria,
        duration: Duration,
    ) -> Result<Vec<ControllerAdvert>, LinkError> {
        tokio::time::sleep(duration).await;
        Ok(self
            .matching(criteria)
            .into_iter()
            .map(|(_, advert)| advert)
            .collect())
    }

    async fn select(
        &self,
        criteria: &Criteria,
        _timeout: Duration,
    ) -> Result<ControllerAdvert, LinkError> {
        tokio::time::sleep(self.config.latency).await;
        let (index, advert) = self
            .matching(criteria)
            .into_iter()
            .next()
            .ok_or(LinkError::SelectionFailed)?;
        self.lock().selected = Some(index);
        Ok(advert)
    }

    async fn connect(&self, _timeout: Duration) -> Result<(), LinkError> {
        tokio::time::sleep(self.config.latency).await;
        {
            let mut state = self.lock();
            if state.selected.is_none() {
                return Err(LinkError::ConnectionFailed("no controller selected".into()));
            }
            state.connects += 1;
            if self.config.phantom_connect {
                return Ok(());
            }
            state.connected = true;
        }
        let _ = self.events.send(TransportEvent::Connected);
        Ok(())
    }

    async fn disconnect(&self) {
        self.drop_connection();
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn deliver(&self, frame: &[u8]) -> Result<(), LinkError> {
        self.deliver_frame(frame).await
    }

    async fn transmit(&self, frame: &[u8]) -> Result<(), LinkError> {
        // Best effort: transit failures vanish silently.
        match self.deliver_frame(frame).await {
            Err(LinkError::Transport(_)) => Ok(()),
            other => other,
        }
    }

    async fn request(
        &self,
        frame: &[u8],
        _timeout: Duration,
    ) -> Result<Option<Vec<u8>>, LinkError> {
        let flag = frame.first().copied().unwrap_or_default();
        if !self.is_connected() {
            return Err(LinkError::Disconnected);
        }
        if self.config.stalled_flags.contains(&flag) {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.latency(flag)).await;
        if self.transient_failure() {
            return Err(LinkError::Transport(format!("request {} lost", flag)));
        }

        let mut state = self.lock();
        if !state.connected {
            return Err(LinkError::Disconnected);
        }
        let index = state.selected.ok_or(LinkError::NotConnected)?;
        let controller = state
            .controllers
            .get_mut(index)
            .ok_or(LinkError::NotConnected)?;

        if let Some(&code) = self.config.error_codes.get(&flag) {
            let request = RequestFrame::decode(frame)?;
            let response_flag = CommandKind::ALL
                .iter()
                .find(|k| k.request_flag() == flag)
                .and_then(|k| k.response_flag())
                .unwrap_or(flag);
            return Ok(Some(encode_response(
                response_flag,
                request.correlation_id,
                code,
                &[],
            )));
        }
        Ok(controller.respond(frame, self.config.legacy_firmware))
    }

    async fn read_clock(&self) -> Result<u64, LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        Ok(self.clock.millis())
    }

    async fn write_clock(&self, clock_ms: u64) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        self.clock.set_millis(clock_ms);
        Ok(())
    }

    fn ota_chunk_size(&self) -> usize {
        self.config.ota_chunk_size
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}
