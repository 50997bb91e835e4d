//! Command schema: every request the link can send, declared once.
//!
//! [`command_schema!`] expands one table into [`CommandKind`] with its CLI
//! name, request flag, response flag and timeout.  [`Command`] carries the
//! request payloads and [`Reply`] the decoded responses; both are matched
//! exhaustively, so adding a row to the table forces every dispatch site to
//! handle it.

use std::time::Duration;

use tngl_compiler::{TnglReader, TnglWriter};

use crate::controller_info::{ControllerInfo, Fingerprint, NAME_LEN, SIGNATURE_LEN};
use crate::error::LinkError;
use crate::flags::*;

/// Label field width in IO requests.
pub const IO_LABEL_LEN: usize = 5;

macro_rules! command_schema {
    ($( $kind:ident => $name:literal, $request:expr, $response:expr, $timeout_ms:expr; )*) => {
        /// Every command in the protocol.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum CommandKind {
            $( $kind, )*
        }

        impl CommandKind {
            pub const ALL: &'static [CommandKind] = &[ $( CommandKind::$kind, )* ];

            /// Kebab-case name used on the command line.
            pub fn name(self) -> &'static str {
                match self {
                    $( CommandKind::$kind => $name, )*
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $( $name => Some(CommandKind::$kind), )*
                    _ => None,
                }
            }

            pub fn request_flag(self) -> u8 {
                match self {
                    $( CommandKind::$kind => $request, )*
                }
            }

            /// `None` for delivered (fire-and-confirm) commands.
            pub fn response_flag(self) -> Option<u8> {
                match self {
                    $( CommandKind::$kind => $response, )*
                }
            }

            /// Command-specific timeout; `None` uses the link default.
            pub fn timeout(self) -> Option<Duration> {
                let millis: Option<u64> = match self {
                    $( CommandKind::$kind => $timeout_ms, )*
                };
                millis.map(Duration::from_millis)
            }
        }
    };
}

command_schema! {
    WriteConfig => "write-config", WRITE_CONFIG_REQUEST, Some(WRITE_CONFIG_RESPONSE), None;
    ReadConfig => "read-config", READ_CONFIG_REQUEST, Some(READ_CONFIG_RESPONSE), None;
    ReadControllerInfo => "read-controller-info", CONTROLLER_INFO_REQUEST, Some(CONTROLLER_INFO_RESPONSE), None;
    ReadConnectedPeers => "read-connected-peers", CONNECTED_PEERS_REQUEST, Some(CONNECTED_PEERS_RESPONSE), None;
    ReadIoVariant => "read-io-variant", READ_IO_VARIANT_REQUEST, Some(READ_IO_VARIANT_RESPONSE), None;
    WriteIoVariant => "write-io-variant", WRITE_IO_VARIANT_REQUEST, Some(WRITE_IO_VARIANT_RESPONSE), None;
    ReadIoMapping => "read-io-mapping", READ_IO_MAPPING_REQUEST, Some(READ_IO_MAPPING_RESPONSE), None;
    WriteIoMapping => "write-io-mapping", WRITE_IO_MAPPING_REQUEST, Some(WRITE_IO_MAPPING_RESPONSE), None;
    ReadEventHistory => "read-event-history", READ_EVENT_HISTORY_REQUEST, Some(READ_EVENT_HISTORY_RESPONSE), Some(20_000);
    EraseEventHistory => "erase-event-history", ERASE_EVENT_HISTORY_REQUEST, Some(ERASE_EVENT_HISTORY_RESPONSE), None;
    ReadProgram => "read-program", READ_PROGRAM_REQUEST, Some(READ_PROGRAM_RESPONSE), Some(20_000);
    WriteProgram => "write-program", WRITE_PROGRAM_REQUEST, Some(WRITE_PROGRAM_RESPONSE), Some(20_000);
    WriteControllerName => "write-controller-name", WRITE_CONTROLLER_NAME_REQUEST, Some(WRITE_CONTROLLER_NAME_RESPONSE), None;
    ReadControllerName => "read-controller-name", READ_CONTROLLER_NAME_REQUEST, Some(READ_CONTROLLER_NAME_RESPONSE), None;
    ReadControllerCodes => "read-controller-codes", READ_CONTROLLER_CODES_REQUEST, Some(READ_CONTROLLER_CODES_RESPONSE), None;
    WriteControllerCodes => "write-controller-codes", WRITE_CONTROLLER_CODES_REQUEST, Some(WRITE_CONTROLLER_CODES_RESPONSE), None;
    ReadNetworkSignature => "read-network-signature", NETWORK_SIGNATURE_REQUEST, Some(NETWORK_SIGNATURE_RESPONSE), None;
    EraseProgram => "erase-program", ERASE_PROGRAM_REQUEST, Some(ERASE_PROGRAM_RESPONSE), Some(10_000);
    Sleep => "sleep", SLEEP_REQUEST, Some(SLEEP_RESPONSE), None;
    SaveState => "save-state", SAVE_STATE_REQUEST, Some(SAVE_STATE_RESPONSE), None;
    ChangeDatarate => "change-datarate", CHANGE_DATARATE_REQUEST, Some(CHANGE_DATARATE_RESPONSE), None;
    ReadPinVoltage => "read-pin-voltage", PIN_VOLTAGE_REQUEST, Some(PIN_VOLTAGE_RESPONSE), None;
    ReadAnalogPin => "read-analog-pin", ANALOG_PIN_REQUEST, Some(ANALOG_PIN_RESPONSE), None;
    EraseNetwork => "erase-network", ERASE_NETWORK_REQUEST, Some(ERASE_NETWORK_RESPONSE), None;
    ReadProgramFingerprint => "read-program-fingerprint", PROGRAM_FINGERPRINT_REQUEST, Some(PROGRAM_FINGERPRINT_RESPONSE), None;
    ReadTimeline => "read-timeline", READ_TIMELINE_REQUEST, Some(READ_TIMELINE_RESPONSE), None;
    WriteTimeline => "write-timeline", WRITE_TIMELINE_REQUEST, Some(WRITE_TIMELINE_RESPONSE), None;
    EraseTimeline => "erase-timeline", ERASE_TIMELINE_REQUEST, Some(ERASE_TIMELINE_RESPONSE), None;
    AdoptNetwork => "adopt-network", ADOPT_NETWORK_REQUEST, Some(ADOPT_NETWORK_RESPONSE), Some(15_000);
    ReadFirmwareVersion => "read-firmware-version", FW_VERSION_REQUEST, Some(FW_VERSION_RESPONSE), None;
    Reboot => "reboot", REBOOT, None, None;
    Disconnect => "disconnect", DISCONNECT, None, None;
    Execute => "execute", EXECUTE, None, None;
}

impl CommandKind {
    /// Diagnostics kept for old tooling; new firmware may not answer them.
    pub fn is_deprecated(self) -> bool {
        matches!(self, CommandKind::ReadPinVoltage | CommandKind::ReadAnalogPin)
    }

    pub fn expects_reply(self) -> bool {
        self.response_flag().is_some()
    }
}

/// Timeline position shared between app and controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimelineState {
    /// Controller clock at which `millis` was sampled.
    pub clock_ms: u64,
    pub millis: i32,
    pub paused: bool,
}

/// A controller reachable through the connected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    pub mac: [u8; 6],
    pub rssi: i16,
}

/// A request with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    WriteConfig(String),
    ReadConfig,
    ReadControllerInfo,
    ReadConnectedPeers,
    ReadIoVariant { label: String },
    WriteIoVariant { label: String, variant: String },
    ReadIoMapping { label: String },
    WriteIoMapping { label: String, mapping: Vec<i16> },
    ReadEventHistory,
    EraseEventHistory,
    ReadProgram,
    WriteProgram { clock_ms: u64, bytes: Vec<u8> },
    WriteControllerName(String),
    ReadControllerName,
    ReadControllerCodes,
    WriteControllerCodes { pcb: u16, product: u16 },
    ReadNetworkSignature,
    EraseProgram,
    Sleep { duration_ms: u32 },
    SaveState,
    ChangeDatarate { bits_per_second: u32 },
    ReadPinVoltage { pin: u8 },
    ReadAnalogPin { pin: u8 },
    EraseNetwork,
    ReadProgramFingerprint,
    ReadTimeline,
    WriteTimeline(TimelineState),
    EraseTimeline,
    AdoptNetwork {
        signature: [u8; SIGNATURE_LEN],
        key: [u8; 16],
        name: String,
    },
    ReadFirmwareVersion,
    Reboot,
    Disconnect,
    Execute(Vec<u8>),
}

fn with_writer<F>(capacity: usize, write: F) -> Result<Vec<u8>, LinkError>
where
    F: FnOnce(&mut TnglWriter) -> Result<(), tngl_compiler::CodecError>,
{
    let mut writer = TnglWriter::with_capacity(capacity);
    write(&mut writer)?;
    Ok(writer.into_bytes())
}

fn check_label(label: &str) -> Result<(), LinkError> {
    if label.is_empty() || label.len() > IO_LABEL_LEN || !label.is_ascii() {
        return Err(LinkError::InvalidArgument(format!(
            "io label must be 1-{} ASCII characters: \"{}\"",
            IO_LABEL_LEN, label
        )));
    }
    Ok(())
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::WriteConfig(_) => CommandKind::WriteConfig,
            Command::ReadConfig => CommandKind::ReadConfig,
            Command::ReadControllerInfo => CommandKind::ReadControllerInfo,
            Command::ReadConnectedPeers => CommandKind::ReadConnectedPeers,
            Command::ReadIoVariant { .. } => CommandKind::ReadIoVariant,
            Command::WriteIoVariant { .. } => CommandKind::WriteIoVariant,
            Command::ReadIoMapping { .. } => CommandKind::ReadIoMapping,
            Command::WriteIoMapping { .. } => CommandKind::WriteIoMapping,
            Command::ReadEventHistory => CommandKind::ReadEventHistory,
            Command::EraseEventHistory => CommandKind::EraseEventHistory,
            Command::ReadProgram => CommandKind::ReadProgram,
            Command::WriteProgram { .. } => CommandKind::WriteProgram,
            Command::WriteControllerName(_) => CommandKind::WriteControllerName,
            Command::ReadControllerName => CommandKind::ReadControllerName,
            Command::ReadControllerCodes => CommandKind::ReadControllerCodes,
            Command::WriteControllerCodes { .. } => CommandKind::WriteControllerCodes,
            Command::ReadNetworkSignature => CommandKind::ReadNetworkSignature,
            Command::EraseProgram => CommandKind::EraseProgram,
            Command::Sleep { .. } => CommandKind::Sleep,
            Command::SaveState => CommandKind::SaveState,
            Command::ChangeDatarate { .. } => CommandKind::ChangeDatarate,
            Command::ReadPinVoltage { .. } => CommandKind::ReadPinVoltage,
            Command::ReadAnalogPin { .. } => CommandKind::ReadAnalogPin,
            Command::EraseNetwork => CommandKind::EraseNetwork,
            Command::ReadProgramFingerprint => CommandKind::ReadProgramFingerprint,
            Command::ReadTimeline => CommandKind::ReadTimeline,
            Command::WriteTimeline(_) => CommandKind::WriteTimeline,
            Command::EraseTimeline => CommandKind::EraseTimeline,
            Command::AdoptNetwork { .. } => CommandKind::AdoptNetwork,
            Command::ReadFirmwareVersion => CommandKind::ReadFirmwareVersion,
            Command::Reboot => CommandKind::Reboot,
            Command::Disconnect => CommandKind::Disconnect,
            Command::Execute(_) => CommandKind::Execute,
        }
    }

    /// Commands that take no arguments, for dispatch by name.
    pub fn without_arguments(kind: CommandKind) -> Option<Command> {
        Some(match kind {
            CommandKind::ReadConfig => Command::ReadConfig,
            CommandKind::ReadControllerInfo => Command::ReadControllerInfo,
            CommandKind::ReadConnectedPeers => Command::ReadConnectedPeers,
            CommandKind::ReadEventHistory => Command::ReadEventHistory,
            CommandKind::EraseEventHistory => Command::EraseEventHistory,
            CommandKind::ReadProgram => Command::ReadProgram,
            CommandKind::ReadControllerName => Command::ReadControllerName,
            CommandKind::ReadControllerCodes => Command::ReadControllerCodes,
            CommandKind::ReadNetworkSignature => Command::ReadNetworkSignature,
            CommandKind::EraseProgram => Command::EraseProgram,
            CommandKind::SaveState => Command::SaveState,
            CommandKind::EraseNetwork => Command::EraseNetwork,
            CommandKind::ReadProgramFingerprint => Command::ReadProgramFingerprint,
            CommandKind::ReadTimeline => Command::ReadTimeline,
            CommandKind::EraseTimeline => Command::EraseTimeline,
            CommandKind::ReadFirmwareVersion => Command::ReadFirmwareVersion,
            CommandKind::Reboot => Command::Reboot,
            CommandKind::Disconnect => Command::Disconnect,
            _ => return None,
        })
    }

    /// Request payload, without flag or correlation id.
    pub fn encode_payload(&self) -> Result<Vec<u8>, LinkError> {
        let payload = match self {
            Command::WriteConfig(json) => with_writer(4 + json.len(), |w| {
                w.write_value(json.len() as u64, 4)?;
                w.write_bytes(json.as_bytes())
            })?,
            Command::ReadIoVariant { label } | Command::ReadIoMapping { label } => {
                check_label(label)?;
                with_writer(IO_LABEL_LEN, |w| w.write_string(label, IO_LABEL_LEN))?
            }
            Command::WriteIoVariant { label, variant } => {
                check_label(label)?;
                let len = u16::try_from(variant.len())
                    .map_err(|_| LinkError::InvalidArgument("io variant too long".into()))?;
                with_writer(IO_LABEL_LEN + 2 + variant.len(), |w| {
                    w.write_string(label, IO_LABEL_LEN)?;
                    w.write_value(len as u64, 2)?;
                    w.write_bytes(variant.as_bytes())
                })?
            }
            Command::WriteIoMapping { label, mapping } => {
                check_label(label)?;
                let count = u16::try_from(mapping.len())
                    .map_err(|_| LinkError::InvalidArgument("io mapping too long".into()))?;
                with_writer(IO_LABEL_LEN + 2 + 2 * mapping.len(), |w| {
                    w.write_string(label, IO_LABEL_LEN)?;
                    w.write_value(count as u64, 2)?;
                    for value in mapping {
                        w.write_signed(*value as i64, 2)?;
                    }
                    Ok(())
                })?
            }
            Command::WriteProgram { clock_ms, bytes } => with_writer(6 + 4 + bytes.len(), |w| {
                w.write_value(*clock_ms, 6)?;
                w.write_value(bytes.len() as u64, 4)?;
                w.write_bytes(bytes)
            })?,
            Command::WriteControllerName(name) => {
                with_writer(NAME_LEN, |w| w.write_string(name, NAME_LEN))?
            }
            Command::WriteControllerCodes { pcb, product } => with_writer(4, |w| {
                w.write_value(*pcb as u64, 2)?;
                w.write_value(*product as u64, 2)
            })?,
            Command::Sleep { duration_ms } => {
                with_writer(4, |w| w.write_value(*duration_ms as u64, 4))?
            }
            Command::ChangeDatarate { bits_per_second } => {
                with_writer(4, |w| w.write_value(*bits_per_second as u64, 4))?
            }
            Command::ReadPinVoltage { pin } | Command::ReadAnalogPin { pin } => vec![*pin],
            Command::WriteTimeline(state) => encode_timeline(state)?,
            Command::AdoptNetwork {
                signature,
                key,
                name,
            } => with_writer(SIGNATURE_LEN + 16 + NAME_LEN, |w| {
                w.write_bytes(signature)?;
                w.write_bytes(key)?;
                w.write_string(name, NAME_LEN)
            })?,
            Command::Execute(bytes) => bytes.clone(),
            Command::ReadConfig
            | Command::ReadControllerInfo
            | Command::ReadConnectedPeers
            | Command::ReadEventHistory
            | Command::EraseEventHistory
            | Command::ReadProgram
            | Command::ReadControllerName
            | Command::ReadControllerCodes
            | Command::ReadNetworkSignature
            | Command::EraseProgram
            | Command::SaveState
            | Command::EraseNetwork
            | Command::ReadProgramFingerprint
            | Command::ReadTimeline
            | Command::EraseTimeline
            | Command::ReadFirmwareVersion
            | Command::Reboot
            | Command::Disconnect => Vec::new(),
        };
        Ok(payload)
    }
}

pub fn encode_timeline(state: &TimelineState) -> Result<Vec<u8>, LinkError> {
    with_writer(6 + 4 + 1, |w| {
        w.write_value(state.clock_ms, 6)?;
        w.write_signed(state.millis as i64, 4)?;
        w.write_flag(u8::from(state.paused))
    })
}

pub fn decode_timeline(reader: &mut TnglReader<'_>) -> Result<TimelineState, LinkError> {
    Ok(TimelineState {
        clock_ms: reader.read_value(6)?,
        millis: reader.read_signed(4)? as i32,
        paused: reader.read_flag()? != 0,
    })
}

/// A decoded response payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Success with nothing to report, also what delivered commands return.
    Ack,
    Config(String),
    ControllerInfo(Box<ControllerInfo>),
    Peers(Vec<Peer>),
    IoVariant(String),
    IoMapping(Vec<i16>),
    EventHistory(Vec<u8>),
    Program(Vec<u8>),
    Name(String),
    Codes { pcb: u16, product: u16 },
    NetworkSignature([u8; SIGNATURE_LEN]),
    PinVoltage { millivolts: i32 },
    AnalogValue(u16),
    ProgramFingerprint(Fingerprint),
    Timeline(TimelineState),
    FirmwareVersion(String),
}

fn read_blob(reader: &mut TnglReader<'_>, width: usize) -> Result<Vec<u8>, LinkError> {
    let len = reader.read_value(width)? as usize;
    Ok(reader.read_bytes(len)?.to_vec())
}

fn utf8(bytes: Vec<u8>) -> Result<String, LinkError> {
    String::from_utf8(bytes).map_err(|e| LinkError::Malformed(format!("invalid utf-8: {}", e)))
}

impl Reply {
    /// Decode the payload of a successful response to `kind`.
    pub fn decode(kind: CommandKind, payload: &[u8]) -> Result<Reply, LinkError> {
        let mut reader = TnglReader::new(payload);
        let reply = match kind {
            CommandKind::ReadConfig => Reply::Config(utf8(read_blob(&mut reader, 4)?)?),
            CommandKind::ReadControllerInfo => {
                Reply::ControllerInfo(Box::new(ControllerInfo::decode(payload)?))
            }
            CommandKind::ReadConnectedPeers => {
                let count = reader.read_value(2)? as usize;
                let mut peers = Vec::with_capacity(count);
                for _ in 0..count {
                    let mut mac = [0u8; 6];
                    mac.copy_from_slice(reader.read_bytes(6)?);
                    let rssi = reader.read_signed(2)? as i16;
                    peers.push(Peer { mac, rssi });
                }
                Reply::Peers(peers)
            }
            CommandKind::ReadIoVariant | CommandKind::WriteIoVariant => {
                Reply::IoVariant(utf8(read_blob(&mut reader, 2)?)?)
            }
            CommandKind::ReadIoMapping | CommandKind::WriteIoMapping => {
                let count = reader.read_value(2)? as usize;
                let mut mapping = Vec::with_capacity(count);
                for _ in 0..count {
                    mapping.push(reader.read_signed(2)? as i16);
                }
                Reply::IoMapping(mapping)
            }
            CommandKind::ReadEventHistory => Reply::EventHistory(read_blob(&mut reader, 4)?),
            CommandKind::ReadProgram => Reply::Program(read_blob(&mut reader, 4)?),
            CommandKind::WriteControllerName
            | CommandKind::ReadControllerName
            | CommandKind::AdoptNetwork => Reply::Name(reader.read_string(NAME_LEN)?),
            CommandKind::ReadControllerCodes | CommandKind::WriteControllerCodes => Reply::Codes {
                pcb: reader.read_value(2)? as u16,
                product: reader.read_value(2)? as u16,
            },
            CommandKind::ReadNetworkSignature => {
                let mut signature = [0u8; SIGNATURE_LEN];
                signature.copy_from_slice(reader.read_bytes(SIGNATURE_LEN)?);
                Reply::NetworkSignature(signature)
            }
            CommandKind::ReadPinVoltage => Reply::PinVoltage {
                millivolts: reader.read_signed(4)? as i32,
            },
            CommandKind::ReadAnalogPin => Reply::AnalogValue(reader.read_value(2)? as u16),
            CommandKind::ReadProgramFingerprint => {
                let mut fingerprint = [0u8; 32];
                fingerprint.copy_from_slice(reader.read_bytes(32)?);
                Reply::ProgramFingerprint(fingerprint)
            }
            CommandKind::ReadTimeline | CommandKind::WriteTimeline | CommandKind::EraseTimeline
                if !payload.is_empty() =>
            {
                Reply::Timeline(decode_timeline(&mut reader)?)
            }
            CommandKind::ReadFirmwareVersion => Reply::FirmwareVersion(reader.read_string(32)?),
            _ => Reply::Ack,
        };
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_resolve_back_to_kinds() {
        for kind in CommandKind::ALL {
            assert_eq!(CommandKind::from_name(kind.name()), Some(*kind));
        }
        assert_eq!(CommandKind::from_name("read-everything"), None);
    }

    #[test]
    fn request_flags_are_unique() {
        let mut flags: Vec<u8> = CommandKind::ALL.iter().map(|k| k.request_flag()).collect();
        flags.sort_unstable();
        flags.dedup();
        assert_eq!(flags.len(), CommandKind::ALL.len());
    }

    #[test]
    fn delivered_commands_have_no_response_flag() {
        assert_eq!(CommandKind::Reboot.response_flag(), None);
        assert_eq!(CommandKind::Execute.response_flag(), None);
        assert_eq!(
            CommandKind::ReadFirmwareVersion.response_flag(),
            Some(FW_VERSION_RESPONSE)
        );
    }

    #[test]
    fn write_program_payload_carries_clock_and_length() {
        let payload = Command::WriteProgram {
            clock_ms: 0x0102,
            bytes: vec![7, 8, 9],
        }
        .encode_payload()
        .unwrap();
        assert_eq!(payload, vec![0x02, 0x01, 0, 0, 0, 0, 3, 0, 0, 0, 7, 8, 9]);
    }

    #[test]
    fn io_labels_are_validated() {
        let err = Command::ReadIoVariant {
            label: "toolong".into(),
        }
        .encode_payload()
        .unwrap_err();
        assert!(matches!(err, LinkError::InvalidArgument(_)));
    }

    #[test]
    fn timeline_layout() {
        let state = TimelineState {
            clock_ms: 1000,
            millis: -5,
            paused: true,
        };
        let bytes = encode_timeline(&state).unwrap();
        assert_eq!(bytes.len(), 11);
        assert_eq!(
            Reply::decode(CommandKind::ReadTimeline, &bytes).unwrap(),
            Reply::Timeline(state)
        );
    }

    #[test]
    fn peers_reply_decodes() {
        let mut payload = vec![2, 0];
        payload.extend_from_slice(&[1, 2, 3, 4, 5, 6]);
        payload.extend_from_slice(&(-40i16).to_le_bytes());
        payload.extend_from_slice(&[6, 5, 4, 3, 2, 1]);
        payload.extend_from_slice(&(-70i16).to_le_bytes());
        let reply = Reply::decode(CommandKind::ReadConnectedPeers, &payload).unwrap();
        assert_eq!(
            reply,
            Reply::Peers(vec![
                Peer {
                    mac: [1, 2, 3, 4, 5, 6],
                    rssi: -40
                },
                Peer {
                    mac: [6, 5, 4, 3, 2, 1],
                    rssi: -70
                },
            ])
        );
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let payload = [10, 0, 0, 0, 1, 2];
        assert!(Reply::decode(CommandKind::ReadProgram, &payload).is_err());
    }
}
