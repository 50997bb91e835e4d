//! Opcode bytes of the controller wire protocol.
//!
//! Request and response flags are separate values; a response always carries
//! its own flag, never the request's.  Values are fixed by controller
//! firmware.

/* OTA, delivered without correlation id */
pub const OTA_WRITE: u8 = 0;
pub const OTA_RESET: u8 = 253;
pub const OTA_END: u8 = 254;
pub const OTA_BEGIN: u8 = 255;

/* fire-and-confirm */
pub const REBOOT: u8 = 5;
pub const DISCONNECT: u8 = 6;
pub const EXECUTE: u8 = 170;

/* request / response pairs */
pub const WRITE_CONFIG_REQUEST: u8 = 10;
pub const WRITE_CONFIG_RESPONSE: u8 = 11;
pub const READ_CONFIG_REQUEST: u8 = 180;
pub const READ_CONFIG_RESPONSE: u8 = 181;
pub const CONTROLLER_INFO_REQUEST: u8 = 182;
pub const CONTROLLER_INFO_RESPONSE: u8 = 183;
pub const CONNECTED_PEERS_REQUEST: u8 = 184;
pub const CONNECTED_PEERS_RESPONSE: u8 = 185;
pub const READ_IO_VARIANT_REQUEST: u8 = 186;
pub const READ_IO_VARIANT_RESPONSE: u8 = 187;
pub const WRITE_IO_VARIANT_REQUEST: u8 = 188;
pub const WRITE_IO_VARIANT_RESPONSE: u8 = 189;
pub const READ_IO_MAPPING_REQUEST: u8 = 190;
pub const READ_IO_MAPPING_RESPONSE: u8 = 191;
pub const WRITE_IO_MAPPING_REQUEST: u8 = 192;
pub const WRITE_IO_MAPPING_RESPONSE: u8 = 193;
pub const READ_EVENT_HISTORY_REQUEST: u8 = 194;
pub const READ_EVENT_HISTORY_RESPONSE: u8 = 195;
pub const ERASE_EVENT_HISTORY_REQUEST: u8 = 196;
pub const ERASE_EVENT_HISTORY_RESPONSE: u8 = 197;
pub const READ_PROGRAM_REQUEST: u8 = 198;
pub const READ_PROGRAM_RESPONSE: u8 = 199;
pub const WRITE_PROGRAM_REQUEST: u8 = 200;
pub const WRITE_PROGRAM_RESPONSE: u8 = 201;
pub const WRITE_CONTROLLER_NAME_REQUEST: u8 = 202;
pub const WRITE_CONTROLLER_NAME_RESPONSE: u8 = 203;
pub const READ_CONTROLLER_NAME_REQUEST: u8 = 204;
pub const READ_CONTROLLER_NAME_RESPONSE: u8 = 205;
pub const READ_CONTROLLER_CODES_REQUEST: u8 = 209;
pub const READ_CONTROLLER_CODES_RESPONSE: u8 = 210;
pub const WRITE_CONTROLLER_CODES_REQUEST: u8 = 211;
pub const WRITE_CONTROLLER_CODES_RESPONSE: u8 = 212;
pub const NETWORK_SIGNATURE_REQUEST: u8 = 213;
pub const NETWORK_SIGNATURE_RESPONSE: u8 = 214;
pub const ERASE_PROGRAM_REQUEST: u8 = 215;
pub const ERASE_PROGRAM_RESPONSE: u8 = 216;
pub const SLEEP_REQUEST: u8 = 217;
pub const SLEEP_RESPONSE: u8 = 218;
pub const SAVE_STATE_REQUEST: u8 = 219;
pub const SAVE_STATE_RESPONSE: u8 = 220;
pub const CHANGE_DATARATE_REQUEST: u8 = 221;
pub const CHANGE_DATARATE_RESPONSE: u8 = 222;
pub const PIN_VOLTAGE_REQUEST: u8 = 223;
pub const PIN_VOLTAGE_RESPONSE: u8 = 224;
pub const ANALOG_PIN_REQUEST: u8 = 225;
pub const ANALOG_PIN_RESPONSE: u8 = 226;
pub const ERASE_NETWORK_REQUEST: u8 = 230;
pub const ERASE_NETWORK_RESPONSE: u8 = 231;
pub const PROGRAM_FINGERPRINT_REQUEST: u8 = 232;
pub const PROGRAM_FINGERPRINT_RESPONSE: u8 = 233;
pub const READ_TIMELINE_REQUEST: u8 = 234;
pub const READ_TIMELINE_RESPONSE: u8 = 235;
pub const WRITE_TIMELINE_REQUEST: u8 = 236;
pub const WRITE_TIMELINE_RESPONSE: u8 = 237;
pub const ERASE_TIMELINE_REQUEST: u8 = 238;
pub const ERASE_TIMELINE_RESPONSE: u8 = 239;
pub const ADOPT_NETWORK_REQUEST: u8 = 240;
pub const ADOPT_NETWORK_RESPONSE: u8 = 241;
pub const FW_VERSION_REQUEST: u8 = 242;
pub const FW_VERSION_RESPONSE: u8 = 243;

/// One-byte response sent by firmware that does not know the request.
pub const UNSUPPORTED_MARKER: u8 = 0xFF;

/// Device error code meaning success.
pub const SUCCESS: u8 = 0;
