//! Controller-info response payload.
//!
//! ```text
//!  name            16   NUL-padded
//!  label            6
//!  mac              6
//!  flags            1   bit 0 = commissionable
//!  reserved         1
//!  pcb code         2
//!  product code     2
//!  fw version code  2
//!  fw platform      2
//!  compile time     8   unix millis
//!  reserved         8
//!  fw version      32   NUL-padded
//!  program fp      32
//!  history fp      32
//!  config fp       32
//!  network sig     16
//!  -- extended, only when >= 160 bytes remain --
//!  reserved        16
//!  extra fp     32 x 5
//! ```

use tngl_compiler::{TnglReader, TnglWriter};

use crate::error::LinkError;

pub type Fingerprint = [u8; 32];

pub const NAME_LEN: usize = 16;
pub const LABEL_LEN: usize = 6;
pub const FW_VERSION_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 16;

/// Size of the fields every firmware sends.
pub const BASE_LEN: usize = 16 + 6 + 6 + 1 + 1 + 2 + 2 + 2 + 2 + 8 + 8 + 32 + 32 * 3 + 16;
/// Remaining bytes needed before the extended block is read.
pub const EXTENDED_GATE: usize = 160;
pub const EXTRA_FINGERPRINTS: usize = 5;

const COMMISSIONABLE: u8 = 0b0000_0001;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ControllerInfo {
    pub name: String,
    pub label: String,
    pub mac: [u8; 6],
    pub commissionable: bool,
    pub pcb_code: u16,
    pub product_code: u16,
    pub fw_version_code: u16,
    pub fw_platform_code: u16,
    pub fw_compilation_unix: u64,
    pub fw_version: String,
    pub program_fingerprint: Fingerprint,
    pub event_history_fingerprint: Fingerprint,
    pub config_fingerprint: Fingerprint,
    pub network_signature: [u8; SIGNATURE_LEN],
    /// Present only on firmware that sends the extended block.
    pub extra_fingerprints: Vec<Fingerprint>,
}

fn array<const N: usize>(reader: &mut TnglReader<'_>) -> Result<[u8; N], LinkError> {
    let mut out = [0u8; N];
    out.copy_from_slice(reader.read_bytes(N)?);
    Ok(out)
}

impl ControllerInfo {
    pub fn decode(payload: &[u8]) -> Result<Self, LinkError> {
        let mut reader = TnglReader::new(payload);

        let name = reader.read_string(NAME_LEN)?;
        let label = reader.read_string(LABEL_LEN)?;
        let mac = array::<6>(&mut reader)?;
        let flags = reader.read_flag()?;
        reader.forward(1)?;
        let pcb_code = reader.read_value(2)? as u16;
        let product_code = reader.read_value(2)? as u16;
        let fw_version_code = reader.read_value(2)? as u16;
        let fw_platform_code = reader.read_value(2)? as u16;
        let fw_compilation_unix = reader.read_value(8)?;
        reader.forward(8)?;
        let fw_version = reader.read_string(FW_VERSION_LEN)?;
        let program_fingerprint = array::<32>(&mut reader)?;
        let event_history_fingerprint = array::<32>(&mut reader)?;
        let config_fingerprint = array::<32>(&mut reader)?;
        let network_signature = array::<SIGNATURE_LEN>(&mut reader)?;

        let mut extra_fingerprints = Vec::new();
        if reader.available() >= EXTENDED_GATE {
            reader.forward(16)?;
            while extra_fingerprints.len() < EXTRA_FINGERPRINTS && reader.available() >= 32 {
                extra_fingerprints.push(array::<32>(&mut reader)?);
            }
        }

        Ok(Self {
            name,
            label,
            mac,
            commissionable: flags & COMMISSIONABLE != 0,
            pcb_code,
            product_code,
            fw_version_code,
            fw_platform_code,
            fw_compilation_unix,
            fw_version,
            program_fingerprint,
            event_history_fingerprint,
            config_fingerprint,
            network_signature,
            extra_fingerprints,
        })
    }

    /// Serialise in controller layout. Extended block is written when
    /// `extra_fingerprints` is not empty.
    pub fn encode(&self) -> Result<Vec<u8>, LinkError> {
        let extended = if self.extra_fingerprints.is_empty() {
            0
        } else {
            16 + 32 * EXTRA_FINGERPRINTS
        };
        let mut writer = TnglWriter::with_capacity(BASE_LEN + extended);
        writer.write_string(&self.name, NAME_LEN)?;
        writer.write_string(&self.label, LABEL_LEN)?;
        writer.write_bytes(&self.mac)?;
        writer.write_flag(if self.commissionable { COMMISSIONABLE } else { 0 })?;
        writer.write_flag(0)?;
        writer.write_value(self.pcb_code as u64, 2)?;
        writer.write_value(self.product_code as u64, 2)?;
        writer.write_value(self.fw_version_code as u64, 2)?;
        writer.write_value(self.fw_platform_code as u64, 2)?;
        writer.write_value(self.fw_compilation_unix, 8)?;
        writer.write_bytes(&[0u8; 8])?;
        writer.write_string(&self.fw_version, FW_VERSION_LEN)?;
        writer.write_bytes(&self.program_fingerprint)?;
        writer.write_bytes(&self.event_history_fingerprint)?;
        writer.write_bytes(&self.config_fingerprint)?;
        writer.write_bytes(&self.network_signature)?;
        if extended > 0 {
            writer.write_bytes(&[0u8; 16])?;
            for index in 0..EXTRA_FINGERPRINTS {
                let fp = self.extra_fingerprints.get(index).copied().unwrap_or([0u8; 32]);
                writer.write_bytes(&fp)?;
            }
        }
        Ok(writer.into_bytes())
    }

    pub fn mac_string(&self) -> String {
        format_mac(&self.mac)
    }
}

pub fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Parse `aa:bb:cc:dd:ee:ff`.
pub fn parse_mac(text: &str) -> Result<[u8; 6], LinkError> {
    let mut mac = [0u8; 6];
    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() != 6 {
        return Err(LinkError::InvalidArgument(format!("bad mac address: {}", text)));
    }
    for (slot, part) in mac.iter_mut().zip(parts) {
        *slot = u8::from_str_radix(part, 16)
            .map_err(|_| LinkError::InvalidArgument(format!("bad mac address: {}", text)))?;
    }
    Ok(mac)
}
