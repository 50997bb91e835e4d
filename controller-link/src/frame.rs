//! Wire-format of request and response frames.
//!
//! No I/O happens here; this is pure data transformation over the shared
//! little-endian codec.
//!
//! # Wire format
//!
//! ```text
//!  request   [flag:u8][correlation_id:u32][payload ...]
//!  response  [flag:u8][correlation_id:u32][error_code:u8][payload ...]
//!  delivered [flag:u8][payload ...]                      (no reply)
//!  legacy    [0xFF]                                      (unsupported)
//! ```

use tngl_compiler::{TnglReader, TnglWriter};

use crate::error::LinkError;
use crate::flags;

/// Bytes in front of a request payload.
pub const REQUEST_HEADER_LEN: usize = 1 + 4;
/// Bytes in front of a response payload.
pub const RESPONSE_HEADER_LEN: usize = 1 + 4 + 1;

/// Build `[flag][id][payload]`.
pub fn encode_request(flag: u8, correlation_id: u32, payload: &[u8]) -> Vec<u8> {
    let mut writer = TnglWriter::with_capacity(REQUEST_HEADER_LEN + payload.len());
    // Capacity is exact, so none of these writes can run out of room.
    let _ = writer.write_flag(flag);
    let _ = writer.write_value(correlation_id as u64, 4);
    let _ = writer.write_bytes(payload);
    writer.into_bytes()
}

/// Build a frame without correlation id, used for delivered commands.
pub fn encode_delivery(flag: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + payload.len());
    frame.push(flag);
    frame.extend_from_slice(payload);
    frame
}

/// Build `[flag][id][error][payload]`; the controller side of an exchange.
pub fn encode_response(flag: u8, correlation_id: u32, error_code: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(RESPONSE_HEADER_LEN + payload.len());
    frame.push(flag);
    frame.extend_from_slice(&correlation_id.to_le_bytes());
    frame.push(error_code);
    frame.extend_from_slice(payload);
    frame
}

/// A request as seen by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame<'a> {
    pub flag: u8,
    pub correlation_id: u32,
    pub payload: &'a [u8],
}

impl<'a> RequestFrame<'a> {
    pub fn decode(bytes: &'a [u8]) -> Result<Self, LinkError> {
        let mut reader = TnglReader::new(bytes);
        let flag = reader.read_flag()?;
        let correlation_id = reader.read_value(4)? as u32;
        let payload = reader.read_bytes(reader.available())?;
        Ok(Self {
            flag,
            correlation_id,
            payload,
        })
    }
}

/// Check a response against the request it answers and return its payload.
///
/// Order of checks: legacy marker, flag, correlation id, error code.
pub fn validate_response(
    bytes: &[u8],
    expected_flag: u8,
    expected_id: u32,
) -> Result<Vec<u8>, LinkError> {
    if bytes == [flags::UNSUPPORTED_MARKER] {
        return Err(LinkError::Unsupported);
    }
    let mut reader = TnglReader::new(bytes);

    let flag = reader.read_flag()?;
    if flag != expected_flag {
        return Err(LinkError::InvalidResponseFlag {
            expected: expected_flag,
            got: flag,
        });
    }

    let id = reader.read_value(4)? as u32;
    if id != expected_id {
        return Err(LinkError::InvalidResponseUuid {
            expected: expected_id,
            got: id,
        });
    }

    let code = reader.read_flag()?;
    if code != flags::SUCCESS {
        return Err(LinkError::Fail { flag, code });
    }

    Ok(reader.read_bytes(reader.available())?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tngl_compiler::CodecError;

    #[test]
    fn request_layout_is_flag_id_payload() {
        let frame = encode_request(242, 0x0403_0201, &[9, 9]);
        assert_eq!(frame, vec![242, 1, 2, 3, 4, 9, 9]);
        let decoded = RequestFrame::decode(&frame).unwrap();
        assert_eq!(decoded.flag, 242);
        assert_eq!(decoded.correlation_id, 0x0403_0201);
        assert_eq!(decoded.payload, &[9, 9]);
    }

    #[test]
    fn valid_response_yields_payload() {
        let frame = encode_response(243, 77, 0, b"0.12.4");
        assert_eq!(validate_response(&frame, 243, 77).unwrap(), b"0.12.4".to_vec());
    }

    #[test]
    fn flag_is_checked_before_id() {
        let frame = encode_response(200, 1, 0, &[]);
        assert_eq!(
            validate_response(&frame, 243, 2),
            Err(LinkError::InvalidResponseFlag {
                expected: 243,
                got: 200
            })
        );
    }

    #[test]
    fn id_is_checked_before_error_code() {
        let frame = encode_response(243, 1, 5, &[]);
        assert_eq!(
            validate_response(&frame, 243, 2),
            Err(LinkError::InvalidResponseUuid {
                expected: 2,
                got: 1
            })
        );
        assert_eq!(
            validate_response(&frame, 243, 1),
            Err(LinkError::Fail { flag: 243, code: 5 })
        );
    }

    #[test]
    fn legacy_marker_means_unsupported() {
        assert_eq!(validate_response(&[0xFF], 183, 1), Err(LinkError::Unsupported));
    }

    #[test]
    fn truncated_response_is_a_codec_error() {
        assert!(matches!(
            validate_response(&[243, 1, 0], 243, 1),
            Err(LinkError::Codec(CodecError::OutOfBounds { .. }))
        ));
        assert!(matches!(
            validate_response(&[], 243, 1),
            Err(LinkError::Codec(_))
        ));
    }
}
