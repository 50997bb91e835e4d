//! Error type shared by every layer of the link.
//!
//! Variants are grouped the way callers react to them:
//! - framing: the response bytes were wrong for this request,
//! - transport: nothing (usable) came back, or the link dropped,
//! - device: the frame was fine but the controller reported a failure,
//! - session: a multi-step sequence (connect, OTA) gave up.

use std::time::Duration;

use thiserror::Error;
use tngl_compiler::{CodecError, CompileError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    // -- framing -----------------------------------------------------------
    #[error("invalid response flag: expected {expected}, got {got}")]
    InvalidResponseFlag { expected: u8, got: u8 },
    #[error("invalid response uuid: expected {expected:#010x}, got {got:#010x}")]
    InvalidResponseUuid { expected: u32, got: u32 },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("codec: {0}")]
    Codec(#[from] CodecError),

    // -- transport ---------------------------------------------------------
    #[error("no response received")]
    NoResponseReceived,
    #[error("request {flag} timed out after {after:?}")]
    Timeout { flag: u8, after: Duration },
    #[error("disconnected")]
    Disconnected,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("no transport assigned")]
    NoTransport,
    #[error("not connected")]
    NotConnected,

    // -- device ------------------------------------------------------------
    #[error("controller rejected flag {flag} with error code {code}")]
    Fail { flag: u8, code: u8 },
    #[error("command not supported by controller firmware")]
    Unsupported,

    // -- session -----------------------------------------------------------
    #[error("no controller matched the selection criteria")]
    SelectionFailed,
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("a firmware update is already running")]
    Busy,
    #[error("firmware rejected: {0}")]
    FirmwareRejected(String),
    #[error("firmware update failed during {step}: {reason}")]
    Ota { step: &'static str, reason: String },

    // -- caller ------------------------------------------------------------
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("compile: {0}")]
    Compile(#[from] CompileError),
}

impl LinkError {
    /// Errors that mean the link itself is gone rather than one request
    /// having gone wrong.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, LinkError::Disconnected | LinkError::NotConnected)
    }
}
