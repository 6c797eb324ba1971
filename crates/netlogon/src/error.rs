//! Error types for the LDAP ping client

use std::net::SocketAddr;

use thiserror::Error;

use crate::flags::NetlogonNtVersion;

/// Errors produced while decoding LDAP ping responses and Netlogon
/// structures.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Buffer underflow - not enough data
    #[error("buffer underflow: needed {needed} bytes, have {have}")]
    BufferUnderflow { needed: usize, have: usize },

    #[error("invalid BER length")]
    InvalidLength,

    #[error("unexpected tag: expected 0x{expected:02X}, got 0x{got:02X}")]
    UnexpectedTag { expected: u8, got: u8 },

    #[error("integer value too large: {0} bytes")]
    IntegerTooLarge(usize),

    #[error("unsupported LDAP message protocol operation: {0}")]
    UnsupportedProtocolOp(u8),

    #[error("LDAP response did not contain a successful result")]
    MissingSearchResultDone,

    /// SearchResultDone carried a non-zero result code.
    #[error("LDAP operation was not successful ({code}){}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    LdapResult { code: i64, message: Option<String> },

    #[error("invalid opcode value: {0}")]
    InvalidOpcode(u16),

    #[error("NtVersion must contain [{expected}], but contains [{got}]")]
    NtVersionMismatch {
        expected: NetlogonNtVersion,
        got: NetlogonNtVersion,
    },

    #[error("buffer contains unterminated Unicode string")]
    UnterminatedUnicodeString,

    #[error("domain label longer ({len}) than bytes in buffer ({remaining})")]
    LabelTooLong { len: usize, remaining: usize },

    #[error("domain name pointer offset ({offset}) beyond current position ({max})")]
    PointerOutOfRange { offset: usize, max: usize },

    #[error("invalid domain name label type: 0x{0:02X}")]
    InvalidLabelType(u8),

    #[error("required field '{0}' is missing")]
    MissingField(&'static str),

    #[error("{0} must be non-zero")]
    ZeroLmToken(&'static str),

    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),

    #[error("UTF-16 error: {0}")]
    Utf16Error(#[from] std::char::DecodeUtf16Error),
}

/// LDAP ping errors
#[derive(Debug, Error)]
pub enum NetlogonError {
    #[error("unknown host name: {host}")]
    UnknownHost {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create/configure socket for {addr}")]
    Socket {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to connect to {addr}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send to {addr}")]
    Send {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to receive from {addr}")]
    Receive {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("no LDAP ping response received from {0}")]
    EmptyResponse(SocketAddr),

    #[error("connection to {0} has been closed")]
    ConnectionClosed(SocketAddr),

    #[error("failed to decode LDAP response")]
    Decode(#[from] DecodeError),

    #[error("LDAP ping response from {0} did not contain Netlogon attribute")]
    NoSuchAttribute(SocketAddr),
}

pub type Result<T> = std::result::Result<T, NetlogonError>;
