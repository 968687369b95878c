//! Error types for the ChatFusion protocol.
//!
//! Decoding and encoding fail for different reasons and are handled by
//! different parties, so they are kept apart:
//! - [`DecodeError`]: the peer sent bytes we cannot accept. The connection
//!   must be closed; the error is never retried.
//! - [`ProtocolError`]: we were asked to encode a frame the peer would reject.

use thiserror::Error;

/// Reasons an incremental reader gives up on its input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Leading byte does not name a known frame
    #[error("unknown opcode: {0}")]
    UnknownOpcode(u8),

    /// A length or count field is negative
    #[error("negative length: {0}")]
    NegativeLength(i32),

    /// A length-prefixed field declares more bytes than allowed
    #[error("field too long: {len} bytes exceeds maximum {max}")]
    TooLong {
        /// Declared length
        len: usize,
        /// Maximum accepted length
        max: usize,
    },

    /// A list declares more elements than allowed
    #[error("too many elements: {count} exceeds maximum {max}")]
    TooManyElements {
        /// Declared element count
        count: usize,
        /// Maximum accepted count
        max: usize,
    },

    /// String bytes are not valid UTF-8
    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    /// Address kind byte is neither 4 (IPv4) nor 16 (IPv6)
    #[error("invalid address kind: {0}")]
    InvalidAddressKind(u8),

    /// Port does not fit in 16 bits
    #[error("invalid port: {0}")]
    InvalidPort(i32),

    /// File block declares a non-positive block count
    #[error("invalid block count: {0}")]
    InvalidBlockCount(i32),

    /// `process` called on a reader that already finished
    #[error("reader must be reset before reuse")]
    NotReset,
}

/// Errors raised while encoding a frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A string field is longer than the wire format allows
    #[error("{field} too long: {len} bytes exceeds maximum {max}")]
    FieldTooLong {
        /// Name of the offending field
        field: &'static str,
        /// Actual length in bytes
        len: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// A list field has more elements than the wire format allows
    #[error("{field} has too many elements: {count} exceeds maximum {max}")]
    ListTooLong {
        /// Name of the offending field
        field: &'static str,
        /// Actual element count
        count: usize,
        /// Maximum allowed count
        max: usize,
    },

    /// File block payload is larger than one block
    #[error("file block too large: {size} bytes exceeds maximum {max}")]
    BlockTooLarge {
        /// Actual payload size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// File block count must be positive
    #[error("invalid block count: {0}")]
    InvalidBlockCount(i32),
}

/// Convenient Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
