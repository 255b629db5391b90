//! Crate-wide error type.
//!
//! The error categories mirror the three-way split used by the protocol this
//! crate ports: a shared set of codec errors, a client-specific set, and a
//! single server-specific variant. They are folded into one enum here since
//! Rust has no direct analogue to three independent `std::error_category`
//! objects sharing a call site — each variant's doc comment notes which
//! group it came from.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ModbusError>;

/// Errors surfaced by the codec, the client, and the server.
#[derive(Error, Debug)]
pub enum ModbusError {
    /// Shared: the requested action is not yet supported.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Shared: an internal invariant was violated. Distinct from malformed
    /// wire input, which gets its own variant.
    #[error("internal error: {0}")]
    Internal(String),

    /// Shared: a request or response did not conform to the MODBUS wire
    /// format (short buffer, bad byte count, unrecognized function or
    /// exception code, non-zero protocol id, ...).
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Shared: reserved for a serial (RTU) transport's CRC check. This crate
    /// is TCP-only and never constructs this variant, but it is kept in the
    /// enum so error handling written against this crate also compiles
    /// against a serial sibling.
    #[error("CRC check failed")]
    CrcCheckFailed,

    /// Shared: reserved for a serial (ASCII) transport's LRC check. See
    /// [`ModbusError::CrcCheckFailed`].
    #[error("LRC check failed")]
    LrcCheckFailed,

    /// Client: the timeout for writing the request expired.
    #[error("write timed out")]
    WriteTimeout,

    /// Client: the timeout for reading a response expired.
    #[error("read timed out")]
    ReadTimeout,

    /// Client: a response was received that failed [`crate::client::validate_response`]
    /// (mismatched transaction id, mismatched function code, or a broken
    /// echo on a single-coil/single-register write).
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Client: the connection was closed, by the peer or as a result of an
    /// I/O failure.
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// Client: the client (or its connection pool) has been stopped; no
    /// further requests should be sent.
    #[error("client stopped")]
    Stopped,

    /// Server: admitting this session would exceed the session manager's
    /// configured cap.
    #[error("exceeded max sessions")]
    ExceededMaxSessions,

    /// An I/O failure not otherwise classified by one of the variants
    /// above.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
