//! # Error Types
//!
//! Error handling for the handshake core.
//!
//! Every failure is scoped to a single datagram or a single peer session; nothing in
//! this crate is allowed to take the host process down. Each variant therefore carries a
//! [`Disposition`] telling the transport what to do with the offending session.
//!
//! ## Error Categories
//! - **Codec Errors**: short buffers, wrong packet type, out-of-order init stage
//! - **Handshake Errors**: unparseable commands, malformed Omega keys, bad key material
//! - **Attack Indicators**: failed puzzle proof, failed signature proof
//! - **Cryptographic Errors**: AEAD tag mismatch
//!
//! ## Example Usage
//! ```rust
//! use tsproto_handshake::error::{Disposition, ProtocolError};
//!
//! let err = ProtocolError::Incomplete { actual: 12, expected: "= 34" };
//! assert_eq!(err.disposition(), Disposition::DropDatagram);
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Handshake state errors
    pub const ERR_NO_CHALLENGE: &str = "No puzzle challenge issued for this session";
    pub const ERR_NO_OMEGA: &str = "Client omega key not received";
    pub const ERR_NO_BETA: &str = "Server beta not generated";
    pub const ERR_NO_SHARED_IV: &str = "Shared IV not derived";
    pub const ERR_SESSION_CLOSED: &str = "Session is no longer accepting packets";

    /// Command errors
    pub const ERR_EMPTY_COMMAND: &str = "empty command payload";
    pub const ERR_NOT_UTF8: &str = "command payload is not valid UTF-8";

    /// Key material errors
    pub const ERR_INVALID_POINT: &str = "Bytes do not encode a valid curve point";
    pub const ERR_ALPHA_TOO_LONG: &str = "alpha exceeds the 64-byte shared IV";
    pub const ERR_BETA_TOO_LONG: &str = "beta exceeds the 54 bytes available after offset 10";
    pub const ERR_ZERO_MODULUS: &str = "Puzzle modulus is zero";
}

/// What the transport should do with the session after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Drop the datagram and keep the session in its current state.
    DropDatagram,
    /// Abort this peer's handshake.
    AbortSession,
    /// Abort this peer's handshake; the failure points at a forged or replayed flow.
    Attack,
}

// ProtocolError is the primary error type for all handshake operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("packet incomplete, size: {actual} but expect {expected}")]
    Incomplete {
        actual: usize,
        expected: &'static str,
    },

    #[error("packet type unmatched, type: {actual} but expect {expected}")]
    TypeMismatch { actual: u8, expected: u8 },

    #[error("low-level init packet disorder, stage: {actual} but expect {expected}")]
    StageDisorder { actual: u8, expected: u8 },

    #[error("Echoed handshake cookie does not match")]
    CookieMismatch,

    #[error("invalid command, reason: {0}")]
    InvalidCommand(String),

    #[error("Malformed omega key: {0}")]
    MalformedOmega(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Puzzle verification failed")]
    PuzzleVerificationFailed,

    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Session aborted")]
    SessionAborted,

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Transport error: {0}")]
    TransportError(String),
}

impl ProtocolError {
    /// Classify the error into the per-datagram / per-session taxonomy.
    pub fn disposition(&self) -> Disposition {
        match self {
            ProtocolError::Incomplete { .. }
            | ProtocolError::TypeMismatch { .. }
            | ProtocolError::StageDisorder { .. }
            | ProtocolError::CookieMismatch
            | ProtocolError::DecryptionFailure
            | ProtocolError::Io(_)
            | ProtocolError::TransportError(_) => Disposition::DropDatagram,

            ProtocolError::PuzzleVerificationFailed
            | ProtocolError::SignatureVerificationFailed => Disposition::Attack,

            ProtocolError::InvalidCommand(_)
            | ProtocolError::MalformedOmega(_)
            | ProtocolError::InvalidKey(_)
            | ProtocolError::EncryptionFailure
            | ProtocolError::UnexpectedMessage(_)
            | ProtocolError::SessionAborted
            | ProtocolError::HandshakeError(_)
            | ProtocolError::ConfigError(_) => Disposition::AbortSession,
        }
    }

    /// True when the session must not process any further datagrams.
    pub fn is_session_fatal(&self) -> bool {
        self.disposition() != Disposition::DropDatagram
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
