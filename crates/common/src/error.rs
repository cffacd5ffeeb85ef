//! Error taxonomy for the remora pipeline.
//!
//! Only two classes of failure abort a run: a bad fingerprint catalog
//! (matching correctness cannot be guaranteed against a partially invalid
//! catalog) and a capture source that stops producing packets. Everything
//! per-packet or per-session degrades gracefully and is surfaced as a
//! summary count instead.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoraError {
    /// Structurally invalid fingerprint definition. Fatal to the run.
    #[error("malformed fingerprint '{name}': {reason}")]
    MalformedFingerprint { name: String, reason: String },

    /// Two loaded fingerprint definitions share an identifier. Fatal.
    #[error("duplicate fingerprint id '{0}'")]
    DuplicateFingerprintId(String),

    /// Header inconsistent with the declared protocol. Dropped and counted.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// Session endpoints carry no usable identity. Counted, never fatal.
    #[error("session endpoints could not be resolved to an identity")]
    UnresolvableIdentity,

    /// The capture boundary failed to produce packets. Fatal.
    #[error("capture source error: {0}")]
    CaptureSource(String),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl RemoraError {
    /// Whether this error aborts the whole run (vs. being counted).
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            RemoraError::MalformedFingerprint { .. }
                | RemoraError::DuplicateFingerprintId(_)
                | RemoraError::CaptureSource(_)
                | RemoraError::Io(_)
        )
    }
}

/// Result type alias for remora operations.
pub type RemoraResult<T> = Result<T, RemoraError>;
