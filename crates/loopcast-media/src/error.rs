//! Error types for loopcast-media.

use crate::atom::AtomType;
use std::io;
use thiserror::Error;

/// Result type for loopcast-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Framing errors raised while splitting or validating an atom stream.
///
/// Every variant except `Io` means the byte stream no longer follows the
/// expected box grammar. None of them is recoverable: skipping bytes would
/// desynchronise all later framing.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An atom arrived where a different type was required.
    #[error("received unexpected atom '{found}' while expecting '{expected}'")]
    UnexpectedAtom { expected: AtomType, found: AtomType },

    /// The stream ended inside an atom payload.
    #[error("atom '{atom_type}' truncated: need {need} bytes, have {have}")]
    Truncated {
        atom_type: AtomType,
        need: u64,
        have: u64,
    },

    /// The declared atom length cannot describe a box.
    #[error("invalid size {size} for atom '{atom_type}'")]
    InvalidAtomSize { atom_type: AtomType, size: u64 },

    /// The declared atom length exceeds the configured ceiling.
    #[error("atom '{atom_type}' size {size} exceeds maximum {max}")]
    AtomTooLarge {
        atom_type: AtomType,
        size: u64,
        max: u64,
    },
}

impl Error {
    /// Create an unexpected atom error.
    pub fn unexpected(expected: AtomType, found: AtomType) -> Self {
        Self::UnexpectedAtom { expected, found }
    }

    /// Whether this error is a framing violation rather than an I/O failure.
    pub fn is_framing(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}
