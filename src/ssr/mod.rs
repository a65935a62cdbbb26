//! SSR codec (C3): typed records, the bit-level RTCM-SSR/IGS-SSR message
//! family, and the lookup tables they share.

pub mod codec;
pub mod records;
pub mod tables;

use thiserror::Error;

use crate::bits::BitError;

/// Error kinds from spec §7, items 4-7 (framing-level errors live in
/// [`crate::frame::FrameError`]).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsrError {
    #[error("unrecognised SSR message number or subtype")]
    UnknownType,

    /// Multi-message group inconsistency: a satellite id outside the
    /// current constellation's offset window, or a field combination the
    /// decoder cannot reconcile.
    #[error("SSR data mismatch in multi-message group")]
    DataMismatch,

    #[error("SSR epoch time mismatch across related messages")]
    TimeMismatch,

    #[error("missing parameter: {0}")]
    MissingParameter(MissingParameterKind),

    /// A decoded subrecord fell outside the range gate (§4.9); the
    /// subrecord is dropped, the surrounding batch proceeds.
    #[error("satellite subrecord outside range gate")]
    RangeViolation,

    #[error(transparent)]
    Bits(#[from] BitError),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingParameterKind {
    #[error("no clock/orbit correction stored for this prn")]
    NoClockOrbit,
    #[error("no code bias stored for this prn")]
    NoCodeBias,
    #[error("no phase bias stored for this prn")]
    NoPhaseBias,
    #[error("no VTEC model stored")]
    NoVtec,
}

pub use codec::{ContentKind, Encoding, MessageId};
