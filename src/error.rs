//! Error types for HEVC picture reconstruction

use alloc::string::String;
use core::fmt;
use enough::StopReason;
use whereat::At;

/// Result type for decoder operations, with error location tracking.
///
/// Errors carry a trace of where they were created and propagated,
/// accessible via [`At::full_trace()`] or [`At::last_error_trace()`].
pub type Result<T> = core::result::Result<T, At<DecodeError>>;

/// Errors surfaced by the public decoder API
#[derive(Debug)]
#[non_exhaustive]
pub enum DecodeError {
    /// HEVC syntax or reconstruction error
    Hevc(HevcError),
    /// A resource limit was exceeded (dimensions or pixel count)
    LimitExceeded(&'static str),
    /// Operation was cancelled via cooperative cancellation
    Cancelled(StopReason),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hevc(e) => write!(f, "HEVC decode error: {e}"),
            Self::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            Self::Cancelled(reason) => write!(f, "{reason}"),
        }
    }
}

impl core::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Hevc(e) => Some(e),
            _ => None,
        }
    }
}

impl From<HevcError> for DecodeError {
    fn from(e: HevcError) -> Self {
        match e {
            HevcError::Cancelled(r) => Self::Cancelled(r),
            other => Self::Hevc(other),
        }
    }
}

impl From<StopReason> for DecodeError {
    fn from(r: StopReason) -> Self {
        Self::Cancelled(r)
    }
}

// Two-hop conversion for ? operator: HevcError → At<DecodeError>
impl From<HevcError> for At<DecodeError> {
    #[track_caller]
    fn from(e: HevcError) -> Self {
        At::from(DecodeError::from(e))
    }
}

/// Check a `Stop` token from inside the decode loops.
pub(crate) fn check_stop(stop: &dyn enough::Stop) -> core::result::Result<(), HevcError> {
    stop.check().map_err(HevcError::Cancelled)
}

/// Errors raised while parsing and reconstructing slice segment data
#[derive(Debug)]
#[non_exhaustive]
pub enum HevcError {
    /// Malformed or truncated slice data
    InvalidBitstream(&'static str),
    /// A decoded syntax element is outside its legal range
    SyntaxOutOfRange {
        /// Syntax element name
        element: &'static str,
        /// Decoded value
        value: i64,
    },
    /// Arithmetic decoder ran out of data or lost synchronization
    CabacError(&'static str),
    /// An end-of-substream marker was not found where the layout requires one
    MissingTerminator,
    /// The stream uses a coding tool whose capability flag is not enabled
    CapabilityMismatch(&'static str),
    /// Invalid configuration handed in by the caller
    InvalidParameter {
        /// Parameter set or structure (e.g. "SPS", "slice header")
        kind: &'static str,
        /// Description of the issue
        msg: String,
    },
    /// Coding tool outside the supported profile space
    Unsupported(&'static str),
    /// A progress wait was aborted because the producing picture was abandoned
    Poisoned,
    /// Decoding stopped by the caller's stop token
    Cancelled(StopReason),
}

impl fmt::Display for HevcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBitstream(msg) => write!(f, "invalid bitstream: {msg}"),
            Self::SyntaxOutOfRange { element, value } => {
                write!(f, "{element} out of range: {value}")
            }
            Self::CabacError(msg) => write!(f, "CABAC error: {msg}"),
            Self::MissingTerminator => write!(f, "missing end of substream marker"),
            Self::CapabilityMismatch(tool) => {
                write!(f, "{tool} used without the matching capability")
            }
            Self::InvalidParameter { kind, msg } => write!(f, "invalid {kind}: {msg}"),
            Self::Unsupported(msg) => write!(f, "unsupported: {msg}"),
            Self::Poisoned => write!(f, "waited on a picture that was abandoned"),
            Self::Cancelled(reason) => write!(f, "{reason}"),
        }
    }
}

impl core::error::Error for HevcError {}
