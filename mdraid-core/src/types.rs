// vim: tw=80
//! Common type definitions used throughout mdraid

use divbuf::{DivBuf, DivBufMut};
use std::{
    collections::TryReserveError,
    fmt,
    io,
};

/// Our `IoVec`.  Unlike the standard library's, ours is reference-counted
/// so it can have more than one owner.
pub type IoVec = DivBuf;

/// Mutable version of `IoVec`.  Uniquely owned.
pub type IoVecMut = DivBufMut;

/// Our scatter-gather list.  A vector of reference-counted `IoVec`s.
pub type SGList = Vec<IoVec>;

/// Mutable version of `SGList`.  Uniquely owned.
pub type SGListMut = Vec<IoVecMut>;

/// mdraid's error type.
///
/// The first four variants are the engine's own statuses; `Io` carries a
/// member disk's error, propagated verbatim.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    /// The array's parity layout code is not one this engine recognizes.
    InvalidDeviceRequest,

    /// A write's offset or length was not sector-aligned.
    InvalidParameter,

    /// An allocation failed.
    InsufficientResources,

    /// The array's chunk size is zero or not a whole number of pages.
    InternalError,

    /// An I/O error returned by a member disk.
    Io(io::ErrorKind),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidDeviceRequest => "invalid device request".fmt(f),
            Error::InvalidParameter => "invalid parameter".fmt(f),
            Error::InsufficientResources => "insufficient resources".fmt(f),
            Error::InternalError => "internal error".fmt(f),
            Error::Io(kind) => write!(f, "member I/O error: {kind}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e.kind())
    }
}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Error::InsufficientResources
    }
}

pub type Result<T = ()> = std::result::Result<T, Error>;

// LCOV_EXCL_STOP
