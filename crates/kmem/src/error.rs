//! Error types shared by both allocators.

use core::fmt;

use snafu::{GenerateImplicitData, Snafu};

/// Source location where an error was raised.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Location(&'static core::panic::Location<'static>);

impl Default for Location {
    #[track_caller]
    fn default() -> Self {
        Self(core::panic::Location::caller())
    }
}

impl GenerateImplicitData for Location {
    #[track_caller]
    fn generate() -> Self {
        Self::default()
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Coarse classification of an [`AllocError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorKind {
    /// Zero size or count, bad alignment, or a malformed range.
    InvalidArgument = 1,
    /// The allocator could not find or obtain enough memory.
    OutOfMemory = 2,
    /// A pointer was released that the allocator does not track as live.
    ProtocolViolation = 3,
}

impl ErrorKind {
    pub(crate) const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::InvalidArgument),
            2 => Some(Self::OutOfMemory),
            3 => Some(Self::ProtocolViolation),
            _ => None,
        }
    }
}

/// Failure reported by either allocator.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AllocError {
    #[snafu(display("invalid argument: {reason}"))]
    InvalidArgument {
        reason: &'static str,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("out of memory"))]
    OutOfMemory {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("pointer {addr:#x} is not a live allocation"))]
    ProtocolViolation {
        addr: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

impl AllocError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            Self::ProtocolViolation { .. } => ErrorKind::ProtocolViolation,
        }
    }

    #[must_use]
    pub fn location(&self) -> Location {
        match self {
            Self::InvalidArgument { location, .. }
            | Self::OutOfMemory { location }
            | Self::ProtocolViolation { location, .. } => *location,
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    fn raise() -> Result<(), AllocError> {
        ProtocolViolationSnafu { addr: 0x1000_usize }.fail()
    }

    #[test]
    fn test_kind_and_display() {
        let err = raise().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
        assert_eq!(err.to_string(), "pointer 0x1000 is not a live allocation");

        let err = InvalidArgumentSnafu {
            reason: "slot size must be non-zero",
        }
        .build();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.to_string(), "invalid argument: slot size must be non-zero");
    }

    #[test]
    fn test_location_points_at_raise_site() {
        let err = raise().unwrap_err();
        assert!(err.location().to_string().contains("error.rs"));
    }

    #[test]
    fn test_kind_raw_round_trip() {
        for kind in [
            ErrorKind::InvalidArgument,
            ErrorKind::OutOfMemory,
            ErrorKind::ProtocolViolation,
        ] {
            assert_eq!(ErrorKind::from_raw(kind as u8), Some(kind));
        }
        assert_eq!(ErrorKind::from_raw(0), None);
    }
}
