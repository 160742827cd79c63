// SPDX-License-Identifier: MPL-2.0

/// The error type which is returned from the APIs of this crate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
    /// Invalid arguments provided.
    InvalidArgs,
    /// Insufficient memory available.
    NoMemory,
    /// A bounded table or id space is exhausted.
    NotEnoughResources,
    /// No free vector region is left in an allocator window.
    NoSpace,
    /// The resource is in use and the request is refused.
    Busy,
    /// The device or controller is not present.
    NoDevice,
    /// Permission denied.
    AccessDenied,
    /// The operation is not supported by the controller.
    NotSupported,
}

impl Error {
    /// Returns the negative errno value used by C-style callers.
    pub const fn as_errno(self) -> i32 {
        match self {
            Error::InvalidArgs => -22,
            Error::NoMemory => -12,
            Error::NotEnoughResources => -11,
            Error::NoSpace => -28,
            Error::Busy => -16,
            Error::NoDevice => -19,
            Error::AccessDenied => -13,
            Error::NotSupported => -95,
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(self, f)
    }
}
