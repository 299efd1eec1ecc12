// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

pub type Result<T> = std::result::Result<T, Error>;

/// Failures reported by an object store.
///
/// Conditional operations report their losing side through `NotFound`
/// and `AlreadyExists`; callers treat those as data, not as faults.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("object or key does not exist")]
    NotFound,

    #[error("key already exists")]
    AlreadyExists,

    #[error("transaction conflict, restart required")]
    Restart,

    #[error("object data failed verification")]
    Mismatch,

    #[error("operation not supported by this store")]
    NotSupported,

    #[error("permission denied")]
    PermissionDenied,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("resource busy")]
    Busy,

    #[error("storage failure: {0}")]
    Io(String),
}

impl Error {
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn io<S: Into<String>>(msg: S) -> Self {
        Error::Io(msg.into())
    }

    #[must_use]
    pub fn is_restart(&self) -> bool {
        matches!(self, Error::Restart)
    }
}
