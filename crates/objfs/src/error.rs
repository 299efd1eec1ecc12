// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

pub type Result<T> = std::result::Result<T, Error>;

/// Namespace operation failures.
///
/// Every variant maps onto one POSIX error code through [`Error::errno`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("no such entry: {0}")]
    NotFound(String),

    #[error("entry already exists: {0}")]
    AlreadyExists(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("directory not empty: {0}")]
    NotEmpty(String),

    #[error("too many levels of symbolic links: {0}")]
    SymlinkLoop(String),

    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("no such attribute: {0}")]
    NoData(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("busy: {0}")]
    Busy(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("name too long: {0}")]
    NameTooLong(String),

    #[error("buffer too small, {needed} bytes needed")]
    Range { needed: usize },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("object store error: {0}")]
    Backend(objstore::Error),
}

impl Error {
    pub fn not_found<S: Into<String>>(what: S) -> Self {
        Error::NotFound(what.into())
    }

    pub fn already_exists<S: Into<String>>(what: S) -> Self {
        Error::AlreadyExists(what.into())
    }

    pub fn not_a_directory<S: Into<String>>(what: S) -> Self {
        Error::NotADirectory(what.into())
    }

    pub fn is_a_directory<S: Into<String>>(what: S) -> Self {
        Error::IsADirectory(what.into())
    }

    pub fn not_empty<S: Into<String>>(what: S) -> Self {
        Error::NotEmpty(what.into())
    }

    pub fn symlink_loop<S: Into<String>>(what: S) -> Self {
        Error::SymlinkLoop(what.into())
    }

    pub fn not_supported<S: Into<String>>(what: S) -> Self {
        Error::NotSupported(what.into())
    }

    pub fn no_data<S: Into<String>>(what: S) -> Self {
        Error::NoData(what.into())
    }

    pub fn permission_denied<S: Into<String>>(what: S) -> Self {
        Error::PermissionDenied(what.into())
    }

    pub fn busy<S: Into<String>>(what: S) -> Self {
        Error::Busy(what.into())
    }

    pub fn invalid<S: Into<String>>(what: S) -> Self {
        Error::InvalidArgument(what.into())
    }

    pub fn name_too_long<S: Into<String>>(what: S) -> Self {
        Error::NameTooLong(what.into())
    }

    pub fn io<S: Into<String>>(what: S) -> Self {
        Error::Io(what.into())
    }

    /// Positive POSIX error code for this failure.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Error::NotFound(_) => libc::ENOENT,
            Error::AlreadyExists(_) => libc::EEXIST,
            Error::NotADirectory(_) => libc::ENOTDIR,
            Error::IsADirectory(_) => libc::EISDIR,
            Error::NotEmpty(_) => libc::ENOTEMPTY,
            Error::SymlinkLoop(_) => libc::ELOOP,
            Error::NotSupported(_) => libc::ENOTSUP,
            Error::NoData(_) => libc::ENODATA,
            Error::PermissionDenied(_) => libc::EPERM,
            Error::Busy(_) => libc::EBUSY,
            Error::InvalidArgument(_) => libc::EINVAL,
            Error::NameTooLong(_) => libc::ENAMETOOLONG,
            Error::Range { .. } => libc::ERANGE,
            Error::Io(_) => libc::EIO,
            Error::Backend(e) => match e {
                objstore::Error::Restart => libc::EAGAIN,
                _ => libc::EIO,
            },
        }
    }

    /// True for the conflict signal that `run_in_tx` retries on.
    #[must_use]
    pub fn is_restart(&self) -> bool {
        matches!(self, Error::Backend(objstore::Error::Restart))
    }
}

impl From<objstore::Error> for Error {
    fn from(e: objstore::Error) -> Self {
        match e {
            objstore::Error::NotFound => Error::not_found("object store key"),
            objstore::Error::AlreadyExists => Error::already_exists("object store key"),
            objstore::Error::NotSupported => Error::not_supported("object store"),
            objstore::Error::PermissionDenied => Error::permission_denied("object store"),
            objstore::Error::InvalidArgument(msg) => Error::InvalidArgument(msg),
            objstore::Error::Busy => Error::busy("object store"),
            objstore::Error::Io(msg) => Error::Io(msg),
            other @ (objstore::Error::Restart | objstore::Error::Mismatch) => Error::Backend(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(Error::not_found("a").errno(), libc::ENOENT);
        assert_eq!(Error::already_exists("a").errno(), libc::EEXIST);
        assert_eq!(Error::not_empty("a").errno(), libc::ENOTEMPTY);
        assert_eq!(Error::symlink_loop("a").errno(), libc::ELOOP);
        assert_eq!(Error::Range { needed: 3 }.errno(), libc::ERANGE);
        assert_eq!(Error::from(objstore::Error::Mismatch).errno(), libc::EIO);
        assert!(Error::from(objstore::Error::Restart).is_restart());
        assert!(!Error::busy("retries").is_restart());
    }

    #[test]
    fn test_store_conditions_keep_their_kind() {
        assert_eq!(
            Error::from(objstore::Error::AlreadyExists).errno(),
            libc::EEXIST
        );
        assert_eq!(Error::from(objstore::Error::NotFound).errno(), libc::ENOENT);
    }
}
