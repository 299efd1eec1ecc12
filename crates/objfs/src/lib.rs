// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! POSIX-style namespace over a flat transactional object store.
//!
//! Directories are dictionary objects whose records are the entries of
//! their children, keyed by name. Files are chunked byte arrays. The
//! superblock and the root entry live in a reserved object recorded in
//! the container properties. See [`Namespace`] for the operations.

pub mod checker;
mod dir;
mod entry;
mod error;
mod flags;
mod handoff;
mod namespace;
mod obj;
mod oid;
mod resolve;
mod superblock;
mod tx;
mod xattr;

pub use dir::DirEntry;
pub use entry::{
    EntryKind, Layout, NAME_MAX, PATH_MAX, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG, S_ISGID, S_ISUID,
    S_ISVTX, Timespec, XATTR_NAME_MAX, XATTR_VALUE_MAX,
};
pub use error::{Error, Result};
pub use flags::{CheckFlags, MountFlags, OpenFlags, RenameFlags, SetAttrFlags, XattrFlags};
pub use handoff::{NAMESPACE_MAGIC, OBJECT_MAGIC};
pub use namespace::{Namespace, USE_DTX_ENV, format};
pub use obj::{ObjInfo, Object, ObjectKind, SetAttr, Stat};
pub use resolve::MAX_SYMLINK_DEPTH;
pub use superblock::{ConsistencyMode, DEFAULT_CHUNK_SIZE, Hints, NamespaceAttr};
pub use tx::MAX_TX_ATTEMPTS;

#[cfg(test)]
mod tests;
