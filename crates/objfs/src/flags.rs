// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use bitflags::bitflags;

bitflags! {
    /// Access and consistency requested at mount time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MountFlags: u32 {
        const READ_ONLY = 1 << 0;
        const READ_WRITE = 1 << 1;
        /// Run multi-record operations in transactions.
        const BALANCED = 1 << 2;
    }
}

bitflags! {
    /// Flags for opening or creating an entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        const READ_ONLY = 1 << 0;
        const READ_WRITE = 1 << 1;
        const CREATE = 1 << 2;
        const EXCLUSIVE = 1 << 3;
        const TRUNCATE = 1 << 4;
        /// Return a final symlink itself instead of its target.
        const NO_FOLLOW = 1 << 5;
    }
}

bitflags! {
    /// Consistency checker behavior.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CheckFlags: u32 {
        const VERIFY = 1 << 0;
        const PRINT = 1 << 1;
        const REMOVE = 1 << 2;
        const RELINK = 1 << 3;
        const EVICT_ALL = 1 << 4;
    }
}

bitflags! {
    /// Fields applied by `Object::setattr`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SetAttrFlags: u32 {
        const MODE = 1 << 0;
        const ATIME = 1 << 1;
        const MTIME = 1 << 2;
        const SIZE = 1 << 3;
        const UID = 1 << 4;
        const GID = 1 << 5;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RenameFlags: u32 {
        /// Fail with `AlreadyExists` instead of replacing the destination.
        const NOREPLACE = 1 << 0;
    }
}

/// Existence rule for `setxattr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XattrFlags {
    #[default]
    Any,
    Create,
    Replace,
}
