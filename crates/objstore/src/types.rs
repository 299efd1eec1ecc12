// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Request and response shapes shared by every store implementation

use crate::oid::ObjectId;

/// Transaction context for record operations.
///
/// `Tx::None` applies each call immediately. Calls made under an open
/// handle read committed state and stage their mutations until commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tx {
    None,
    Open(u64),
}

/// Akey holding the bytes of one array chunk. Array dkeys are the chunk
/// index plus one, as little-endian u64.
pub const ARRAY_AKEY: &[u8] = b"0";

/// Logical timestamp (hybrid logical clock, nanoseconds since the epoch).
pub type Epoch = u64;

/// Condition applied to the dkey of an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateCond {
    #[default]
    None,
    /// Fail with `AlreadyExists` when the dkey is present.
    DkeyInsert,
    /// Fail with `NotFound` when the dkey is absent.
    DkeyUpdate,
}

/// Condition applied to one akey of an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AkeyCond {
    #[default]
    None,
    Insert,
    Update,
}

/// Condition applied to a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchCond {
    #[default]
    None,
    /// Fail with `NotFound` when the dkey is absent.
    Dkey,
    /// Fail with `NotFound` when any requested akey is absent.
    Akey,
}

/// Condition applied to a punch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PunchCond {
    #[default]
    None,
    /// Fail with `NotFound` when the key is absent.
    Exists,
}

/// What to read from one akey.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Iod {
    pub akey: Vec<u8>,
    pub kind: IodKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IodKind {
    /// The whole single value.
    Single,
    /// A byte range of an array value; unwritten bytes read as zero.
    Range { offset: u64, len: u64 },
}

impl Iod {
    pub fn single<K: AsRef<[u8]>>(akey: K) -> Self {
        Self {
            akey: akey.as_ref().to_vec(),
            kind: IodKind::Single,
        }
    }

    pub fn range<K: AsRef<[u8]>>(akey: K, offset: u64, len: u64) -> Self {
        Self {
            akey: akey.as_ref().to_vec(),
            kind: IodKind::Range { offset, len },
        }
    }
}

/// A write to one akey.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AkeyUpdate {
    pub akey: Vec<u8>,
    pub cond: AkeyCond,
    pub value: UpdateValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateValue {
    /// Replace the whole single value.
    Single(Vec<u8>),
    /// Write byte extents into an array value.
    Extents(Vec<(u64, Vec<u8>)>),
}

impl AkeyUpdate {
    pub fn single<K: AsRef<[u8]>>(akey: K, value: Vec<u8>) -> Self {
        Self {
            akey: akey.as_ref().to_vec(),
            cond: AkeyCond::None,
            value: UpdateValue::Single(value),
        }
    }

    pub fn extents<K: AsRef<[u8]>>(akey: K, extents: Vec<(u64, Vec<u8>)>) -> Self {
        Self {
            akey: akey.as_ref().to_vec(),
            cond: AkeyCond::None,
            value: UpdateValue::Extents(extents),
        }
    }

    #[must_use]
    pub fn with_cond(mut self, cond: AkeyCond) -> Self {
        self.cond = cond;
        self
    }
}

/// Continuation token for paged enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Anchor {
    last: Option<Vec<u8>>,
    eof: bool,
}

impl Anchor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Last key returned, if any page has been read.
    #[must_use]
    pub fn last_key(&self) -> Option<&[u8]> {
        self.last.as_deref()
    }

    pub fn advance(&mut self, last: Option<Vec<u8>>, eof: bool) {
        if last.is_some() {
            self.last = last;
        }
        self.eof = eof;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Size and last-write epoch of an array object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArrayStat {
    pub size: u64,
    pub max_epoch: Epoch,
}

/// Container layout recorded in the container properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayoutType {
    #[default]
    Unknown,
    Posix,
    Hdf5,
}

/// Container properties relevant to a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerProps {
    pub layout: LayoutType,
    /// Superblock and root directory identifiers.
    pub roots: [ObjectId; 2],
    pub label: Option<String>,
}

/// Access requested when opening an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

/// Handle of an open object-ID table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OitHandle(pub u64);
