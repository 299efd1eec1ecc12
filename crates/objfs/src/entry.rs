// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Directory entry records
//!
//! An entry is one dkey (the child's name) in its parent directory object.
//! The fixed fields live at known offsets of the `OBJFS_INODE` array akey,
//! the symlink target lives in `OBJFS_SLINK`, and extended attributes use
//! akeys prefixed with `x:`.

use crate::error::{Error, Result};
use objstore::{
    AkeyUpdate, Epoch, FetchCond, Iod, ObjectClass, ObjectId, ObjectStore, Tx, UpdateCond,
};

pub const INODE_AKEY: &[u8] = b"OBJFS_INODE";
pub const SLINK_AKEY: &[u8] = b"OBJFS_SLINK";
pub const XATTR_PREFIX: &str = "x:";

pub const NAME_MAX: usize = 255;
pub const XATTR_NAME_MAX: usize = 255;
pub const XATTR_VALUE_MAX: usize = 64 * 1024;
/// Longest symlink target.
pub const PATH_MAX: usize = 4096;

pub const S_IFMT: u32 = 0o170_000;
pub const S_IFDIR: u32 = 0o040_000;
pub const S_IFREG: u32 = 0o100_000;
pub const S_IFLNK: u32 = 0o120_000;
pub const S_ISUID: u32 = 0o4000;
pub const S_ISGID: u32 = 0o2000;
pub const S_ISVTX: u32 = 0o1000;

/// Entry field. Each one has an offset and width in a [`Layout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Mode,
    Oid,
    Mtime,
    Ctime,
    ChunkSize,
    Oclass,
    MtimeNsec,
    CtimeNsec,
    Uid,
    Gid,
    ValueLen,
    ObjHlc,
}

/// Byte layout of the `OBJFS_INODE` record for one layout version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    version: u16,
    size: u64,
    has_obj_hlc: bool,
}

impl Layout {
    pub const V2: Layout = Layout {
        version: 2,
        size: 80,
        has_obj_hlc: false,
    };

    pub const V3: Layout = Layout {
        version: 3,
        size: 88,
        has_obj_hlc: true,
    };

    pub const CURRENT: Layout = Layout::V3;

    /// Layout for a version recorded in the superblock.
    pub fn for_version(version: u16) -> Result<Layout> {
        match version {
            2 => Ok(Layout::V2),
            3 => Ok(Layout::V3),
            v => Err(Error::invalid(format!("incompatible layout version {v}"))),
        }
    }

    #[must_use]
    pub fn version(&self) -> u16 {
        self.version
    }

    /// Encoded size of an entry. Also reported as a directory's size.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Offset and width of a field, `None` if this layout lacks it.
    #[must_use]
    pub fn field(&self, field: Field) -> Option<(u64, usize)> {
        let spot = match field {
            Field::Mode => (0, 4),
            Field::Oid => (4, 16),
            Field::Mtime => (20, 8),
            Field::Ctime => (28, 8),
            Field::ChunkSize => (36, 8),
            Field::Oclass => (44, 4),
            Field::MtimeNsec => (48, 8),
            Field::CtimeNsec => (56, 8),
            Field::Uid => (64, 4),
            Field::Gid => (68, 4),
            Field::ValueLen => (72, 8),
            Field::ObjHlc if self.has_obj_hlc => (80, 8),
            Field::ObjHlc => return None,
        };
        Some(spot)
    }

    /// Iod fetching the whole fixed record.
    #[must_use]
    pub fn iod(&self) -> Iod {
        Iod::range(INODE_AKEY, 0, self.size)
    }

    /// Extents writing a subset of fields, for in-place updates.
    #[must_use]
    pub fn extents(&self, entry: &Entry, fields: &[Field]) -> Vec<(u64, Vec<u8>)> {
        fields
            .iter()
            .filter_map(|f| {
                let (offset, _) = self.field(*f)?;
                Some((offset, entry.field_bytes(*f)))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Symlink,
}

impl EntryKind {
    pub fn from_mode(mode: u32) -> Result<Self> {
        match mode & S_IFMT {
            S_IFDIR => Ok(EntryKind::Directory),
            S_IFREG => Ok(EntryKind::File),
            S_IFLNK => Ok(EntryKind::Symlink),
            other => Err(Error::invalid(format!("unsupported file type {other:o}"))),
        }
    }

    #[must_use]
    pub fn type_bits(self) -> u32 {
        match self {
            EntryKind::Directory => S_IFDIR,
            EntryKind::File => S_IFREG,
            EntryKind::Symlink => S_IFLNK,
        }
    }
}

/// Seconds and nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timespec {
    pub sec: u64,
    pub nsec: u64,
}

impl Timespec {
    #[must_use]
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self {
            sec: u64::try_from(now.timestamp()).unwrap_or(0),
            nsec: u64::from(now.timestamp_subsec_nanos()),
        }
    }

    /// Wall time of a store epoch.
    #[must_use]
    pub fn from_epoch(epoch: Epoch) -> Self {
        Self {
            sec: epoch / 1_000_000_000,
            nsec: epoch % 1_000_000_000,
        }
    }
}

/// The inode-like record of one name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Entry {
    pub mode: u32,
    pub oid: ObjectId,
    pub mtime: Timespec,
    pub ctime: Timespec,
    pub chunk_size: u64,
    pub oclass: ObjectClass,
    pub uid: u32,
    pub gid: u32,
    pub value_len: u64,
    pub obj_hlc: Epoch,
    /// Symlink target, present only when fetched.
    pub value: Option<String>,
}

fn le<const N: usize>(raw: &[u8], offset: u64) -> Result<[u8; N]> {
    let start = usize::try_from(offset).map_err(|_| Error::io("entry offset"))?;
    raw.get(start..start + N)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| Error::io("short entry record"))
}

impl Entry {
    pub fn kind(&self) -> Result<EntryKind> {
        EntryKind::from_mode(self.mode)
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    fn field_bytes(&self, field: Field) -> Vec<u8> {
        match field {
            Field::Mode => self.mode.to_le_bytes().to_vec(),
            Field::Oid => {
                let mut b = self.oid.lo.to_le_bytes().to_vec();
                b.extend_from_slice(&self.oid.hi.to_le_bytes());
                b
            }
            Field::Mtime => self.mtime.sec.to_le_bytes().to_vec(),
            Field::Ctime => self.ctime.sec.to_le_bytes().to_vec(),
            Field::ChunkSize => self.chunk_size.to_le_bytes().to_vec(),
            Field::Oclass => u32::from(self.oclass).to_le_bytes().to_vec(),
            Field::MtimeNsec => self.mtime.nsec.to_le_bytes().to_vec(),
            Field::CtimeNsec => self.ctime.nsec.to_le_bytes().to_vec(),
            Field::Uid => self.uid.to_le_bytes().to_vec(),
            Field::Gid => self.gid.to_le_bytes().to_vec(),
            Field::ValueLen => self.value_len.to_le_bytes().to_vec(),
            Field::ObjHlc => self.obj_hlc.to_le_bytes().to_vec(),
        }
    }

    /// Writes for every field of the layout, one extent per field.
    #[must_use]
    pub fn encode(&self, layout: Layout) -> Vec<(u64, Vec<u8>)> {
        const ALL: [Field; 12] = [
            Field::Mode,
            Field::Oid,
            Field::Mtime,
            Field::Ctime,
            Field::ChunkSize,
            Field::Oclass,
            Field::MtimeNsec,
            Field::CtimeNsec,
            Field::Uid,
            Field::Gid,
            Field::ValueLen,
            Field::ObjHlc,
        ];
        layout.extents(self, &ALL)
    }

    /// Akey updates inserting this entry, including the symlink target.
    #[must_use]
    pub fn to_updates(&self, layout: Layout) -> Vec<AkeyUpdate> {
        let mut updates = vec![AkeyUpdate::extents(INODE_AKEY, self.encode(layout))];
        if let Some(target) = self.value.as_ref().filter(|_| self.is_symlink()) {
            updates.push(AkeyUpdate::single(SLINK_AKEY, target.as_bytes().to_vec()));
        }
        updates
    }

    /// Decodes the fixed record. The symlink target is attached separately.
    pub fn decode(layout: Layout, raw: &[u8]) -> Result<Entry> {
        let at = |f: Field| layout.field(f).map_or(0, |(off, _)| off);
        let lo = u64::from_le_bytes(le(raw, at(Field::Oid))?);
        let hi = u64::from_le_bytes(le(raw, at(Field::Oid) + 8)?);
        let obj_hlc = match layout.field(Field::ObjHlc) {
            Some((off, _)) => u64::from_le_bytes(le(raw, off)?),
            None => 0,
        };
        Ok(Entry {
            mode: u32::from_le_bytes(le(raw, at(Field::Mode))?),
            oid: ObjectId::new(hi, lo),
            mtime: Timespec {
                sec: u64::from_le_bytes(le(raw, at(Field::Mtime))?),
                nsec: u64::from_le_bytes(le(raw, at(Field::MtimeNsec))?),
            },
            ctime: Timespec {
                sec: u64::from_le_bytes(le(raw, at(Field::Ctime))?),
                nsec: u64::from_le_bytes(le(raw, at(Field::CtimeNsec))?),
            },
            chunk_size: u64::from_le_bytes(le(raw, at(Field::ChunkSize))?),
            oclass: ObjectClass::from(u32::from_le_bytes(le(raw, at(Field::Oclass))?)),
            uid: u32::from_le_bytes(le(raw, at(Field::Uid))?),
            gid: u32::from_le_bytes(le(raw, at(Field::Gid))?),
            value_len: u64::from_le_bytes(le(raw, at(Field::ValueLen))?),
            obj_hlc,
            value: None,
        })
    }

    /// Attaches a fetched symlink target, checking it against `value_len`.
    pub fn attach_target(&mut self, raw: Option<Vec<u8>>) -> Result<()> {
        let raw = raw.unwrap_or_default();
        if raw.is_empty() {
            return Err(Error::io("symlink target missing"));
        }
        if raw.len() as u64 != self.value_len {
            return Err(Error::io(format!(
                "symlink target length {} does not match entry {}",
                raw.len(),
                self.value_len
            )));
        }
        let target = String::from_utf8(raw).map_err(|_| Error::io("symlink target not UTF-8"))?;
        self.value = Some(target);
        Ok(())
    }
}

/// Fetches the entry `name` of directory `parent`, `None` if absent.
///
/// The symlink target is read only when `with_target` is set.
pub async fn fetch(
    store: &dyn ObjectStore,
    layout: Layout,
    tx: Tx,
    parent: ObjectId,
    name: &str,
    with_target: bool,
) -> Result<Option<Entry>> {
    let mut iods = vec![layout.iod()];
    if with_target {
        iods.push(Iod::single(SLINK_AKEY));
    }
    let mut values = store
        .fetch(tx, parent, name.as_bytes(), FetchCond::None, &iods)
        .await?
        .into_iter();
    let Some(raw) = values.next().flatten() else {
        return Ok(None);
    };
    let mut entry = Entry::decode(layout, &raw)?;
    if with_target && entry.is_symlink() {
        entry.attach_target(values.next().flatten())?;
    }
    Ok(Some(entry))
}

/// Inserts an entry, failing with `AlreadyExists` if the name is taken.
pub async fn insert(
    store: &dyn ObjectStore,
    layout: Layout,
    tx: Tx,
    parent: ObjectId,
    name: &str,
    entry: &Entry,
    extra: Vec<AkeyUpdate>,
) -> Result<()> {
    let mut updates = entry.to_updates(layout);
    updates.extend(extra);
    store
        .update(tx, parent, name.as_bytes(), UpdateCond::DkeyInsert, updates)
        .await?;
    Ok(())
}

/// Akey of an extended attribute.
#[must_use]
pub fn xattr_akey(name: &str) -> Vec<u8> {
    format!("{XATTR_PREFIX}{name}").into_bytes()
}

/// Rejects names that cannot be stored as a dkey.
pub fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid("empty name"));
    }
    if name.contains('/') {
        return Err(Error::invalid(format!("name contains '/': {name}")));
    }
    if name.len() > NAME_MAX {
        return Err(Error::name_too_long(name));
    }
    Ok(())
}
