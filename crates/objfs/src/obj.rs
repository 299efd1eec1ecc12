// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Open object handles, stat and attribute updates, file I/O

use crate::entry::{Entry, EntryKind, Field, S_IFMT, S_ISGID, S_ISUID, S_ISVTX, Timespec};
use crate::error::{Error, Result};
use crate::flags::{OpenFlags, SetAttrFlags};
use crate::namespace::Namespace;
use diagnostics::*;
use objstore::{ObjectClass, ObjectId, Tx};

/// Kind-specific state of an open handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectKind {
    Dir {
        chunk_size: u64,
        oclass: ObjectClass,
    },
    File {
        chunk_size: u64,
    },
    Symlink {
        target: String,
    },
}

/// A handle on an entry, obtained by lookup or open.
///
/// The entry itself lives in the parent directory under `name`. Holding
/// a handle does not keep the entry from being removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    oid: ObjectId,
    parent_oid: ObjectId,
    name: String,
    mode: u32,
    flags: OpenFlags,
    kind: ObjectKind,
}

/// Attributes reported by stat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stat {
    pub oid: ObjectId,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub blocks: u64,
    pub blksize: u64,
    pub nlink: u32,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
}

/// New values for `Object::setattr`; only fields named by the flags apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetAttr {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: Timespec,
    pub mtime: Timespec,
}

/// Placement information of an open object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjInfo {
    pub oclass: ObjectClass,
    pub chunk_size: u64,
}

impl Object {
    pub(crate) fn new(
        oid: ObjectId,
        parent_oid: ObjectId,
        name: String,
        mode: u32,
        flags: OpenFlags,
        kind: ObjectKind,
    ) -> Self {
        Self {
            oid,
            parent_oid,
            name,
            mode,
            flags,
            kind,
        }
    }

    /// Handle for an entry found in directory `parent_oid`.
    pub(crate) fn from_entry(
        ns: &Namespace,
        parent_oid: ObjectId,
        name: &str,
        entry: &Entry,
        flags: OpenFlags,
    ) -> Result<Self> {
        let chunk_size = if entry.chunk_size == 0 {
            ns.attr.effective_chunk_size()
        } else {
            entry.chunk_size
        };
        let kind = match entry.kind()? {
            EntryKind::Directory => ObjectKind::Dir {
                chunk_size,
                oclass: entry.oclass,
            },
            EntryKind::File => ObjectKind::File { chunk_size },
            EntryKind::Symlink => ObjectKind::Symlink {
                target: entry
                    .value
                    .clone()
                    .ok_or_else(|| Error::io("symlink target not fetched"))?,
            },
        };
        let access = if ns.read_write && !flags.contains(OpenFlags::READ_ONLY) {
            OpenFlags::READ_WRITE
        } else {
            OpenFlags::READ_ONLY
        };
        let flags = (flags - OpenFlags::READ_ONLY - OpenFlags::READ_WRITE) | access;
        Ok(Self::new(
            entry.oid,
            parent_oid,
            name.to_string(),
            entry.mode,
            flags,
            kind,
        ))
    }

    #[must_use]
    pub fn oid(&self) -> ObjectId {
        self.oid
    }

    #[must_use]
    pub fn parent_oid(&self) -> ObjectId {
        self.parent_oid
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn mode(&self) -> u32 {
        self.mode
    }

    #[must_use]
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    #[must_use]
    pub fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, ObjectKind::Dir { .. })
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        matches!(self.kind, ObjectKind::File { .. })
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        matches!(self.kind, ObjectKind::Symlink { .. })
    }

    /// Chunk size of a file or the default for a directory's children.
    #[must_use]
    pub fn chunk_size(&self) -> Option<u64> {
        match self.kind {
            ObjectKind::Dir { chunk_size, .. } | ObjectKind::File { chunk_size } => {
                Some(chunk_size)
            }
            ObjectKind::Symlink { .. } => None,
        }
    }

    #[must_use]
    pub fn oclass(&self) -> ObjectClass {
        match self.kind {
            ObjectKind::Dir { oclass, .. } => oclass,
            _ => self.oid.class(),
        }
    }

    pub fn readlink(&self) -> Result<&str> {
        match &self.kind {
            ObjectKind::Symlink { target } => Ok(target),
            _ => Err(Error::invalid(format!("{} is not a symlink", self.name))),
        }
    }

    /// Releases the handle and the store reference it holds.
    ///
    /// Handles from `Namespace::root` and their clones hold no reference
    /// of their own and must not be released.
    pub async fn release(self, ns: &Namespace) -> Result<()> {
        ns.close_handle(&self).await
    }

    fn file_chunk(&self) -> Result<u64> {
        match self.kind {
            ObjectKind::File { chunk_size } => Ok(chunk_size),
            ObjectKind::Dir { .. } => Err(Error::is_a_directory(self.name.clone())),
            ObjectKind::Symlink { .. } => Err(Error::invalid(format!(
                "{} is not a regular file",
                self.name
            ))),
        }
    }

    fn check_write(&self, ns: &Namespace) -> Result<()> {
        ns.check_writable()?;
        if self.flags.contains(OpenFlags::READ_WRITE) {
            Ok(())
        } else {
            Err(Error::permission_denied(format!(
                "{} is open read-only",
                self.name
            )))
        }
    }

    pub async fn stat(&self, ns: &Namespace) -> Result<Stat> {
        let entry = ns
            .require_entry(Tx::None, self.parent_oid, &self.name, false)
            .await?;
        ns.entry_stat(&entry).await
    }

    pub async fn read(&self, ns: &Namespace, offset: u64, len: u64) -> Result<Vec<u8>> {
        let chunk_size = self.file_chunk()?;
        Ok(ns
            .store
            .array_read(Tx::None, self.oid, chunk_size, offset, len)
            .await?)
    }

    pub async fn write(&self, ns: &Namespace, offset: u64, data: &[u8]) -> Result<()> {
        let chunk_size = self.file_chunk()?;
        self.check_write(ns)?;
        if data.is_empty() {
            return Ok(());
        }
        ns.store
            .array_write(Tx::None, self.oid, chunk_size, offset, data)
            .await?;
        Ok(())
    }

    /// Deallocates a byte range. A range reaching the end of the file
    /// truncates it to `offset`.
    pub async fn punch(&self, ns: &Namespace, offset: u64, len: u64) -> Result<()> {
        let chunk_size = self.file_chunk()?;
        self.check_write(ns)?;
        let size = self.get_size(ns).await?;
        if offset >= size || len == 0 {
            return Ok(());
        }
        if offset.saturating_add(len) >= size {
            ns.store
                .array_set_size(Tx::None, self.oid, chunk_size, offset)
                .await?;
        } else {
            ns.store
                .array_punch(Tx::None, self.oid, chunk_size, offset, len)
                .await?;
        }
        Ok(())
    }

    pub async fn get_size(&self, ns: &Namespace) -> Result<u64> {
        let chunk_size = self.file_chunk()?;
        Ok(ns
            .store
            .array_stat(Tx::None, self.oid, chunk_size)
            .await?
            .size)
    }

    /// Applies the selected attributes and returns the resulting stat.
    pub async fn setattr(&self, ns: &Namespace, attr: &SetAttr, flags: SetAttrFlags) -> Result<Stat> {
        ns.check_writable()?;
        let mut entry = ns
            .require_entry(Tx::None, self.parent_oid, &self.name, false)
            .await?;
        let mut fields = Vec::new();

        if flags.contains(SetAttrFlags::MODE) {
            let requested = attr.mode & S_IFMT;
            if requested != 0 && requested != entry.mode & S_IFMT {
                return Err(Error::invalid("cannot change the file type"));
            }
            entry.mode = (entry.mode & S_IFMT) | (attr.mode & !S_IFMT);
            fields.push(Field::Mode);
        }
        if flags.contains(SetAttrFlags::ATIME) {
            warn!("Ignoring atime update, access times are derived");
        }
        if flags.contains(SetAttrFlags::UID) {
            entry.uid = attr.uid;
            fields.push(Field::Uid);
        }
        if flags.contains(SetAttrFlags::GID) {
            entry.gid = attr.gid;
            fields.push(Field::Gid);
        }
        if flags.contains(SetAttrFlags::SIZE) {
            let ObjectKind::File { chunk_size } = self.kind else {
                return Err(Error::io("size can only be set on regular files"));
            };
            ns.store
                .array_set_size(Tx::None, self.oid, chunk_size, attr.size)
                .await?;
        }
        if flags.contains(SetAttrFlags::MTIME) {
            entry.mtime = attr.mtime;
            // Pin mtime to the current object epoch so stat keeps it.
            entry.obj_hlc = ns.object_epoch(self.oid, &entry).await?;
            fields.extend([Field::Mtime, Field::MtimeNsec, Field::ObjHlc]);
        }

        ns.update_entry(Tx::None, self.parent_oid, &self.name, &mut entry, &fields, Vec::new())
            .await?;
        let name = self.name.as_str();
        debug!("setattr on {name}", name: name);
        ns.entry_stat(&entry).await
    }
}

impl Namespace {
    /// Last-write epoch of an entry's object, 0 when it has none.
    pub(crate) async fn object_epoch(&self, oid: ObjectId, entry: &Entry) -> Result<u64> {
        Ok(match entry.kind()? {
            EntryKind::Directory => self.store.query_max_epoch(Tx::None, oid).await?,
            EntryKind::File => {
                let chunk_size = if entry.chunk_size == 0 {
                    self.attr.effective_chunk_size()
                } else {
                    entry.chunk_size
                };
                self.store
                    .array_stat(Tx::None, oid, chunk_size)
                    .await?
                    .max_epoch
            }
            EntryKind::Symlink => 0,
        })
    }

    /// Stat of an entry, with times merged from the object's last write.
    pub(crate) async fn entry_stat(&self, entry: &Entry) -> Result<Stat> {
        let chunk_size = if entry.chunk_size == 0 {
            self.attr.effective_chunk_size()
        } else {
            entry.chunk_size
        };
        let (size, epoch) = match entry.kind()? {
            EntryKind::Directory => (
                self.layout.size(),
                self.store.query_max_epoch(Tx::None, entry.oid).await?,
            ),
            EntryKind::File => {
                let stat = self.store.array_stat(Tx::None, entry.oid, chunk_size).await?;
                (stat.size, stat.max_epoch)
            }
            EntryKind::Symlink => (entry.value_len, 0),
        };

        let (mtime, ctime) = if epoch == 0 {
            (entry.mtime, entry.ctime)
        } else {
            let written = Timespec::from_epoch(epoch);
            let mtime = if entry.obj_hlc == epoch {
                entry.mtime
            } else {
                written
            };
            (mtime, entry.ctime.max(written))
        };

        Ok(Stat {
            oid: entry.oid,
            mode: entry.mode,
            uid: entry.uid,
            gid: entry.gid,
            size,
            blocks: (size + 511) >> 9,
            blksize: chunk_size,
            nlink: 1,
            atime: mtime.max(ctime),
            mtime,
            ctime,
        })
    }

    /// Stat of `name` in `parent`, not following a final symlink.
    pub async fn stat(&self, parent: &Object, name: &str) -> Result<Stat> {
        let parent_oid = self.dir_oid(parent)?;
        crate::entry::check_name(name)?;
        let entry = self.require_entry(Tx::None, parent_oid, name, false).await?;
        self.entry_stat(&entry).await
    }

    #[must_use]
    pub fn obj_info(&self, obj: &Object) -> ObjInfo {
        ObjInfo {
            oclass: obj.oclass(),
            chunk_size: obj
                .chunk_size()
                .unwrap_or_else(|| self.attr.effective_chunk_size()),
        }
    }

    /// Directory oid of a handle, `NotADirectory` for anything else.
    pub(crate) fn dir_oid(&self, dir: &Object) -> Result<ObjectId> {
        if dir.is_dir() {
            Ok(dir.oid())
        } else {
            Err(Error::not_a_directory(dir.name().to_string()))
        }
    }

    /// Entry location after following a symlink entry to its target.
    async fn follow(&self, parent: &Object, name: &str, entry: Entry) -> Result<(ObjectId, String, Entry)> {
        if !entry.is_symlink() {
            return Ok((parent.oid(), name.to_string(), entry));
        }
        let target = self.lookup_rel(parent, name, OpenFlags::READ_ONLY).await?;
        let at = (target.parent_oid(), target.name().to_string());
        target.release(self).await?;
        let entry = self.require_entry(Tx::None, at.0, &at.1, false).await?;
        Ok((at.0, at.1, entry))
    }

    /// Changes permission bits, following a symlink to its target.
    pub async fn chmod(&self, parent: &Object, name: &str, mode: u32) -> Result<()> {
        self.check_writable()?;
        let parent_oid = self.dir_oid(parent)?;
        crate::entry::check_name(name)?;
        if mode & (S_ISUID | S_ISGID | S_ISVTX) != 0 {
            return Err(Error::not_supported("setuid, setgid and sticky bits"));
        }
        let entry = self.require_entry(Tx::None, parent_oid, name, false).await?;
        let (at, at_name, mut entry) = self.follow(parent, name, entry).await?;
        let requested = mode & S_IFMT;
        if requested != 0 && requested != entry.mode & S_IFMT {
            return Err(Error::invalid("cannot change the file type"));
        }
        entry.mode = (entry.mode & S_IFMT) | (mode & !S_IFMT);
        self.update_entry(Tx::None, at, &at_name, &mut entry, &[Field::Mode], Vec::new())
            .await
    }

    /// Changes ownership. `None` leaves a field as it is.
    pub async fn chown(
        &self,
        parent: &Object,
        name: &str,
        uid: Option<u32>,
        gid: Option<u32>,
        no_follow: bool,
    ) -> Result<()> {
        self.check_writable()?;
        let parent_oid = self.dir_oid(parent)?;
        crate::entry::check_name(name)?;
        if uid.is_none() && gid.is_none() {
            return Ok(());
        }
        let entry = self.require_entry(Tx::None, parent_oid, name, false).await?;
        let (at, at_name, mut entry) = if no_follow {
            (parent_oid, name.to_string(), entry)
        } else {
            self.follow(parent, name, entry).await?
        };
        let mut fields = Vec::new();
        if let Some(uid) = uid {
            entry.uid = uid;
            fields.push(Field::Uid);
        }
        if let Some(gid) = gid {
            entry.gid = gid;
            fields.push(Field::Gid);
        }
        self.update_entry(Tx::None, at, &at_name, &mut entry, &fields, Vec::new())
            .await
    }

    /// Checks `mask` (`libc::R_OK`, `W_OK`, `X_OK` or `F_OK`) against the
    /// stored mode for the mounting user.
    pub async fn access(&self, parent: &Object, name: &str, mask: i32) -> Result<()> {
        let parent_oid = self.dir_oid(parent)?;
        crate::entry::check_name(name)?;
        let entry = self.require_entry(Tx::None, parent_oid, name, false).await?;
        let (_, _, entry) = self.follow(parent, name, entry).await?;
        if mask == libc::F_OK {
            return Ok(());
        }
        if mask & libc::W_OK != 0 && !self.read_write {
            return Err(Error::permission_denied("namespace mounted read-only"));
        }
        if self.uid == 0 {
            return Ok(());
        }
        let shift = if self.uid == entry.uid {
            6
        } else if self.gid == entry.gid {
            3
        } else {
            0
        };
        let granted = (entry.mode >> shift) & 0o7;
        let wanted = u32::try_from(mask & 0o7).unwrap_or(0);
        if granted & wanted == wanted {
            Ok(())
        } else {
            Err(Error::permission_denied(name.to_string()))
        }
    }
}
