// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Directory operations: create, remove, move, exchange and enumeration

use crate::entry::{self, Entry, EntryKind, PATH_MAX, Timespec, XATTR_PREFIX};
use crate::error::{Error, Result};
use crate::flags::{OpenFlags, RenameFlags};
use crate::namespace::Namespace;
use crate::obj::{Object, ObjectKind, Stat};
use crate::oid::select_class;
use diagnostics::*;
use futures::future::BoxFuture;
use objstore::{AkeyUpdate, Anchor, Iod, FetchCond, ObjectClass, ObjectId, OpenMode, PunchCond, Tx};
use std::future::Future;

/// Keys requested per listing call when walking a directory internally.
pub(crate) const DIR_PAGE: usize = 64;

/// One name returned by `readdir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
}

impl Namespace {
    /// Opens `name` in `parent`, creating it with `CREATE`.
    ///
    /// The kind comes from the type bits of `mode`. `oclass` and
    /// `chunk_size` may be left as `UNKNOWN` and 0 to inherit from the
    /// parent directory. `target` is required for a symlink.
    pub async fn open(
        &self,
        parent: &Object,
        name: &str,
        mode: u32,
        flags: OpenFlags,
        oclass: ObjectClass,
        chunk_size: u64,
        target: Option<&str>,
    ) -> Result<Object> {
        let parent_oid = self.dir_oid(parent)?;
        entry::check_name(name)?;
        let kind = EntryKind::from_mode(mode)?;
        if kind == EntryKind::Symlink {
            match target {
                None | Some("") => return Err(Error::invalid("symlink target is empty")),
                Some(t) if t.len() >= PATH_MAX => return Err(Error::name_too_long(t)),
                Some(_) => {}
            }
        }
        let lookup_flags = if kind == EntryKind::Symlink {
            flags | OpenFlags::NO_FOLLOW
        } else {
            flags
        };

        if !flags.contains(OpenFlags::CREATE) {
            let obj = self.lookup_rel(parent, name, lookup_flags).await?;
            return self.check_opened(obj, kind, flags).await;
        }

        self.check_writable()?;
        let created = self
            .create_entry(parent, parent_oid, name, mode, kind, flags, oclass, chunk_size, target)
            .await;
        match created {
            Err(Error::AlreadyExists(_)) if !flags.contains(OpenFlags::EXCLUSIVE) => {
                debug!("open: {name} exists, opening it", name: name);
                let obj = self.lookup_rel(parent, name, lookup_flags).await?;
                self.check_opened(obj, kind, flags).await
            }
            Err(Error::AlreadyExists(_)) => Err(Error::already_exists(name)),
            other => other,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_entry(
        &self,
        parent: &Object,
        parent_oid: ObjectId,
        name: &str,
        mode: u32,
        kind: EntryKind,
        flags: OpenFlags,
        oclass: ObjectClass,
        chunk_size: u64,
        target: Option<&str>,
    ) -> Result<Object> {
        let is_file = kind == EntryKind::File;
        let parent_class = match parent.kind() {
            ObjectKind::Dir { oclass, .. } => *oclass,
            _ => ObjectClass::UNKNOWN,
        };
        let default_class = if is_file {
            self.attr.default_file_class()
        } else {
            self.attr.default_dir_class()
        };
        let class = select_class(oclass, parent_class, default_class);
        let chunk_size = if chunk_size == 0 {
            parent
                .chunk_size()
                .unwrap_or_else(|| self.attr.effective_chunk_size())
        } else {
            chunk_size
        };

        let oid = self.oids.next_oid(self.store.as_ref(), is_file, class).await?;
        match kind {
            EntryKind::File => {
                self.store
                    .open_array(oid, OpenMode::ReadWrite, chunk_size)
                    .await?;
            }
            EntryKind::Directory => self.store.open_object(oid, OpenMode::ReadWrite).await?,
            EntryKind::Symlink => {}
        }

        let now = Timespec::now();
        let target = target.map(str::to_string);
        let entry = Entry {
            mode: kind.type_bits() | (mode & !entry::S_IFMT),
            oid,
            mtime: now,
            ctime: now,
            chunk_size,
            oclass: class,
            uid: self.uid,
            gid: self.gid,
            value_len: target.as_ref().map_or(0, |t| t.len() as u64),
            obj_hlc: 0,
            value: target,
        };
        let inserted = self
            .insert_entry(Tx::None, parent_oid, name, &entry, Vec::new())
            .await;
        if let Err(e) = inserted {
            if kind != EntryKind::Symlink {
                self.store.close_object(oid).await?;
            }
            return Err(e);
        }
        debug!("Created {name} as {oid}", name: name, oid: oid.to_string());
        Object::from_entry(self, parent_oid, name, &entry, flags)
    }

    /// Checks an existing object against the requested kind and applies
    /// `TRUNCATE`. The handle is released when either fails.
    async fn check_opened(&self, obj: Object, kind: EntryKind, flags: OpenFlags) -> Result<Object> {
        match self.prepare_opened(&obj, kind, flags).await {
            Ok(()) => Ok(obj),
            Err(e) => {
                obj.release(self).await?;
                Err(e)
            }
        }
    }

    async fn prepare_opened(&self, obj: &Object, kind: EntryKind, flags: OpenFlags) -> Result<()> {
        let found = match obj.kind() {
            ObjectKind::Dir { .. } => EntryKind::Directory,
            ObjectKind::File { .. } => EntryKind::File,
            ObjectKind::Symlink { .. } => EntryKind::Symlink,
        };
        if found != kind {
            return Err(if kind == EntryKind::Directory {
                Error::not_a_directory(obj.name().to_string())
            } else {
                Error::invalid(format!("{} has another type", obj.name()))
            });
        }
        if flags.contains(OpenFlags::TRUNCATE) && obj.is_file() {
            let chunk_size = obj.chunk_size().unwrap_or_default();
            self.check_writable()?;
            self.store
                .array_set_size(Tx::None, obj.oid(), chunk_size, 0)
                .await?;
        }
        Ok(())
    }

    /// Creates a directory. An existing name is always `AlreadyExists`.
    pub async fn mkdir(&self, parent: &Object, name: &str, mode: u32, oclass: ObjectClass) -> Result<()> {
        let dir = self
            .open(
                parent,
                name,
                entry::S_IFDIR | (mode & !entry::S_IFMT),
                OpenFlags::READ_WRITE | OpenFlags::CREATE | OpenFlags::EXCLUSIVE,
                oclass,
                0,
                None,
            )
            .await?;
        dir.release(self).await
    }

    /// Creates a symlink to `target`.
    pub async fn symlink(&self, parent: &Object, name: &str, target: &str) -> Result<Object> {
        self.open(
            parent,
            name,
            entry::S_IFLNK | 0o777,
            OpenFlags::READ_WRITE | OpenFlags::CREATE | OpenFlags::EXCLUSIVE,
            ObjectClass::UNKNOWN,
            0,
            Some(target),
        )
        .await
    }

    pub(crate) async fn dir_is_empty(&self, tx: Tx, oid: ObjectId) -> Result<bool> {
        let mut anchor = Anchor::new();
        Ok(self.store.list_dkeys(tx, oid, &mut anchor, 1).await?.is_empty())
    }

    /// Removes every entry below a directory, depth first.
    fn remove_dir_contents(&self, tx: Tx, dir_oid: ObjectId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut anchor = Anchor::new();
            while !anchor.is_eof() {
                let keys = self
                    .store
                    .list_dkeys(tx, dir_oid, &mut anchor, DIR_PAGE)
                    .await?;
                for key in keys {
                    let Ok(name) = String::from_utf8(key.clone()) else {
                        warn!("Skipping entry with a non-UTF-8 name in {dir}", dir: dir_oid.to_string());
                        continue;
                    };
                    let Some(child) = self.fetch_entry(tx, dir_oid, &name, false).await? else {
                        continue;
                    };
                    if child.is_dir() {
                        self.remove_dir_contents(tx, child.oid).await?;
                    }
                    if !child.is_symlink() {
                        self.store.punch_object(tx, child.oid).await?;
                    }
                    self.store
                        .punch_dkey(tx, dir_oid, &key, PunchCond::None)
                        .await?;
                }
            }
            Ok(())
        })
    }

    /// Removes `name` from `parent` and returns the removed entry's oid.
    ///
    /// A non-empty directory is `NotEmpty` unless `force` is set, in which
    /// case its whole subtree goes first.
    pub async fn remove(&self, parent: &Object, name: &str, force: bool) -> Result<ObjectId> {
        self.check_writable()?;
        let parent_oid = self.dir_oid(parent)?;
        entry::check_name(name)?;

        let oid = self
            .transact(move |tx| {
                Box::pin(async move {
                    let entry = self.require_entry(tx, parent_oid, name, false).await?;
                    if entry.is_dir() && !self.dir_is_empty(tx, entry.oid).await? {
                        if !force {
                            return Err(Error::not_empty(name));
                        }
                        self.remove_dir_contents(tx, entry.oid).await?;
                    }
                    if !entry.is_symlink() {
                        self.store.punch_object(tx, entry.oid).await?;
                    }
                    let cond = if matches!(tx, Tx::None) {
                        PunchCond::Exists
                    } else {
                        PunchCond::None
                    };
                    self.store
                        .punch_dkey(tx, parent_oid, name.as_bytes(), cond)
                        .await
                        .map_err(|e| match e {
                            objstore::Error::NotFound => Error::not_found(name),
                            other => other.into(),
                        })?;
                    Ok(entry.oid)
                })
            })
            .await?;
        debug!("Removed {name} ({oid})", name: name, oid: oid.to_string());
        Ok(oid)
    }

    /// Extended attributes stored on an entry, ready to be written
    /// under another dkey.
    pub(crate) async fn entry_xattrs(&self, tx: Tx, parent: ObjectId, name: &str) -> Result<Vec<AkeyUpdate>> {
        let prefix = XATTR_PREFIX.as_bytes();
        let mut akeys = Vec::new();
        let mut anchor = Anchor::new();
        while !anchor.is_eof() {
            let page = self
                .store
                .list_akeys(tx, parent, name.as_bytes(), &mut anchor, DIR_PAGE)
                .await?;
            akeys.extend(page.into_iter().filter(|a| a.starts_with(prefix)));
        }
        if akeys.is_empty() {
            return Ok(Vec::new());
        }

        let iods: Vec<Iod> = akeys.iter().map(Iod::single).collect();
        let values = self
            .store
            .fetch(tx, parent, name.as_bytes(), FetchCond::None, &iods)
            .await?;
        Ok(akeys
            .into_iter()
            .zip(values)
            .filter_map(|(akey, value)| value.map(|v| AkeyUpdate::single(akey, v)))
            .collect())
    }

    /// Renames `src_name` in `src_parent` to `dst_name` in `dst_parent`,
    /// replacing a compatible destination unless `NOREPLACE` is set.
    ///
    /// Extended attributes move with the entry.
    pub async fn move_entry(
        &self,
        src_parent: &Object,
        src_name: &str,
        dst_parent: &Object,
        dst_name: &str,
        flags: RenameFlags,
    ) -> Result<()> {
        self.check_writable()?;
        let src_dir = self.dir_oid(src_parent)?;
        let dst_dir = self.dir_oid(dst_parent)?;
        entry::check_name(src_name)?;
        entry::check_name(dst_name)?;

        self.transact(move |tx| {
            Box::pin(async move {
                let mut entry = self.require_entry(tx, src_dir, src_name, true).await?;
                if src_dir == dst_dir && src_name == dst_name {
                    return Ok(());
                }

                if let Some(dst) = self.fetch_entry(tx, dst_dir, dst_name, false).await? {
                    if flags.contains(RenameFlags::NOREPLACE) {
                        return Err(Error::already_exists(dst_name));
                    }
                    if dst.is_dir() {
                        if !entry.is_dir() {
                            return Err(Error::is_a_directory(dst_name));
                        }
                        if !self.dir_is_empty(tx, dst.oid).await? {
                            return Err(Error::not_empty(dst_name));
                        }
                    } else if entry.is_dir() {
                        return Err(Error::not_a_directory(dst_name));
                    }
                    if !dst.is_symlink() {
                        self.store.punch_object(tx, dst.oid).await?;
                    }
                    self.store
                        .punch_dkey(tx, dst_dir, dst_name.as_bytes(), PunchCond::None)
                        .await?;
                }

                let xattrs = self.entry_xattrs(tx, src_dir, src_name).await?;
                entry.ctime = Timespec::now();
                self.insert_entry(tx, dst_dir, dst_name, &entry, xattrs).await?;
                self.store
                    .punch_dkey(tx, src_dir, src_name.as_bytes(), PunchCond::None)
                    .await?;
                debug!("Moved {src_name} to {dst_name}", src_name: src_name, dst_name: dst_name);
                Ok(())
            })
        })
        .await
    }

    /// Swaps two entries, each keeping its extended attributes.
    pub async fn exchange(
        &self,
        parent1: &Object,
        name1: &str,
        parent2: &Object,
        name2: &str,
    ) -> Result<()> {
        self.check_writable()?;
        let dir1 = self.dir_oid(parent1)?;
        let dir2 = self.dir_oid(parent2)?;
        entry::check_name(name1)?;
        entry::check_name(name2)?;

        self.transact(move |tx| {
            Box::pin(async move {
                let mut first = self.require_entry(tx, dir1, name1, true).await?;
                let mut second = self.require_entry(tx, dir2, name2, true).await?;
                if dir1 == dir2 && name1 == name2 {
                    return Ok(());
                }
                let first_xattrs = self.entry_xattrs(tx, dir1, name1).await?;
                let second_xattrs = self.entry_xattrs(tx, dir2, name2).await?;

                self.store
                    .punch_dkey(tx, dir1, name1.as_bytes(), PunchCond::None)
                    .await?;
                self.store
                    .punch_dkey(tx, dir2, name2.as_bytes(), PunchCond::None)
                    .await?;

                let now = Timespec::now();
                first.ctime = now;
                second.ctime = now;
                self.insert_entry(tx, dir2, name2, &first, first_xattrs).await?;
                self.insert_entry(tx, dir1, name1, &second, second_xattrs).await?;
                debug!("Exchanged {name1} and {name2}", name1: name1, name2: name2);
                Ok(())
            })
        })
        .await
    }

    /// Next page of at most `max` names. Resume with the same anchor
    /// until `anchor.is_eof()`.
    pub async fn readdir(&self, dir: &Object, anchor: &mut Anchor, max: usize) -> Result<Vec<DirEntry>> {
        let oid = self.dir_oid(dir)?;
        if max == 0 {
            return Err(Error::invalid("readdir page size is 0"));
        }
        let keys = self.store.list_dkeys(Tx::None, oid, anchor, max).await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| String::from_utf8(key).ok())
            .map(|name| DirEntry { name })
            .collect())
    }

    /// `readdir` with the stat of every entry. Entries removed between
    /// listing and stat are left out.
    pub async fn readdirplus(
        &self,
        dir: &Object,
        anchor: &mut Anchor,
        max: usize,
    ) -> Result<Vec<(DirEntry, Stat)>> {
        let oid = self.dir_oid(dir)?;
        let names = self.readdir(dir, anchor, max).await?;
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let Some(entry) = self.fetch_entry(Tx::None, oid, &name.name, false).await? else {
                continue;
            };
            let stat = self.entry_stat(&entry).await?;
            out.push((name, stat));
        }
        Ok(out)
    }

    /// Calls `callback` for up to `max` names after `anchor` and returns
    /// how many were visited.
    pub async fn iterate<F, Fut>(
        &self,
        dir: &Object,
        anchor: &mut Anchor,
        max: usize,
        mut callback: F,
    ) -> Result<usize>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let oid = self.dir_oid(dir)?;
        let mut visited = 0;
        while visited < max && !anchor.is_eof() {
            let want = (max - visited).min(DIR_PAGE);
            let keys = self.store.list_dkeys(Tx::None, oid, anchor, want).await?;
            for key in keys {
                visited += 1;
                match String::from_utf8(key) {
                    Ok(name) => callback(name).await?,
                    Err(_) => warn!("Skipping entry with a non-UTF-8 name in {dir}", dir: oid.to_string()),
                }
            }
        }
        Ok(visited)
    }

    pub async fn num_entries(&self, dir: &Object) -> Result<u64> {
        let oid = self.dir_oid(dir)?;
        let mut anchor = Anchor::new();
        let mut count = 0;
        while !anchor.is_eof() {
            count += self
                .store
                .list_dkeys(Tx::None, oid, &mut anchor, DIR_PAGE)
                .await?
                .len() as u64;
        }
        Ok(count)
    }
}
