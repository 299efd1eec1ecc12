// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Consistency checking and repair.
//!
//! `check` finds objects that exist in the container but are not
//! reachable from the root, using a snapshot's object-ID table. The other
//! functions repair individual pieces of namespace metadata.

use crate::dir::DIR_PAGE;
use crate::entry::{self, Entry, EntryKind, Field, INODE_AKEY, S_IFDIR, S_IFREG, Timespec};
use crate::error::{Error, Result};
use crate::flags::{CheckFlags, MountFlags, OpenFlags};
use crate::namespace::{Namespace, link_root};
use crate::obj::Object;
use crate::superblock::{self, NamespaceAttr, ROOT_NAME};
use diagnostics::*;
use futures::future::BoxFuture;
use objstore::{
    ARRAY_AKEY, AkeyUpdate, Anchor, Epoch, LayoutType, ObjectClass, ObjectId, ObjectStore,
    OitHandle, Tx, UpdateCond,
};
use std::sync::Arc;

/// Directory under the root holding relinked orphans.
pub const LOST_FOUND: &str = "lost+found";

/// Outcome of a `check` run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    /// Objects marked reachable.
    pub marked: u64,
    /// Entries visited, counting the superblock and root.
    pub scanned: u64,
    /// Unreachable objects found.
    pub orphans: u64,
    pub verify_failed: u64,
    pub verify_skipped: u64,
    /// Name of the directory under `lost+found` used by this run.
    pub quarantine: Option<String>,
}

/// Usage summary produced by `scan`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub files: u64,
    pub dirs: u64,
    pub symlinks: u64,
    pub total_bytes: u64,
    pub largest_file: u64,
    /// Largest number of entries in one directory.
    pub largest_dir: u64,
    pub max_depth: u32,
    pub scanned: u64,
}

/// Mounts read-write for the checker, adding `BALANCED` when the
/// container demands it.
async fn mount_for_repair(store: &Arc<dyn ObjectStore>, flags: MountFlags) -> Result<Namespace> {
    match Namespace::mount(store.clone(), flags).await {
        Err(Error::PermissionDenied(_)) => {
            Namespace::mount(store.clone(), flags | MountFlags::BALANCED).await
        }
        other => other,
    }
}

async fn release(ns: Namespace) {
    if let Err((_, err)) = ns.unmount().await {
        let reason = err.to_string();
        warn!("Checker mount not released: {reason}", reason: reason);
    }
}

struct Checker<'a> {
    ns: &'a Namespace,
    flags: CheckFlags,
    oit: OitHandle,
    epoch: Epoch,
    report: CheckReport,
}

impl Checker<'_> {
    fn store(&self) -> &dyn ObjectStore {
        self.ns.store.as_ref()
    }

    /// Marks `oid` reachable. Objects that never stored anything are
    /// not in the table and are skipped.
    async fn mark(&mut self, oid: ObjectId) -> Result<()> {
        match self.store().oit_mark(self.oit, oid).await {
            Ok(()) => {
                self.report.marked += 1;
                Ok(())
            }
            Err(objstore::Error::NotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn verify(&mut self, oid: ObjectId) -> Result<()> {
        if !self.flags.contains(CheckFlags::VERIFY) {
            return Ok(());
        }
        match self.store().obj_verify(oid, self.epoch).await {
            Ok(()) => Ok(()),
            Err(objstore::Error::Mismatch) => {
                warn!("Object {oid} failed verification", oid: oid.to_string());
                self.report.verify_failed += 1;
                Ok(())
            }
            Err(objstore::Error::NotSupported) => {
                self.report.verify_skipped += 1;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn walk<'s>(&'s mut self, dir: &'s Object) -> BoxFuture<'s, Result<()>> {
        Box::pin(async move {
            let mut anchor = Anchor::new();
            while !anchor.is_eof() {
                let names = self.ns.readdir(dir, &mut anchor, DIR_PAGE).await?;
                for name in names {
                    let flags = OpenFlags::READ_ONLY | OpenFlags::NO_FOLLOW;
                    let child = match self.ns.lookup_rel(dir, &name.name, flags).await {
                        Ok(child) => child,
                        Err(Error::NotFound(_)) => continue,
                        Err(e) => return Err(e),
                    };
                    self.report.scanned += 1;
                    let visited: Result<()> = async {
                        if child.is_symlink() {
                            return Ok(());
                        }
                        self.verify(child.oid()).await?;
                        self.mark(child.oid()).await?;
                        if child.is_dir() {
                            self.walk(&child).await?;
                        }
                        Ok(())
                    }
                    .await;
                    child.release(self.ns).await?;
                    visited?;
                }
            }
            Ok(())
        })
    }

    async fn quarantine_dir(&self, name: Option<&str>) -> Result<(Object, String)> {
        let lost_found = self
            .ns
            .open(
                self.ns.root(),
                LOST_FOUND,
                S_IFDIR | 0o755,
                OpenFlags::READ_WRITE | OpenFlags::CREATE,
                ObjectClass::UNKNOWN,
                0,
                None,
            )
            .await?;
        let run_name = name.map_or_else(
            || chrono::Local::now().format("%Y-%m-%d-%H:%M:%S").to_string(),
            str::to_string,
        );
        let run = self
            .ns
            .open(
                &lost_found,
                &run_name,
                S_IFDIR | 0o755,
                OpenFlags::READ_WRITE | OpenFlags::CREATE | OpenFlags::EXCLUSIVE,
                ObjectClass::UNKNOWN,
                0,
                None,
            )
            .await;
        lost_found.release(self.ns).await?;
        Ok((run?, run_name))
    }

    /// Marks every object named by an entry record of `oid`, so that only
    /// the top of an unreachable subtree is relinked.
    async fn mark_children(&mut self, oid: ObjectId) -> Result<()> {
        let mut anchor = Anchor::new();
        while !anchor.is_eof() {
            let keys = self
                .store()
                .list_dkeys(Tx::None, oid, &mut anchor, DIR_PAGE)
                .await?;
            for key in keys {
                let Ok(name) = String::from_utf8(key) else {
                    continue;
                };
                let found = entry::fetch(self.store(), self.ns.layout, Tx::None, oid, &name, false).await;
                // Not every dictionary object is a directory.
                let Ok(Some(child)) = found else {
                    continue;
                };
                match self.store().oit_mark(self.oit, child.oid).await {
                    Ok(()) | Err(objstore::Error::NotFound) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    /// Chunk size of an orphaned file: the largest extent end in any of
    /// its chunks, when that exceeds the default.
    async fn estimate_chunk_size(&self, oid: ObjectId, default: u64) -> Result<u64> {
        let mut largest = 0;
        let mut anchor = Anchor::new();
        while !anchor.is_eof() {
            let keys = self
                .store()
                .list_dkeys(Tx::None, oid, &mut anchor, DIR_PAGE)
                .await?;
            for key in keys {
                let end = self.store().query_max_offset(oid, &key, ARRAY_AKEY).await?;
                largest = largest.max(end);
            }
        }
        Ok(largest.max(default))
    }

    async fn orphan_entry(&self, oid: ObjectId) -> Result<Entry> {
        let default_chunk = self.ns.attr.effective_chunk_size();
        let (mode, chunk_size) = if oid.is_array() {
            (S_IFREG | 0o600, self.estimate_chunk_size(oid, default_chunk).await?)
        } else {
            (S_IFDIR | 0o700, default_chunk)
        };
        let (uid, gid) = self.ns.ids();
        let now = Timespec::now();
        Ok(Entry {
            mode,
            oid,
            mtime: now,
            ctime: now,
            chunk_size,
            oclass: oid.class(),
            uid,
            gid,
            ..Entry::default()
        })
    }

    async fn unmarked_page(&self, anchor: &mut Anchor) -> Result<Vec<ObjectId>> {
        Ok(self
            .store()
            .oit_list_unmarked(self.oit, anchor, DIR_PAGE)
            .await?)
    }

    /// Links every unmarked object under `run` by its identifier.
    async fn relink_orphans(&mut self, run: &Object, run_name: &str) -> Result<()> {
        let mut anchor = Anchor::new();
        while !anchor.is_eof() {
            for oid in self.unmarked_page(&mut anchor).await? {
                self.verify(oid).await?;
                let orphan = self.orphan_entry(oid).await?;
                let entry_name = oid.to_string();
                self.ns
                    .insert_entry(Tx::None, run.oid(), &entry_name, &orphan, Vec::new())
                    .await?;
                if self.flags.contains(CheckFlags::PRINT) {
                    info!(
                        "Relinked {entry_name} into lost+found/{run_name}",
                        entry_name: entry_name.as_str(),
                        run_name: run_name
                    );
                }
                self.report.orphans += 1;
            }
        }
        Ok(())
    }

    async fn run(mut self, name: Option<&str>) -> Result<CheckReport> {
        let sb_oid = self.ns.sb_oid;
        let root = self.ns.root().clone();
        self.verify(sb_oid).await?;
        self.mark(sb_oid).await?;
        self.verify(root.oid()).await?;
        self.mark(root.oid()).await?;
        self.report.scanned = 2;
        self.walk(&root).await?;
        let reachable = self.report.marked;
        let scanned = self.report.scanned;
        info!(
            "Marked {reachable} reachable objects, scanned {scanned} entries",
            reachable: reachable,
            scanned: scanned
        );

        let relink = self.flags.contains(CheckFlags::RELINK);
        let quarantine = if relink {
            Some(self.quarantine_dir(name).await?)
        } else {
            None
        };

        let mut anchor = Anchor::new();
        while !anchor.is_eof() {
            for oid in self.unmarked_page(&mut anchor).await? {
                if relink {
                    if !oid.is_array() {
                        self.mark_children(oid).await?;
                    }
                    continue;
                }
                if self.flags.contains(CheckFlags::PRINT) {
                    info!("Unreachable object {oid}", oid: oid.to_string());
                }
                self.verify(oid).await?;
                if self.flags.contains(CheckFlags::REMOVE) {
                    self.store().punch_object(Tx::None, oid).await?;
                }
                self.report.orphans += 1;
            }
        }

        if let Some((run, run_name)) = quarantine {
            let relinked = self.relink_orphans(&run, &run_name).await;
            run.release(self.ns).await?;
            relinked?;
            self.report.quarantine = Some(run_name);
        }
        Ok(self.report)
    }
}

/// Checks the namespace in a container for unreachable objects.
///
/// `RELINK` moves them under `lost+found/<name>`, `REMOVE` punches
/// them. Without either they are only counted. With `VERIFY`, a failed
/// verification makes the whole call fail with `Io` once the walk is
/// complete.
pub async fn check(
    store: Arc<dyn ObjectStore>,
    flags: CheckFlags,
    name: Option<&str>,
) -> Result<CheckReport> {
    if flags.contains(CheckFlags::RELINK) && flags.contains(CheckFlags::REMOVE) {
        return Err(Error::invalid("RELINK and REMOVE are mutually exclusive"));
    }
    if let Some(name) = name {
        entry::check_name(name)?;
    }
    if flags.contains(CheckFlags::EVICT_ALL) {
        store.evict_handles().await?;
    }

    let ns = mount_for_repair(&store, MountFlags::READ_WRITE).await?;
    let epoch = match store.create_snapshot().await {
        Ok(epoch) => epoch,
        Err(e) => {
            release(ns).await;
            return Err(e.into());
        }
    };
    let oit = match store.oit_open(epoch).await {
        Ok(oit) => oit,
        Err(e) => {
            if let Err(err) = store.destroy_snapshot(epoch).await {
                let reason = err.to_string();
                warn!("Snapshot not destroyed: {reason}", reason: reason);
            }
            release(ns).await;
            return Err(e.into());
        }
    };

    let checker = Checker {
        ns: &ns,
        flags,
        oit,
        epoch,
        report: CheckReport::default(),
    };
    let result = checker.run(name).await;

    let closed = store.oit_close(oit).await;
    let destroyed = store.destroy_snapshot(epoch).await;
    release(ns).await;

    let report = result?;
    closed?;
    destroyed?;

    let orphans = report.orphans;
    info!("Check complete, {orphans} orphans", orphans: orphans);
    if flags.contains(CheckFlags::VERIFY) && report.verify_failed > 0 {
        return Err(Error::io(format!(
            "{} objects failed verification",
            report.verify_failed
        )));
    }
    Ok(report)
}

async fn posix_roots(store: &dyn ObjectStore) -> Result<[ObjectId; 2]> {
    let props = store.query_props().await?;
    if props.layout != LayoutType::Posix {
        return Err(Error::invalid("container is not a POSIX namespace"));
    }
    let [sb_oid, root_oid] = props.roots;
    if sb_oid.is_nil() || root_oid.is_nil() {
        return Err(Error::io("container roots are not set"));
    }
    Ok(props.roots)
}

/// Rewrites a lost or damaged superblock and relinks the root.
pub async fn recreate_sb(store: &dyn ObjectStore, attr: &NamespaceAttr) -> Result<()> {
    _ = attr.hints()?;
    let [sb_oid, root_oid] = posix_roots(store).await?;
    superblock::punch(store, sb_oid).await?;
    superblock::write(store, sb_oid, attr).await?;
    link_root(
        store,
        sb_oid,
        root_oid,
        attr.effective_chunk_size(),
        attr.default_dir_class(),
    )
    .await?;
    info!("Recreated superblock");
    Ok(())
}

/// Reinserts the root entry if it is missing.
pub async fn relink_root(store: &dyn ObjectStore) -> Result<()> {
    let [sb_oid, root_oid] = posix_roots(store).await?;
    let (layout, attr) = superblock::read(store, sb_oid).await?;
    if entry::fetch(store, layout, Tx::None, sb_oid, ROOT_NAME, false)
        .await?
        .is_some()
    {
        debug!("Root entry present, nothing to relink");
        return Ok(());
    }
    link_root(
        store,
        sb_oid,
        root_oid,
        attr.effective_chunk_size(),
        attr.default_dir_class(),
    )
    .await?;
    info!("Relinked root entry");
    Ok(())
}

/// Rewrites the type bits of an entry from what its object looks like:
/// an array is a file, a stored target length means a symlink, anything
/// else is a directory. Permissions become 0700.
pub async fn obj_fix_type(ns: &Namespace, parent: &Object, name: &str) -> Result<()> {
    ns.check_writable()?;
    let parent_oid = ns.dir_oid(parent)?;
    entry::check_name(name)?;
    let mut found = ns.require_entry(Tx::None, parent_oid, name, false).await?;
    let kind = if found.oid.is_array() {
        EntryKind::File
    } else if found.value_len != 0 {
        EntryKind::Symlink
    } else {
        EntryKind::Directory
    };
    found.mode = kind.type_bits() | 0o700;
    ns.update_entry(Tx::None, parent_oid, name, &mut found, &[Field::Mode], Vec::new())
        .await
}

/// Size of the file stored in `oid`. A `chunk_size` of 0 uses the
/// container default.
pub async fn get_size_by_oid(ns: &Namespace, oid: ObjectId, chunk_size: u64) -> Result<u64> {
    if !oid.is_array() {
        return Err(Error::invalid(format!("{oid} is not a file object")));
    }
    let chunk_size = if chunk_size == 0 {
        ns.attr.effective_chunk_size()
    } else {
        chunk_size
    };
    Ok(ns.store.array_stat(Tx::None, oid, chunk_size).await?.size)
}

/// Sets the owner of the root directory. `None` keeps a field.
pub async fn cont_set_owner(store: &dyn ObjectStore, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
    let [sb_oid, _] = posix_roots(store).await?;
    let (layout, _) = superblock::read(store, sb_oid).await?;
    let mut root = entry::fetch(store, layout, Tx::None, sb_oid, ROOT_NAME, false)
        .await?
        .ok_or_else(|| Error::not_found("root entry"))?;

    let mut fields = vec![Field::Ctime, Field::CtimeNsec];
    if let Some(uid) = uid {
        root.uid = uid;
        fields.push(Field::Uid);
    }
    if let Some(gid) = gid {
        root.gid = gid;
        fields.push(Field::Gid);
    }
    root.ctime = Timespec::now();
    store
        .update(
            Tx::None,
            sb_oid,
            ROOT_NAME.as_bytes(),
            UpdateCond::DkeyUpdate,
            vec![AkeyUpdate::extents(INODE_AKEY, layout.extents(&root, &fields))],
        )
        .await?;
    Ok(())
}

fn scan_dir<'a>(
    ns: &'a Namespace,
    dir: &'a Object,
    depth: u32,
    report: &'a mut ScanReport,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        report.max_depth = report.max_depth.max(depth);
        let mut entries = 0;
        let mut anchor = Anchor::new();
        while !anchor.is_eof() {
            for name in ns.readdir(dir, &mut anchor, DIR_PAGE).await? {
                entries += 1;
                let flags = OpenFlags::READ_ONLY | OpenFlags::NO_FOLLOW;
                let child = match ns.lookup_rel(dir, &name.name, flags).await {
                    Ok(child) => child,
                    Err(Error::NotFound(_)) => continue,
                    Err(e) => return Err(e),
                };
                report.scanned += 1;
                let visited: Result<()> = async {
                    if child.is_dir() {
                        report.dirs += 1;
                        scan_dir(ns, &child, depth + 1, report).await?;
                    } else if child.is_file() {
                        let size = child.get_size(ns).await?;
                        report.files += 1;
                        report.total_bytes += size;
                        report.largest_file = report.largest_file.max(size);
                    } else {
                        report.symlinks += 1;
                    }
                    Ok(())
                }
                .await;
                child.release(ns).await?;
                visited?;
            }
        }
        report.largest_dir = report.largest_dir.max(entries);
        Ok(())
    })
}

/// Walks the whole namespace read-only and summarizes its contents.
pub async fn scan(store: Arc<dyn ObjectStore>) -> Result<ScanReport> {
    let ns = mount_for_repair(&store, MountFlags::READ_ONLY).await?;
    let mut report = ScanReport::default();
    let root = ns.root().clone();
    let result = scan_dir(&ns, &root, 0, &mut report).await;
    release(ns).await;
    result?;

    let files = report.files;
    let dirs = report.dirs;
    let total_bytes = report.total_bytes;
    info!(
        "Scanned {files} files in {dirs} directories, {total_bytes} bytes",
        files: files,
        dirs: dirs,
        total_bytes: total_bytes
    );
    Ok(report)
}
