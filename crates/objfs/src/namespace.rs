// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Mount handle, container formatting and shared entry helpers

use crate::entry::{self, Entry, Field, Layout, S_IFDIR, Timespec};
use crate::error::{Error, Result};
use crate::flags::{MountFlags, OpenFlags};
use crate::obj::{Object, ObjectKind};
use crate::oid::{OidAllocator, select_class};
use crate::superblock::{self, ConsistencyMode, NamespaceAttr, ROOT_NAME};
use crate::tx::run_in_tx;
use diagnostics::*;
use futures::future::BoxFuture;
use objstore::{
    AkeyUpdate, ContainerProps, LayoutType, ObjectClass, ObjectId, ObjectStore, OpenMode, Tx,
    UpdateCond,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Environment variable forcing transactions on relaxed containers.
pub const USE_DTX_ENV: &str = "OBJFS_USE_DTX";

fn use_dtx_from_env() -> bool {
    std::env::var(USE_DTX_ENV)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Effective user and group of this process.
pub(crate) fn process_ids() -> (u32, u32) {
    // SAFETY: geteuid and getegid have no preconditions and cannot fail.
    unsafe { (libc::geteuid(), libc::getegid()) }
}

/// Formats an empty container as a namespace.
///
/// Records the layout and root identifiers in the container properties,
/// writes the superblock and links the root directory.
pub async fn format(store: &dyn ObjectStore, attr: &NamespaceAttr) -> Result<()> {
    _ = attr.hints()?;
    let props = store.query_props().await?;
    if props.layout == LayoutType::Posix {
        return Err(Error::already_exists("container is already formatted"));
    }

    let dir_class = attr.default_dir_class();
    let roots = superblock::root_oids(dir_class);
    store
        .set_props(ContainerProps {
            layout: LayoutType::Posix,
            roots,
            label: props.label,
        })
        .await?;

    let [sb_oid, root_oid] = roots;
    superblock::write(store, sb_oid, attr).await?;
    link_root(store, sb_oid, root_oid, attr.effective_chunk_size(), dir_class).await?;

    let chunk_size = attr.effective_chunk_size();
    info!("Formatted namespace, chunk size {chunk_size}", chunk_size: chunk_size);
    Ok(())
}

/// Inserts the root entry into the superblock object. An existing root
/// entry is left as it is.
pub(crate) async fn link_root(
    store: &dyn ObjectStore,
    sb_oid: ObjectId,
    root_oid: ObjectId,
    chunk_size: u64,
    oclass: ObjectClass,
) -> Result<()> {
    let (uid, gid) = process_ids();
    let now = Timespec::now();
    let root = Entry {
        mode: S_IFDIR | 0o755,
        oid: root_oid,
        mtime: now,
        ctime: now,
        chunk_size,
        oclass,
        uid,
        gid,
        ..Entry::default()
    };
    match entry::insert(store, Layout::CURRENT, Tx::None, sb_oid, ROOT_NAME, &root, Vec::new()).await {
        Ok(()) => Ok(()),
        Err(Error::AlreadyExists(_)) => {
            warn!("Root entry already exists, keeping it");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// A mounted namespace.
///
/// Every namespace operation goes through this handle. It can be shared
/// across tasks behind an `Arc`.
pub struct Namespace {
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) sb_oid: ObjectId,
    pub(crate) root: Object,
    pub(crate) attr: NamespaceAttr,
    pub(crate) layout: Layout,
    pub(crate) oids: OidAllocator,
    pub(crate) read_write: bool,
    pub(crate) use_tx: bool,
    pub(crate) uid: u32,
    pub(crate) gid: u32,
    pool_refs: AtomicU32,
    cont_refs: AtomicU32,
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("sb_oid", &self.sb_oid)
            .field("root", &self.root.oid())
            .field("layout", &self.layout.version())
            .field("read_write", &self.read_write)
            .field("use_tx", &self.use_tx)
            .finish_non_exhaustive()
    }
}

impl Namespace {
    /// Mounts the namespace stored in a container.
    pub async fn mount(store: Arc<dyn ObjectStore>, flags: MountFlags) -> Result<Namespace> {
        let props = store.query_props().await?;
        if props.layout != LayoutType::Posix {
            return Err(Error::invalid("container is not a POSIX namespace"));
        }
        let [sb_oid, root_oid] = props.roots;
        if sb_oid.is_nil() || root_oid.is_nil() {
            return Err(Error::io("container roots are not set"));
        }

        let read_write = flags.contains(MountFlags::READ_WRITE);
        let mode = if read_write {
            OpenMode::ReadWrite
        } else {
            OpenMode::ReadOnly
        };

        store.open_object(sb_oid, mode).await?;
        let mounted = Self::mount_opened(store.clone(), sb_oid, flags, mode).await;
        if mounted.is_err() {
            store.close_object(sb_oid).await?;
        }
        mounted
    }

    /// Finishes a mount once the superblock object is open.
    async fn mount_opened(
        store: Arc<dyn ObjectStore>,
        sb_oid: ObjectId,
        flags: MountFlags,
        mode: OpenMode,
    ) -> Result<Namespace> {
        let read_write = flags.contains(MountFlags::READ_WRITE);
        let (layout, mut attr) = superblock::read(store.as_ref(), sb_oid).await?;

        let balanced = attr.mode == ConsistencyMode::Balanced;
        if balanced && !flags.contains(MountFlags::BALANCED) {
            return Err(Error::permission_denied(
                "balanced container requires a balanced mount",
            ));
        }
        let use_tx = balanced || flags.contains(MountFlags::BALANCED) || use_dtx_from_env();
        if use_tx && !balanced {
            attr.mode = ConsistencyMode::Balanced;
        }

        let root_entry = entry::fetch(store.as_ref(), layout, Tx::None, sb_oid, ROOT_NAME, false)
            .await?
            .ok_or_else(|| Error::not_found("root entry"))?;
        if !root_entry.is_dir() {
            return Err(Error::not_a_directory("root entry"));
        }

        let open_flags = if read_write {
            OpenFlags::READ_WRITE
        } else {
            OpenFlags::READ_ONLY
        };
        let root = Object::new(
            root_entry.oid,
            sb_oid,
            ROOT_NAME.to_string(),
            root_entry.mode,
            open_flags,
            ObjectKind::Dir {
                chunk_size: if root_entry.chunk_size == 0 {
                    attr.effective_chunk_size()
                } else {
                    root_entry.chunk_size
                },
                oclass: select_class(
                    root_entry.oclass,
                    ObjectClass::UNKNOWN,
                    attr.default_dir_class(),
                ),
            },
        );

        let oids = if read_write {
            OidAllocator::reserve(store.as_ref()).await?
        } else {
            OidAllocator::exhausted()
        };
        store.open_object(root_entry.oid, mode).await?;

        let (uid, gid) = process_ids();
        let version = layout.version();
        info!(
            "Mounted namespace, layout version {version}, read_write {read_write}, use_tx {use_tx}",
            version: version,
            read_write: read_write,
            use_tx: use_tx
        );

        Ok(Namespace {
            store,
            sb_oid,
            root,
            attr,
            layout,
            oids,
            read_write,
            use_tx,
            uid,
            gid,
            pool_refs: AtomicU32::new(0),
            cont_refs: AtomicU32::new(0),
        })
    }

    /// Assembles a mount from hand-off state.
    pub(crate) fn from_parts(
        store: Arc<dyn ObjectStore>,
        sb_oid: ObjectId,
        root: Object,
        attr: NamespaceAttr,
        layout: Layout,
        read_write: bool,
        use_tx: bool,
        ids: (u32, u32),
    ) -> Namespace {
        Namespace {
            store,
            sb_oid,
            root,
            attr,
            layout,
            oids: OidAllocator::exhausted(),
            read_write,
            use_tx,
            uid: ids.0,
            gid: ids.1,
            pool_refs: AtomicU32::new(0),
            cont_refs: AtomicU32::new(0),
        }
    }

    /// Releases the mount.
    ///
    /// Fails with `Busy` and hands the mount back while pool or container
    /// references are held.
    pub async fn unmount(self) -> std::result::Result<(), (Namespace, Error)> {
        let pool = self.pool_refs.load(Ordering::SeqCst);
        let cont = self.cont_refs.load(Ordering::SeqCst);
        if pool != 0 || cont != 0 {
            let err = Error::busy(format!("{pool} pool and {cont} container references held"));
            return Err((self, err));
        }
        if let Err(err) = self.close_roots().await {
            return Err((self, err));
        }
        debug!("Unmounted namespace");
        Ok(())
    }

    async fn close_roots(&self) -> Result<()> {
        self.store.close_object(self.root.oid()).await?;
        self.store.close_object(self.sb_oid).await?;
        Ok(())
    }

    /// Takes the store reference held by a handle returned to the caller.
    pub(crate) async fn open_handle(&self, obj: &Object) -> Result<()> {
        match obj.kind() {
            ObjectKind::Dir { .. } => self.store.open_object(obj.oid(), self.open_mode()).await?,
            ObjectKind::File { chunk_size } => {
                self.store
                    .open_array(obj.oid(), self.open_mode(), *chunk_size)
                    .await?;
            }
            ObjectKind::Symlink { .. } => {}
        }
        Ok(())
    }

    /// Drops the store reference taken by `open_handle`.
    pub(crate) async fn close_handle(&self, obj: &Object) -> Result<()> {
        if !obj.is_symlink() {
            self.store.close_object(obj.oid()).await?;
        }
        Ok(())
    }

    pub fn pool_get(&self) {
        _ = self.pool_refs.fetch_add(1, Ordering::SeqCst);
    }

    pub fn pool_put(&self) -> Result<()> {
        self.pool_refs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map(|_| ())
            .map_err(|_| Error::invalid("pool reference count underflow"))
    }

    pub fn cont_get(&self) {
        _ = self.cont_refs.fetch_add(1, Ordering::SeqCst);
    }

    pub fn cont_put(&self) -> Result<()> {
        self.cont_refs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map(|_| ())
            .map_err(|_| Error::invalid("container reference count underflow"))
    }

    /// Attributes the namespace was formatted with.
    #[must_use]
    pub fn query(&self) -> NamespaceAttr {
        self.attr.clone()
    }

    #[must_use]
    pub fn root(&self) -> &Object {
        &self.root
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    #[must_use]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    #[must_use]
    pub fn superblock_oid(&self) -> ObjectId {
        self.sb_oid
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        !self.read_write
    }

    /// Whether multi-record operations run in transactions.
    #[must_use]
    pub fn uses_tx(&self) -> bool {
        self.use_tx
    }

    #[must_use]
    pub fn ids(&self) -> (u32, u32) {
        (self.uid, self.gid)
    }

    pub(crate) fn check_writable(&self) -> Result<()> {
        if self.read_write {
            Ok(())
        } else {
            Err(Error::permission_denied("namespace mounted read-only"))
        }
    }

    pub(crate) fn open_mode(&self) -> OpenMode {
        if self.read_write {
            OpenMode::ReadWrite
        } else {
            OpenMode::ReadOnly
        }
    }

    /// Runs `op` in a transaction when the mount uses them, otherwise once
    /// with no transaction.
    pub(crate) async fn transact<'a, T, F>(&'a self, op: F) -> Result<T>
    where
        F: Fn(Tx) -> BoxFuture<'a, Result<T>>,
    {
        if self.use_tx {
            run_in_tx(self.store.as_ref(), op).await
        } else {
            op(Tx::None).await
        }
    }

    pub(crate) async fn fetch_entry(
        &self,
        tx: Tx,
        parent: ObjectId,
        name: &str,
        with_target: bool,
    ) -> Result<Option<Entry>> {
        entry::fetch(self.store.as_ref(), self.layout, tx, parent, name, with_target).await
    }

    pub(crate) async fn require_entry(
        &self,
        tx: Tx,
        parent: ObjectId,
        name: &str,
        with_target: bool,
    ) -> Result<Entry> {
        self.fetch_entry(tx, parent, name, with_target)
            .await?
            .ok_or_else(|| Error::not_found(name))
    }

    pub(crate) async fn insert_entry(
        &self,
        tx: Tx,
        parent: ObjectId,
        name: &str,
        entry: &Entry,
        extra: Vec<AkeyUpdate>,
    ) -> Result<()> {
        entry::insert(self.store.as_ref(), self.layout, tx, parent, name, entry, extra).await
    }

    /// Rewrites some fields of an existing entry plus its ctime, along with
    /// any extra akey writes, in one conditional update.
    pub(crate) async fn update_entry(
        &self,
        tx: Tx,
        parent: ObjectId,
        name: &str,
        entry: &mut Entry,
        fields: &[Field],
        extra: Vec<AkeyUpdate>,
    ) -> Result<()> {
        entry.ctime = Timespec::now();
        let mut all = fields.to_vec();
        all.extend([Field::Ctime, Field::CtimeNsec]);
        let mut updates = vec![AkeyUpdate::extents(
            entry::INODE_AKEY,
            self.layout.extents(entry, &all),
        )];
        updates.extend(extra);
        self.store
            .update(tx, parent, name.as_bytes(), UpdateCond::DkeyUpdate, updates)
            .await?;
        Ok(())
    }
}
