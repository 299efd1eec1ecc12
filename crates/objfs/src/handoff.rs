// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Hand-off of mounts and open file handles between processes.
//!
//! A record is written little-endian. A reader on a host of the other
//! byte order sees a swapped magic and decodes the rest big-endian.

use crate::entry::{self, EntryKind, Layout};
use crate::error::{Error, Result};
use crate::flags::{MountFlags, OpenFlags};
use crate::namespace::Namespace;
use crate::obj::{Object, ObjectKind};
use crate::oid::select_class;
use crate::superblock::{ConsistencyMode, NamespaceAttr, ROOT_NAME};
use bytes::{BufMut, Bytes, BytesMut};
use diagnostics::*;
use objstore::{ObjectClass, ObjectId, ObjectStore, Tx};
use std::sync::Arc;

pub const NAMESPACE_MAGIC: u32 = 0x0df5_0d15;
pub const OBJECT_MAGIC: u32 = 0x0df5_0b1e;

const NAMESPACE_RECORD_LEN: usize = 4 + 1 + 2 + 4 + 4 + 4 + 8 + 8 + 4 * 3 + 16 + 16 * 2;
const OBJECT_HEADER_LEN: usize = 4 + 4 + 4 + 16 * 2 + 16 + 8 + 2;

struct Cursor<'a> {
    buf: &'a [u8],
    swapped: bool,
}

impl<'a> Cursor<'a> {
    /// Checks the magic and picks the byte order from it.
    fn open(buf: &'a [u8], magic: u32) -> Result<Self> {
        let mut cursor = Cursor {
            buf,
            swapped: false,
        };
        let found = cursor.u32()?;
        if found == magic {
            Ok(cursor)
        } else if found == magic.swap_bytes() {
            cursor.swapped = true;
            Ok(cursor)
        } else {
            Err(Error::invalid(format!("bad hand-off magic {found:#x}")))
        }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let (head, rest) = self
            .buf
            .split_first_chunk::<N>()
            .ok_or_else(|| Error::invalid("truncated hand-off record"))?;
        self.buf = rest;
        Ok(*head)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let raw = self.take()?;
        Ok(if self.swapped {
            u16::from_be_bytes(raw)
        } else {
            u16::from_le_bytes(raw)
        })
    }

    fn u32(&mut self) -> Result<u32> {
        let raw = self.take()?;
        Ok(if self.swapped {
            u32::from_be_bytes(raw)
        } else {
            u32::from_le_bytes(raw)
        })
    }

    fn u64(&mut self) -> Result<u64> {
        let raw = self.take()?;
        Ok(if self.swapped {
            u64::from_be_bytes(raw)
        } else {
            u64::from_le_bytes(raw)
        })
    }

    fn oid(&mut self) -> Result<ObjectId> {
        let hi = self.u64()?;
        let lo = self.u64()?;
        Ok(ObjectId::new(hi, lo))
    }

    fn uuid(&mut self) -> Result<uuid7::Uuid> {
        Ok(uuid7::Uuid::from(self.take::<16>()?))
    }
}

fn put_oid(buf: &mut BytesMut, oid: ObjectId) {
    buf.put_u64_le(oid.hi);
    buf.put_u64_le(oid.lo);
}

fn check_container(store: &dyn ObjectStore, uuid: uuid7::Uuid) -> Result<()> {
    if uuid == store.container_uuid() {
        Ok(())
    } else {
        Err(Error::invalid(format!("hand-off record is for container {uuid}")))
    }
}

impl Namespace {
    /// Serializes the mount so another process can attach to it with
    /// `global2local` without reading the superblock.
    #[must_use]
    pub fn local2global(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(NAMESPACE_RECORD_LEN);
        buf.put_u32_le(NAMESPACE_MAGIC);
        buf.put_u8(u8::from(self.use_tx));
        buf.put_u16_le(self.layout.version());
        buf.put_u32_le(u32::from(self.read_write));
        buf.put_u32_le(self.uid);
        buf.put_u32_le(self.gid);
        buf.put_u64_le(self.attr.id);
        buf.put_u64_le(self.attr.effective_chunk_size());
        buf.put_u32_le(self.attr.oclass.into());
        buf.put_u32_le(self.attr.dir_oclass.into());
        buf.put_u32_le(self.attr.file_oclass.into());
        buf.put_slice(self.store.container_uuid().as_bytes());
        put_oid(&mut buf, self.sb_oid);
        put_oid(&mut buf, self.root.oid());
        buf.freeze()
    }

    /// Attaches to a mount serialized by `local2global`.
    ///
    /// The new mount reserves its own identifier batch on its first
    /// create.
    pub async fn global2local(
        store: Arc<dyn ObjectStore>,
        flags: MountFlags,
        record: &[u8],
    ) -> Result<Namespace> {
        if record.len() != NAMESPACE_RECORD_LEN {
            return Err(Error::invalid(format!(
                "namespace hand-off record of {} bytes",
                record.len()
            )));
        }
        let mut cur = Cursor::open(record, NAMESPACE_MAGIC)?;
        let use_tx = cur.u8()? != 0;
        let layout = Layout::for_version(cur.u16()?)?;
        let read_write = cur.u32()? != 0 && !flags.contains(MountFlags::READ_ONLY);
        let uid = cur.u32()?;
        let gid = cur.u32()?;
        let attr = NamespaceAttr {
            id: cur.u64()?,
            chunk_size: cur.u64()?,
            oclass: ObjectClass::from(cur.u32()?),
            dir_oclass: ObjectClass::from(cur.u32()?),
            file_oclass: ObjectClass::from(cur.u32()?),
            mode: if use_tx {
                ConsistencyMode::Balanced
            } else {
                ConsistencyMode::Relaxed
            },
            hints: String::new(),
        };
        check_container(store.as_ref(), cur.uuid()?)?;
        let sb_oid = cur.oid()?;
        let root_oid = cur.oid()?;

        let root_entry = entry::fetch(store.as_ref(), layout, Tx::None, sb_oid, ROOT_NAME, false)
            .await?
            .ok_or_else(|| Error::not_found("root entry"))?;
        if root_entry.oid != root_oid || !root_entry.is_dir() {
            return Err(Error::invalid("hand-off root does not match the container"));
        }
        let open_flags = if read_write {
            OpenFlags::READ_WRITE
        } else {
            OpenFlags::READ_ONLY
        };
        let root = Object::new(
            root_oid,
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
        let ns = Namespace::from_parts(
            store,
            sb_oid,
            root,
            attr,
            layout,
            read_write,
            use_tx,
            (uid, gid),
        );
        ns.store.open_object(sb_oid, ns.open_mode()).await?;
        if let Err(e) = ns.store.open_object(root_oid, ns.open_mode()).await {
            ns.store.close_object(sb_oid).await?;
            return Err(e.into());
        }
        debug!(
            "Attached to handed-off namespace, read_write {read_write}",
            read_write: read_write
        );
        Ok(ns)
    }
}

impl Object {
    /// Serializes an open file handle. Only regular files can be handed
    /// off.
    pub fn local2global(&self, ns: &Namespace) -> Result<Bytes> {
        let ObjectKind::File { chunk_size } = *self.kind() else {
            return Err(Error::invalid(format!(
                "{} is not a regular file",
                self.name()
            )));
        };
        let name = self.name().as_bytes();
        let name_len = u16::try_from(name.len()).map_err(|_| Error::name_too_long(self.name()))?;

        let mut buf = BytesMut::with_capacity(OBJECT_HEADER_LEN + name.len());
        buf.put_u32_le(OBJECT_MAGIC);
        buf.put_u32_le(self.mode());
        buf.put_u32_le(self.flags().bits());
        put_oid(&mut buf, self.oid());
        put_oid(&mut buf, self.parent_oid());
        buf.put_slice(ns.store.container_uuid().as_bytes());
        buf.put_u64_le(chunk_size);
        buf.put_u16_le(name_len);
        buf.put_slice(name);
        Ok(buf.freeze())
    }

    /// Reopens a file handle serialized by `local2global`. Empty `flags`
    /// keep the flags the handle was opened with.
    pub async fn global2local(ns: &Namespace, flags: OpenFlags, record: &[u8]) -> Result<Object> {
        if record.len() < OBJECT_HEADER_LEN {
            return Err(Error::invalid(format!(
                "object hand-off record of {} bytes",
                record.len()
            )));
        }
        let mut cur = Cursor::open(record, OBJECT_MAGIC)?;
        let mode = cur.u32()?;
        let stored_flags = OpenFlags::from_bits_truncate(cur.u32()?);
        let oid = cur.oid()?;
        let parent_oid = cur.oid()?;
        check_container(ns.store.as_ref(), cur.uuid()?)?;
        let chunk_size = cur.u64()?;
        let name_len = usize::from(cur.u16()?);
        if cur.buf.len() != name_len {
            return Err(Error::invalid("object hand-off name length mismatch"));
        }
        let name = std::str::from_utf8(cur.buf)
            .map_err(|_| Error::invalid("object hand-off name is not UTF-8"))?
            .to_string();

        if EntryKind::from_mode(mode)? != EntryKind::File || !oid.is_array() {
            return Err(Error::invalid("hand-off record is not a regular file"));
        }
        let mut flags = if flags.is_empty() { stored_flags } else { flags };
        if ns.is_read_only() {
            flags = (flags - OpenFlags::READ_WRITE) | OpenFlags::READ_ONLY;
        }
        ns.store
            .open_array(oid, ns.open_mode(), chunk_size)
            .await?;
        Ok(Object::new(
            oid,
            parent_oid,
            name,
            mode,
            flags,
            ObjectKind::File { chunk_size },
        ))
    }
}
