// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Path resolution

use crate::entry::{self, EntryKind};
use crate::error::{Error, Result};
use crate::flags::OpenFlags;
use crate::namespace::Namespace;
use crate::obj::{Object, Stat};
use diagnostics::*;
use futures::future::BoxFuture;
use objstore::Tx;

/// Nested symlink resolutions allowed before `SymlinkLoop`.
pub const MAX_SYMLINK_DEPTH: u32 = 40;

/// Where resolution stands: the current directory (or final object), and
/// its parent when the last step descended by name.
#[derive(Debug, Clone)]
struct Position {
    current: Object,
    parent: Option<Object>,
}

impl Namespace {
    /// Resolves an absolute path from the mount root.
    pub async fn lookup(&self, path: &str, flags: OpenFlags) -> Result<Object> {
        if !path.starts_with('/') {
            return Err(Error::invalid(format!("path is not absolute: {path}")));
        }
        let start = Position {
            current: self.root.clone(),
            parent: None,
        };
        let obj = self.resolve(start, path, flags, 0).await?.current;
        self.open_handle(&obj).await?;
        Ok(obj)
    }

    /// `lookup` that also returns the object's stat.
    pub async fn lookup_with_stat(&self, path: &str, flags: OpenFlags) -> Result<(Object, Stat)> {
        let obj = self.lookup(path, flags).await?;
        self.with_stat(obj).await
    }

    /// Resolves a single name inside `parent`.
    pub async fn lookup_rel(&self, parent: &Object, name: &str, flags: OpenFlags) -> Result<Object> {
        if name.starts_with('/') {
            return Err(Error::invalid(format!("relative lookup of absolute path {name}")));
        }
        entry::check_name(name)?;
        _ = self.dir_oid(parent)?;
        let start = Position {
            current: parent.clone(),
            parent: None,
        };
        let obj = self.resolve(start, name, flags, 0).await?.current;
        self.open_handle(&obj).await?;
        Ok(obj)
    }

    /// `lookup_rel` that also returns the object's stat.
    pub async fn lookup_rel_with_stat(
        &self,
        parent: &Object,
        name: &str,
        flags: OpenFlags,
    ) -> Result<(Object, Stat)> {
        let obj = self.lookup_rel(parent, name, flags).await?;
        self.with_stat(obj).await
    }

    async fn with_stat(&self, obj: Object) -> Result<(Object, Stat)> {
        match obj.stat(self).await {
            Ok(stat) => Ok((obj, stat)),
            Err(e) => {
                obj.release(self).await?;
                Err(e)
            }
        }
    }

    fn resolve<'a, 'p>(
        &'a self,
        start: Position,
        path: &'p str,
        flags: OpenFlags,
        depth: u32,
    ) -> BoxFuture<'p, Result<Position>>
    where
        'a: 'p,
    {
        Box::pin(async move {
            debug!("resolve: path = {path}, depth = {depth}", path: path, depth: depth);
            let mut pos = start;
            let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();

            for (i, token) in components.iter().copied().enumerate() {
                let last = i + 1 == components.len();
                match token {
                    "." => continue,
                    ".." => {
                        if pos.current.oid() == self.root.oid() {
                            return Err(Error::not_found(format!("parent of root in {path}")));
                        }
                        match pos.parent.take() {
                            Some(parent) => pos.current = parent,
                            None => {
                                return Err(Error::not_supported(format!(
                                    "'..' without a known parent in {path}"
                                )));
                            }
                        }
                    }
                    name => {
                        entry::check_name(name)?;
                        let dir_oid = self.dir_oid(&pos.current)?;
                        let found = self
                            .fetch_entry(Tx::None, dir_oid, name, true)
                            .await?
                            .ok_or_else(|| Error::not_found(name))?;

                        match found.kind()? {
                            EntryKind::Symlink if last && flags.contains(OpenFlags::NO_FOLLOW) => {
                                pos.parent = Some(pos.current.clone());
                                pos.current = Object::from_entry(self, dir_oid, name, &found, flags)?;
                            }
                            EntryKind::Symlink => {
                                let target = found.value.clone().unwrap_or_default();
                                let next_depth = depth + 1;
                                if next_depth >= MAX_SYMLINK_DEPTH {
                                    return Err(Error::symlink_loop(target));
                                }
                                let from = if target.starts_with('/') {
                                    Position {
                                        current: self.root.clone(),
                                        parent: None,
                                    }
                                } else {
                                    pos.clone()
                                };
                                let follow = flags - OpenFlags::NO_FOLLOW;
                                pos = self.resolve(from, &target, follow, next_depth).await?;
                            }
                            EntryKind::Directory => {
                                let child = Object::from_entry(self, dir_oid, name, &found, flags)?;
                                pos.parent = Some(std::mem::replace(&mut pos.current, child));
                            }
                            EntryKind::File => {
                                if !last {
                                    return Err(Error::not_a_directory(name));
                                }
                                let child = Object::from_entry(self, dir_oid, name, &found, flags)?;
                                pos.parent = Some(std::mem::replace(&mut pos.current, child));
                            }
                        }
                    }
                }
            }
            Ok(pos)
        })
    }
}
