// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Extended attributes, stored as `x:`-prefixed akeys of the entry record

use crate::dir::DIR_PAGE;
use crate::entry::{self, Entry, XATTR_NAME_MAX, XATTR_PREFIX, XATTR_VALUE_MAX};
use crate::error::{Error, Result};
use crate::flags::XattrFlags;
use crate::namespace::Namespace;
use crate::obj::Object;
use objstore::{AkeyCond, AkeyUpdate, Anchor, FetchCond, Iod, PunchCond, Tx, UpdateCond};

fn check_xattr_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid("empty attribute name"));
    }
    if name.len() > XATTR_NAME_MAX {
        return Err(Error::name_too_long(name));
    }
    Ok(())
}

impl Namespace {
    /// Refreshes only the ctime of the entry behind `obj`.
    async fn touch_ctime(&self, obj: &Object, extra: Vec<AkeyUpdate>) -> Result<()> {
        let mut entry = Entry::default();
        self.update_entry(Tx::None, obj.parent_oid(), obj.name(), &mut entry, &[], extra)
            .await
    }

    pub async fn setxattr(&self, obj: &Object, name: &str, value: &[u8], flags: XattrFlags) -> Result<()> {
        self.check_writable()?;
        check_xattr_name(name)?;
        if value.len() > XATTR_VALUE_MAX {
            return Err(Error::invalid(format!(
                "attribute value of {} bytes exceeds {XATTR_VALUE_MAX}",
                value.len()
            )));
        }
        let update = AkeyUpdate::single(entry::xattr_akey(name), value.to_vec());

        match flags {
            XattrFlags::Create => {
                self.store
                    .update(
                        Tx::None,
                        obj.parent_oid(),
                        obj.name().as_bytes(),
                        UpdateCond::DkeyUpdate,
                        vec![update.with_cond(AkeyCond::Insert)],
                    )
                    .await
                    .map_err(|e| match e {
                        objstore::Error::AlreadyExists => Error::already_exists(name),
                        objstore::Error::NotFound => Error::not_found(obj.name()),
                        other => other.into(),
                    })?;
                self.touch_ctime(obj, Vec::new()).await
            }
            XattrFlags::Replace => {
                match self
                    .touch_ctime(obj, vec![update.with_cond(AkeyCond::Update)])
                    .await
                {
                    Err(Error::NotFound(_)) => Err(Error::no_data(name)),
                    other => other,
                }
            }
            XattrFlags::Any => self.touch_ctime(obj, vec![update]).await,
        }
    }

    /// Reads an attribute and returns its length with the value.
    ///
    /// A `size` of 0 only probes the length and returns no bytes. A value
    /// longer than `size` fails with `Range`.
    pub async fn getxattr(&self, obj: &Object, name: &str, size: usize) -> Result<(usize, Vec<u8>)> {
        check_xattr_name(name)?;
        let akey = entry::xattr_akey(name);
        let value = self
            .store
            .fetch(
                Tx::None,
                obj.parent_oid(),
                obj.name().as_bytes(),
                FetchCond::Akey,
                &[Iod::single(&akey)],
            )
            .await
            .map_err(|e| match e {
                objstore::Error::NotFound => Error::no_data(name),
                other => other.into(),
            })?
            .into_iter()
            .next()
            .flatten()
            .ok_or_else(|| Error::no_data(name))?;

        let len = value.len();
        if size == 0 {
            return Ok((len, Vec::new()));
        }
        if len > size {
            return Err(Error::Range { needed: len });
        }
        Ok((len, value))
    }

    pub async fn removexattr(&self, obj: &Object, name: &str) -> Result<()> {
        self.check_writable()?;
        check_xattr_name(name)?;
        self.store
            .punch_akeys(
                Tx::None,
                obj.parent_oid(),
                obj.name().as_bytes(),
                &[entry::xattr_akey(name)],
                PunchCond::Exists,
            )
            .await
            .map_err(|e| match e {
                objstore::Error::NotFound => Error::no_data(name),
                other => other.into(),
            })?;
        self.touch_ctime(obj, Vec::new()).await
    }

    /// Names of every attribute on the entry, without the akey prefix.
    pub async fn listxattr(&self, obj: &Object) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut anchor = Anchor::new();
        while !anchor.is_eof() {
            let akeys = self
                .store
                .list_akeys(
                    Tx::None,
                    obj.parent_oid(),
                    obj.name().as_bytes(),
                    &mut anchor,
                    DIR_PAGE,
                )
                .await?;
            names.extend(akeys.into_iter().filter_map(|akey| {
                let name = String::from_utf8(akey).ok()?;
                name.strip_prefix(XATTR_PREFIX).map(str::to_string)
            }));
        }
        Ok(names)
    }
}
