// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

mod checker;
mod handoff;
mod resolve;

use crate::*;
use objstore::{MemoryStore, ObjectClass, ObjectStore};
use std::sync::Arc;

/// A formatted in-memory container and a mount of it. `store` shares
/// state with the mount, for inspection and fault injection.
pub(crate) struct Fixture {
    pub store: MemoryStore,
    pub ns: Namespace,
}

pub(crate) fn shared(store: &MemoryStore) -> Arc<dyn ObjectStore> {
    Arc::new(store.clone())
}

pub(crate) async fn setup_with(attr: NamespaceAttr, flags: MountFlags) -> Result<Fixture> {
    let store = MemoryStore::new();
    format(&store, &attr).await?;
    let ns = Namespace::mount(shared(&store), flags).await?;
    Ok(Fixture { store, ns })
}

pub(crate) async fn setup() -> Result<Fixture> {
    setup_with(NamespaceAttr::default(), MountFlags::READ_WRITE).await
}

pub(crate) async fn setup_balanced() -> Result<Fixture> {
    let attr = NamespaceAttr {
        mode: ConsistencyMode::Balanced,
        ..NamespaceAttr::default()
    };
    setup_with(attr, MountFlags::READ_WRITE | MountFlags::BALANCED).await
}

pub(crate) async fn create_file(ns: &Namespace, parent: &Object, name: &str, data: &[u8]) -> Result<Object> {
    let file = ns
        .open(
            parent,
            name,
            S_IFREG | 0o644,
            OpenFlags::READ_WRITE | OpenFlags::CREATE,
            ObjectClass::UNKNOWN,
            0,
            None,
        )
        .await?;
    file.write(ns, 0, data).await?;
    Ok(file)
}

pub(crate) async fn make_dir(ns: &Namespace, parent: &Object, name: &str) -> Result<Object> {
    ns.mkdir(parent, name, 0o755, ObjectClass::UNKNOWN).await?;
    ns.lookup_rel(parent, name, OpenFlags::READ_WRITE).await
}

pub(crate) async fn names(ns: &Namespace, dir: &Object) -> Result<Vec<String>> {
    let mut anchor = objstore::Anchor::new();
    let mut out = Vec::new();
    while !anchor.is_eof() {
        out.extend(ns.readdir(dir, &mut anchor, 16).await?.into_iter().map(|e| e.name));
    }
    out.sort();
    Ok(out)
}
