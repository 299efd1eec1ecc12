// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use super::*;

#[tokio::test]
async fn test_namespace_round_trip() -> Result<()> {
    let attr = NamespaceAttr {
        chunk_size: 4096,
        ..NamespaceAttr::default()
    };
    let fx = setup_with(attr, MountFlags::READ_WRITE).await?;
    let before = create_file(&fx.ns, fx.ns.root(), "before", b"1").await?;

    let record = fx.ns.local2global();
    assert_eq!(&record[..4], &NAMESPACE_MAGIC.to_le_bytes());

    let attached = Namespace::global2local(shared(&fx.store), MountFlags::READ_WRITE, &record).await?;
    assert_eq!(attached.root().oid(), fx.ns.root().oid());
    assert_eq!(attached.superblock_oid(), fx.ns.superblock_oid());
    assert_eq!(attached.query().chunk_size, 4096);
    assert_eq!(attached.ids(), fx.ns.ids());
    assert!(!attached.uses_tx());
    assert!(!attached.is_read_only());

    let after = create_file(&attached, attached.root(), "after", b"2").await?;
    assert_ne!(after.oid(), before.oid());
    assert_eq!(names(&fx.ns, fx.ns.root()).await?, vec!["after", "before"]);
    Ok(())
}

#[tokio::test]
async fn test_namespace_read_only_attach() -> Result<()> {
    let fx = setup_balanced().await?;
    let record = fx.ns.local2global();

    let attached = Namespace::global2local(shared(&fx.store), MountFlags::READ_ONLY, &record).await?;
    assert!(attached.is_read_only());
    assert!(attached.uses_tx());
    assert_eq!(attached.query().mode, ConsistencyMode::Balanced);
    let err = attached
        .mkdir(attached.root(), "d", 0o755, ObjectClass::UNKNOWN)
        .await
        .unwrap_err();
    assert_eq!(err.errno(), libc::EPERM);
    Ok(())
}

/// The record a host of the other byte order would have written.
fn swapped_record(ns: &Namespace, uuid: &[u8]) -> Vec<u8> {
    let attr = ns.query();
    let (uid, gid) = ns.ids();
    let mut out = Vec::new();
    out.extend_from_slice(&NAMESPACE_MAGIC.to_be_bytes());
    out.push(0);
    out.extend_from_slice(&ns.layout().version().to_be_bytes());
    out.extend_from_slice(&1u32.to_be_bytes());
    out.extend_from_slice(&uid.to_be_bytes());
    out.extend_from_slice(&gid.to_be_bytes());
    out.extend_from_slice(&attr.id.to_be_bytes());
    out.extend_from_slice(&attr.effective_chunk_size().to_be_bytes());
    for class in [attr.oclass, attr.dir_oclass, attr.file_oclass] {
        out.extend_from_slice(&u32::from(class).to_be_bytes());
    }
    out.extend_from_slice(uuid);
    for oid in [ns.superblock_oid(), ns.root().oid()] {
        out.extend_from_slice(&oid.hi.to_be_bytes());
        out.extend_from_slice(&oid.lo.to_be_bytes());
    }
    out
}

#[tokio::test]
async fn test_namespace_swapped_byte_order() -> Result<()> {
    let fx = setup().await?;
    let native = fx.ns.local2global();
    let uuid = &native[47..63];
    let record = swapped_record(&fx.ns, uuid);
    assert_eq!(record.len(), native.len());

    let attached = Namespace::global2local(shared(&fx.store), MountFlags::READ_WRITE, &record).await?;
    assert_eq!(attached.root().oid(), fx.ns.root().oid());
    assert_eq!(attached.query().chunk_size, DEFAULT_CHUNK_SIZE);
    make_dir(&attached, attached.root(), "x").await?;
    Ok(())
}

#[tokio::test]
async fn test_namespace_bad_records() -> Result<()> {
    let fx = setup().await?;
    let record = fx.ns.local2global();

    let err = Namespace::global2local(shared(&fx.store), MountFlags::READ_WRITE, &record[1..])
        .await
        .unwrap_err();
    assert_eq!(err.errno(), libc::EINVAL);

    let mut bad = record.to_vec();
    bad[0] ^= 0xff;
    let err = Namespace::global2local(shared(&fx.store), MountFlags::READ_WRITE, &bad)
        .await
        .unwrap_err();
    assert_eq!(err.errno(), libc::EINVAL);

    // Another container rejects the record.
    let other = setup().await?;
    let err = Namespace::global2local(shared(&other.store), MountFlags::READ_WRITE, &record)
        .await
        .unwrap_err();
    assert_eq!(err.errno(), libc::EINVAL);
    Ok(())
}

#[tokio::test]
async fn test_object_round_trip() -> Result<()> {
    let fx = setup().await?;
    let ns = &fx.ns;
    let dir = make_dir(ns, ns.root(), "d").await?;
    let file = create_file(ns, &dir, "payload", b"shared bytes").await?;

    let record = file.local2global(ns)?;
    assert_eq!(&record[..4], &OBJECT_MAGIC.to_le_bytes());

    let other = Namespace::global2local(shared(&fx.store), MountFlags::READ_WRITE, &ns.local2global()).await?;
    let copy = Object::global2local(&other, OpenFlags::empty(), &record).await?;
    assert_eq!(copy.oid(), file.oid());
    assert_eq!(copy.parent_oid(), dir.oid());
    assert_eq!(copy.name(), "payload");
    assert_eq!(copy.flags(), file.flags());
    assert_eq!(copy.chunk_size(), file.chunk_size());
    assert_eq!(copy.read(&other, 0, 64).await?, b"shared bytes");

    copy.write(&other, 0, b"S").await?;
    assert_eq!(file.read(ns, 0, 1).await?, b"S");

    let ro = Object::global2local(&other, OpenFlags::READ_ONLY, &record).await?;
    assert!(ro.flags().contains(OpenFlags::READ_ONLY));
    Ok(())
}

#[tokio::test]
async fn test_object_record_errors() -> Result<()> {
    let fx = setup().await?;
    let ns = &fx.ns;
    let dir = make_dir(ns, ns.root(), "d").await?;
    let err = dir.local2global(ns).unwrap_err();
    assert_eq!(err.errno(), libc::EINVAL);

    let link = ns.symlink(ns.root(), "l", "d").await?;
    assert_eq!(link.local2global(ns).unwrap_err().errno(), libc::EINVAL);

    let file = create_file(ns, ns.root(), "f", b"x").await?;
    let record = file.local2global(ns)?;
    let err = Object::global2local(ns, OpenFlags::empty(), &record[..record.len() - 1])
        .await
        .unwrap_err();
    assert_eq!(err.errno(), libc::EINVAL);

    let err = Object::global2local(ns, OpenFlags::empty(), &record[..10])
        .await
        .unwrap_err();
    assert_eq!(err.errno(), libc::EINVAL);

    // A namespace record is not an object record.
    let err = Object::global2local(ns, OpenFlags::empty(), &ns.local2global())
        .await
        .unwrap_err();
    assert_eq!(err.errno(), libc::EINVAL);
    Ok(())
}

#[tokio::test]
async fn test_object_into_read_only_mount() -> Result<()> {
    let fx = setup().await?;
    let file = create_file(&fx.ns, fx.ns.root(), "f", b"x").await?;
    let record = file.local2global(&fx.ns)?;

    let ro = Namespace::mount(shared(&fx.store), MountFlags::READ_ONLY).await?;
    let copy = Object::global2local(&ro, OpenFlags::READ_WRITE, &record).await?;
    assert!(copy.flags().contains(OpenFlags::READ_ONLY));
    assert!(!copy.flags().contains(OpenFlags::READ_WRITE));
    let err = copy.write(&ro, 0, b"y").await.unwrap_err();
    assert_eq!(err.errno(), libc::EPERM);
    Ok(())
}
