// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::checker::{self, CheckReport, LOST_FOUND};
use crate::entry::Field;
use objstore::{PunchCond, Tx};

/// Builds `/d1/f1`, `/d2/f2` and a detached subtree `o/of`: the entry of
/// `o` is punched from the root, leaving its objects unreachable.
/// Returns the oids of `o` and `of`.
async fn orphaned_tree(fx: &Fixture) -> Result<(objstore::ObjectId, objstore::ObjectId)> {
    let ns = &fx.ns;
    let d1 = make_dir(ns, ns.root(), "d1").await?;
    create_file(ns, &d1, "f1", b"one").await?;
    let d2 = make_dir(ns, ns.root(), "d2").await?;
    create_file(ns, &d2, "f2", b"two").await?;
    let o = make_dir(ns, ns.root(), "o").await?;
    let of = create_file(ns, &o, "of", b"lost data").await?;

    fx.store
        .punch_dkey(Tx::None, ns.root().oid(), b"o", PunchCond::None)
        .await?;
    Ok((o.oid(), of.oid()))
}

#[tokio::test]
async fn test_check_counts_orphans() -> Result<()> {
    let fx = setup().await?;
    let (o, of) = orphaned_tree(&fx).await?;

    let report = checker::check(shared(&fx.store), CheckFlags::PRINT, None).await?;
    assert_eq!(
        report,
        CheckReport {
            marked: 6,
            scanned: 6,
            orphans: 2,
            ..CheckReport::default()
        }
    );
    assert!(fx.store.object_exists(o).await);
    assert!(fx.store.object_exists(of).await);
    assert_eq!(fx.store.snapshot_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_check_deep_and_wide_tree() -> Result<()> {
    let fx = setup().await?;
    let ns = &fx.ns;

    // Five nested directories, each holding one file.
    let mut dir = ns.root().clone();
    for level in ["a", "b", "c", "d", "e"] {
        let next = make_dir(ns, &dir, level).await?;
        create_file(ns, &next, "f", level.as_bytes()).await?;
        dir = next;
    }
    // More entries than fit in one directory page.
    let wide = make_dir(ns, ns.root(), "w").await?;
    for i in 0..150 {
        create_file(ns, &wide, &format!("f{i:03}"), b"w").await?;
    }
    // A detached directory with more orphans than one page of the
    // object table.
    let o = make_dir(ns, ns.root(), "o").await?;
    for i in 0..100 {
        create_file(ns, &o, &format!("of{i:03}"), b"o").await?;
    }
    fx.store
        .punch_dkey(Tx::None, ns.root().oid(), b"o", PunchCond::None)
        .await?;

    let report = checker::check(shared(&fx.store), CheckFlags::empty(), None).await?;
    assert_eq!(
        report,
        CheckReport {
            marked: 2 + 5 + 5 + 1 + 150,
            scanned: 2 + 5 + 5 + 1 + 150,
            orphans: 1 + 100,
            ..CheckReport::default()
        }
    );

    let report = checker::check(shared(&fx.store), CheckFlags::RELINK, Some("deep")).await?;
    assert_eq!(report.orphans, 1);
    let relinked = format!("/{LOST_FOUND}/deep/{}/of099", o.oid());
    let file = ns.lookup(&relinked, OpenFlags::READ_ONLY).await?;
    assert_eq!(file.read(ns, 0, 8).await?, b"o");

    // Everything is reachable again, through lost+found.
    let report = checker::check(shared(&fx.store), CheckFlags::empty(), None).await?;
    assert_eq!(report.orphans, 0);
    assert_eq!(report.marked, 163 + 2 + 101);
    assert_eq!(report.scanned, report.marked);
    Ok(())
}

#[tokio::test]
async fn test_check_clean_namespace() -> Result<()> {
    let fx = setup().await?;
    let d = make_dir(&fx.ns, fx.ns.root(), "d").await?;
    create_file(&fx.ns, &d, "f", b"x").await?;
    fx.ns.symlink(&d, "l", "f").await?;
    // An empty directory has no object to mark.
    make_dir(&fx.ns, fx.ns.root(), "empty").await?;

    let report = checker::check(shared(&fx.store), CheckFlags::empty(), None).await?;
    assert_eq!(report.orphans, 0);
    assert_eq!(report.marked, 4);
    assert_eq!(report.scanned, 6);
    assert_eq!(report.quarantine, None);
    Ok(())
}

#[tokio::test]
async fn test_relink_and_remove_conflict() -> Result<()> {
    let fx = setup().await?;
    let err = checker::check(
        shared(&fx.store),
        CheckFlags::RELINK | CheckFlags::REMOVE,
        None,
    )
    .await
    .unwrap_err();
    assert_eq!(err.errno(), libc::EINVAL);

    let err = checker::check(shared(&fx.store), CheckFlags::RELINK, Some("a/b"))
        .await
        .unwrap_err();
    assert_eq!(err.errno(), libc::EINVAL);
    Ok(())
}

#[tokio::test]
async fn test_relink_into_lost_found() -> Result<()> {
    let fx = setup().await?;
    let (o, of) = orphaned_tree(&fx).await?;

    let report = checker::check(shared(&fx.store), CheckFlags::RELINK, Some("run1")).await?;
    // Only the top of the detached subtree is relinked.
    assert_eq!(report.orphans, 1);
    assert_eq!(report.quarantine.as_deref(), Some("run1"));

    let ns = &fx.ns;
    let run = ns
        .lookup(&format!("/{LOST_FOUND}/run1"), OpenFlags::READ_ONLY)
        .await?;
    assert_eq!(names(ns, &run).await?, vec![o.to_string()]);

    let relinked = ns.lookup_rel(&run, &o.to_string(), OpenFlags::READ_ONLY).await?;
    assert!(relinked.is_dir());
    assert_eq!(relinked.mode(), S_IFDIR | 0o700);
    let file = ns.lookup_rel(&relinked, "of", OpenFlags::READ_ONLY).await?;
    assert_eq!(file.oid(), of);
    assert_eq!(file.read(ns, 0, 64).await?, b"lost data");

    // A second run with the same name collides.
    let err = checker::check(shared(&fx.store), CheckFlags::RELINK, Some("run1"))
        .await
        .unwrap_err();
    assert_eq!(err.errno(), libc::EEXIST);
    assert_eq!(fx.store.snapshot_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_relink_orphaned_file() -> Result<()> {
    let fx = setup().await?;
    let ns = &fx.ns;
    let file = create_file(ns, ns.root(), "big", &[9u8; 3000]).await?;
    fx.store
        .punch_dkey(Tx::None, ns.root().oid(), b"big", PunchCond::None)
        .await?;

    let report = checker::check(shared(&fx.store), CheckFlags::RELINK, Some("files")).await?;
    assert_eq!(report.orphans, 1);

    let path = format!("/{LOST_FOUND}/files/{}", file.oid());
    let (found, stat) = ns.lookup_with_stat(&path, OpenFlags::READ_ONLY).await?;
    assert!(found.is_file());
    assert_eq!(stat.mode, S_IFREG | 0o600);
    assert_eq!(stat.size, 3000);
    assert_eq!(found.read(ns, 2990, 100).await?, vec![9u8; 10]);
    Ok(())
}

#[tokio::test]
async fn test_relinked_chunk_size_is_estimated() -> Result<()> {
    let attr = NamespaceAttr {
        chunk_size: 4096,
        ..NamespaceAttr::default()
    };
    let fx = setup_with(attr, MountFlags::READ_WRITE).await?;
    let ns = &fx.ns;
    let open_big = |name: &'static str| {
        ns.open(
            ns.root(),
            name,
            S_IFREG | 0o644,
            OpenFlags::READ_WRITE | OpenFlags::CREATE,
            ObjectClass::UNKNOWN,
            65536,
            None,
        )
    };
    // Fills part of its first chunk only.
    let short = open_big("short").await?;
    short.write(ns, 0, &[1u8; 10000]).await?;
    // Fills its first chunk and spills into the second.
    let long = open_big("long").await?;
    long.write(ns, 0, &[2u8; 70000]).await?;
    for name in ["short", "long"] {
        fx.store
            .punch_dkey(Tx::None, ns.root().oid(), name.as_bytes(), PunchCond::None)
            .await?;
    }

    let report = checker::check(shared(&fx.store), CheckFlags::RELINK, Some("sizes")).await?;
    assert_eq!(report.orphans, 2);

    // Only the bytes present are known, so the estimate for the short
    // file falls below its real chunk size but still above the default.
    let path = format!("/{LOST_FOUND}/sizes/{}", short.oid());
    let (found, stat) = ns.lookup_with_stat(&path, OpenFlags::READ_ONLY).await?;
    assert_eq!(found.chunk_size(), Some(10000));
    assert_eq!(stat.size, 10000);
    assert_eq!(found.read(ns, 9990, 100).await?, vec![1u8; 10]);

    let path = format!("/{LOST_FOUND}/sizes/{}", long.oid());
    let (found, stat) = ns.lookup_with_stat(&path, OpenFlags::READ_ONLY).await?;
    assert_eq!(found.chunk_size(), Some(65536));
    assert_eq!(stat.size, 70000);
    assert_eq!(found.read(ns, 69990, 100).await?, vec![2u8; 10]);
    Ok(())
}

#[tokio::test]
async fn test_remove_punches_orphans() -> Result<()> {
    let fx = setup().await?;
    let (o, of) = orphaned_tree(&fx).await?;

    let report = checker::check(shared(&fx.store), CheckFlags::REMOVE, None).await?;
    assert_eq!(report.orphans, 2);
    assert!(!fx.store.object_exists(o).await);
    assert!(!fx.store.object_exists(of).await);

    let again = checker::check(shared(&fx.store), CheckFlags::empty(), None).await?;
    assert_eq!(again.orphans, 0);
    Ok(())
}

#[tokio::test]
async fn test_verify() -> Result<()> {
    let fx = setup().await?;
    let d = make_dir(&fx.ns, fx.ns.root(), "d").await?;
    let f = create_file(&fx.ns, &d, "f", b"x").await?;

    let report = checker::check(shared(&fx.store), CheckFlags::VERIFY, None).await?;
    assert_eq!(report.verify_failed, 0);
    assert_eq!(report.verify_skipped, 0);

    fx.store.corrupt(f.oid()).await;
    let err = checker::check(shared(&fx.store), CheckFlags::VERIFY, None)
        .await
        .unwrap_err();
    assert_eq!(err.errno(), libc::EIO);
    assert_eq!(fx.store.snapshot_count().await, 0);

    // Without VERIFY nothing is checked.
    checker::check(shared(&fx.store), CheckFlags::empty(), None).await?;

    fx.store.set_verify_supported(false).await;
    let report = checker::check(shared(&fx.store), CheckFlags::VERIFY, None).await?;
    assert_eq!(report.verify_failed, 0);
    assert_eq!(report.verify_skipped, 4);
    Ok(())
}

#[tokio::test]
async fn test_evict_all() -> Result<()> {
    let fx = setup().await?;
    assert_eq!(fx.store.evictions().await, 0);
    checker::check(shared(&fx.store), CheckFlags::EVICT_ALL, None).await?;
    assert_eq!(fx.store.evictions().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_check_balanced_container() -> Result<()> {
    let fx = setup_balanced().await?;
    make_dir(&fx.ns, fx.ns.root(), "d").await?;
    let report = checker::check(shared(&fx.store), CheckFlags::empty(), None).await?;
    assert_eq!(report.orphans, 0);
    Ok(())
}

#[tokio::test]
async fn test_recreate_sb() -> Result<()> {
    let attr = NamespaceAttr {
        chunk_size: 8192,
        ..NamespaceAttr::default()
    };
    let fx = setup_with(attr.clone(), MountFlags::READ_WRITE).await?;
    create_file(&fx.ns, fx.ns.root(), "kept", b"x").await?;

    crate::superblock::punch(&fx.store, fx.ns.superblock_oid()).await?;
    let err = Namespace::mount(shared(&fx.store), MountFlags::READ_WRITE)
        .await
        .unwrap_err();
    assert_eq!(err.errno(), libc::ENOENT);

    checker::recreate_sb(&fx.store, &attr).await?;
    let ns = Namespace::mount(shared(&fx.store), MountFlags::READ_WRITE).await?;
    assert_eq!(ns.query().chunk_size, 8192);
    assert_eq!(ns.root().oid(), fx.ns.root().oid());
    assert_eq!(names(&ns, ns.root()).await?, vec!["kept"]);

    let bad = NamespaceAttr {
        hints: "bogus".to_string(),
        ..NamespaceAttr::default()
    };
    let err = checker::recreate_sb(&fx.store, &bad).await.unwrap_err();
    assert_eq!(err.errno(), libc::EINVAL);

    let empty = MemoryStore::new();
    let err = checker::recreate_sb(&empty, &attr).await.unwrap_err();
    assert_eq!(err.errno(), libc::EINVAL);
    Ok(())
}

#[tokio::test]
async fn test_relink_root() -> Result<()> {
    let fx = setup().await?;
    create_file(&fx.ns, fx.ns.root(), "kept", b"x").await?;
    let sb = fx.ns.superblock_oid();

    // Nothing to do while the root entry is present.
    checker::relink_root(&fx.store).await?;

    fx.store
        .punch_dkey(Tx::None, sb, b"/", PunchCond::Exists)
        .await?;
    assert!(Namespace::mount(shared(&fx.store), MountFlags::READ_WRITE).await.is_err());

    checker::relink_root(&fx.store).await?;
    let ns = Namespace::mount(shared(&fx.store), MountFlags::READ_WRITE).await?;
    assert_eq!(ns.root().oid(), fx.ns.root().oid());
    assert_eq!(names(&ns, ns.root()).await?, vec!["kept"]);
    Ok(())
}

#[tokio::test]
async fn test_obj_fix_type() -> Result<()> {
    let fx = setup().await?;
    let ns = &fx.ns;
    create_file(ns, ns.root(), "f", b"x").await?;
    make_dir(ns, ns.root(), "d").await?;
    ns.symlink(ns.root(), "l", "f").await?;

    for name in ["f", "d", "l"] {
        let mut entry = ns.require_entry(Tx::None, ns.root().oid(), name, false).await?;
        entry.mode = 0o644;
        ns.update_entry(Tx::None, ns.root().oid(), name, &mut entry, &[Field::Mode], Vec::new())
            .await?;
        checker::obj_fix_type(ns, ns.root(), name).await?;
    }

    assert_eq!(ns.stat(ns.root(), "f").await?.mode, S_IFREG | 0o700);
    assert_eq!(ns.stat(ns.root(), "d").await?.mode, S_IFDIR | 0o700);
    assert_eq!(ns.stat(ns.root(), "l").await?.mode, S_IFLNK | 0o700);

    let err = checker::obj_fix_type(ns, ns.root(), "missing").await.unwrap_err();
    assert_eq!(err.errno(), libc::ENOENT);
    Ok(())
}

#[tokio::test]
async fn test_get_size_by_oid() -> Result<()> {
    let fx = setup().await?;
    let ns = &fx.ns;
    let file = create_file(ns, ns.root(), "f", b"0123456789").await?;
    assert_eq!(checker::get_size_by_oid(ns, file.oid(), 0).await?, 10);
    // The size is the end of the highest written extent, whatever the
    // chunk size the caller guesses.
    assert_eq!(checker::get_size_by_oid(ns, file.oid(), 4).await?, 10);
    assert_eq!(checker::get_size_by_oid(ns, file.oid(), 1 << 20).await?, 10);

    let dir = make_dir(ns, ns.root(), "d").await?;
    let err = checker::get_size_by_oid(ns, dir.oid(), 0).await.unwrap_err();
    assert_eq!(err.errno(), libc::EINVAL);
    Ok(())
}

#[tokio::test]
async fn test_cont_set_owner() -> Result<()> {
    let fx = setup().await?;
    let before = fx.ns.root().stat(&fx.ns).await?;

    checker::cont_set_owner(&fx.store, Some(4242), None).await?;
    let after = fx.ns.root().stat(&fx.ns).await?;
    assert_eq!(after.uid, 4242);
    assert_eq!(after.gid, before.gid);
    assert_eq!(after.mode, before.mode);

    checker::cont_set_owner(&fx.store, None, Some(17)).await?;
    let after = fx.ns.root().stat(&fx.ns).await?;
    assert_eq!((after.uid, after.gid), (4242, 17));
    Ok(())
}

#[tokio::test]
async fn test_scan() -> Result<()> {
    let fx = setup().await?;
    let ns = &fx.ns;
    let a = make_dir(ns, ns.root(), "a").await?;
    create_file(ns, &a, "f1", b"hello").await?;
    let b = make_dir(ns, &a, "b").await?;
    create_file(ns, &b, "f2", &[0u8; 100]).await?;
    ns.symlink(ns.root(), "l", "a/f1").await?;

    let report = checker::scan(shared(&fx.store)).await?;
    assert_eq!(
        report,
        checker::ScanReport {
            files: 2,
            dirs: 2,
            symlinks: 1,
            total_bytes: 105,
            largest_file: 100,
            largest_dir: 2,
            max_depth: 2,
            scanned: 5,
        }
    );
    Ok(())
}

#[tokio::test]
async fn test_check_and_scan_release_handles() -> Result<()> {
    let fx = setup().await?;
    orphaned_tree(&fx).await?;
    let baseline = fx.store.open_total().await;

    checker::check(shared(&fx.store), CheckFlags::empty(), None).await?;
    assert_eq!(fx.store.open_total().await, baseline);
    checker::check(shared(&fx.store), CheckFlags::RELINK, Some("held")).await?;
    assert_eq!(fx.store.open_total().await, baseline);
    checker::scan(shared(&fx.store)).await?;
    assert_eq!(fx.store.open_total().await, baseline);
    Ok(())
}
