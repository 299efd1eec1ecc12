// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use super::*;

async fn tree(ns: &Namespace) -> Result<()> {
    let a = make_dir(ns, ns.root(), "a").await?;
    let b = make_dir(ns, &a, "b").await?;
    create_file(ns, &b, "file", b"leaf").await?;
    ns.symlink(&a, "rel", "b/file").await?;
    ns.symlink(&a, "abs", "/a/b").await?;
    ns.symlink(ns.root(), "up", "a/b").await?;
    Ok(())
}

#[tokio::test]
async fn test_lookup_nested() -> Result<()> {
    let fx = setup().await?;
    let ns = &fx.ns;
    tree(ns).await?;

    let file = ns.lookup("/a/b/file", OpenFlags::READ_ONLY).await?;
    assert!(file.is_file());
    assert_eq!(file.name(), "file");
    assert_eq!(file.read(ns, 0, 10).await?, b"leaf");

    let same = ns.lookup("//a/./b//file", OpenFlags::READ_ONLY).await?;
    assert_eq!(same.oid(), file.oid());

    let root = ns.lookup("/", OpenFlags::READ_ONLY).await?;
    assert_eq!(root.oid(), ns.root().oid());

    let (dir, stat) = ns.lookup_with_stat("/a/b", OpenFlags::READ_ONLY).await?;
    assert!(dir.is_dir());
    assert_eq!(stat.mode, S_IFDIR | 0o755);
    Ok(())
}

#[tokio::test]
async fn test_lookup_argument_errors() -> Result<()> {
    let fx = setup().await?;
    let ns = &fx.ns;
    tree(ns).await?;

    let err = ns.lookup("a/b", OpenFlags::READ_ONLY).await.unwrap_err();
    assert_eq!(err.errno(), libc::EINVAL);

    let err = ns
        .lookup_rel(ns.root(), "/a", OpenFlags::READ_ONLY)
        .await
        .unwrap_err();
    assert_eq!(err.errno(), libc::EINVAL);

    let long = "n".repeat(NAME_MAX + 1);
    let err = ns
        .lookup(&format!("/a/{long}"), OpenFlags::READ_ONLY)
        .await
        .unwrap_err();
    assert_eq!(err.errno(), libc::ENAMETOOLONG);

    let err = ns.lookup("/a/missing", OpenFlags::READ_ONLY).await.unwrap_err();
    assert_eq!(err.errno(), libc::ENOENT);

    let err = ns
        .lookup("/a/b/file/more", OpenFlags::READ_ONLY)
        .await
        .unwrap_err();
    assert_eq!(err.errno(), libc::ENOTDIR);

    let file = ns.lookup("/a/b/file", OpenFlags::READ_ONLY).await?;
    let err = ns
        .lookup_rel(&file, "x", OpenFlags::READ_ONLY)
        .await
        .unwrap_err();
    assert_eq!(err.errno(), libc::ENOTDIR);
    Ok(())
}

#[tokio::test]
async fn test_dot_dot() -> Result<()> {
    let fx = setup().await?;
    let ns = &fx.ns;
    tree(ns).await?;

    let a = ns.lookup("/a/b/..", OpenFlags::READ_ONLY).await?;
    assert_eq!(a.name(), "a");

    let b = ns.lookup("/a/b/../b", OpenFlags::READ_ONLY).await?;
    assert_eq!(b.name(), "b");

    let err = ns.lookup("/..", OpenFlags::READ_ONLY).await.unwrap_err();
    assert_eq!(err.errno(), libc::ENOENT);

    // Only one level of parent is tracked.
    let err = ns
        .lookup("/a/b/../..", OpenFlags::READ_ONLY)
        .await
        .unwrap_err();
    assert_eq!(err.errno(), libc::ENOTSUP);
    Ok(())
}

#[tokio::test]
async fn test_symlinks_followed() -> Result<()> {
    let fx = setup().await?;
    let ns = &fx.ns;
    tree(ns).await?;
    let file = ns.lookup("/a/b/file", OpenFlags::READ_ONLY).await?;

    let via_rel = ns.lookup("/a/rel", OpenFlags::READ_ONLY).await?;
    assert_eq!(via_rel.oid(), file.oid());

    let via_abs = ns.lookup("/a/abs/file", OpenFlags::READ_ONLY).await?;
    assert_eq!(via_abs.oid(), file.oid());

    let via_root = ns.lookup("/up/file", OpenFlags::READ_ONLY).await?;
    assert_eq!(via_root.oid(), file.oid());

    // A symlink in the middle of a path is followed even with NO_FOLLOW.
    let mid = ns
        .lookup("/a/abs/file", OpenFlags::READ_ONLY | OpenFlags::NO_FOLLOW)
        .await?;
    assert_eq!(mid.oid(), file.oid());

    let link = ns
        .lookup("/a/rel", OpenFlags::READ_ONLY | OpenFlags::NO_FOLLOW)
        .await?;
    assert!(link.is_symlink());
    assert_eq!(link.readlink()?, "b/file");
    Ok(())
}

#[tokio::test]
async fn test_dangling_symlink() -> Result<()> {
    let fx = setup().await?;
    let ns = &fx.ns;
    ns.symlink(ns.root(), "dangling", "nowhere").await?;

    let err = ns.lookup("/dangling", OpenFlags::READ_ONLY).await.unwrap_err();
    assert_eq!(err.errno(), libc::ENOENT);

    let link = ns
        .lookup("/dangling", OpenFlags::READ_ONLY | OpenFlags::NO_FOLLOW)
        .await?;
    assert_eq!(link.readlink()?, "nowhere");
    Ok(())
}

/// Builds `l1 -> l2 -> ... -> l<depth> -> target`.
async fn chain(ns: &Namespace, depth: usize) -> Result<()> {
    create_file(ns, ns.root(), "target", b"end").await?;
    for i in 1..=depth {
        let next = if i == depth {
            "target".to_string()
        } else {
            format!("l{}", i + 1)
        };
        ns.symlink(ns.root(), &format!("l{i}"), &next).await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_symlink_chain_below_limit() -> Result<()> {
    let fx = setup().await?;
    let ns = &fx.ns;
    let depth = MAX_SYMLINK_DEPTH as usize - 1;
    chain(ns, depth).await?;

    let end = ns.lookup("/l1", OpenFlags::READ_ONLY).await?;
    assert!(end.is_file());
    assert_eq!(end.name(), "target");
    Ok(())
}

#[tokio::test]
async fn test_symlink_chain_at_limit_loops() -> Result<()> {
    let fx = setup().await?;
    let ns = &fx.ns;
    chain(ns, MAX_SYMLINK_DEPTH as usize).await?;
    let objects = fx.store.object_count().await;
    let entries = ns.num_entries(ns.root()).await?;

    let err = ns.lookup("/l1", OpenFlags::READ_ONLY).await.unwrap_err();
    assert_eq!(err.errno(), libc::ELOOP);

    assert_eq!(fx.store.object_count().await, objects);
    assert_eq!(ns.num_entries(ns.root()).await?, entries);
    Ok(())
}

#[tokio::test]
async fn test_self_loop() -> Result<()> {
    let fx = setup().await?;
    let ns = &fx.ns;
    ns.symlink(ns.root(), "me", "me").await?;
    let err = ns.lookup("/me", OpenFlags::READ_ONLY).await.unwrap_err();
    assert_eq!(err.errno(), libc::ELOOP);
    Ok(())
}

#[tokio::test]
async fn test_lookup_rel_with_stat() -> Result<()> {
    let fx = setup().await?;
    let ns = &fx.ns;
    tree(ns).await?;
    let a = ns.lookup("/a", OpenFlags::READ_ONLY).await?;
    let (link, stat) = ns
        .lookup_rel_with_stat(&a, "rel", OpenFlags::READ_ONLY | OpenFlags::NO_FOLLOW)
        .await?;
    assert!(link.is_symlink());
    assert_eq!(stat.mode & S_IFMT, S_IFLNK);
    assert_eq!(stat.size, 6);
    Ok(())
}
