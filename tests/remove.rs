mod common;

use std::fs;

use anyhow::Result;
use pathwright::ops::{OpError, ProgressTracker, run_remove};
use tempfile::TempDir;

use common::build_tree;

#[test]
fn removes_trees_and_files_and_reports_the_rest() -> Result<()> {
    let root = TempDir::new()?;
    build_tree(root.path(), &[("tree/a.txt", b"a"), ("tree/sub/b.txt", b"b"), ("single.txt", b"s")])?;
    let targets = vec![
        root.path().join("tree"),
        root.path().join("missing"),
        root.path().join("single.txt"),
    ];

    let tracker = ProgressTracker::detached();
    let report = run_remove(&targets, &tracker);

    assert!(!root.path().join("tree").exists());
    assert!(!root.path().join("single.txt").exists());
    assert_eq!(report.completed, [targets[0].clone(), targets[2].clone()]);
    assert!(matches!(
        report.failures.as_slice(),
        [(path, OpError::Io { action: "stat", .. })] if *path == targets[1]
    ));
    let snap = tracker.snapshot();
    assert_eq!((snap.done_files, snap.total_files), (2, 3));
    assert!(snap.finished);
    Ok(())
}

#[cfg(unix)]
#[test]
fn a_linked_directory_is_unlinked_not_emptied() -> Result<()> {
    let root = TempDir::new()?;
    build_tree(root.path(), &[("real/keep.txt", b"keep")])?;
    let link = root.path().join("alias");
    std::os::unix::fs::symlink(root.path().join("real"), &link)?;

    let report = run_remove(&[link.clone()], &ProgressTracker::detached());

    assert!(report.is_success());
    assert!(fs::symlink_metadata(&link).is_err());
    assert_eq!(fs::read(root.path().join("real/keep.txt"))?, b"keep");
    Ok(())
}
