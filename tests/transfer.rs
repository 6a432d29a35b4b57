mod common;

use std::fs;
use std::io;
use std::path::Path;

use anyhow::Result;
use filetime::FileTime;
use pathwright::ops::{
    CopyJob, MoveJob, OpError, OperationReport, OperationRequest, ProgressTracker, run_copy,
    run_move, run_transfer,
};
use tempfile::TempDir;

use common::{ScriptedPrompter, build_tree};

const CHUNK: usize = 4096;

fn copy(
    base: &Path,
    dst: &str,
    sources: &[&str],
    prompter: &ScriptedPrompter,
) -> (ProgressTracker, OperationReport) {
    let tracker = ProgressTracker::detached();
    let request = OperationRequest::new(base, dst, sources);
    let report = run_copy(&request, prompter, &tracker, CHUNK);
    (tracker, report)
}

#[test]
fn rerun_with_overwrite_all_matches_the_source() -> Result<()> {
    let root = TempDir::new()?;
    build_tree(root.path(), &[("src/a.txt", b"first"), ("src/sub/b.txt", b"nested")])?;
    fs::create_dir(root.path().join("dst"))?;

    let (_, report) = copy(root.path(), "dst", &["src"], &ScriptedPrompter::default());
    assert!(report.is_success());

    fs::write(root.path().join("src/a.txt"), b"second, longer")?;
    let prompter = ScriptedPrompter::new(&["!", "!"]);
    let (_, report) = copy(root.path(), "dst", &["src"], &prompter);
    assert!(report.is_success());

    assert_eq!(fs::read(root.path().join("dst/src/a.txt"))?, b"second, longer");
    assert_eq!(fs::read(root.path().join("dst/src/sub/b.txt"))?, b"nested");
    // One merge question for the top directory, one overwrite question for
    // the first file; everything below is settled by the standing answers.
    assert_eq!(prompter.asked().len(), 2);
    Ok(())
}

#[test]
fn skip_all_is_never_asked_again_across_nested_directories() -> Result<()> {
    let files: &[(&str, &[u8])] = &[
        ("one.txt", b"1"),
        ("deep/two.txt", b"2"),
        ("deep/deeper/three.txt", b"3"),
    ];
    let root = TempDir::new()?;
    let src = root.path().join("tree");
    let dst = root.path().join("out/tree");
    build_tree(&src, files)?;
    build_tree(&dst, &[
        ("one.txt", b"old"),
        ("deep/two.txt", b"old"),
        ("deep/deeper/three.txt", b"old"),
    ])?;

    let prompter = ScriptedPrompter::new(&["!", "."]);
    let (tracker, report) = copy(root.path(), "out", &["tree"], &prompter);

    assert!(report.is_success());
    assert_eq!(prompter.asked().len(), 2);
    assert!(prompter.asked()[0].starts_with("Merge? exists "));
    assert!(prompter.asked()[1].starts_with("Overwrite? exists "));
    for (rel, _) in files {
        assert_eq!(fs::read(dst.join(rel))?, b"old");
    }
    assert_eq!(tracker.snapshot().done_bytes, 0);
    Ok(())
}

#[test]
fn copying_a_directory_into_itself_writes_nothing() -> Result<()> {
    let root = TempDir::new()?;
    build_tree(root.path(), &[("a/b/file.txt", b"data")])?;

    let (_, report) = copy(root.path(), "a/b/c", &["a/b"], &ScriptedPrompter::default());
    assert!(matches!(report.failures.as_slice(), [(_, OpError::IntoItself { .. })]));
    assert!(!root.path().join("a/b/c").exists());

    // An existing destination directory resolves to a/b/b, still inside.
    let (_, report) = copy(root.path(), "a/b", &["a/b"], &ScriptedPrompter::default());
    assert!(matches!(report.failures.as_slice(), [(_, OpError::IntoItself { .. })]));
    assert!(!root.path().join("a/b/b").exists());
    assert_eq!(fs::read_dir(root.path().join("a/b"))?.count(), 1);
    Ok(())
}

#[test]
fn completed_copy_accounts_for_every_byte_and_file() -> Result<()> {
    let root = TempDir::new()?;
    build_tree(root.path(), &[
        ("src/big.bin", &[9u8; 10_000]),
        ("src/small.txt", b"12345"),
        ("src/nested/empty", b""),
    ])?;
    #[cfg(unix)]
    std::os::unix::fs::symlink("small.txt", root.path().join("src/link"))?;

    let (tracker, report) = copy(root.path(), "dst", &["src"], &ScriptedPrompter::default());

    assert!(report.is_success());
    let snap = tracker.snapshot();
    let files = if cfg!(unix) { 4 } else { 3 };
    assert_eq!((snap.done_bytes, snap.total_bytes), (10_005, 10_005));
    assert_eq!((snap.done_files, snap.total_files), (files, files));
    assert!(snap.finished);
    assert_eq!(fs::read(root.path().join("dst/big.bin"))?, vec![9u8; 10_000]);
    #[cfg(unix)]
    assert_eq!(fs::read_link(root.path().join("dst/link"))?, Path::new("small.txt"));
    Ok(())
}

#[test]
fn cross_device_move_copies_then_removes_and_keeps_mtime() -> Result<()> {
    let root = TempDir::new()?;
    build_tree(root.path(), &[("payload.txt", b"cross device")])?;
    let src = root.path().join("payload.txt");
    let stamp = FileTime::from_unix_time(1_500_000_000, 0);
    filetime::set_file_mtime(&src, stamp)?;

    let job = MoveJob::default().with_rename(|_, _| Err(io::Error::from(io::ErrorKind::CrossesDevices)));
    let tracker = ProgressTracker::detached();
    let request = OperationRequest::new(root.path(), "moved.txt", ["payload.txt"]);
    let report = run_transfer(&request, &job, &ScriptedPrompter::default(), &tracker);

    assert!(report.is_success());
    assert!(!src.exists());
    let dst = root.path().join("moved.txt");
    assert_eq!(fs::read(&dst)?, b"cross device");
    let meta = fs::metadata(&dst)?;
    assert_eq!(FileTime::from_last_modification_time(&meta), stamp);
    assert_eq!(tracker.snapshot().done_bytes, 12);
    Ok(())
}

#[test]
fn move_removes_only_emptied_directories() -> Result<()> {
    let root = TempDir::new()?;
    build_tree(root.path(), &[
        ("broken/ok.txt", b"ok"),
        ("broken/stuck.txt", b"stuck"),
        ("clean/one.txt", b"1"),
        ("clean/inner/two.txt", b"2"),
    ])?;
    fs::create_dir(root.path().join("dst"))?;

    let job = MoveJob::default().with_rename(|src, dst| {
        if src.ends_with("stuck.txt") {
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        } else {
            fs::rename(src, dst)
        }
    });
    let request = OperationRequest::new(root.path(), "dst", ["broken", "clean"]);
    let report = run_transfer(&request, &job, &ScriptedPrompter::default(), &ProgressTracker::detached());

    // The failing source is reported and the next one still runs.
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, root.path().join("broken"));
    assert!(matches!(report.failures[0].1, OpError::Io { action: "rename", .. }));
    assert_eq!(report.completed, [root.path().join("clean")]);

    assert!(root.path().join("broken/stuck.txt").exists());
    assert!(!root.path().join("clean").exists());
    assert_eq!(fs::read(root.path().join("dst/clean/inner/two.txt"))?, b"2");
    Ok(())
}

#[test]
fn skipped_entries_keep_their_source_directory() -> Result<()> {
    let root = TempDir::new()?;
    build_tree(root.path(), &[("src/keep.txt", b"new"), ("src/go.txt", b"go")])?;
    build_tree(root.path(), &[("dst/src/keep.txt", b"old")])?;

    let prompter = ScriptedPrompter::new(&["yes", "."]);
    let tracker = ProgressTracker::detached();
    let request = OperationRequest::new(root.path(), "dst", ["src"]);
    let report = run_move(&request, &prompter, &tracker, CHUNK);

    assert!(report.is_success());
    assert_eq!(fs::read(root.path().join("src/keep.txt"))?, b"new");
    assert_eq!(fs::read(root.path().join("dst/src/keep.txt"))?, b"old");
    assert_eq!(fs::read(root.path().join("dst/src/go.txt"))?, b"go");
    assert!(!root.path().join("src/go.txt").exists());
    Ok(())
}

#[test]
fn moving_a_small_tree_to_a_new_place() -> Result<()> {
    let root = TempDir::new()?;
    build_tree(root.path(), &[("a/x.txt", b"0123456789"), ("a/sub/y.txt", b"01234")])?;

    let tracker = ProgressTracker::detached();
    let request = OperationRequest::new(root.path(), "b", ["a"]);
    let report = run_move(&request, &ScriptedPrompter::default(), &tracker, CHUNK);

    assert!(report.is_success());
    assert_eq!(fs::read(root.path().join("b/x.txt"))?, b"0123456789");
    assert_eq!(fs::read(root.path().join("b/sub/y.txt"))?, b"01234");
    assert!(!root.path().join("a").exists());
    let snap = tracker.snapshot();
    assert_eq!((snap.done_files, snap.done_bytes), (2, 15));
    Ok(())
}

#[test]
fn cancel_abandons_the_remaining_sources() -> Result<()> {
    let root = TempDir::new()?;
    build_tree(root.path(), &[
        ("one.txt", b"new one"),
        ("two.txt", b"new two"),
        ("dst/one.txt", b"old one"),
    ])?;

    let prompter = ScriptedPrompter::default();
    let tracker = ProgressTracker::detached();
    let request = OperationRequest::new(root.path(), "dst", ["one.txt", "two.txt"]);
    let report = run_copy(&request, &prompter, &tracker, CHUNK);

    assert!(report.canceled);
    assert!(matches!(report.failures.as_slice(), [(_, OpError::Canceled)]));
    assert!(report.completed.is_empty());
    assert_eq!(fs::read(root.path().join("dst/one.txt"))?, b"old one");
    assert!(!root.path().join("dst/two.txt").exists());
    assert_eq!(prompter.asked().len(), 1);
    Ok(())
}

#[test]
fn a_structural_error_does_not_stop_sibling_sources() -> Result<()> {
    let root = TempDir::new()?;
    build_tree(root.path(), &[("loop/f", b"f"), ("loop/out/keep", b"k"), ("plain.txt", b"p")])?;

    let job = CopyJob::new(CHUNK);
    let request = OperationRequest::new(root.path(), "loop/out", ["loop", "plain.txt"]);
    let report = run_transfer(&request, &job, &ScriptedPrompter::default(), &ProgressTracker::detached());

    assert!(matches!(report.failures.as_slice(), [(_, OpError::IntoItself { .. })]));
    assert_eq!(report.completed, [root.path().join("plain.txt")]);
    assert_eq!(fs::read(root.path().join("loop/out/plain.txt"))?, b"p");
    assert!(!root.path().join("loop/out/loop").exists());
    Ok(())
}

#[test]
fn copying_a_file_onto_itself_leaves_it_intact() -> Result<()> {
    let root = TempDir::new()?;
    build_tree(root.path(), &[("x.txt", b"thirteen byte")])?;

    let prompter = ScriptedPrompter::new(&["yes"]);
    let (_, report) = copy(root.path(), ".", &["x.txt"], &prompter);

    assert!(matches!(
        report.failures.as_slice(),
        [(_, OpError::SameFile { path })] if *path == root.path().join("x.txt")
    ));
    assert!(prompter.asked().is_empty());
    assert_eq!(fs::read(root.path().join("x.txt"))?, b"thirteen byte");

    let request = OperationRequest::new(root.path(), "x.txt", ["x.txt"]);
    let report = run_move(&request, &prompter, &ProgressTracker::detached(), CHUNK);
    assert!(matches!(report.failures.as_slice(), [(_, OpError::SameFile { .. })]));
    assert_eq!(fs::read(root.path().join("x.txt"))?, b"thirteen byte");
    Ok(())
}

#[test]
fn a_directory_never_merges_into_a_file() -> Result<()> {
    let root = TempDir::new()?;
    build_tree(root.path(), &[("d/inner.txt", b"inner"), ("out/d", b"plain file")])?;

    let prompter = ScriptedPrompter::new(&["yes"]);
    let (_, report) = copy(root.path(), "out", &["d"], &prompter);

    assert!(matches!(
        report.failures.as_slice(),
        [(_, OpError::NotADirectory { path })] if *path == root.path().join("out/d")
    ));
    assert!(prompter.asked().is_empty());
    assert_eq!(fs::read(root.path().join("out/d"))?, b"plain file");
    assert_eq!(fs::read(root.path().join("d/inner.txt"))?, b"inner");
    Ok(())
}
