//! Recursive copy, move and remove of file trees.
//!
//! A request runs on one worker from start to finish: the sources are
//! measured up front so the progress total is fixed, then each source is
//! walked in turn. A failing source is reported and the next one is still
//! attempted; a user cancel ends the whole request. Nothing is rolled back.

mod conflict;
mod error;
mod job;
mod progress;
mod walker;

use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub use conflict::{CONFLICT_OPTIONS, ConflictResolver, Decision, Verdict};
pub use error::OpError;
pub use job::{
    CopyJob, DEFAULT_CHUNK_SIZE, FileJob, MoveJob, RenameFn, copy_file, copy_times, is_cross_device,
    remove_empty_dir,
};
pub use progress::{
    ProgressSnapshot, ProgressState, ProgressTracker, REDRAW_INTERVAL, RedrawTicker, TaskInfo,
    format_duration, format_size,
};
pub use walker::{WalkContext, is_lexically_inside};

use crate::prompt::Prompter;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    Copy,
    Move,
    Remove,
}

impl OperationKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Move => "move",
            Self::Remove => "remove",
        }
    }
}

/// Sources and destination of one copy or move, fixed at creation.
///
/// Paths are made absolute against the directory the user was looking at,
/// so nothing that happens in the UI afterwards can redirect the operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationRequest {
    destination: PathBuf,
    sources: Vec<PathBuf>,
}

impl OperationRequest {
    pub fn new<I, P>(base: &Path, destination: impl AsRef<Path>, sources: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self {
            destination: absolutize(base, destination.as_ref()),
            sources: sources
                .into_iter()
                .map(|src| absolutize(base, src.as_ref()))
                .collect(),
        }
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }
}

/// Outcome of one request, per source path.
#[derive(Debug, Default)]
pub struct OperationReport {
    pub completed: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, OpError)>,
    pub canceled: bool,
}

impl OperationReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

pub fn run_copy(
    request: &OperationRequest,
    prompter: &dyn Prompter,
    progress: &ProgressTracker,
    chunk_size: usize,
) -> OperationReport {
    run_transfer(request, &CopyJob::new(chunk_size), prompter, progress)
}

pub fn run_move(
    request: &OperationRequest,
    prompter: &dyn Prompter,
    progress: &ProgressTracker,
    chunk_size: usize,
) -> OperationReport {
    run_transfer(request, &MoveJob::new(chunk_size), prompter, progress)
}

/// Walks every source of `request` with `job`.
pub fn run_transfer(
    request: &OperationRequest,
    job: &dyn FileJob,
    prompter: &dyn Prompter,
    progress: &ProgressTracker,
) -> OperationReport {
    let (bytes, files) = measure(request.sources());
    info!(
        destination = %request.destination().display(),
        sources = request.sources().len(),
        bytes,
        files,
        "starting transfer"
    );
    progress.start(bytes);
    progress.start_count(files);

    let mut context = WalkContext::new(job, prompter, progress);
    let mut report = OperationReport::default();
    for src in request.sources() {
        match context.walk(src, request.destination()) {
            Ok(()) => report.completed.push(src.clone()),
            Err(err) => {
                let canceled = err.is_canceled();
                warn!(src = %src.display(), error = %err, "transfer stopped");
                report.failures.push((src.clone(), err));
                if canceled {
                    report.canceled = true;
                    break;
                }
            }
        }
    }

    progress.finish();
    report
}

/// Removes every target, directories recursively. A symlink is removed as a
/// link. Failures are collected per target.
pub fn run_remove(targets: &[PathBuf], progress: &ProgressTracker) -> OperationReport {
    progress.start(0);
    progress.start_count(targets.len() as u64);

    let mut report = OperationReport::default();
    for target in targets {
        let name = target.file_name().unwrap_or_default().to_string_lossy();
        progress.start_task(name, 0);
        match remove_target(target) {
            Ok(()) => {
                progress.finish_task();
                report.completed.push(target.clone());
            }
            Err(err) => {
                warn!(target = %target.display(), error = %err, "remove failed");
                report.failures.push((target.clone(), err));
            }
        }
    }

    progress.finish();
    report
}

fn remove_target(target: &Path) -> Result<(), OpError> {
    let meta = fs::symlink_metadata(target).map_err(|err| OpError::io("stat", target, err))?;
    if meta.file_type().is_symlink() {
        return fs::remove_file(target).map_err(|err| OpError::io("remove", target, err));
    }
    fs_extra::remove_items(&[target]).map_err(|source| OpError::Remove {
        path: target.to_path_buf(),
        source,
    })
}

/// Total bytes and entry count below `paths`.
///
/// Regular files count their size, symlinks count zero bytes; both count as
/// one file. Directories count nothing themselves. Unreadable entries are
/// skipped.
pub fn measure(paths: &[PathBuf]) -> (u64, u64) {
    let mut bytes = 0u64;
    let mut files = 0u64;
    for path in paths {
        let walker = WalkDir::new(path).follow_links(false).follow_root_links(false);
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(error = %err, "skipping entry while measuring");
                    continue;
                }
            };
            let file_type = entry.file_type();
            if file_type.is_dir() {
                continue;
            }
            files += 1;
            if file_type.is_file() {
                bytes += entry.metadata().map(|meta| meta.len()).unwrap_or(0);
            }
        }
    }
    (bytes, files)
}

/// Joins `path` onto `base` when relative and folds `.` and `..` lexically.
pub fn absolutize(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    let mut clean = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                clean.pop();
            }
            other => clean.push(other.as_os_str()),
        }
    }
    clean
}
