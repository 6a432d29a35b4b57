use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};

use super::conflict::{ConflictResolver, Verdict};
use super::error::{IoResultExt, OpError};
use super::job::{FileJob, create_dir_like};
use super::progress::ProgressTracker;
use crate::prompt::Prompter;

/// State of one copy or move request, threaded through the recursion.
///
/// Owns the overwrite/merge decisions so that two requests never share them.
pub struct WalkContext<'a> {
    job: &'a dyn FileJob,
    prompter: &'a dyn Prompter,
    progress: &'a ProgressTracker,
    resolver: ConflictResolver,
}

impl<'a> WalkContext<'a> {
    pub fn new(job: &'a dyn FileJob, prompter: &'a dyn Prompter, progress: &'a ProgressTracker) -> Self {
        Self {
            job,
            prompter,
            progress,
            resolver: ConflictResolver::new(),
        }
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    /// Copies or moves `src` to `dst`, or into `dst` when that is an existing
    /// directory. Symlinks are transferred as links and never traversed.
    pub fn walk(&mut self, src: &Path, dst: &Path) -> Result<(), OpError> {
        let src_meta = fs::symlink_metadata(src).at("stat", src)?;
        let dst = match fs::metadata(dst) {
            Ok(meta) if meta.is_dir() => dst.join(src.file_name().unwrap_or_default()),
            Ok(_) => dst.to_path_buf(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => dst.to_path_buf(),
            Err(err) => return Err(OpError::io("stat", dst, err)),
        };

        if dst.as_path() == src {
            return Err(OpError::SameFile {
                path: src.to_path_buf(),
            });
        }
        if src_meta.is_dir() {
            if is_lexically_inside(src, &dst) {
                return Err(OpError::IntoItself {
                    src: src.to_path_buf(),
                    dst,
                });
            }
            self.dir_to_dir(src, &src_meta, &dst)
        } else {
            self.file_to_file(src, &src_meta, &dst)
        }
    }

    fn dir_to_dir(&mut self, src: &Path, src_meta: &Metadata, dst: &Path) -> Result<(), OpError> {
        match fs::metadata(dst) {
            Ok(meta) if !meta.is_dir() => {
                return Err(OpError::NotADirectory {
                    path: dst.to_path_buf(),
                });
            }
            Ok(_) => {
                if self.resolver.resolve_dir(dst, self.prompter)? == Verdict::Skip {
                    return Ok(());
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => create_dir_like(src_meta, dst)?,
            Err(err) => return Err(OpError::io("stat", dst, err)),
        }

        for child in read_children(src)? {
            let child_src = src.join(&child);
            let child_dst = dst.join(&child);
            let child_meta = fs::symlink_metadata(&child_src).at("stat", &child_src)?;
            if child_meta.is_dir() {
                self.dir_to_dir(&child_src, &child_meta, &child_dst)?;
            } else {
                self.file_to_file(&child_src, &child_meta, &child_dst)?;
            }
        }

        self.job.after_directory(src, src_meta, dst)
    }

    fn file_to_file(&mut self, src: &Path, src_meta: &Metadata, dst: &Path) -> Result<(), OpError> {
        match fs::symlink_metadata(dst) {
            Ok(_) => {
                if self.resolver.resolve_file(dst, self.prompter)? == Verdict::Skip {
                    return Ok(());
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(OpError::io("stat", dst, err)),
        }

        let size = if src_meta.is_file() { src_meta.len() } else { 0 };
        let name = src.file_name().unwrap_or_default().to_string_lossy();
        self.progress.start_task(name, size);
        self.job.apply(src, dst, self.progress)?;
        self.progress.finish_task();
        Ok(())
    }
}

// Names are collected up front: a move empties the directory while we go.
fn read_children(dir: &Path) -> Result<Vec<PathBuf>, OpError> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).at("read directory", dir)? {
        let entry = entry.at("read directory", dir)?;
        names.push(PathBuf::from(entry.file_name()));
    }
    Ok(names)
}

/// Plain string-prefix test on the two paths; no canonicalisation, so
/// `/a/b` also counts as containing `/a/bc`.
pub fn is_lexically_inside(src: &Path, dst: &Path) -> bool {
    dst.as_os_str()
        .as_encoded_bytes()
        .starts_with(src.as_os_str().as_encoded_bytes())
}
