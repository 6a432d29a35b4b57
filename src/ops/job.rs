use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

use filetime::FileTime;
use tracing::warn;

use super::error::{IoResultExt, OpError};
use super::progress::ProgressTracker;

/// Bytes moved per read/write round of a file copy.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// The per-entry half of a copy or move.
pub trait FileJob {
    /// Transfers one non-directory entry from `src` to `dst`.
    fn apply(&self, src: &Path, dst: &Path, progress: &ProgressTracker) -> Result<(), OpError>;

    /// Runs once every child of the directory `src` has been visited.
    /// `src_meta` was taken before the children were touched.
    fn after_directory(&self, src: &Path, src_meta: &Metadata, dst: &Path) -> Result<(), OpError>;
}

#[derive(Clone, Copy, Debug)]
pub struct CopyJob {
    chunk_size: usize,
}

impl CopyJob {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }
}

impl Default for CopyJob {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl FileJob for CopyJob {
    fn apply(&self, src: &Path, dst: &Path, progress: &ProgressTracker) -> Result<(), OpError> {
        copy_file(src, dst, progress, self.chunk_size)
    }

    fn after_directory(&self, _src: &Path, src_meta: &Metadata, dst: &Path) -> Result<(), OpError> {
        copy_times(src_meta, dst)
    }
}

pub type RenameFn = fn(&Path, &Path) -> io::Result<()>;

/// Rename where possible, copy and remove across devices.
#[derive(Clone, Copy)]
pub struct MoveJob {
    copy: CopyJob,
    rename: RenameFn,
}

impl MoveJob {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            copy: CopyJob::new(chunk_size),
            rename: rename_in_place,
        }
    }

    /// Replaces the rename primitive, e.g. to force the cross-device path.
    pub fn with_rename(mut self, rename: RenameFn) -> Self {
        self.rename = rename;
        self
    }
}

impl Default for MoveJob {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl FileJob for MoveJob {
    fn apply(&self, src: &Path, dst: &Path, progress: &ProgressTracker) -> Result<(), OpError> {
        let meta = fs::symlink_metadata(src).at("stat", src)?;
        match (self.rename)(src, dst) {
            Ok(()) => {
                if meta.is_file() {
                    progress.update(meta.len());
                }
                Ok(())
            }
            Err(err) if is_cross_device(&err) => {
                // Not atomic: a crash between the copy and the remove leaves both.
                warn!(src = %src.display(), dst = %dst.display(), "cross-device move, copying instead");
                self.copy.apply(src, dst, progress)?;
                fs::remove_file(src).at("remove", src)
            }
            Err(err) => Err(OpError::io("rename", src, err)),
        }
    }

    fn after_directory(&self, src: &Path, src_meta: &Metadata, dst: &Path) -> Result<(), OpError> {
        copy_times(src_meta, dst)?;
        remove_empty_dir(src)
    }
}

fn rename_in_place(src: &Path, dst: &Path) -> io::Result<()> {
    fs::rename(src, dst)
}

pub fn is_cross_device(err: &io::Error) -> bool {
    // EXDEV; only unix numbers it 18.
    err.kind() == io::ErrorKind::CrossesDevices || (cfg!(unix) && err.raw_os_error() == Some(18))
}

/// Copies a regular file or recreates a symlink; creates no parent directories.
pub fn copy_file(
    src: &Path,
    dst: &Path,
    progress: &ProgressTracker,
    chunk_size: usize,
) -> Result<(), OpError> {
    let meta = fs::symlink_metadata(src).at("stat", src)?;
    if meta.file_type().is_symlink() {
        return copy_symlink(src, dst);
    }

    let mut reader = File::open(src).at("open", src)?;
    let mut writer = create_truncated(dst, &meta).at("create", dst)?;
    copy_bytes(&mut reader, &mut writer, progress, chunk_size, src, dst)?;
    drop(writer);

    fs::set_permissions(dst, meta.permissions()).at("chmod", dst)?;
    copy_times(&meta, dst)
}

fn copy_bytes(
    reader: &mut impl Read,
    writer: &mut impl Write,
    progress: &ProgressTracker,
    chunk_size: usize,
    src: &Path,
    dst: &Path,
) -> Result<u64, OpError> {
    let _ticker = progress.redraw_ticker();
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut copied = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(OpError::io("read", src, err)),
        };
        writer.write_all(&buf[..n]).at("write", dst)?;
        progress.update(n as u64);
        copied += n as u64;
    }
    Ok(copied)
}

#[cfg(unix)]
fn create_truncated(dst: &Path, meta: &Metadata) -> io::Result<File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(meta.permissions().mode() & 0o777)
        .open(dst)
}

#[cfg(not(unix))]
fn create_truncated(dst: &Path, _meta: &Metadata) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(dst)
}

/// Recreates the link verbatim; the target is never followed.
fn copy_symlink(src: &Path, dst: &Path) -> Result<(), OpError> {
    let target = fs::read_link(src).at("readlink", src)?;
    match fs::symlink_metadata(dst) {
        Ok(existing) if !existing.is_dir() => fs::remove_file(dst).at("remove", dst)?,
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(OpError::io("stat", dst, err)),
    }
    make_symlink(&target, dst).at("symlink", dst)
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

/// Stamps `dst` with the access and modification times recorded in `meta`.
pub fn copy_times(meta: &Metadata, dst: &Path) -> Result<(), OpError> {
    let atime = FileTime::from_last_access_time(meta);
    let mtime = FileTime::from_last_modification_time(meta);
    filetime::set_file_times(dst, atime, mtime).at("chtimes", dst)
}

/// Creates `dst` with the permission bits of the directory described by `meta`.
pub fn create_dir_like(meta: &Metadata, dst: &Path) -> Result<(), OpError> {
    let mut builder = fs::DirBuilder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
        builder.mode(meta.permissions().mode() & 0o7777);
    }
    #[cfg(not(unix))]
    let _ = meta;
    builder.create(dst).at("mkdir", dst)
}

/// Removes `src` only if nothing is left in it.
pub fn remove_empty_dir(src: &Path) -> Result<(), OpError> {
    let mut remain = fs::read_dir(src).at("read directory", src)?;
    if remain.next().is_none() {
        fs::remove_dir(src).at("remove", src)?;
    }
    Ok(())
}
