use std::{
    cmp, fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::{Context, Result};
use tokio::{
    runtime::Handle,
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
};
use tracing::debug;

use pathwright::ops::format_size;

#[derive(Clone, Debug)]
pub struct FileEntry {
    pub name: String,
    pub path: PathBuf,
    /// True for directories and for symlinks that point at one.
    pub is_dir: bool,
    pub is_symlink: bool,
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub mode: u32,
    pub marked: bool,
}

impl FileEntry {
    fn from_path(path: PathBuf) -> Result<Self> {
        let meta = fs::symlink_metadata(&path).with_context(|| format!("stat {}", path.display()))?;
        let is_symlink = meta.file_type().is_symlink();
        let is_dir = if is_symlink {
            fs::metadata(&path).map(|target| target.is_dir()).unwrap_or(false)
        } else {
            meta.is_dir()
        };
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            name,
            is_dir,
            is_symlink,
            size: if meta.is_dir() { 0 } else { meta.len() },
            modified: meta.modified().ok(),
            mode: permission_bits(&meta),
            marked: false,
            path,
        })
    }

    pub fn kind_marker(&self) -> &'static str {
        if self.is_symlink {
            "[L]"
        } else if self.is_dir {
            "[D]"
        } else {
            "[F]"
        }
    }

    pub fn describe(&self) -> String {
        let size = if self.is_dir {
            "-".to_string()
        } else {
            format!("{}B", format_size(self.size))
        };
        let age = self
            .modified
            .and_then(|time| time.elapsed().ok())
            .map(|elapsed| format!("{}s ago", elapsed.as_secs()))
            .unwrap_or_else(|| "unknown".into());
        format!("{} {} {} {}", mode_string(self.mode, self.is_dir), size, age, self.name)
    }
}

#[cfg(unix)]
fn permission_bits(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(meta: &fs::Metadata) -> u32 {
    if meta.permissions().readonly() { 0o444 } else { 0o644 }
}

/// `drwxr-xr-x` style rendering of the low nine permission bits.
pub fn mode_string(mode: u32, is_dir: bool) -> String {
    let mut out = String::with_capacity(10);
    out.push(if is_dir { 'd' } else { '-' });
    for shift in [6, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

type FsResult<T> = std::result::Result<T, String>;

pub enum FsEvent {
    DirectoryLoaded {
        path: PathBuf,
        token: u64,
        result: FsResult<Vec<FileEntry>>,
    },
}

/// Runs directory scans on the blocking pool and reports back by channel.
#[derive(Clone)]
pub struct FsDispatcher {
    handle: Handle,
    event_tx: UnboundedSender<FsEvent>,
}

impl FsDispatcher {
    pub fn new(handle: Handle) -> (Self, UnboundedReceiver<FsEvent>) {
        let (event_tx, event_rx) = unbounded_channel();
        (Self { handle, event_tx }, event_rx)
    }

    pub fn request_directory_scan(&self, path: PathBuf, token: u64) {
        let tx = self.event_tx.clone();
        self.handle.spawn_blocking(move || {
            let result = read_directory(&path).map_err(|err| format!("{err:#}"));
            let _ = tx.send(FsEvent::DirectoryLoaded {
                path,
                token,
                result,
            });
        });
    }
}

/// Lists `dir` with directories first, then by case-insensitive name.
pub fn read_directory(dir: &Path) -> Result<Vec<FileEntry>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(dir = %dir.display(), error = %err, "skipping unreadable entry");
                continue;
            }
        };
        match FileEntry::from_path(entry.path()) {
            Ok(file) => entries.push(file),
            Err(err) => debug!("skipping entry: {err:#}"),
        }
    }

    entries.sort_by(|a, b| match (a.is_dir, b.is_dir) {
        (true, false) => cmp::Ordering::Less,
        (false, true) => cmp::Ordering::Greater,
        _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    });
    Ok(entries)
}
