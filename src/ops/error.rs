use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Why a copy, move or remove stopped for one source path.
#[derive(Debug, Error)]
pub enum OpError {
    #[error("cannot copy/move directory {} into itself {}", .src.display(), .dst.display())]
    IntoItself { src: PathBuf, dst: PathBuf },
    #[error("{} and its destination are the same file", .path.display())]
    SameFile { path: PathBuf },
    #[error("cannot merge into {}: not a directory", .path.display())]
    NotADirectory { path: PathBuf },
    #[error("canceled file operation")]
    Canceled,
    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("remove {}: {source}", .path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: fs_extra::error::Error,
    },
}

impl OpError {
    pub fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether the user canceled; the rest of the request must not run.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

pub(crate) trait IoResultExt<T> {
    fn at(self, action: &'static str, path: &Path) -> Result<T, OpError>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at(self, action: &'static str, path: &Path) -> Result<T, OpError> {
        self.map_err(|err| OpError::io(action, path, err))
    }
}
