use crate::registry::WatchTarget;
use fsnotifier_sdk::{DecodeError, OsError};
use std::{io, path::PathBuf};
use thiserror::Error;

pub type Result<T, E = NotifyError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum NotifyError {
    /// inotify is unavailable, or there is no reactor to register it with.
    #[error("notifier could not be set up: {context}: {source}")]
    Configuration {
        context: &'static str,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Os(#[from] OsError),
    #[error("cannot find file: {}", .0.display())]
    NotFound(PathBuf),
    #[error("file '{}' already has a watch", .0.display())]
    DuplicateWatch(PathBuf),
    /// The watched path now names a different inode than the one watched.
    #[error("'{}' no longer refers to the watched file", .0.display())]
    Replaced(PathBuf),
    #[error("no watch on {0}")]
    NotWatched(WatchTarget),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}
