use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("truncated inotify record at offset {offset}: need {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
}

/// A failed inotify system call with its errno attached.
#[derive(Debug, Error)]
#[error("{op} failed: {source}")]
pub struct OsError {
    pub op: &'static str,
    #[source]
    pub source: io::Error,
}

impl OsError {
    pub(crate) fn last(op: &'static str) -> Self {
        Self {
            op,
            source: io::Error::last_os_error(),
        }
    }

    /// Platform error code, if the error came from the OS.
    pub fn code(&self) -> Option<i32> {
        self.source.raw_os_error()
    }
}
