use crate::{OsError, WatchDescriptor};
use std::{
    ffi::CString,
    io,
    os::{
        fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd},
        unix::ffi::OsStrExt,
    },
    path::Path,
};
use tracing::debug;

/// An owned inotify instance.
///
/// The descriptor is non-blocking and close-on-exec. It is closed exactly
/// once, either by [`Inotify::close`] or on drop.
#[derive(Debug)]
pub struct Inotify {
    fd: OwnedFd,
}

impl Inotify {
    pub fn init() -> Result<Self, OsError> {
        // SAFETY: no pointers are passed.
        let fd = unsafe { libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC) };
        if fd == -1 {
            return Err(OsError::last("inotify_init1"));
        }
        // SAFETY: `fd` was just returned by the kernel and nothing else owns it.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        debug!(fd = fd.as_raw_fd(), "inotify instance created");
        Ok(Self { fd })
    }

    /// Add a watch for `path`, or replace the mask of the existing watch on
    /// the same inode. `mask` is the raw flags word.
    pub fn add_or_modify_watch(&self, path: &Path, mask: u32) -> Result<WatchDescriptor, OsError> {
        let path = CString::new(path.as_os_str().as_bytes()).map_err(|error| OsError {
            op: "inotify_add_watch",
            source: io::Error::new(io::ErrorKind::InvalidInput, error),
        })?;
        // SAFETY: `path` is a NUL-terminated string that outlives the call.
        let wd = unsafe { libc::inotify_add_watch(self.fd.as_raw_fd(), path.as_ptr(), mask) };
        if wd == -1 {
            return Err(OsError::last("inotify_add_watch"));
        }
        Ok(WatchDescriptor(wd))
    }

    pub fn remove_watch(&self, wd: WatchDescriptor) -> Result<(), OsError> {
        // SAFETY: no pointers are passed.
        let result = unsafe { libc::inotify_rm_watch(self.fd.as_raw_fd(), wd.0) };
        if result == -1 {
            return Err(OsError::last("inotify_rm_watch"));
        }
        Ok(())
    }

    /// Bytes ready to be read, via `FIONREAD`.
    pub fn available_bytes(&self) -> Result<usize, OsError> {
        let mut available: libc::c_int = 0;
        // SAFETY: FIONREAD writes one `c_int` through the pointer.
        let result = unsafe {
            libc::ioctl(
                self.fd.as_raw_fd(),
                libc::FIONREAD,
                &mut available as *mut libc::c_int,
            )
        };
        if result == -1 {
            return Err(OsError::last("ioctl(FIONREAD)"));
        }
        Ok(available.max(0) as usize)
    }

    /// Read up to `max_bytes`. Returns an empty buffer when nothing is queued.
    pub fn read(&self, max_bytes: usize) -> Result<Vec<u8>, OsError> {
        if max_bytes == 0 {
            return Ok(Vec::new());
        }
        let mut buffer = vec![0u8; max_bytes];
        // SAFETY: the kernel writes at most `buffer.len()` bytes into `buffer`.
        let read = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                buffer.as_mut_ptr().cast(),
                buffer.len(),
            )
        };
        if read == -1 {
            let source = io::Error::last_os_error();
            if source.kind() == io::ErrorKind::WouldBlock {
                return Ok(Vec::new());
            }
            return Err(OsError { op: "read", source });
        }
        buffer.truncate(read as usize);
        debug!(requested = max_bytes, read, "read inotify records");
        Ok(buffer)
    }

    /// Close the descriptor, reporting the error `close(2)` returns.
    pub fn close(self) -> Result<(), OsError> {
        let fd = self.fd.into_raw_fd();
        debug!(fd, "closing inotify instance");
        // SAFETY: `into_raw_fd` released ownership, so this is the only close.
        if unsafe { libc::close(fd) } == -1 {
            return Err(OsError::last("close"));
        }
        Ok(())
    }
}

impl AsFd for Inotify {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for Inotify {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
