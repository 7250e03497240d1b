//! Advisory lock on a database directory.
//!
//! `DB::open` takes an exclusive, non-blocking `flock` on `<db>/LOCK`. The lock
//! belongs to the open file description, so a second open of the same
//! directory fails even from within the same process. It is released when
//! the [`FileLock`] is dropped.

use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// A held LOCK file.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Creates `path` if needed and locks it.
    ///
    /// # Errors
    ///
    /// Returns `Error::AlreadyExists` if another handle holds the lock and
    /// `Error::Io` for any other failure.
    pub fn lock<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file =
            OpenOptions::new().create(true).truncate(false).read(true).write(true).open(&path)?;

        match Self::try_lock(&file) {
            Ok(()) => {
                log::debug!("Acquired lock {:?}", path);
                Ok(Self { _file: file, path })
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(Error::AlreadyExists(format!(
                "lock {} is held by another process or handle",
                path.display()
            ))),
            Err(e) => Err(e.into()),
        }
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> io::Result<()> {
        use libc::{flock, LOCK_EX, LOCK_NB};

        let fd = file.as_raw_fd();
        // SAFETY: `fd` is a valid descriptor owned by `file` for the duration of the call.
        let result = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn try_lock(_file: &File) -> io::Result<()> {
        Ok(())
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Closing the descriptor releases the flock; the file itself stays.
        log::debug!("Released lock {:?}", self.path);
    }
}
