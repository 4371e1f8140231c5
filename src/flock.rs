// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Advisory exclusive lock on the database folder
///
/// Held for the lifetime of the engine; dropping the handle releases
/// the lock. The lock file itself is left in place.
pub struct FileLock {
    _file: File,
}

impl FileLock {
    /// Creates the lock file (if needed) and acquires the lock.
    ///
    /// Fails with [`Busy`](crate::Error::Busy) if another process
    /// already holds it.
    pub fn acquire(path: &Path) -> crate::Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        Self::try_lock(&file)?;

        // The PID is informational only
        let _ = writeln!(file, "{}", std::process::id());
        let _ = file.flush();

        Ok(Self { _file: file })
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> crate::Result<()> {
        use libc::{flock, LOCK_EX, LOCK_NB};

        let fd = file.as_raw_fd();
        let result = unsafe { flock(fd, LOCK_EX | LOCK_NB) };

        if result != 0 {
            let err = std::io::Error::last_os_error();

            return Err(if err.kind() == std::io::ErrorKind::WouldBlock {
                crate::Error::Busy
            } else {
                err.into()
            });
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn try_lock(_file: &File) -> crate::Result<()> {
        // Advisory locking is not supported on this platform
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::FileLock;
    use test_log::test;

    #[test]
    fn flock_exclusive() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("LOCK");

        let lock = FileLock::acquire(&path)?;

        // NOTE: flock is per file handle, so locking twice from the same
        // process does conflict
        assert!(matches!(
            FileLock::acquire(&path),
            Err(crate::Error::Busy)
        ));

        drop(lock);

        let _relock = FileLock::acquire(&path)?;

        Ok(())
    }
}
