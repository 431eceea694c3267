use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// Holds an advisory exclusive lock on a `LOCK` file inside a data directory
/// for as long as it is alive.
///
/// Used by the member binary to guard against two processes starting up
/// against the same data directory at once.
pub struct DirLock {
    path: PathBuf,
    file: File,
}

impl DirLock {
    /// Opens (or creates) `dir/LOCK` and takes an exclusive advisory lock on
    /// it. Fails if another process already holds the lock.
    pub fn open(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;

        let path = dir.join("LOCK");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)?;

        file.try_lock_exclusive().map_err(|_| {
            io::Error::new(
                io::ErrorKind::WouldBlock,
                format!("directory already locked: {}", path.display()),
            )
        })?;

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
