use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use log::{debug, info};

use crate::error::{StorerError, StorerResult};

/// Advisory exclusive lock guaranteeing a single writer per destination.
///
/// The lock lives as long as the open file handle: dropping the
/// `WriterLock` (or the process dying) releases it.
#[derive(Debug)]
pub struct WriterLock {
    file: File,
    path: PathBuf,
}

impl WriterLock {
    /// Take the lock at `path`, creating the file and its parent directory.
    ///
    /// Fails with [`StorerError::LockBusy`] if another writer holds it.
    pub fn acquire(path: impl AsRef<Path>) -> StorerResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        info!("Lockfile {}: acquiring", path.display());
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        if let Err(e) = file.try_lock_exclusive() {
            let contended = e.kind() == io::ErrorKind::WouldBlock
                || e.raw_os_error() == fs2::lock_contended_error().raw_os_error();
            return Err(if contended {
                StorerError::LockBusy { path }
            } else {
                StorerError::Io(e)
            });
        }

        // Owner pid, for the operator.
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        info!("Lockfile {}: acquired", path.display());
        Ok(WriterLock { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock explicitly.
    pub fn release(self) -> StorerResult<()> {
        debug!("Lockfile {}: releasing", self.path.display());
        FileExt::unlock(&self.file)?;
        info!("Lockfile {}: released", self.path.display());
        Ok(())
    }
}
