//! Advisory file locks guarding per-project atomic sections.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::domain::errors::{DomainError, DomainResult};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Exclusive advisory lock on a lock file. Released on drop.
///
/// Lock files live outside the data they guard so that lock acquisition
/// never races directory renames. Acquisition polls until the configured
/// timeout; a timeout surfaces as a retriable backend error.
#[derive(Debug)]
pub struct FileLock {
    file: File,
}

impl FileLock {
    pub fn acquire(path: &Path, timeout: Duration) -> DomainResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { file }),
                Err(_) if Instant::now() < deadline => std::thread::sleep(POLL_INTERVAL),
                Err(_) => {
                    return Err(DomainError::Backend(format!(
                        "timed out acquiring lock {} after {:?}",
                        path.display(),
                        timeout
                    )))
                }
            }
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
