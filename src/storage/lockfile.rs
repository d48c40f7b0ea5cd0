//! Process lock file.
//!
//! Two synchronizers appending to the same CSV and toggling the same
//! indicator would corrupt both. The lock holds our PID; a lock left behind
//! by a dead process is treated as stale and replaced.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::StoreError;

#[derive(Debug)]
pub struct ProcessLock {
    lock_path: PathBuf,
    owned: bool,
}

impl ProcessLock {
    const LOCK_FILE_NAME: &'static str = ".owencloud-sync.lock";

    /// Take the lock for `data_dir`, creating the directory if needed.
    pub fn acquire<P: AsRef<Path>>(data_dir: P) -> Result<Self, StoreError> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir).map_err(|e| StoreError::io(data_dir, e))?;
        let lock_path = data_dir.join(Self::LOCK_FILE_NAME);

        if let Some(pid) = Self::holder(&lock_path) {
            if pid != std::process::id() && Self::is_process_running(pid) {
                return Err(StoreError::Locked { pid, path: lock_path });
            }
            tracing::info!(pid, "Removing stale lock file from previous instance");
        }
        match fs::remove_file(&lock_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(&lock_path, e)),
        }

        let pid = std::process::id();
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .map_err(|e| StoreError::io(&lock_path, e))?;
        writeln!(file, "{}", pid).map_err(|e| StoreError::io(&lock_path, e))?;

        tracing::debug!(pid, path = %lock_path.display(), "Acquired process lock");
        Ok(Self {
            lock_path,
            owned: true,
        })
    }

    /// PID recorded in an existing lock file. Unreadable or garbled files
    /// count as no holder.
    fn holder(lock_path: &Path) -> Option<u32> {
        fs::read_to_string(lock_path).ok()?.trim().parse().ok()
    }

    #[cfg(unix)]
    #[allow(unsafe_code)]
    fn is_process_running(pid: u32) -> bool {
        let Ok(raw) = libc::pid_t::try_from(pid) else {
            return false;
        };
        // Signal 0 only checks for existence.
        // SAFETY: kill with signal 0 has no side effects.
        let alive = unsafe { libc::kill(raw, 0) } == 0;
        if !alive {
            return false;
        }
        // A recycled PID belonging to something else does not hold our lock.
        match fs::read_to_string(format!("/proc/{}/cmdline", pid)) {
            Ok(cmdline) => cmdline.contains("owencloud"),
            Err(_) => true,
        }
    }

    #[cfg(not(unix))]
    fn is_process_running(_pid: u32) -> bool {
        true
    }

    /// Release the lock (called automatically on drop)
    pub fn release(&mut self) {
        if self.owned {
            if let Err(e) = fs::remove_file(&self.lock_path) {
                tracing::warn!(error = %e, "Failed to remove lock file");
            } else {
                tracing::debug!(path = %self.lock_path.display(), "Released process lock");
            }
            self.owned = false;
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        self.release();
    }
}
