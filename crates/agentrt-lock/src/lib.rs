//! File-based single-writer coordination around the Durable Store's SQLite
//! file, using `flock(2)` directly.
//!
//! Ported from `csa-lock`, which locks a per-session directory rather than
//! a single store file; the raw-`flock`-plus-`Drop` shape carries over
//! unchanged — only the thing being protected changes. Uses raw
//! `libc::flock` rather than an RAII wrapper crate so the lock can own
//! just the `File`, avoiding the self-referential-struct problem an RAII
//! guard borrowing its own owner would create.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct LockDiagnostic {
    pid: u32,
    reason: String,
    acquired_at: DateTime<Utc>,
}

/// An exclusive advisory lock on a store file, held for as long as this
/// guard is alive. `Drop` releases the lock explicitly rather than relying
/// on the fd closing.
pub struct StoreLock {
    file: File,
    lock_path: PathBuf,
}

impl std::fmt::Debug for StoreLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreLock").field("lock_path", &self.lock_path).finish()
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let fd = self.file.as_raw_fd();
        // SAFETY: `fd` is a valid descriptor owned by `self.file` for the
        // lifetime of this guard; LOCK_UN releases the advisory lock taken
        // in `acquire_store_lock`.
        unsafe {
            libc::flock(fd, libc::LOCK_UN);
        }
    }
}

impl StoreLock {
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

/// Acquire a non-blocking exclusive lock on `{db_path}.lock`, the
/// companion file next to the Durable Store's SQLite database.
///
/// Returns a diagnostic error naming the holding PID and reason when the
/// lock is already held.
pub fn acquire_store_lock(db_path: &Path, reason: &str) -> Result<StoreLock> {
    let lock_path = db_path.with_extension(match db_path.extension() {
        Some(ext) => format!("{}.lock", ext.to_string_lossy()),
        None => "lock".to_string(),
    });
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("failed to create lock directory: {}", parent.display()))?;
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .with_context(|| format!("failed to open lock file: {}", lock_path.display()))?;

    let fd = file.as_raw_fd();
    // SAFETY: `fd` is a valid descriptor from the `File` just opened above.
    let ret = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };

    if ret == 0 {
        let mut lock = StoreLock { file, lock_path };
        let diagnostic = LockDiagnostic {
            pid: std::process::id(),
            reason: reason.to_string(),
            acquired_at: Utc::now(),
        };
        let json = serde_json::to_string(&diagnostic).context("failed to serialize lock diagnostic")?;
        lock.file.set_len(0).context("failed to truncate lock file")?;
        lock.file.write_all(json.as_bytes()).context("failed to write lock diagnostic")?;
        lock.file.flush().context("failed to flush lock file")?;
        Ok(lock)
    } else {
        let mut diag_file = File::open(&lock_path).context("failed to open lock file to read diagnostic")?;
        let mut contents = String::new();
        diag_file.read_to_string(&mut contents).context("failed to read lock file")?;

        let message = match serde_json::from_str::<LockDiagnostic>(&contents) {
            Ok(diag) => format!("store locked by PID {} (reason: {}, acquired: {})", diag.pid, diag.reason, diag.acquired_at),
            Err(_) => "store is locked (unable to read diagnostic info)".to_string(),
        };
        Err(anyhow::anyhow!(message))
    }
}
