//! Leadership gate
//!
//! Only the process holding the leader lock runs change watchers and the
//! startup reconciliation pass. Non-leaders still serve retrieval.

use crate::error::Result;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Decides whether this process drives background work
pub trait LeadershipGate: Send + Sync {
    /// Try to become leader; `false` means another process already is
    fn try_acquire(&self) -> Result<bool>;

    /// Whether a previous `try_acquire` succeeded
    fn is_leader(&self) -> bool;
}

/// Advisory exclusive lock on a well-known file
///
/// The lock is held for the lifetime of this value and released by the OS
/// when the process exits.
pub struct FileLockGate {
    path: PathBuf,
    held: Mutex<Option<File>>,
}

impl FileLockGate {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            held: Mutex::new(None),
        }
    }
}

impl LeadershipGate for FileLockGate {
    fn try_acquire(&self) -> Result<bool> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if held.is_some() {
            return Ok(true);
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        if file.try_lock_exclusive().is_err() {
            debug!("Leader lock {:?} is held by another process", self.path);
            return Ok(false);
        }

        let pid = std::process::id();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{}", pid)?;
        file.flush()?;

        info!("Acquired leader lock {:?} (PID: {})", self.path, pid);
        *held = Some(file);
        Ok(true)
    }

    fn is_leader(&self) -> bool {
        self.held
            .lock()
            .map(|held| held.is_some())
            .unwrap_or(false)
    }
}

/// Gate that always grants leadership
pub struct AlwaysLeader;

impl LeadershipGate for AlwaysLeader {
    fn try_acquire(&self) -> Result<bool> {
        Ok(true)
    }

    fn is_leader(&self) -> bool {
        true
    }
}
