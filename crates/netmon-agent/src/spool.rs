// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Durable on-disk queue of batches that could not be delivered.
//!
//! Each pending batch is one file in a flat directory, named
//! `batch_<nanos>.json` with a zero-padded, strictly increasing timestamp so
//! that lexicographic order equals enqueue order. Payloads are written to a
//! temporary sibling and renamed into place, so a reader never sees a partial
//! batch. The total size of the directory is capped; the oldest batches are
//! evicted first to make room.
//!
//! ```text
//!   enqueue ──> [evict oldest until it fits] ──> write .tmp ──> rename
//!   dequeue_oldest ──> first batch_* by name (file stays until ack)
//!   ack ──> remove
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::constants::{SPOOL_FILE_PREFIX, SPOOL_FILE_SUFFIX};
use crate::errors::SpoolError;

const TMP_SUFFIX: &str = ".tmp";

#[derive(Debug)]
pub struct Spool {
    dir: PathBuf,
    max_bytes: u64,
    // Serializes every directory operation and remembers the last name issued.
    state: Mutex<SpoolState>,
}

#[derive(Debug, Default)]
struct SpoolState {
    last_nanos: u128,
}

struct SpoolFile {
    path: PathBuf,
    size: u64,
}

impl Spool {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Spool {
            dir: dir.into(),
            max_bytes,
            state: Mutex::new(SpoolState::default()),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the spool directory if it does not exist.
    pub fn ensure(&self) -> Result<(), SpoolError> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Stores a payload, evicting the oldest batches if the cap requires it.
    pub fn enqueue(&self, payload: &[u8]) -> Result<(), SpoolError> {
        if payload.is_empty() {
            return Ok(());
        }
        let mut state = self.lock();

        let needed = payload.len() as u64;
        self.make_room(needed)?;

        let nanos = next_nanos(&mut state);
        let name = format!("{SPOOL_FILE_PREFIX}{nanos:020}{SPOOL_FILE_SUFFIX}");
        let path = self.dir.join(&name);
        let tmp = self.dir.join(format!("{name}{TMP_SUFFIX}"));

        let write = || -> io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(payload)?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        debug!("Spooled {} bytes to {}", needed, path.display());
        Ok(())
    }

    /// Returns the oldest pending batch without removing it.
    pub fn dequeue_oldest(&self) -> Result<(PathBuf, Vec<u8>), SpoolError> {
        let _state = self.lock();
        let files = self.list()?;
        let Some(oldest) = files.into_iter().next() else {
            return Err(SpoolError::Empty);
        };
        let data = fs::read(&oldest.path)?;
        Ok((oldest.path, data))
    }

    /// Removes a delivered batch. Removing a missing file succeeds.
    pub fn ack(&self, path: &Path) -> Result<(), SpoolError> {
        let _state = self.lock();
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Total bytes of pending batches; 0 if the directory cannot be read.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        let _state = self.lock();
        self.list()
            .map(|files| files.iter().map(|f| f.size).sum())
            .unwrap_or(0)
    }

    /// Number of pending batches; 0 if the directory cannot be read.
    #[must_use]
    pub fn count(&self) -> usize {
        let _state = self.lock();
        self.list().map(|files| files.len()).unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SpoolState> {
        // A poisoned lock only means another thread panicked mid-operation; the
        // filesystem is still the source of truth.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn make_room(&self, needed: u64) -> Result<(), SpoolError> {
        let files = self.list()?;
        let mut current: u64 = files.iter().map(|f| f.size).sum();
        if current + needed <= self.max_bytes {
            return Ok(());
        }
        for file in files {
            if current + needed <= self.max_bytes {
                break;
            }
            match fs::remove_file(&file.path) {
                Ok(()) => {
                    warn!(
                        "Spool over capacity, evicted {} ({} bytes)",
                        file.path.display(),
                        file.size
                    );
                    current -= file.size;
                }
                Err(e) => warn!("Failed to evict {}: {}", file.path.display(), e),
            }
        }
        if current + needed > self.max_bytes {
            return Err(SpoolError::Full {
                needed,
                capacity: self.max_bytes,
            });
        }
        Ok(())
    }

    /// Batch files sorted oldest first. Temporary files are never listed.
    fn list(&self) -> io::Result<Vec<SpoolFile>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !name.starts_with(SPOOL_FILE_PREFIX) || !name.ends_with(SPOOL_FILE_SUFFIX) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) if metadata.is_file() => metadata,
                _ => continue,
            };
            files.push(SpoolFile {
                path: entry.path(),
                size: metadata.len(),
            });
        }
        files.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));
        Ok(files)
    }
}

fn next_nanos(state: &mut SpoolState) -> u128 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let nanos = now.max(state.last_nanos + 1);
    state.last_nanos = nanos;
    nanos
}
