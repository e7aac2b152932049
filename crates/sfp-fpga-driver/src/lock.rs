// SPDX-License-Identifier: AGPL-3.0-only

//! Concurrency guard for the shared FPGA
//!
//! One FPGA serves every port, so at most one register transaction may be in
//! flight system-wide. Every [`FpgaLock`] in the process first takes one
//! process-wide mutex, so separate bridges over the same resource never
//! overlap. When a lock file is configured it then holds an exclusive `flock`
//! on it while the guard lives, which covers other processes such as a
//! monitoring daemon and the CLI.
//!
//! The lock is not re-entrant. Code that already holds an [`FpgaGuard`]
//! works on the guarded backend directly and never calls back into an
//! acquiring entry point.

use crate::error::{BridgeError, Result};
use rustix::fs::{flock, FlockOperation};
use std::fs::{File, OpenOptions};
use std::ops::{Deref, DerefMut};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

/// Serialises FPGA access between every lock in this process.
static PROCESS_LOCK: Mutex<()> = Mutex::new(());

/// Process-wide and (optionally) cross-process exclusive lock around `T`.
#[derive(Debug)]
pub struct FpgaLock<T> {
    inner: Mutex<T>,
    lock_path: Option<PathBuf>,
    lock_file: OnceLock<File>,
}

impl<T> FpgaLock<T> {
    /// Guard `value`; `lock_path` adds a cross-process advisory lock.
    ///
    /// The lock file is opened lazily on first acquisition.
    pub const fn new(value: T, lock_path: Option<PathBuf>) -> Self {
        Self {
            inner: Mutex::new(value),
            lock_path,
            lock_file: OnceLock::new(),
        }
    }

    /// Lock file, if cross-process locking is enabled.
    pub fn lock_path(&self) -> Option<&Path> {
        self.lock_path.as_deref()
    }

    fn lock_file(&self, path: &Path) -> Result<&File> {
        if let Some(file) = self.lock_file.get() {
            return Ok(file);
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o666)
            .open(path)
            .map_err(|source| BridgeError::LockUnavailable {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::debug!("Opened FPGA lock file {}", path.display());
        // Only the mutex holder gets here, so the cell is still empty.
        Ok(self.lock_file.get_or_init(|| file))
    }

    /// Block until the FPGA is free and take it.
    ///
    /// A poisoned mutex is recovered: the guarded value is a register
    /// backend, and every transaction re-derives its register state.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::LockUnavailable`] if the lock file cannot be
    /// opened or locked.
    pub fn acquire(&self) -> Result<FpgaGuard<'_, T>> {
        let process = PROCESS_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        let file = match &self.lock_path {
            None => None,
            Some(path) => {
                let file = self.lock_file(path)?;
                flock(file, FlockOperation::LockExclusive).map_err(|e| {
                    BridgeError::LockUnavailable {
                        path: path.clone(),
                        source: e.into(),
                    }
                })?;
                Some(file)
            }
        };

        tracing::trace!("FPGA lock taken");
        Ok(FpgaGuard {
            guard,
            file,
            _process: process,
        })
    }
}

/// Exclusive access to the guarded value; released on drop.
#[derive(Debug)]
pub struct FpgaGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    file: Option<&'a File>,
    // dropped last
    _process: MutexGuard<'static, ()>,
}

impl<T> Deref for FpgaGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for FpgaGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for FpgaGuard<'_, T> {
    fn drop(&mut self) {
        // flock first; the mutex guards are released after this body runs.
        if let Some(file) = self.file {
            if let Err(e) = flock(file, FlockOperation::Unlock) {
                tracing::error!("Failed to release FPGA lock file: {e}");
            }
        }
        tracing::trace!("FPGA lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn in_process_exclusion() {
        let lock = Arc::new(FpgaLock::new(Vec::<(usize, usize)>::new(), None));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let lock = Arc::clone(&lock);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let mut g = lock.acquire().unwrap();
                        for step in 0..3 {
                            g.push((t, step));
                            std::thread::yield_now();
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let log = lock.acquire().unwrap().clone();
        assert_eq!(log.len(), 4 * 50 * 3);
        for run in log.chunks(3) {
            assert!(run.iter().all(|(t, _)| *t == run[0].0), "interleaved: {run:?}");
            assert_eq!(run.iter().map(|(_, s)| *s).collect::<Vec<_>>(), vec![0, 1, 2]);
        }
    }

    #[test]
    fn separate_locks_exclude_each_other() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..2)
            .map(|t| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    let lock = FpgaLock::new((), None);
                    for _ in 0..50 {
                        let _g = lock.acquire().unwrap();
                        for step in 0..3 {
                            log.lock().unwrap().push((t, step));
                            std::thread::yield_now();
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2 * 50 * 3);
        for run in log.chunks(3) {
            assert!(run.iter().all(|(t, _)| *t == run[0].0), "interleaved: {run:?}");
        }
    }

    #[test]
    fn lock_file_excludes_other_holders() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sfp-fpga.lock");
        let lock = FpgaLock::new((), Some(path.clone()));

        // another open file description stands in for another process
        let guard = lock.acquire().unwrap();
        let other = File::open(&path).unwrap();
        assert!(flock(&other, FlockOperation::NonBlockingLockExclusive).is_err());

        drop(guard);
        flock(&other, FlockOperation::NonBlockingLockExclusive).unwrap();
        flock(&other, FlockOperation::Unlock).unwrap();
    }

    #[test]
    fn unusable_lock_path() {
        let dir = tempfile::tempdir().unwrap();
        let lock = FpgaLock::new((), Some(dir.path().join("missing").join("x.lock")));
        assert!(matches!(
            lock.acquire(),
            Err(BridgeError::LockUnavailable { .. })
        ));
    }
}
