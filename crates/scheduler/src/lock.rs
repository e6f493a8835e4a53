use crate::JobKind;
use fs2::FileExt;
use parking_lot::{Mutex, RawMutex, lock_api::ArcMutexGuard};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

const FILE_LOCK_POLL: Duration = Duration::from_millis(50);

/// Mutual exclusion shared by the incremental and daily jobs, so no
/// incremental run can write to the local store between the daily rebuild
/// and the local clear.
///
/// With a lock file the exclusion also spans processes: `syncd` and a manual
/// `syncctl sync` take the same advisory lock in the state directory.
#[derive(Debug, Clone, Default)]
pub struct RunLock {
    inner: Arc<Mutex<()>>,
    file: Option<Arc<PathBuf>>,
}

/// Held for the duration of one job run. Owned and `'static`, so it can move
/// into a blocking task and outlive the caller that acquired it.
pub struct RunGuard {
    _file: Option<File>,
    _guard: ArcMutexGuard<RawMutex, ()>,
    job: JobKind,
    acquired: Instant,
}

impl RunLock {
    /// Lock private to this process.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock that also holds an exclusive advisory lock on `path` while taken.
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::default(),
            file: Some(Arc::new(path.into())),
        }
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref().map(PathBuf::as_path)
    }

    /// Acquire without waiting; `None` when another run holds the lock.
    pub fn try_acquire(&self, job: JobKind) -> io::Result<Option<RunGuard>> {
        let Some(guard) = self.inner.try_lock_arc() else {
            return Ok(None);
        };
        let file = match self.file() {
            None => None,
            Some(path) => match try_lock_file(path)? {
                Some(file) => Some(file),
                None => return Ok(None),
            },
        };
        Ok(Some(RunGuard::new(guard, file, job)))
    }

    /// Wait up to `timeout` for the lock.
    pub fn acquire_timeout(&self, job: JobKind, timeout: Duration) -> io::Result<Option<RunGuard>> {
        let deadline = Instant::now().checked_add(timeout);
        let Some(guard) = self.inner.try_lock_arc_for(timeout) else {
            return Ok(None);
        };
        let file = match self.file() {
            None => None,
            Some(path) => loop {
                if let Some(file) = try_lock_file(path)? {
                    break Some(file);
                }
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    return Ok(None);
                }
                std::thread::sleep(FILE_LOCK_POLL);
            },
        };
        Ok(Some(RunGuard::new(guard, file, job)))
    }

    /// Whether a run in this process holds the lock.
    pub fn is_held(&self) -> bool {
        self.inner.is_locked()
    }
}

fn try_lock_file(path: &Path) -> io::Result<Option<File>> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(Some(file)),
        Err(err) if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
            tracing::debug!(path = %path.display(), "run lock file held by another process");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

impl RunGuard {
    fn new(guard: ArcMutexGuard<RawMutex, ()>, file: Option<File>, job: JobKind) -> Self {
        tracing::debug!(job = job.as_str(), "run lock acquired");
        Self {
            _file: file,
            _guard: guard,
            job,
            acquired: Instant::now(),
        }
    }

    pub const fn job(&self) -> JobKind {
        self.job
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        tracing::debug!(
            job = self.job.as_str(),
            held_ms = self.acquired.elapsed().as_millis() as u64,
            "run lock released"
        );
    }
}
