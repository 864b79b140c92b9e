//! FIFO pool of repository checkouts.
//!
//! Each checkout is used by one test run at a time. Waiters are served in
//! arrival order, and a checkout goes back to the pool when its guard drops.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::core::{Error, Result};

struct PoolInner {
    free: Mutex<VecDeque<PathBuf>>,
    semaphore: Arc<Semaphore>,
}

/// Pool of cloned folders shared by concurrent test runs.
#[derive(Clone)]
pub struct CheckoutPool {
    inner: Arc<PoolInner>,
    capacity: usize,
}

impl std::fmt::Debug for CheckoutPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutPool")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}

impl CheckoutPool {
    /// Build a pool; every folder must exist.
    pub fn new(folders: Vec<PathBuf>) -> Result<Self> {
        if folders.is_empty() {
            return Err(Error::config(
                "no cloned folders configured; clone the repository first",
            ));
        }
        if let Some(missing) = folders.iter().find(|f| !f.is_dir()) {
            return Err(Error::config(format!(
                "cloned folder {} does not exist; delete and re-create the clone",
                missing.display()
            )));
        }
        let capacity = folders.len();
        Ok(Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(folders.into_iter().collect()),
                semaphore: Arc::new(Semaphore::new(capacity)),
            }),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }

    /// Wait for a free checkout.
    pub async fn acquire(&self) -> Result<CheckoutGuard> {
        let permit = Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| Error::config("checkout pool closed"))?;
        let path = self
            .inner
            .free
            .lock()
            .pop_front()
            .ok_or_else(|| Error::config("checkout pool is inconsistent"))?;
        tracing::debug!("acquired checkout {}", path.display());
        Ok(CheckoutGuard {
            path: Some(path),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }
}

/// Exclusive use of one checkout; returned to the pool on drop.
pub struct CheckoutGuard {
    path: Option<PathBuf>,
    pool: Arc<PoolInner>,
    // Released after the path is back in the queue (fields drop after `drop`).
    _permit: OwnedSemaphorePermit,
}

impl CheckoutGuard {
    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or(Path::new("."))
    }
}

impl Drop for CheckoutGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            tracing::debug!("released checkout {}", path.display());
            self.pool.free.lock().push_back(path);
        }
    }
}
