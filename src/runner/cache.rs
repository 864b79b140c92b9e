//! Content-addressed cache of test-run results.
//!
//! Keys are derived from the repository name, the sorted include and exclude
//! sets, and a hash of the patch contents, so identical requests map to the
//! same entry no matter how their lists were ordered.

use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::core::{Error, LogContext, Result};
use crate::coverage::CoverageResult;

use super::{CachePolicy, RunRequest, TestRunner};

#[derive(Serialize)]
struct KeyMaterial<'a> {
    repo: &'a str,
    include: Vec<&'a str>,
    exclude: Vec<String>,
    patch: Option<(String, String)>,
}

/// Stable cache key for a request against `repo`.
pub fn cache_key(repo: &str, request: &RunRequest) -> Result<String> {
    let mut include: Vec<&str> = request
        .include
        .iter()
        .flat_map(|s| s.targets.iter().map(String::as_str))
        .collect();
    include.sort_unstable();
    include.dedup();

    let mut exclude: Vec<String> = request.exclude.iter().map(|t| t.node_id()).collect();
    exclude.sort_unstable();
    exclude.dedup();

    let material = KeyMaterial {
        repo,
        include,
        exclude,
        patch: request.patch.as_ref().map(|p| {
            (
                p.path.to_string_lossy().replace('\\', "/"),
                p.content_hash(),
            )
        }),
    };
    let canonical = serde_json::to_vec(&material)?;
    Ok(blake3::hash(&canonical).to_hex().to_string())
}

/// SQLite-backed result store.
pub struct RunCache {
    conn: Mutex<Connection>,
}

impl RunCache {
    /// Open (or create) the cache database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| Error::Cache(format!("failed to open {}: {e}", path.display())))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        Self::init(conn)
    }

    /// Cache that lives only as long as the process.
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS test_cache (
                hash TEXT PRIMARY KEY,
                result BLOB NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn get(&self, key: &str) -> Result<Option<CoverageResult>> {
        let blob: Option<Vec<u8>> = self
            .conn
            .lock()
            .query_row(
                "SELECT result FROM test_cache WHERE hash = ?1",
                rusqlite::params![key],
                |row| row.get(0),
            )
            .optional()?;
        match blob {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put(&self, key: &str, result: &CoverageResult) -> Result<()> {
        let bytes = serde_json::to_vec(result)?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO test_cache (hash, result) VALUES (?1, ?2)",
            rusqlite::params![key, bytes],
        )?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<bool> {
        let n = self.conn.lock().execute(
            "DELETE FROM test_cache WHERE hash = ?1",
            rusqlite::params![key],
        )?;
        Ok(n > 0)
    }

    /// Drop every entry; returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        Ok(self.conn.lock().execute("DELETE FROM test_cache", [])?)
    }

    pub fn len(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM test_cache", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Runner decorator that consults a [`RunCache`] according to each request's policy.
pub struct CachedRunner<R> {
    inner: R,
    cache: RunCache,
    log: LogContext,
}

impl<R: TestRunner> CachedRunner<R> {
    pub fn new(inner: R, cache: RunCache, log: LogContext) -> Self {
        Self {
            inner,
            cache,
            log: log.child("cache"),
        }
    }

    pub fn cache(&self) -> &RunCache {
        &self.cache
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

#[async_trait]
impl<R: TestRunner> TestRunner for CachedRunner<R> {
    fn repo_name(&self) -> &str {
        self.inner.repo_name()
    }

    async fn run(&self, request: RunRequest) -> Result<CoverageResult> {
        let policy = request.cache;
        if policy == CachePolicy::Bypass {
            return self.inner.run(request).await;
        }

        let key = cache_key(self.inner.repo_name(), &request)?;
        match policy {
            CachePolicy::Use => {
                if let Some(hit) = self.cache.get(&key)? {
                    self.log.debug(format!("cache hit {}", &key[..12]));
                    return Ok(hit);
                }
            }
            CachePolicy::Refresh => {
                self.cache.remove(&key)?;
            }
            CachePolicy::Bypass => {}
        }

        let result = self.inner.run(request).await?;
        self.cache.put(&key, &result)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::{Coverage, TestCoverage};
    use crate::runner::{PatchFile, TestId, TestSelection};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingRunner {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TestRunner for CountingRunner {
        fn repo_name(&self) -> &str {
            "calc"
        }

        async fn run(&self, _request: RunRequest) -> Result<CoverageResult> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as u32;
            Ok(CoverageResult::new(
                TestCoverage::new(vec![Coverage::new("pkg/calc.py", [1, 2, n + 3], Vec::<u32>::new())]),
                vec![],
            ))
        }
    }

    fn cached() -> (CachedRunner<CountingRunner>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = CachedRunner::new(
            CountingRunner {
                calls: Arc::clone(&calls),
            },
            RunCache::in_memory().unwrap(),
            LogContext::default(),
        );
        (runner, calls)
    }

    #[test]
    fn test_key_ignores_order() {
        let a = RunRequest::full_suite().excluding(vec![
            TestId::new("t.py", None, "test_a"),
            TestId::new("t.py", None, "test_b"),
        ]);
        let b = RunRequest::full_suite().excluding(vec![
            TestId::new("t.py", None, "test_b"),
            TestId::new("t.py", None, "test_a"),
        ]);
        assert_eq!(cache_key("r", &a).unwrap(), cache_key("r", &b).unwrap());
        assert_ne!(cache_key("r", &a).unwrap(), cache_key("other", &a).unwrap());
    }

    #[test]
    fn test_key_depends_on_patch_and_include() {
        let base = RunRequest::full_suite();
        let patched = base
            .clone()
            .with_patch(Some(PatchFile::new("t.py", "def test_x(): pass\n")));
        let patched2 = base
            .clone()
            .with_patch(Some(PatchFile::new("t.py", "def test_y(): pass\n")));
        let included = base
            .clone()
            .including(TestSelection::new(vec!["t.py::test_x".into()]));

        let keys = [
            cache_key("r", &base).unwrap(),
            cache_key("r", &patched).unwrap(),
            cache_key("r", &patched2).unwrap(),
            cache_key("r", &included).unwrap(),
        ];
        for i in 0..keys.len() {
            for j in (i + 1)..keys.len() {
                assert_ne!(keys[i], keys[j]);
            }
        }
    }

    #[test]
    fn test_cache_roundtrip_and_clear() {
        let cache = RunCache::in_memory().unwrap();
        let result = CoverageResult::default();
        assert!(cache.get("k").unwrap().is_none());
        cache.put("k", &result).unwrap();
        assert_eq!(cache.get("k").unwrap(), Some(result));
        assert_eq!(cache.len().unwrap(), 1);
        assert_eq!(cache.clear().unwrap(), 1);
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn test_cache_persists_on_disk() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nested").join("runs.db");
        {
            let cache = RunCache::open(&path).unwrap();
            cache.put("k", &CoverageResult::default()).unwrap();
        }
        let cache = RunCache::open(&path).unwrap();
        assert!(cache.get("k").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_use_policy_is_idempotent() {
        let (runner, calls) = cached();
        let first = runner.run(RunRequest::full_suite()).await.unwrap();
        let second = runner.run(RunRequest::full_suite()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bypass_never_touches_cache() {
        let (runner, calls) = cached();
        let req = RunRequest::full_suite().with_cache(CachePolicy::Bypass);
        runner.run(req.clone()).await.unwrap();
        runner.run(req).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(runner.cache().is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_refresh_replaces_entry() {
        let (runner, calls) = cached();
        let first = runner.run(RunRequest::full_suite()).await.unwrap();
        let refreshed = runner
            .run(RunRequest::full_suite().with_cache(CachePolicy::Refresh))
            .await
            .unwrap();
        assert_ne!(first, refreshed);
        let again = runner.run(RunRequest::full_suite()).await.unwrap();
        assert_eq!(again, refreshed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
