//! Test runner abstraction and its pytest implementation.
//!
//! A runner executes (a subset of) the test suite in one of the repository
//! checkouts, optionally with a single file replaced in memory, and reports
//! per-file line coverage plus failed tests.

pub mod cache;
#[cfg(test)]
pub(crate) mod fake;
mod guard;
mod pool;
mod pytest;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::Result;
use crate::coverage::CoverageResult;
use crate::parser::{FunctionDef, PythonFile};

pub use cache::{cache_key, CachedRunner, RunCache};
pub use guard::{atomic_write, PatchGuard};
pub use pool::{CheckoutGuard, CheckoutPool};
pub use pytest::PytestRunner;

/// Identity of one test function.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TestId {
    /// Test file relative to the repository root.
    pub file: PathBuf,
    pub class_name: Option<String>,
    pub name: String,
}

impl TestId {
    pub fn new(file: impl Into<PathBuf>, class_name: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            class_name: class_name.map(str::to_string),
            name: name.into(),
        }
    }

    pub fn from_def(file: impl Into<PathBuf>, def: &FunctionDef) -> Self {
        Self::new(file, def.class_name.as_deref(), def.name.clone())
    }

    /// pytest node id, e.g. `tests/test_a.py::TestA::test_x`.
    pub fn node_id(&self) -> String {
        let file = self.file.to_string_lossy().replace('\\', "/");
        match &self.class_name {
            Some(cls) => format!("{file}::{cls}::{}", self.name),
            None => format!("{file}::{}", self.name),
        }
    }

    /// `Class.test` or `test`.
    pub fn qualified_name(&self) -> String {
        match &self.class_name {
            Some(cls) => format!("{cls}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// Tests to include in a run, as pytest node ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSelection {
    pub targets: Vec<String>,
}

impl TestSelection {
    pub fn new(mut targets: Vec<String>) -> Self {
        targets.sort();
        targets.dedup();
        Self { targets }
    }

    /// Every test of a class.
    pub fn class(file: &std::path::Path, class_name: &str) -> Self {
        let file = file.to_string_lossy().replace('\\', "/");
        Self::new(vec![format!("{file}::{class_name}")])
    }

    /// Module-level test functions of `file` as currently written.
    pub fn module_functions(file: &PythonFile) -> Self {
        Self::new(
            file.test_functions()
                .iter()
                .filter(|f| f.class_name.is_none())
                .map(|f| f.node_id(file.path()))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// In-memory replacement for one file of the checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchFile {
    /// Path relative to the checkout root.
    pub path: PathBuf,
    pub contents: String,
}

impl PatchFile {
    pub fn new(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }

    pub fn from_file(file: &PythonFile) -> Self {
        Self::new(file.path(), file.source())
    }

    pub fn content_hash(&self) -> String {
        blake3::hash(self.contents.as_bytes()).to_hex().to_string()
    }
}

/// How a run interacts with the result cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Return a cached result when present, store otherwise.
    #[default]
    Use,
    /// Neither read nor write the cache.
    Bypass,
    /// Drop any cached entry, run, and store the fresh result.
    Refresh,
}

/// Parameters of one test-suite invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    pub exclude: Vec<TestId>,
    pub include: Option<TestSelection>,
    pub patch: Option<PatchFile>,
    pub cache: CachePolicy,
}

impl RunRequest {
    pub fn full_suite() -> Self {
        Self::default()
    }

    pub fn including(mut self, selection: TestSelection) -> Self {
        self.include = Some(selection);
        self
    }

    pub fn excluding(mut self, tests: Vec<TestId>) -> Self {
        self.exclude = tests;
        self
    }

    pub fn with_patch(mut self, patch: Option<PatchFile>) -> Self {
        self.patch = patch;
        self
    }

    pub fn with_cache(mut self, policy: CachePolicy) -> Self {
        self.cache = policy;
        self
    }
}

/// Something that can run the test suite and measure coverage.
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Repository identity, used in cache keys.
    fn repo_name(&self) -> &str;

    async fn run(&self, request: RunRequest) -> Result<CoverageResult>;
}

#[async_trait]
impl<T: TestRunner + ?Sized> TestRunner for Arc<T> {
    fn repo_name(&self) -> &str {
        (**self).repo_name()
    }

    async fn run(&self, request: RunRequest) -> Result<CoverageResult> {
        (**self).run(request).await
    }
}
