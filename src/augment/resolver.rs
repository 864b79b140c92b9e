//! Target-coverage resolution.
//!
//! Attributes source lines to individual tests of a module by running the
//! module with each test deselected and diffing against the full module run.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;

use crate::core::progress::ProgressTracker;
use crate::core::{Error, LogContext, Result};
use crate::coverage::TestCoverage;
use crate::runner::{CachePolicy, RunRequest, TestId, TestRunner};
use crate::testmod::{group_chunks, TargetCode, TestModule};

/// Lines uniquely covered by one test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestContribution {
    pub test: String,
    pub covered: usize,
}

/// Chunks targeted by a module plus per-test attribution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedTargets {
    pub module: String,
    /// Covered lines of `base - module`.
    pub module_diff: usize,
    pub chunks: Vec<TargetCode>,
    pub contributions: Vec<TestContribution>,
}

impl ResolvedTargets {
    pub fn total_unique(&self) -> usize {
        self.contributions.iter().map(|c| c.covered).sum()
    }
}

pub struct Resolver {
    runner: Arc<dyn TestRunner>,
    source_root: PathBuf,
    stale_threshold: usize,
    log: LogContext,
}

impl Resolver {
    pub fn new(
        runner: Arc<dyn TestRunner>,
        source_root: impl Into<PathBuf>,
        stale_threshold: usize,
        log: LogContext,
    ) -> Self {
        Self {
            runner,
            source_root: source_root.into(),
            stale_threshold,
            log: log.child("resolver"),
        }
    }

    /// Resolve the chunks `module` targets relative to `base_cov`.
    pub async fn resolve(
        &self,
        module: &TestModule,
        base_cov: &TestCoverage,
    ) -> Result<ResolvedTargets> {
        let mut resolved = ResolvedTargets {
            module: module.name().to_string(),
            ..Default::default()
        };
        self.log
            .info(format!("collecting target chunks for {}", module.name()));

        let selection = module.selection();
        let module_cov = self
            .runner
            .run(RunRequest::full_suite().including(selection.clone()))
            .await?
            .coverage;

        let module_diff = base_cov - &module_cov;
        resolved.module_diff = module_diff.total_cov().covered;
        if resolved.module_diff == 0 {
            self.log
                .info(format!("no coverage difference found for {}", module.name()));
            return Ok(resolved);
        }

        let tests = module.tests();
        let progress = ProgressTracker::test_runs(tests.len(), module.name());
        let runs = tests.iter().map(|test| {
            let request = RunRequest::full_suite()
                .including(selection.clone())
                .excluding(vec![TestId::from_def(module.path(), test)])
                .with_cache(CachePolicy::Bypass);
            let runner = Arc::clone(&self.runner);
            let progress = &progress;
            async move {
                let result = runner.run(request).await;
                progress.inc();
                result
            }
        });
        // join_all preserves input order, so results pair with `tests` by position.
        let results = join_all(runs).await;
        progress.finish_and_clear();

        let mut diffs = Vec::new();
        for (test, result) in tests.iter().zip(results) {
            let single_cov = result?.coverage;
            let single_diff = &module_cov - &single_cov;
            let covered = single_diff.total_cov().covered;
            if covered == 0 {
                continue;
            }
            if covered > self.stale_threshold {
                return Err(Error::StaleRepoState {
                    test: test.qualified_name(),
                    lines: covered,
                });
            }
            resolved.contributions.push(TestContribution {
                test: test.qualified_name(),
                covered,
            });
            diffs.push(single_diff);
        }

        resolved.chunks = group_chunks(&diffs, &self.source_root, &self.log);
        self.log.info(format!(
            "{}: {} unique lines across {} chunks",
            module.name(),
            resolved.total_unique(),
            resolved.chunks.len()
        ));
        Ok(resolved)
    }

    /// Resolve and store the chunks on the module.
    pub async fn resolve_into(
        &self,
        module: &mut TestModule,
        base_cov: &TestCoverage,
    ) -> Result<ResolvedTargets> {
        let resolved = self.resolve(module, base_cov).await?;
        module.set_chunks(resolved.chunks.clone());
        Ok(resolved)
    }
}
