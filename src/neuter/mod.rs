//! Neutering: deliberately removing tests to open a known coverage gap.
//!
//! Each module loses its first tests in declaration order. The mutated test
//! file is written once per module, and only when the removal costs coverage.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{NeuterConfig, NeuterMode};
use crate::core::progress::ProgressTracker;
use crate::core::{Error, LogContext, Result};
use crate::coverage::TestCoverage;
use crate::git::{neuter_commit_message, GitRepo};
use crate::parser::PythonFile;
use crate::runner::{atomic_write, PatchFile, RunRequest, TestRunner};
use crate::testmod::TestModule;

/// File name of the repository-wide summary.
pub const SUMMARY_FILE: &str = "neuter_summary.json";

/// Number of tests to remove from a module with `total` tests.
///
/// Exactly one of `keep`/`delete` may be nonzero. The last test is never removed.
pub fn num_delete(total: usize, keep: usize, delete: usize) -> Result<usize> {
    let mode = NeuterConfig {
        keep,
        delete,
        ..Default::default()
    }
    .mode()?;
    Ok(count_for(total, mode))
}

fn count_for(total: usize, mode: NeuterMode) -> usize {
    match mode {
        NeuterMode::Keep(keep) => total.saturating_sub(keep),
        NeuterMode::Delete(delete) => delete.min(total.saturating_sub(1)),
    }
}

/// A test deleted during neutering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedTest {
    pub name: String,
    pub code: String,
    /// Covered lines lost when this test alone was removed.
    pub coverage_lost: Option<usize>,
}

/// Outcome of neutering one module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeuterReport {
    pub module: String,
    pub path: PathBuf,
    pub removed: Vec<RemovedTest>,
    pub remaining: usize,
    /// Covered lines lost by the module as a whole.
    pub coverage_lost: usize,
}

/// A module that was left untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedModule {
    pub module: String,
    pub reason: String,
}

/// Repository-wide neutering results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NeuterSummary {
    pub modules: Vec<NeuterReport>,
    pub skipped: Vec<SkippedModule>,
    pub failed: Vec<SkippedModule>,
    pub total_deleted: usize,
    pub commit: Option<String>,
}

impl NeuterSummary {
    /// Tests removed per file, for commit messages.
    pub fn removed_by_file(&self) -> Vec<(PathBuf, Vec<String>)> {
        let mut by_file: Vec<(PathBuf, Vec<String>)> = Vec::new();
        for report in &self.modules {
            let names = report.removed.iter().map(|r| r.name.clone());
            match by_file.iter_mut().find(|(path, _)| *path == report.path) {
                Some((_, existing)) => existing.extend(names),
                None => by_file.push((report.path.clone(), names.collect())),
            }
        }
        by_file
    }

    /// Write the summary as JSON into `dir`.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(SUMMARY_FILE);
        let json = serde_json::to_string_pretty(self)?;
        atomic_write(&path, json.as_bytes())?;
        Ok(path)
    }
}

pub struct Neuterer {
    runner: Arc<dyn TestRunner>,
    config: NeuterConfig,
    source_root: PathBuf,
    log: LogContext,
}

impl Neuterer {
    pub fn new(
        runner: Arc<dyn TestRunner>,
        config: NeuterConfig,
        source_root: impl Into<PathBuf>,
        log: LogContext,
    ) -> Self {
        Self {
            runner,
            config,
            source_root: source_root.into(),
            log: log.child("neuter"),
        }
    }

    /// Neuter one module and write its test file.
    pub async fn neuter_module(&self, module: &mut TestModule) -> Result<NeuterReport> {
        let count = count_for(module.tests().len(), self.config.mode()?);
        self.neuter_count(module, count).await
    }

    async fn neuter_count(&self, module: &mut TestModule, count: usize) -> Result<NeuterReport> {
        if count < self.config.min_delete {
            return Err(Error::NothingToDelete {
                module: module.name().to_string(),
                count,
                min: self.config.min_delete,
            });
        }

        let mut file = module.test_file().clone();
        let before = self.measure(module, &file).await?;
        let targets: Vec<_> = module.tests().into_iter().take(count).collect();

        let mut removed = Vec::with_capacity(targets.len());
        let mut current = before.clone();
        for test in targets {
            let class_name = test.class_name.clone();
            file.delete_function(&test.name, class_name.as_deref())?;
            let coverage_lost = if self.config.attribute_per_test {
                let after = self.measure(module, &file).await?;
                let lost = (&current - &after).total_cov().covered;
                current = after;
                Some(lost)
            } else {
                None
            };
            self.log
                .debug(format!("removed {} from {}", test.qualified_name(), module.name()));
            removed.push(RemovedTest {
                name: test.qualified_name(),
                code: test.code,
                coverage_lost,
            });
        }

        let after = if self.config.attribute_per_test {
            current
        } else {
            self.measure(module, &file).await?
        };
        let coverage_lost = (&before - &after).total_cov().covered;
        if coverage_lost == 0 {
            return Err(Error::NoCoverageDiff {
                module: module.name().to_string(),
            });
        }

        module.set_test_file(file)?;
        module.write(&self.source_root)?;
        self.log.info(format!(
            "deleted {} tests from {} (-{coverage_lost} lines)",
            removed.len(),
            module.name()
        ));
        Ok(NeuterReport {
            module: module.name().to_string(),
            path: module.path().to_path_buf(),
            remaining: module.tests().len(),
            removed,
            coverage_lost,
        })
    }

    async fn measure(&self, module: &TestModule, file: &PythonFile) -> Result<TestCoverage> {
        let request = RunRequest::full_suite()
            .including(module.selection_for(file))
            .with_patch(Some(PatchFile::from_file(file)));
        Ok(self.runner.run(request).await?.coverage)
    }

    /// Neuter every module in order, honoring `max_total_delete`.
    ///
    /// Skip signals and per-module failures are recorded and the batch
    /// continues; configuration and stale-state errors abort it.
    pub async fn neuter_repo(&self, modules: Vec<TestModule>) -> Result<NeuterSummary> {
        let mode = self.config.mode()?;
        let mut summary = NeuterSummary::default();
        // Modules sharing a file must see each other's deletions.
        let mut latest: HashMap<PathBuf, PythonFile> = HashMap::new();
        let progress = ProgressTracker::modules(modules.len(), "neuter");

        for mut module in modules {
            progress.set_message(module.name().to_string());
            let mut count = count_for(module.tests().len(), mode);
            if let Some(max) = self.config.max_total_delete {
                let left = max.saturating_sub(summary.total_deleted);
                if left == 0 {
                    self.log.info(format!("reached max_total_delete of {max}"));
                    break;
                }
                count = count.min(left);
            }
            if let Some(file) = latest.get(module.path()) {
                module.set_test_file(file.clone())?;
                count = count.min(module.tests().len().saturating_sub(1));
            }

            match self.neuter_count(&mut module, count).await {
                Ok(report) => {
                    summary.total_deleted += report.removed.len();
                    latest.insert(module.path().to_path_buf(), module.test_file().clone());
                    summary.modules.push(report);
                }
                Err(e) if e.is_skip_signal() => {
                    self.log.warn(format!("skipping {}: {e}", module.name()));
                    summary.skipped.push(SkippedModule {
                        module: module.name().to_string(),
                        reason: e.to_string(),
                    });
                }
                Err(e) if e.is_fatal_for_batch() => {
                    progress.finish_and_clear();
                    return Err(e);
                }
                Err(e) => {
                    self.log.error(format!("failed to neuter {}: {e}", module.name()));
                    summary.failed.push(SkippedModule {
                        module: module.name().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
            progress.inc();
        }
        progress.finish_and_clear();

        if self.config.commit && summary.total_deleted > 0 {
            let removed = summary.removed_by_file();
            let message = neuter_commit_message(&removed);
            let paths: Vec<PathBuf> = removed
                .iter()
                .map(|(path, _)| self.source_root.join(path))
                .collect();
            let sha = GitRepo::open(&self.source_root)?.commit_paths(&paths, &message)?;
            self.log.info(format!("committed neutered tests as {sha}"));
            summary.commit = Some(sha);
        }
        Ok(summary)
    }
}
