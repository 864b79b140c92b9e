//! pytest + pytest-cov runner.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command as AsyncCommand;
use tokio::time::timeout;

use crate::config::Config;
use crate::core::{Error, LogContext, Result};
use crate::coverage::{parse_coverage_py, CoverageResult, TestPathFilter};

use super::guard::PatchGuard;
use super::pool::CheckoutPool;
use super::{RunRequest, TestRunner};

/// Report file written by `--cov-report json` in the working directory.
const COVERAGE_REPORT: &str = "coverage.json";

/// Runs pytest with coverage in a pool of checkouts.
pub struct PytestRunner {
    repo_name: String,
    interpreter: PathBuf,
    test_folder: PathBuf,
    cov_folders: Vec<PathBuf>,
    pythonpath: Option<String>,
    timeout: Duration,
    pool: CheckoutPool,
    filter: TestPathFilter,
    log: LogContext,
}

impl std::fmt::Debug for PytestRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PytestRunner")
            .field("repo_name", &self.repo_name)
            .field("interpreter", &self.interpreter)
            .field("test_folder", &self.test_folder)
            .field("cov_folders", &self.cov_folders)
            .field("timeout", &self.timeout)
            .field("pool", &self.pool)
            .finish()
    }
}

impl PytestRunner {
    pub fn new(config: &Config, log: LogContext) -> Result<Self> {
        Ok(Self {
            repo_name: config.repo.name.clone(),
            interpreter: config.python.interpreter.clone(),
            test_folder: config.python.test_folder.clone(),
            cov_folders: config.python.cov_folders.clone(),
            pythonpath: config.python.pythonpath.clone(),
            timeout: Duration::from_secs(config.runner.timeout_secs),
            pool: CheckoutPool::new(config.repo.cloned_folders.clone())?,
            filter: TestPathFilter::new(&config.repo.test_patterns)?,
            log: log.child("runner"),
        })
    }

    pub fn pool(&self) -> &CheckoutPool {
        &self.pool
    }

    /// Arguments passed to the interpreter for `request`.
    pub fn build_args(&self, request: &RunRequest) -> Vec<String> {
        let mut args: Vec<String> = vec!["-m".into(), "pytest".into()];

        match &request.include {
            Some(selection) if !selection.is_empty() => {
                args.extend(selection.targets.iter().cloned());
            }
            _ => args.push(path_arg(&self.test_folder)),
        }

        args.extend(["--tb", "short", "-rfE"].map(String::from));

        let mut excluded: Vec<String> = request.exclude.iter().map(|t| t.node_id()).collect();
        excluded.sort();
        excluded.dedup();
        for node_id in excluded {
            args.push(format!("--deselect={node_id}"));
        }

        args.extend(["--color", "no"].map(String::from));
        for folder in &self.cov_folders {
            args.push(format!("--cov={}", path_arg(folder)));
        }
        args.extend(
            [
                "--cov-report",
                "json",
                "--continue-on-collection-errors",
                "--disable-warnings",
                "-p",
                "no:cacheprovider",
            ]
            .map(String::from),
        );
        args
    }

    async fn run_in(&self, checkout: &Path, request: &RunRequest) -> Result<CoverageResult> {
        let _patch = match &request.patch {
            Some(patch) => {
                self.log
                    .debug(format!("patching {}", patch.path.display()));
                Some(PatchGuard::apply(
                    checkout.join(&patch.path),
                    patch.contents.as_bytes(),
                )?)
            }
            None => None,
        };

        let report = checkout.join(COVERAGE_REPORT);
        match std::fs::remove_file(&report) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }

        let args = self.build_args(request);
        self.log.debug(format!(
            "{} {} (in {})",
            self.interpreter.display(),
            args.join(" "),
            checkout.display()
        ));

        let mut cmd = AsyncCommand::new(&self.interpreter);
        cmd.args(&args)
            .current_dir(checkout)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(pythonpath) = &self.pythonpath {
            cmd.env("PYTHONPATH", pythonpath);
        }

        let output = match timeout(self.timeout, cmd.output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::TestSuite {
                    stderr: format!("test run timed out after {}s", self.timeout.as_secs()),
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let coverage = match parse_coverage_py(&report, &self.filter) {
            Ok(coverage) => coverage,
            Err(Error::FileNotFound { .. }) => {
                self.log.error(format!(
                    "no coverage report produced (exit status {})",
                    output.status
                ));
                let mut detail = stderr.trim().to_string();
                if detail.is_empty() {
                    detail = tail(&stdout, 40);
                }
                return Err(Error::TestSuite { stderr: detail });
            }
            Err(e) => return Err(e),
        };

        let result = CoverageResult::from_output(coverage, &stdout);
        if result.has_failures() {
            self.log
                .debug(format!("{} failing tests", result.failed.len()));
        }
        Ok(result)
    }
}

#[async_trait]
impl TestRunner for PytestRunner {
    fn repo_name(&self) -> &str {
        &self.repo_name
    }

    async fn run(&self, request: RunRequest) -> Result<CoverageResult> {
        let checkout = self.pool.acquire().await?;
        self.run_in(checkout.path(), &request).await
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
