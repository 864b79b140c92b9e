//! coverage.py JSON report parsing.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;

use crate::core::{Error, Result};

use super::model::{Coverage, TestCoverage};

/// Default patterns identifying test files (relative paths).
pub const DEFAULT_TEST_PATTERNS: &[&str] = &[
    "test_*.py",
    "**/test_*.py",
    "*_test.py",
    "**/*_test.py",
    "conftest.py",
    "**/conftest.py",
];

/// Matches paths that belong to the test suite rather than the code under test.
#[derive(Debug, Clone)]
pub struct TestPathFilter {
    set: GlobSet,
}

impl Default for TestPathFilter {
    fn default() -> Self {
        let patterns: Vec<String> = DEFAULT_TEST_PATTERNS.iter().map(|s| s.to_string()).collect();
        // Default patterns are known-valid globs.
        Self::new(&patterns).unwrap_or(Self {
            set: GlobSet::empty(),
        })
    }
}

impl TestPathFilter {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern)
                .map_err(|e| Error::config(format!("invalid test pattern '{pattern}': {e}")))?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|e| Error::config(format!("invalid test patterns: {e}")))?;
        Ok(Self { set })
    }

    pub fn is_test_file(&self, path: &Path) -> bool {
        self.set.is_match(path)
    }
}

#[derive(Debug, Deserialize)]
struct CoveragePyReport {
    files: BTreeMap<String, CoveragePyFile>,
}

#[derive(Debug, Deserialize)]
struct CoveragePyFile {
    executed_lines: Vec<u32>,
    #[serde(default)]
    missing_lines: Vec<u32>,
    #[serde(default)]
    summary: Option<CoveragePySummary>,
}

#[derive(Debug, Deserialize)]
struct CoveragePySummary {
    num_statements: usize,
}

/// Parse a coverage.py JSON report, omitting test files.
pub fn parse_coverage_py(path: &Path, filter: &TestPathFilter) -> Result<TestCoverage> {
    let content = fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => Error::Io(e),
    })?;
    parse_coverage_py_str(&content, filter)
}

/// Parse coverage.py JSON from a string, omitting test files.
pub fn parse_coverage_py_str(content: &str, filter: &TestPathFilter) -> Result<TestCoverage> {
    let report: CoveragePyReport = serde_json::from_str(content)
        .map_err(|e| Error::parse("coverage.json", format!("invalid coverage.py JSON: {e}")))?;

    let cov_list = report
        .files
        .into_iter()
        .map(|(name, file)| (normalize(&name), file))
        .filter(|(name, _)| !filter.is_test_file(name))
        .map(|(name, file)| {
            let cov = Coverage::new(name, file.executed_lines, file.missing_lines);
            match file.summary {
                Some(summary) => cov.with_stmts(summary.num_statements),
                None => cov,
            }
        })
        .collect();

    Ok(TestCoverage::new(cov_list))
}

fn normalize(name: &str) -> PathBuf {
    PathBuf::from(name.replace('\\', "/"))
}
