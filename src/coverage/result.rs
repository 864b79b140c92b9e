//! Outcome of a single test-suite invocation.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::model::TestCoverage;

fn summary_line() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(FAILED|ERROR)\s+(\S+?)(?:\s+-\s+(.*))?$").expect("valid regex")
    })
}

/// A test that failed or errored during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestError {
    /// Full pytest node id, e.g. `tests/test_a.py::TestA::test_x`.
    pub nodeid: String,
    pub class_name: Option<String>,
    /// Function name without parametrization suffix.
    pub name: String,
    pub message: String,
    /// Collection/setup error rather than an assertion failure.
    pub is_error: bool,
}

impl TestError {
    fn from_nodeid(nodeid: &str, message: &str, is_error: bool) -> Option<Self> {
        let mut parts = nodeid.split("::");
        let _file = parts.next()?;
        let rest: Vec<&str> = parts.collect();
        let (class_name, func) = match rest.as_slice() {
            [] => return None,
            [func] => (None, *func),
            [.., class, func] => (Some(class.to_string()), *func),
        };
        let name = func.split('[').next().unwrap_or(func).to_string();
        Some(Self {
            nodeid: nodeid.to_string(),
            class_name,
            name,
            message: message.to_string(),
            is_error,
        })
    }
}

/// Coverage plus failure information of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageResult {
    pub coverage: TestCoverage,
    pub failed: Vec<TestError>,
}

impl CoverageResult {
    pub fn new(coverage: TestCoverage, failed: Vec<TestError>) -> Self {
        Self { coverage, failed }
    }

    /// Build from coverage and the runner's stdout.
    pub fn from_output(coverage: TestCoverage, stdout: &str) -> Self {
        Self {
            coverage,
            failed: parse_failures(stdout),
        }
    }

    /// Failure entry for the named test, if it failed.
    pub fn get_failed(&self, class_name: Option<&str>, name: &str) -> Option<&TestError> {
        self.failed.iter().find(|e| {
            e.name == name
                && match class_name {
                    Some(cls) => e.class_name.as_deref() == Some(cls),
                    None => true,
                }
        })
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Extract `FAILED`/`ERROR` entries from pytest's short test summary.
pub fn parse_failures(stdout: &str) -> Vec<TestError> {
    stdout
        .lines()
        .filter_map(|line| {
            let caps = summary_line().captures(line.trim_end())?;
            let is_error = &caps[1] == "ERROR";
            let message = caps.get(3).map(|m| m.as_str()).unwrap_or("");
            TestError::from_nodeid(&caps[2], message, is_error)
        })
        .collect()
}
