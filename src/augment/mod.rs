//! LLM-driven test augmentation.
//!
//! The [`resolver`] finds source chunks uniquely covered by a module's tests,
//! the [`strategy`] turns a module into a prompt and LLM replies into candidate
//! files, the [`evaluator`] classifies each new test, and the [`composer`]
//! drives rounds and commits accepted tests to the live file.

pub mod composer;
pub mod evaluator;
pub mod llm;
pub mod prompt;
pub mod resolver;
pub mod strategy;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::coverage::{TestCoverage, TestError};
use crate::parser::FunctionDef;

pub use composer::Composer;
pub use evaluator::{filter_overlap, Evaluator};
pub use llm::{LanguageModel, OpenAiChat};
pub use prompt::{estimate_tokens, Prompt};
pub use resolver::{ResolvedTargets, Resolver};
pub use strategy::{extract_python_code, AugmentStrategy, WithContextStrategy};

/// Full test-file text produced from one LLM reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub test_path: PathBuf,
    pub contents: String,
}

/// Classification of one generated test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    /// Passed and covered lines the module did not.
    Improved {
        func: FunctionDef,
        coverage: TestCoverage,
    },
    /// Failed or errored when run.
    Failed { func: FunctionDef, error: TestError },
    /// Passed without adding coverage.
    NoImprove { func: FunctionDef },
}

/// A generated test that increased coverage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImprovedTest {
    pub func: FunctionDef,
    pub coverage: TestCoverage,
}

impl ImprovedTest {
    pub fn coverage_added(&self) -> usize {
        self.coverage.total_cov().covered
    }
}

/// A generated test that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTest {
    pub func: FunctionDef,
    pub error: TestError,
}

/// Outcome of augmenting one module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AugmentReport {
    pub module: String,
    pub improved: Vec<ImprovedTest>,
    pub failed: Vec<FailedTest>,
    pub no_improve: Vec<FunctionDef>,
    pub rounds: usize,
}

impl AugmentReport {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            ..Default::default()
        }
    }

    pub fn total_coverage_added(&self) -> usize {
        self.improved.iter().map(ImprovedTest::coverage_added).sum()
    }

    /// Recorded tests: kept, failed and no-improvement. Tests dropped for
    /// overlapping coverage are not counted.
    pub fn generated(&self) -> usize {
        self.improved.len() + self.failed.len() + self.no_improve.len()
    }
}
