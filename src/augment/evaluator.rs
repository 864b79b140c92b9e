//! Classifies generated tests by running each one on its own.

use std::sync::Arc;

use crate::core::{LogContext, Result};
use crate::coverage::TestCoverage;
use crate::parser::{FunctionDef, PythonFile};
use crate::runner::{PatchFile, RunRequest, TestRunner};
use crate::testmod::TestModule;

use super::{Candidate, ImprovedTest, TestOutcome};

pub struct Evaluator {
    runner: Arc<dyn TestRunner>,
    log: LogContext,
}

impl Evaluator {
    pub fn new(runner: Arc<dyn TestRunner>, log: LogContext) -> Self {
        Self {
            runner,
            log: log.child("evaluator"),
        }
    }

    /// Classify every new test in `candidates` against the module's live file.
    ///
    /// Each new test runs alone on top of the live file, scoped to the module.
    pub async fn evaluate(
        &self,
        candidates: &[Candidate],
        module: &TestModule,
        module_cov: &TestCoverage,
    ) -> Result<Vec<TestOutcome>> {
        let mut outcomes = Vec::new();
        for candidate in candidates {
            let file = PythonFile::parse(&candidate.test_path, candidate.contents.clone())?;
            let mut new_funcs: Vec<FunctionDef> = Vec::new();
            for func in file.diff_test_funcs(module.test_file()) {
                if new_funcs.iter().any(|f| f.same_identity(&func)) {
                    self.log
                        .warn(format!("ignoring redefinition of {}", func.qualified_name()));
                    continue;
                }
                new_funcs.push(func);
            }
            self.log.info(format!(
                "{} new test functions for {}",
                new_funcs.len(),
                module.name()
            ));

            for func in new_funcs {
                let patched = module.with_appended(&func.code)?;
                let request = RunRequest::full_suite()
                    .including(module.selection_for(&patched))
                    .with_patch(Some(PatchFile::from_file(&patched)));
                let result = self.runner.run(request).await?;

                if let Some(error) = result.get_failed(func.class_name.as_deref(), &func.name) {
                    self.log.info(format!("[FAILED] {}", func.qualified_name()));
                    self.log.debug(format!("failed code:\n{}", func.code));
                    outcomes.push(TestOutcome::Failed {
                        error: error.clone(),
                        func,
                    });
                    continue;
                }

                let improvement = &result.coverage - module_cov;
                if improvement.total_cov().covered > 0 {
                    self.log.info(format!(
                        "[IMPROVE] {} (+{} lines)",
                        func.qualified_name(),
                        improvement.total_cov().covered
                    ));
                    outcomes.push(TestOutcome::Improved {
                        func,
                        coverage: improvement,
                    });
                } else {
                    self.log.info(format!("[NOIMPROVE] {}", func.qualified_name()));
                    outcomes.push(TestOutcome::NoImprove { func });
                }
            }
        }
        Ok(outcomes)
    }
}

/// Keep improved tests that still add lines once earlier ones are counted.
///
/// Coverage is folded in order starting from `module_cov`, so the first test
/// to cover a line wins.
pub fn filter_overlap(tests: Vec<ImprovedTest>, module_cov: &TestCoverage) -> Vec<ImprovedTest> {
    let mut running = module_cov.clone();
    let mut kept = Vec::new();
    for test in tests {
        let combined = &running + &test.coverage;
        if combined.total_cov().covered > running.total_cov().covered {
            running = combined;
            kept.push(test);
        }
    }
    kept
}
