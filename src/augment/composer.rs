//! Drives augmentation rounds for one module.
//!
//! Each round asks the model for new tests, measures the module with its live
//! file, classifies the generated tests, and appends the ones that add
//! non-overlapping coverage to the live file before re-prompting.

use std::sync::Arc;

use crate::core::{Error, LogContext, Result};
use crate::runner::{PatchFile, RunRequest, TestRunner};
use crate::testmod::TestModule;

use super::evaluator::{filter_overlap, Evaluator};
use super::llm::LanguageModel;
use super::strategy::AugmentStrategy;
use super::{AugmentReport, Candidate, FailedTest, ImprovedTest, TestOutcome};

pub struct Composer {
    runner: Arc<dyn TestRunner>,
    model: Arc<dyn LanguageModel>,
    strategy: Box<dyn AugmentStrategy>,
    evaluator: Evaluator,
    n_times: usize,
    llm_retries: usize,
    log: LogContext,
}

impl Composer {
    pub fn new(
        runner: Arc<dyn TestRunner>,
        model: Arc<dyn LanguageModel>,
        strategy: Box<dyn AugmentStrategy>,
        log: LogContext,
    ) -> Self {
        let log = log.child("composer");
        Self {
            evaluator: Evaluator::new(Arc::clone(&runner), log.clone()),
            runner,
            model,
            strategy,
            n_times: 1,
            llm_retries: 3,
            log,
        }
    }

    pub fn rounds(mut self, n_times: usize) -> Self {
        self.n_times = n_times;
        self
    }

    pub fn retries(mut self, llm_retries: usize) -> Self {
        self.llm_retries = llm_retries.max(1);
        self
    }

    /// Run all rounds, growing `module`'s live file with accepted tests.
    pub async fn augment(&mut self, module: &mut TestModule) -> Result<AugmentReport> {
        let mut report = AugmentReport::new(module.name());
        self.augment_into(module, &mut report).await?;
        Ok(report)
    }

    /// Like [`Composer::augment`], recording into `report` as rounds complete.
    ///
    /// On error, `report` holds every completed round and its accepted tests
    /// are already in `module`'s live file.
    pub async fn augment_into(
        &mut self,
        module: &mut TestModule,
        report: &mut AugmentReport,
    ) -> Result<()> {
        self.log
            .info(format!("augmenting {} for {} rounds", module.name(), self.n_times));
        let mut prompt = self.strategy.build_prompt(module)?;
        self.log.debug(format!("prompt:\n{prompt}"));

        for round in 0..self.n_times {
            let candidate = self.generate(module, &prompt).await?;

            let module_cov = self
                .runner
                .run(
                    RunRequest::full_suite()
                        .including(module.selection())
                        .with_patch(Some(PatchFile::from_file(module.test_file()))),
                )
                .await?
                .coverage;

            let outcomes = self
                .evaluator
                .evaluate(&[candidate], module, &module_cov)
                .await?;

            let mut improved = Vec::new();
            let (mut failed, mut no_improve) = (0, 0);
            for outcome in outcomes {
                match outcome {
                    TestOutcome::Improved { func, coverage } => {
                        improved.push(ImprovedTest { func, coverage })
                    }
                    TestOutcome::Failed { func, error } => {
                        failed += 1;
                        report.failed.push(FailedTest { func, error });
                    }
                    TestOutcome::NoImprove { func } => {
                        no_improve += 1;
                        report.no_improve.push(func);
                    }
                }
            }

            let generated_improved = improved.len();
            let mut kept = Vec::new();
            for test in filter_overlap(improved, &module_cov) {
                if module.tests().iter().any(|t| t.same_identity(&test.func)) {
                    self.log.warn(format!(
                        "{} already defined in {}, not appending",
                        test.func.qualified_name(),
                        module.name()
                    ));
                    continue;
                }
                module.append_test(&test.func.code)?;
                kept.push(test);
            }
            self.log.info(format!(
                "round [{}/{}] => improved: {} (kept {}), failed: {failed}, no improve: {no_improve}",
                round + 1,
                self.n_times,
                generated_improved,
                kept.len()
            ));
            report.improved.extend(kept);
            report.rounds += 1;

            if round + 1 < self.n_times {
                prompt = self.strategy.update_prompt(module, &module.test_code())?;
            }
        }
        Ok(())
    }

    /// Ask the model until a reply parses, up to the retry limit.
    async fn generate(&self, module: &TestModule, prompt: &str) -> Result<Candidate> {
        let mut last = String::new();
        for attempt in 1..=self.llm_retries {
            let reply = self.model.complete(prompt).await?;
            match self.strategy.parse_llm_response(module, &reply) {
                Ok(candidate) => return Ok(candidate),
                Err(Error::GeneratedSyntax(message)) => {
                    self.log.warn(format!(
                        "syntax error in generated code (attempt {attempt}/{}): {message}",
                        self.llm_retries
                    ));
                    last = message;
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::GenerationExhausted {
            attempts: self.llm_retries,
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::AugmentResults;
    use crate::augment::strategy::WithContextStrategy;
    use crate::coverage::{Coverage, CoverageResult, TestCoverage, TestError};
    use crate::parser::PythonFile;
    use crate::runner::fake::FakeRunner;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    const TEST_FILE: &str =
        "class TestCalc:\n    def test_add(self):\n        assert add(1, 2) == 3\n";

    struct FakeModel {
        replies: Mutex<VecDeque<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl FakeModel {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for FakeModel {
        fn name(&self) -> &str {
            "fake"
        }

        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().push(prompt.to_string());
            self.replies
                .lock()
                .pop_front()
                .ok_or_else(|| Error::provider("no more replies"))
        }
    }

    /// Lines covered by each generated test, keyed by its definition.
    fn runner() -> Arc<FakeRunner> {
        Arc::new(FakeRunner::new(|req| {
            let patch = req.patch.as_ref().map(|p| p.contents.as_str()).unwrap_or("");
            let mut lines = vec![1, 2];
            for (def, extra) in [
                ("def test_sub", &[7u32, 8][..]),
                ("def test_dup", &[7][..]),
                ("def test_mul", &[9][..]),
            ] {
                if patch.contains(def) {
                    lines.extend_from_slice(extra);
                }
            }
            let failed = if patch.contains("def test_fail") {
                vec![TestError {
                    nodeid: "tests/test_calc.py::TestCalc::test_fail".into(),
                    class_name: Some("TestCalc".into()),
                    name: "test_fail".into(),
                    message: "AssertionError".into(),
                    is_error: false,
                }]
            } else {
                vec![]
            };
            Ok(CoverageResult::new(
                TestCoverage::new(vec![Coverage::new("pkg/calc.py", lines, Vec::<u32>::new())]),
                failed,
            ))
        }))
    }

    fn module() -> TestModule {
        TestModule::for_class(
            PythonFile::parse("tests/test_calc.py", TEST_FILE).unwrap(),
            "TestCalc",
        )
    }

    fn composer(model: Arc<FakeModel>, runner: Arc<FakeRunner>, root: &std::path::Path) -> Composer {
        Composer::new(
            runner,
            model,
            Box::new(WithContextStrategy::new(root, 10_000, LogContext::default())),
            LogContext::default(),
        )
    }

    #[tokio::test]
    async fn test_rounds_accumulate_non_overlapping_tests() {
        let temp = tempfile::tempdir().unwrap();
        let model = Arc::new(FakeModel::new(&[
            "```python\ndef test_sub(self):\n    assert sub(3, 1) == 2\n\ndef test_dup(self):\n    assert sub(1, 1) == 0\n\ndef test_fail(self):\n    assert False\n```",
            "```python\ndef test_mul(self):\n    assert mul(2, 3) == 6\n```",
        ]));
        let mut composer = composer(model.clone(), runner(), temp.path()).rounds(2);
        let mut module = module();

        let report = composer.augment(&mut module).await.unwrap();
        let improved: Vec<&str> = report.improved.iter().map(|t| t.func.name.as_str()).collect();
        assert_eq!(improved, vec!["test_sub", "test_mul"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].func.name, "test_fail");
        assert!(report.no_improve.is_empty());
        assert_eq!(report.rounds, 2);
        assert_eq!(report.total_coverage_added(), 3);
        assert_eq!(report.generated(), 3);

        let names: Vec<String> = module.tests().iter().map(|t| t.name.clone()).collect();
        assert_eq!(names, vec!["test_add", "test_sub", "test_mul"]);

        let prompts = model.prompts.lock().clone();
        assert_eq!(prompts.len(), 2);
        assert!(!prompts[0].contains("test_sub"));
        assert!(prompts[1].contains("def test_sub(self):"));
    }

    #[tokio::test]
    async fn test_redefined_test_is_appended_once() {
        let temp = tempfile::tempdir().unwrap();
        let model = Arc::new(FakeModel::new(&[
            "```python\ndef test_sub(self):\n    assert sub(3, 1) == 2\n\ndef test_sub(self):\n    assert sub(0, 0) == 0\n```",
        ]));
        let mut composer = composer(model, runner(), temp.path());
        let mut module = module();

        let report = composer.augment(&mut module).await.unwrap();
        let improved: Vec<&str> = report.improved.iter().map(|t| t.func.name.as_str()).collect();
        assert_eq!(improved, vec!["test_sub"]);
        assert_eq!(report.total_coverage_added(), 2);

        let names: Vec<String> = module.tests().iter().map(|t| t.name.clone()).collect();
        assert_eq!(names, vec!["test_add", "test_sub"]);
        assert!(module.test_file().source().contains("sub(3, 1)"));
        assert!(!module.test_file().source().contains("sub(0, 0)"));
    }

    #[tokio::test]
    async fn test_failed_round_keeps_earlier_rounds() {
        let temp = tempfile::tempdir().unwrap();
        let model = Arc::new(FakeModel::new(&[
            "```python\ndef test_sub(self):\n    assert sub(3, 1) == 2\n```",
        ]));
        let mut composer = composer(model, runner(), temp.path()).rounds(3);
        let mut module = module();
        let mut report = AugmentReport::new(module.name());

        let err = composer
            .augment_into(&mut module, &mut report)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
        assert_eq!(report.rounds, 1);
        assert_eq!(report.improved.len(), 1);
        assert!(module.test_file().find_function("test_sub", Some("TestCalc")).is_some());

        let results = AugmentResults::from_report("owner_calc", "abc", &module, &report);
        assert_eq!(results.tests.len(), 1);
        assert_eq!(results.tests[0].name, "TestCalc.test_sub");
        assert_eq!(results.tests[0].coverage_added, 2);
    }

    #[tokio::test]
    async fn test_syntax_error_consumes_a_retry() {
        let temp = tempfile::tempdir().unwrap();
        let model = Arc::new(FakeModel::new(&[
            "def test_sub(self)\n    assert (\n",
            "def test_sub(self):\n    assert sub(3, 1) == 2\n",
        ]));
        let mut composer = composer(model.clone(), runner(), temp.path());
        let mut module = module();

        let report = composer.augment(&mut module).await.unwrap();
        assert_eq!(report.improved.len(), 1);
        assert_eq!(model.prompts.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_generation_exhausted() {
        let temp = tempfile::tempdir().unwrap();
        let bad = "def test_x(self)\n    pass (\n";
        let model = Arc::new(FakeModel::new(&[bad, bad, bad, bad]));
        let mut composer = composer(model.clone(), runner(), temp.path()).retries(3);
        let mut module = module();

        let err = composer.augment(&mut module).await.unwrap_err();
        assert!(matches!(err, Error::GenerationExhausted { attempts: 3, .. }));
        assert!(err.is_skip_signal());
        assert_eq!(model.prompts.lock().len(), 3);
        assert_eq!(module.tests().len(), 1);
    }

    #[tokio::test]
    async fn test_provider_error_propagates() {
        let temp = tempfile::tempdir().unwrap();
        let model = Arc::new(FakeModel::new(&[]));
        let mut composer = composer(model, runner(), temp.path());
        let mut module = module();
        assert!(matches!(
            composer.augment(&mut module).await,
            Err(Error::Provider(_))
        ));
    }
}
