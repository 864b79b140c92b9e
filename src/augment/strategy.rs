//! Prompt construction and reply parsing.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::core::{Error, LogContext, Result};
use crate::parser::PythonFile;
use crate::testmod::TestModule;

use super::prompt::{estimate_tokens, Prompt, FILE_CONTENTS, TEST_CODE};
use super::Candidate;

fn python_block() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)```python\n(.*)```").expect("valid regex"))
}

/// Body of the fenced python block in `reply`, or the reply itself.
pub fn extract_python_code(reply: &str) -> &str {
    python_block()
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(reply)
}

/// How a module is presented to the model and how replies are folded back in.
pub trait AugmentStrategy: Send {
    /// Build the initial prompt for `module`.
    fn build_prompt(&mut self, module: &TestModule) -> Result<String>;

    /// Turn a reply into a candidate test file.
    fn parse_llm_response(&self, module: &TestModule, reply: &str) -> Result<Candidate>;

    /// Replace the test code section and re-render.
    fn update_prompt(&mut self, module: &TestModule, test_code: &str) -> Result<String>;
}

/// Prompts with the module's test code plus the source files it targets.
pub struct WithContextStrategy {
    source_root: PathBuf,
    budget: usize,
    prompt: Option<Prompt>,
    log: LogContext,
}

impl WithContextStrategy {
    pub fn new(source_root: impl Into<PathBuf>, budget: usize, log: LogContext) -> Self {
        Self {
            source_root: source_root.into(),
            budget,
            prompt: None,
            log: log.child("strategy"),
        }
    }

    fn overflow(&self, module: &TestModule, prompt: &Prompt, text: &str) -> Error {
        Error::ContextOverflow {
            module: module.name().to_string(),
            needed: prompt.used_tokens() + estimate_tokens(text),
            budget: self.budget,
        }
    }
}

/// Paths that look like tests: `tests/*`, `*/tests/*`, `test_*`.
fn is_test_like(path: &Path) -> bool {
    let name_is_test = path
        .file_name()
        .is_some_and(|n| n.to_string_lossy().starts_with("test_"));
    let in_tests_dir = path
        .parent()
        .and_then(Path::file_name)
        .is_some_and(|d| d == "tests");
    name_is_test || in_tests_dir
}

impl AugmentStrategy for WithContextStrategy {
    fn build_prompt(&mut self, module: &TestModule) -> Result<String> {
        let mut prompt = Prompt::augment_with_context(self.budget)?;

        let test_code = module.test_code();
        if !prompt.insert(TEST_CODE, &test_code)? {
            return Err(self.overflow(module, &prompt, &test_code));
        }

        let files = module.targeted_files();
        if files.is_empty() {
            self.log
                .warn(format!("no source files targeted by {}", module.name()));
        }
        for path in files {
            if is_test_like(&path) {
                self.log
                    .warn(format!("skipping {}: test file", path.display()));
                continue;
            }
            let source = match PythonFile::load(&self.source_root, &path) {
                Ok(file) => file,
                Err(e) => {
                    self.log
                        .warn(format!("skipping {}: {e}", path.display()));
                    continue;
                }
            };
            let section = format!("# {}\n{}", path.display(), source.source());
            if prompt.insert(FILE_CONTENTS, &section)? {
                self.log.info(format!(
                    "source context for {}: {}",
                    module.name(),
                    path.display()
                ));
            } else {
                self.log.warn(format!(
                    "{} too large to fit in prompt ({} of {} tokens left)",
                    path.display(),
                    prompt.remaining_tokens(),
                    prompt.budget()
                ));
            }
        }

        let text = prompt.render()?;
        self.prompt = Some(prompt);
        Ok(text)
    }

    fn parse_llm_response(&self, module: &TestModule, reply: &str) -> Result<Candidate> {
        let code = extract_python_code(reply);
        let file = module.with_appended(code)?;
        file.check_syntax()?;
        Ok(Candidate {
            test_path: module.path().to_path_buf(),
            contents: file.source().to_string(),
        })
    }

    fn update_prompt(&mut self, module: &TestModule, test_code: &str) -> Result<String> {
        let prompt = self
            .prompt
            .as_mut()
            .ok_or_else(|| Error::InvalidArgument("prompt has not been built".into()))?;
        if !prompt.update(TEST_CODE, test_code)? {
            let needed = prompt.used_tokens() + estimate_tokens(test_code);
            return Err(Error::ContextOverflow {
                module: module.name().to_string(),
                needed,
                budget: self.budget,
            });
        }
        self.log.debug(format!("updated test code for {}", module.name()));
        prompt.render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EventLevel, MemorySink};
    use crate::testmod::TargetCode;
    use std::sync::Arc;

    const TEST_FILE: &str = "from pkg.calc import add\n\n\nclass TestCalc:\n    def test_add(self):\n        assert add(1, 2) == 3\n";

    fn module_with_chunks(files: &[&str]) -> TestModule {
        let file = PythonFile::parse("tests/test_calc.py", TEST_FILE).unwrap();
        let mut module = TestModule::for_class(file, "TestCalc");
        module.set_chunks(
            files
                .iter()
                .map(|f| TargetCode {
                    filename: PathBuf::from(f),
                    start: 1,
                    end: 1,
                    lines: vec![],
                    func_name: None,
                    class_name: None,
                })
                .collect(),
        );
        module
    }

    fn source_root() -> tempfile::TempDir {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("pkg")).unwrap();
        std::fs::create_dir_all(temp.path().join("tests")).unwrap();
        std::fs::write(
            temp.path().join("pkg/calc.py"),
            "def add(a, b):\n    return a + b\n",
        )
        .unwrap();
        std::fs::write(temp.path().join("pkg/big.py"), "x = 1\n".repeat(8000)).unwrap();
        std::fs::write(temp.path().join("tests/helpers.py"), "HELPER = 1\n").unwrap();
        temp
    }

    #[test]
    fn test_extract_python_code() {
        let reply = "Sure!\n```python\ndef test_x(self):\n    pass\n```\nDone.";
        assert_eq!(extract_python_code(reply), "def test_x(self):\n    pass\n");
        assert_eq!(extract_python_code("def test_y(): pass"), "def test_y(): pass");
    }

    #[test]
    fn test_is_test_like() {
        assert!(is_test_like(Path::new("tests/helpers.py")));
        assert!(is_test_like(Path::new("pkg/tests/helpers.py")));
        assert!(is_test_like(Path::new("pkg/test_calc.py")));
        assert!(!is_test_like(Path::new("pkg/calc.py")));
        assert!(!is_test_like(Path::new("pkg/contest.py")));
    }

    #[test]
    fn test_build_prompt_with_context() {
        let root = source_root();
        let sink = Arc::new(MemorySink::new());
        let log = LogContext::new("test", sink.clone());
        let mut strategy = WithContextStrategy::new(root.path(), 10_000, log);
        let module = module_with_chunks(&["pkg/calc.py", "tests/helpers.py", "pkg/big.py"]);

        let prompt = strategy.build_prompt(&module).unwrap();
        assert!(prompt.contains("class TestCalc:"));
        assert!(prompt.contains("# pkg/calc.py\ndef add(a, b):"));
        assert!(!prompt.contains("HELPER"));
        assert!(!prompt.contains("# pkg/big.py"));
        assert!(sink.contains(EventLevel::Warn, "tests/helpers.py"));
        assert!(sink.contains(EventLevel::Warn, "too large"));
        assert!(sink.contains(EventLevel::Warn, "of 10000 tokens left"));
    }

    #[test]
    fn test_build_prompt_overflow() {
        let root = source_root();
        let mut strategy = WithContextStrategy::new(root.path(), 10, LogContext::default());
        let module = module_with_chunks(&[]);
        assert!(matches!(
            strategy.build_prompt(&module),
            Err(Error::ContextOverflow { budget: 10, .. })
        ));
    }

    #[test]
    fn test_parse_llm_response_appends_into_class() {
        let root = source_root();
        let strategy = WithContextStrategy::new(root.path(), 10_000, LogContext::default());
        let module = module_with_chunks(&[]);
        let reply = "```python\ndef test_add_negative(self):\n    assert add(-1, -2) == -3\n```";

        let candidate = strategy.parse_llm_response(&module, reply).unwrap();
        assert_eq!(candidate.test_path, PathBuf::from("tests/test_calc.py"));
        let file = PythonFile::parse(&candidate.test_path, candidate.contents.clone()).unwrap();
        let new = file.diff_test_funcs(module.test_file());
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].class_name.as_deref(), Some("TestCalc"));
        // The live file is untouched.
        assert_eq!(module.tests().len(), 1);
    }

    #[test]
    fn test_parse_llm_response_syntax_error() {
        let root = source_root();
        let strategy = WithContextStrategy::new(root.path(), 10_000, LogContext::default());
        let module = module_with_chunks(&[]);
        let result = strategy.parse_llm_response(&module, "def test_broken(self)\n    assert (\n");
        assert!(matches!(result, Err(Error::GeneratedSyntax(_))));
    }

    #[test]
    fn test_parse_llm_response_with_unicode_indent_does_not_panic() {
        let root = source_root();
        let strategy = WithContextStrategy::new(root.path(), 10_000, LogContext::default());
        let module = module_with_chunks(&[]);
        let reply = "```python\n\u{3000}def test_a(self):\n  \u{3000}pass\n```";
        let result = strategy.parse_llm_response(&module, reply);
        assert!(matches!(result, Ok(_) | Err(Error::GeneratedSyntax(_))));
    }

    #[test]
    fn test_update_prompt_replaces_test_code() {
        let root = source_root();
        let mut strategy = WithContextStrategy::new(root.path(), 10_000, LogContext::default());
        let module = module_with_chunks(&["pkg/calc.py"]);
        assert!(strategy.update_prompt(&module, "x").is_err());

        strategy.build_prompt(&module).unwrap();
        let updated = strategy
            .update_prompt(&module, "class TestCalc:\n    def test_sub(self):\n        pass")
            .unwrap();
        assert!(updated.contains("test_sub"));
        assert!(!updated.contains("test_add(self)"));
        assert!(updated.contains("def add(a, b):"));
    }
}
