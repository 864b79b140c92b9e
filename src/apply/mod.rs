//! Augmentation results files and applying them to a checkout.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::augment::AugmentReport;
use crate::core::{Error, Result};
use crate::git::GitRepo;
use crate::parser::PythonFile;
use crate::runner::atomic_write;
use crate::testmod::TestModule;

/// One accepted test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub coverage_added: usize,
    pub code: String,
}

/// Accepted tests of one module, pinned to the commit they were generated on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AugmentResults {
    pub repo_name: String,
    pub git_hash: String,
    /// Module id: `path` or `path::Class`.
    pub module: String,
    pub tests: Vec<TestCase>,
    pub generated_at: DateTime<Utc>,
}

impl AugmentResults {
    pub fn from_report(
        repo_name: impl Into<String>,
        git_hash: impl Into<String>,
        module: &TestModule,
        report: &AugmentReport,
    ) -> Self {
        Self {
            repo_name: repo_name.into(),
            git_hash: git_hash.into(),
            module: module.id(),
            tests: report
                .improved
                .iter()
                .map(|t| TestCase {
                    name: t.func.qualified_name(),
                    coverage_added: t.coverage_added(),
                    code: t.func.code.clone(),
                })
                .collect(),
            generated_at: Utc::now(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::FileNotFound {
                path: path.to_path_buf(),
            },
            _ => Error::Io(e),
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save under `dir` with a name derived from the module id.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(results_file_name(&self.module));
        atomic_write(&path, serde_json::to_string_pretty(self)?.as_bytes())?;
        Ok(path)
    }

    /// Test file and optional class named by the module id.
    pub fn target(&self) -> (PathBuf, Option<&str>) {
        match self.module.split_once("::") {
            Some((path, cls)) => (PathBuf::from(path), Some(cls)),
            None => (PathBuf::from(&self.module), None),
        }
    }
}

/// `tests/test_a.py::TestA` becomes `tests_test_a_py__TestA.json`.
pub fn results_file_name(module_id: &str) -> String {
    let stem: String = module_id
        .replace("::", "__")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    format!("{stem}.json")
}

/// Result of applying one results file.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    pub module: String,
    pub path: PathBuf,
    pub applied: usize,
}

/// Append every test in `results` to its module's file under `root`.
///
/// The checkout's HEAD must match the commit the tests were generated on.
pub fn apply_results(results: &AugmentResults, root: &Path) -> Result<ApplyReport> {
    let head = GitRepo::open(root)?.head_sha()?;
    if head != results.git_hash {
        return Err(Error::InvalidArgument(format!(
            "checkout is at {head} but results were generated at {}",
            results.git_hash
        )));
    }

    let (path, class_name) = results.target();
    let mut file = PythonFile::load(root, &path)?;
    for test in &results.tests {
        let code = format!("# Coverage added: {}\n{}", test.coverage_added, test.code);
        file.append(&code, class_name)?;
    }
    file.check_syntax()?;
    file.write_to(root)?;

    Ok(ApplyReport {
        module: results.module.clone(),
        path,
        applied: results.tests.len(),
    })
}
