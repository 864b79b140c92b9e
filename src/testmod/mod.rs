//! Test modules: the unit of augmentation and neutering.
//!
//! A module is either all module-level test functions of one file, or one
//! `Test*` class. Its tests are always read from the in-memory test file, so
//! deletions and appends keep the list consistent.

mod chunk;

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use rayon::prelude::*;
use serde::Serialize;

use crate::core::{Error, LogContext, Result};
use crate::coverage::TestPathFilter;
use crate::git::GitRepo;
use crate::parser::{FunctionDef, PythonFile};
use crate::runner::{TestId, TestSelection};

pub use chunk::{contiguous_ranges, group_chunks, TargetCode};

/// A group of tests sharing one test file.
#[derive(Debug, Clone)]
pub struct TestModule {
    name: String,
    class_name: Option<String>,
    test_file: PythonFile,
    commit_sha: Option<String>,
    chunks: Option<Vec<TargetCode>>,
}

impl TestModule {
    /// Module of the file's module-level test functions.
    pub fn for_file(test_file: PythonFile) -> Self {
        Self {
            name: test_file.path().to_string_lossy().replace('\\', "/"),
            class_name: None,
            test_file,
            commit_sha: None,
            chunks: None,
        }
    }

    /// Module of one test class.
    pub fn for_class(test_file: PythonFile, class_name: impl Into<String>) -> Self {
        let class_name = class_name.into();
        Self {
            name: class_name.clone(),
            class_name: Some(class_name),
            test_file,
            commit_sha: None,
            chunks: None,
        }
    }

    pub fn with_commit(mut self, sha: Option<String>) -> Self {
        self.commit_sha = sha;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unique identifier: `path` or `path::Class`.
    pub fn id(&self) -> String {
        let file = self.path().to_string_lossy().replace('\\', "/");
        match &self.class_name {
            Some(cls) => format!("{file}::{cls}"),
            None => file,
        }
    }

    pub fn class_name(&self) -> Option<&str> {
        self.class_name.as_deref()
    }

    pub fn path(&self) -> &Path {
        self.test_file.path()
    }

    pub fn test_file(&self) -> &PythonFile {
        &self.test_file
    }

    pub fn commit_sha(&self) -> Option<&str> {
        self.commit_sha.as_deref()
    }

    /// Tests belonging to this module in declaration order.
    pub fn tests(&self) -> Vec<FunctionDef> {
        self.tests_in(&self.test_file)
    }

    /// This module's tests as they appear in another version of its file.
    pub fn tests_in(&self, file: &PythonFile) -> Vec<FunctionDef> {
        file.test_functions()
            .into_iter()
            .filter(|f| f.class_name == self.class_name)
            .collect()
    }

    pub fn test_ids(&self) -> Vec<TestId> {
        self.tests()
            .iter()
            .map(|f| TestId::from_def(self.path(), f))
            .collect()
    }

    /// Selection of this module's tests in the live file.
    pub fn selection(&self) -> TestSelection {
        self.selection_for(&self.test_file)
    }

    /// Selection of this module's tests in `file`, which may contain new tests.
    pub fn selection_for(&self, file: &PythonFile) -> TestSelection {
        match &self.class_name {
            Some(cls) => TestSelection::class(file.path(), cls),
            None => TestSelection::module_functions(file),
        }
    }

    /// Remove one test from the live file.
    pub fn delete_test(&mut self, name: &str) -> Result<FunctionDef> {
        let class_name = self.class_name.clone();
        self.test_file.delete_function(name, class_name.as_deref())
    }

    /// Append test code to the live file (into the class for class modules).
    pub fn append_test(&mut self, code: &str) -> Result<()> {
        let class_name = self.class_name.clone();
        self.test_file.append(code, class_name.as_deref())
    }

    /// A copy of the live file with `code` appended, leaving the module untouched.
    pub fn with_appended(&self, code: &str) -> Result<PythonFile> {
        let mut file = self.test_file.clone();
        file.append(code, self.class_name.as_deref())?;
        Ok(file)
    }

    /// Replace the live file; it must keep the module's path.
    pub fn set_test_file(&mut self, file: PythonFile) -> Result<()> {
        if file.path() != self.path() {
            return Err(Error::InvalidArgument(format!(
                "{} is not the test file of module {}",
                file.path().display(),
                self.name
            )));
        }
        self.test_file = file;
        Ok(())
    }

    /// Persist the live file under `root`.
    pub fn write(&self, root: &Path) -> Result<()> {
        self.test_file.write_to(root)
    }

    /// Source of the module's tests: the whole class, or the module-level test functions.
    pub fn test_code(&self) -> String {
        match &self.class_name {
            Some(cls) => self
                .test_file
                .find_class(cls)
                .map(|c| self.test_file.lines(c.start_line, c.end_line).join("\n"))
                .unwrap_or_default(),
            None => self
                .tests()
                .iter()
                .map(|t| t.code.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }

    /// Source files referenced by the module's chunks, in first-seen order.
    pub fn targeted_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = Vec::new();
        for chunk in self.chunks.iter().flatten() {
            if !files.contains(&chunk.filename) {
                files.push(chunk.filename.clone());
            }
        }
        files
    }

    pub fn chunks(&self) -> Option<&[TargetCode]> {
        self.chunks.as_deref()
    }

    pub fn set_chunks(&mut self, chunks: Vec<TargetCode>) {
        self.chunks = Some(chunks);
    }

    pub fn summary(&self) -> ModuleSummary {
        ModuleSummary {
            name: self.name.clone(),
            id: self.id(),
            path: self.path().to_path_buf(),
            class_name: self.class_name.clone(),
            tests: self.tests().iter().map(FunctionDef::qualified_name).collect(),
        }
    }
}

/// Serializable listing entry for a module.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleSummary {
    pub name: String,
    pub id: String,
    pub path: PathBuf,
    pub class_name: Option<String>,
    pub tests: Vec<String>,
}

/// Split a test file into its modules; files without tests yield none.
pub fn modules_of(file: &PythonFile) -> Vec<TestModule> {
    let tests = file.test_functions();
    let mut modules = Vec::new();
    if tests.iter().any(|t| t.class_name.is_none()) {
        modules.push(TestModule::for_file(file.clone()));
    }
    for class in file.classes() {
        if class.name.starts_with("Test")
            && tests
                .iter()
                .any(|t| t.class_name.as_deref() == Some(class.name.as_str()))
            && !modules.iter().any(|m| m.class_name() == Some(class.name.as_str()))
        {
            modules.push(TestModule::for_class(file.clone(), class.name));
        }
    }
    modules
}

/// Find every test module under `root`.
///
/// Test files are matched by `filter` against paths relative to `root`;
/// paths matching any `exclude` glob are skipped.
pub fn discover_modules(
    root: &Path,
    filter: &TestPathFilter,
    exclude: &[String],
    log: &LogContext,
) -> Result<Vec<TestModule>> {
    let exclude = build_globset(exclude)?;
    let mut files: Vec<PathBuf> = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .build()
        .flatten()
        .filter(|e| e.file_type().is_some_and(|t| t.is_file()))
        .filter_map(|e| e.path().strip_prefix(root).ok().map(Path::to_path_buf))
        .filter(|rel| rel.extension().is_some_and(|ext| ext == "py"))
        .filter(|rel| filter.is_test_file(rel) && !exclude.is_match(rel))
        .collect();
    files.sort();

    let parsed: Vec<PythonFile> = files
        .par_iter()
        .filter_map(|rel| match PythonFile::load(root, rel) {
            Ok(file) => Some(file),
            Err(e) => {
                log.warn(format!("skipping {}: {e}", rel.display()));
                None
            }
        })
        .collect();

    let sha = match GitRepo::open(root).and_then(|repo| repo.head_sha()) {
        Ok(sha) => Some(sha),
        Err(e) => {
            log.debug(format!("no commit marker for {}: {e}", root.display()));
            None
        }
    };

    let modules: Vec<TestModule> = parsed
        .iter()
        .flat_map(modules_of)
        .map(|m| m.with_commit(sha.clone()))
        .collect();
    log.info(format!(
        "found {} test modules in {} test files",
        modules.len(),
        parsed.len()
    ));
    Ok(modules)
}

/// Pick modules by name or id; an empty selector list returns all.
pub fn select_modules(modules: Vec<TestModule>, selectors: &[String]) -> Result<Vec<TestModule>> {
    if selectors.is_empty() {
        return Ok(modules);
    }
    let mut picked = Vec::new();
    for sel in selectors {
        let matches: Vec<&TestModule> = modules
            .iter()
            .filter(|m| m.name() == sel || m.id() == *sel)
            .collect();
        match matches.as_slice() {
            [] => {
                return Err(Error::InvalidArgument(format!("no test module named '{sel}'")))
            }
            [one] => picked.push((*one).clone()),
            many => {
                let ids: Vec<String> = many.iter().map(|m| m.id()).collect();
                return Err(Error::InvalidArgument(format!(
                    "'{sel}' is ambiguous: {}",
                    ids.join(", ")
                )));
            }
        }
    }
    Ok(picked)
}

fn build_globset(patterns: &[String]) -> Result<globset::GlobSet> {
    let mut builder = globset::GlobSetBuilder::new();
    for pattern in patterns {
        let glob = globset::Glob::new(pattern)
            .map_err(|e| Error::config(format!("invalid exclude pattern '{pattern}': {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::config(format!("invalid exclude patterns: {e}")))
}
