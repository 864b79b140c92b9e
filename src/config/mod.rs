//! Configuration loading and management.

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Repository layout and checkouts.
    pub repo: RepoConfig,
    /// Python interpreter and pytest-cov settings.
    pub python: PythonConfig,
    /// Test runner limits.
    pub runner: RunnerConfig,
    /// Test-run result cache.
    pub cache: CacheConfig,
    /// LLM provider settings.
    pub llm: LlmConfig,
    /// Augmentation loop settings.
    pub augment: AugmentConfig,
    /// Target-coverage resolution settings.
    pub resolver: ResolverConfig,
    /// Neutering (test removal) settings.
    pub neuter: NeuterConfig,
}

impl Config {
    /// Load configuration from an explicit file path.
    ///
    /// Errors if the file does not exist. Env vars with `AUGUR_` prefix override
    /// file values.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file_exact(path))
            .merge(Env::prefixed("AUGUR_").split("__"))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Load configuration from a directory, looking for augur.toml or .augur/augur.toml.
    ///
    /// Missing files are skipped and defaults are used.
    pub fn load_default(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(dir.join("augur.toml")))
            .merge(Toml::file(dir.join(".augur/augur.toml")))
            .merge(Env::prefixed("AUGUR_").split("__"))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Default config file content.
    pub fn default_toml() -> &'static str {
        include_str!("default_config.toml")
    }

    /// Resolve relative folders against `base` (normally the repository path).
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        let resolve = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base.join(p)
            }
        };
        self.repo.source_folder = resolve(&self.repo.source_folder);
        self.repo.cloned_folders = self
            .repo
            .cloned_folders
            .iter()
            .map(|p| resolve(p))
            .collect();
        if let Some(path) = &self.cache.path {
            self.cache.path = Some(resolve(path));
        }
        self
    }

    /// Reject configurations that cannot run tests.
    pub fn validate(&self) -> Result<()> {
        if self.python.interpreter.as_os_str().is_empty() {
            return Err(Error::config("python.interpreter must be set"));
        }
        if self.python.cov_folders.is_empty() {
            return Err(Error::config("python.cov_folders must list at least one folder"));
        }
        if self.repo.cloned_folders.is_empty() {
            return Err(Error::config(
                "repo.cloned_folders is empty; clone the repository at least once",
            ));
        }
        for folder in &self.repo.cloned_folders {
            if !folder.is_dir() {
                return Err(Error::config(format!(
                    "cloned folder {} does not exist; delete and re-create the clone",
                    folder.display()
                )));
            }
        }
        if !self.repo.source_folder.is_dir() {
            return Err(Error::config(format!(
                "source folder {} does not exist",
                self.repo.source_folder.display()
            )));
        }
        self.neuter.mode()?;
        Ok(())
    }
}

/// Repository configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    /// Repository identity, part of every cache key.
    pub name: String,
    /// Checkout used for reading sources and writing results.
    pub source_folder: PathBuf,
    /// Identical checkouts used to run tests concurrently.
    pub cloned_folders: Vec<PathBuf>,
    /// Globs identifying test files (relative paths).
    pub test_patterns: Vec<String>,
    /// Globs excluded from test module discovery.
    pub exclude: Vec<String>,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            source_folder: PathBuf::from("."),
            cloned_folders: Vec::new(),
            test_patterns: crate::coverage::report::DEFAULT_TEST_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            exclude: Vec::new(),
        }
    }
}

/// Python/pytest configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PythonConfig {
    /// Interpreter with pytest and pytest-cov installed.
    pub interpreter: PathBuf,
    /// Folder handed to pytest.
    pub test_folder: PathBuf,
    /// Folders measured with `--cov`.
    pub cov_folders: Vec<PathBuf>,
    /// Extra PYTHONPATH for test runs.
    pub pythonpath: Option<String>,
}

impl Default for PythonConfig {
    fn default() -> Self {
        Self {
            interpreter: PathBuf::from("python"),
            test_folder: PathBuf::from("."),
            cov_folders: vec![PathBuf::from(".")],
            pythonpath: None,
        }
    }
}

/// Runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Timeout in seconds for one pytest invocation.
    pub timeout_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self { timeout_secs: 900 }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Database path; defaults to the user cache directory.
    pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl CacheConfig {
    /// Effective database path.
    pub fn db_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from(".augur"))
                .join("augur")
                .join("runs.db")
        })
    }
}

/// LLM provider configuration (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub base_url: String,
    /// API key; falls back to the `api_key_env` variable.
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.2,
            timeout_secs: 120,
        }
    }
}

/// Augmentation loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentConfig {
    /// Generation rounds per module.
    pub n_times: usize,
    /// Attempts per round before giving up on syntax errors.
    pub llm_retries: usize,
    /// Prompt budget in estimated tokens.
    pub max_context_tokens: usize,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            n_times: 1,
            llm_retries: 3,
            max_context_tokens: 10_000,
        }
    }
}

/// Target-coverage resolver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// A single test's diff above this many lines means the checkout is stale.
    pub stale_diff_threshold: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            stale_diff_threshold: 1000,
        }
    }
}

/// Which neutering mode a configuration selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeuterMode {
    /// Keep this many tests, delete the rest.
    Keep(usize),
    /// Delete this many tests (never the last one).
    Delete(usize),
}

/// Neutering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NeuterConfig {
    pub keep: usize,
    pub delete: usize,
    /// Modules yielding fewer deletions are skipped.
    pub min_delete: usize,
    /// Upper bound on tests removed across a whole repository run.
    pub max_total_delete: Option<usize>,
    /// Measure the coverage lost by each removed test individually.
    pub attribute_per_test: bool,
    /// Commit the neutered files.
    pub commit: bool,
}

impl Default for NeuterConfig {
    fn default() -> Self {
        Self {
            keep: 2,
            delete: 0,
            min_delete: 3,
            max_total_delete: None,
            attribute_per_test: true,
            commit: false,
        }
    }
}

impl NeuterConfig {
    /// Exactly one of `keep`/`delete` must be set.
    pub fn mode(&self) -> Result<NeuterMode> {
        match (self.keep, self.delete) {
            (0, 0) => Err(Error::config("neuter: one of keep or delete must be set")),
            (k, 0) => Ok(NeuterMode::Keep(k)),
            (0, d) => Ok(NeuterMode::Delete(d)),
            _ => Err(Error::config("neuter: keep and delete are mutually exclusive")),
        }
    }
}
