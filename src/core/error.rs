//! Error types for the augur library.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using augur's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Message attached to stale-state failures.
pub const REPO_STATE_RESET_MSG: &str = "a single test accounts for an implausibly large coverage \
     difference; the checkout is probably in a stale state. Reset your repository \
     (git reset --hard) in every cloned folder and retry";

/// Errors that can occur while resolving, augmenting or neutering test modules.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File not found.
    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    /// Parse error from tree-sitter.
    #[error("Parse error in {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// Git operation error.
    #[error("Git error: {0}")]
    Git(String),

    /// Configuration error. Fatal: aborts before any test run.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Template rendering error.
    #[error("Template error: {0}")]
    Template(String),

    /// Test run cache error.
    #[error("Cache error: {0}")]
    Cache(String),

    /// LLM provider error (transport or response shape).
    #[error("LLM provider error: {0}")]
    Provider(String),

    /// The test suite produced no coverage report.
    #[error("Test suite produced no coverage report: {stderr}")]
    TestSuite { stderr: String },

    /// Prompt does not fit in the model's context budget.
    #[error("Context window exceeded for {module}: {needed} tokens needed, {budget} available")]
    ContextOverflow {
        module: String,
        needed: usize,
        budget: usize,
    },

    /// Generated code failed to parse.
    #[error("Generated code has syntax errors: {0}")]
    GeneratedSyntax(String),

    /// All generation attempts for a round failed.
    #[error("LLM generation failed after {attempts} attempts: {last}")]
    GenerationExhausted { attempts: usize, last: String },

    /// Zero coverage difference where one was required.
    #[error("No coverage difference for {module}")]
    NoCoverageDiff { module: String },

    /// Too few tests to delete for a useful neutering.
    #[error("Not enough tests to delete in {module}: {count} < {min}")]
    NothingToDelete {
        module: String,
        count: usize,
        min: usize,
    },

    /// A single test accounts for an implausibly large coverage diff.
    #[error("Stale repository state while resolving {test} ({lines} lines): {}", REPO_STATE_RESET_MSG)]
    StaleRepoState { test: String, lines: usize },

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<minijinja::Error> for Error {
    fn from(err: minijinja::Error) -> Self {
        Self::Template(err.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Cache(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Provider(err.to_string())
    }
}

impl Error {
    /// Create a new git error.
    pub fn git(message: impl Into<String>) -> Self {
        Self::Git(message.into())
    }

    /// Create a new config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a new provider error.
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider(message.into())
    }

    /// Create a parse error for the given path.
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Typed non-fatal signals: the caller skips the module and continues.
    pub fn is_skip_signal(&self) -> bool {
        matches!(
            self,
            Self::NoCoverageDiff { .. }
                | Self::NothingToDelete { .. }
                | Self::ContextOverflow { .. }
                | Self::GenerationExhausted { .. }
        )
    }

    /// Errors that halt a whole batch rather than one module.
    pub fn is_fatal_for_batch(&self) -> bool {
        matches!(self, Self::Config(_) | Self::StaleRepoState { .. })
    }
}
