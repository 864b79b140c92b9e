//! Augur - coverage-guided LLM test augmentation for Python repositories.
//!
//! Augur measures which source lines each pytest test uniquely covers, asks a
//! language model for new tests aimed at those regions, and keeps only the
//! generated tests that add coverage nobody else provides. It can also remove
//! tests on purpose ("neutering") to build evaluation baselines.
//!
//! # Example
//!
//! ```no_run
//! use augur::config::Config;
//! use augur::core::LogContext;
//! use augur::coverage::TestPathFilter;
//! use augur::testmod::discover_modules;
//!
//! let config = Config::load_default(".").unwrap();
//! let filter = TestPathFilter::new(&config.repo.test_patterns).unwrap();
//! let modules = discover_modules(
//!     &config.repo.source_folder,
//!     &filter,
//!     &config.repo.exclude,
//!     &LogContext::default(),
//! )
//! .unwrap();
//! println!("Found {} test modules", modules.len());
//! ```

pub mod apply;
pub mod augment;
pub mod cli;
pub mod config;
pub mod core;
pub mod coverage;
pub mod git;
pub mod neuter;
pub mod output;
pub mod parser;
pub mod runner;
pub mod testmod;

pub use core::{Error, Result};
