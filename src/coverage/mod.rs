//! Coverage model: per-file line sets, arithmetic over test runs, and
//! coverage.py report ingestion.

mod model;
pub mod report;
mod result;

pub use model::{Coverage, TestCoverage, TotalCoverage};
pub use report::{parse_coverage_py, parse_coverage_py_str, TestPathFilter};
pub use result::{parse_failures, CoverageResult, TestError};
