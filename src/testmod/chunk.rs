//! Contiguous source regions targeted by augmentation.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::LogContext;
use crate::coverage::TestCoverage;
use crate::parser::PythonFile;

/// A contiguous line range in one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetCode {
    pub filename: PathBuf,
    pub start: u32,
    pub end: u32,
    pub lines: Vec<String>,
    pub func_name: Option<String>,
    pub class_name: Option<String>,
}

impl TargetCode {
    pub fn len(&self) -> usize {
        (self.end as usize + 1).saturating_sub(self.start as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn scope(&self) -> String {
        match (&self.class_name, &self.func_name) {
            (Some(cls), Some(func)) => format!("{cls}.{func}"),
            (Some(cls), None) => cls.clone(),
            (None, Some(func)) => func.clone(),
            (None, None) => "<module>".to_string(),
        }
    }
}

impl fmt::Display for TargetCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}:{}-{} ({})",
            self.filename.display(),
            self.start,
            self.end,
            self.scope()
        )?;
        for (i, line) in self.lines.iter().enumerate() {
            writeln!(f, "{:>5} | {line}", self.start as usize + i)?;
        }
        Ok(())
    }
}

/// Split sorted line numbers into maximal runs of consecutive integers.
pub fn contiguous_ranges(lines: impl IntoIterator<Item = u32>) -> Vec<(u32, u32)> {
    let mut sorted: Vec<u32> = lines.into_iter().collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut ranges = Vec::new();
    let mut iter = sorted.into_iter();
    let Some(first) = iter.next() else {
        return ranges;
    };
    let (mut start, mut end) = (first, first);
    for line in iter {
        if line == end + 1 {
            end = line;
        } else {
            ranges.push((start, end));
            start = line;
            end = line;
        }
    }
    ranges.push((start, end));
    ranges
}

/// Group covered lines of `diffs` into chunks, reading source from `source_root`.
///
/// Files that cannot be read still yield chunks, without line texts or scope.
pub fn group_chunks(diffs: &[TestCoverage], source_root: &Path, log: &LogContext) -> Vec<TargetCode> {
    let mut by_file: BTreeMap<PathBuf, Vec<u32>> = BTreeMap::new();
    for diff in diffs {
        for cov in diff.covered_files() {
            by_file
                .entry(cov.filename.clone())
                .or_default()
                .extend(cov.covered_lines.iter().copied());
        }
    }

    let mut chunks = Vec::new();
    for (filename, lines) in by_file {
        let source = match PythonFile::load(source_root, &filename) {
            Ok(file) => Some(file),
            Err(e) => {
                log.warn(format!("cannot read {}: {e}", filename.display()));
                None
            }
        };
        for (start, end) in contiguous_ranges(lines) {
            let (lines, func_name, class_name) = match &source {
                Some(file) => {
                    let scope = file.map_line_range(start, end);
                    (file.lines(start, end), scope.func_name, scope.class_name)
                }
                None => (Vec::new(), None, None),
            };
            chunks.push(TargetCode {
                filename: filename.clone(),
                start,
                end,
                lines,
                func_name,
                class_name,
            });
        }
    }
    chunks
}
