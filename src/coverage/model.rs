//! Line-coverage arithmetic.
//!
//! A [`TestCoverage`] is the per-file line result of one test run. Subtraction
//! answers "which lines does A cover that B does not", which is how coverage is
//! attributed to individual tests; addition accumulates non-overlapping gains.

use std::collections::BTreeSet;
use std::ops::{Add, AddAssign, Sub};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Line coverage of a single source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    /// Path relative to the repository root.
    pub filename: PathBuf,
    pub covered_lines: BTreeSet<u32>,
    pub missing_lines: BTreeSet<u32>,
    /// Number of executable statements in the file.
    pub stmts: usize,
}

impl Coverage {
    pub fn new(
        filename: impl Into<PathBuf>,
        covered: impl IntoIterator<Item = u32>,
        missing: impl IntoIterator<Item = u32>,
    ) -> Self {
        let covered_lines: BTreeSet<u32> = covered.into_iter().collect();
        let missing_lines: BTreeSet<u32> = missing
            .into_iter()
            .filter(|l| !covered_lines.contains(l))
            .collect();
        let stmts = covered_lines.len() + missing_lines.len();
        Self {
            filename: filename.into(),
            covered_lines,
            missing_lines,
            stmts,
        }
    }

    /// Override the statement count (coverage.py reports it separately).
    pub fn with_stmts(mut self, stmts: usize) -> Self {
        self.stmts = stmts.max(self.covered_lines.len() + self.missing_lines.len());
        self
    }

    pub fn covered(&self) -> usize {
        self.covered_lines.len()
    }

    pub fn missing(&self) -> usize {
        self.missing_lines.len()
    }

    /// Lines covered here but not in `other`; lines covered by both become missing.
    pub fn diff(&self, other: &Coverage) -> Coverage {
        let covered_lines: BTreeSet<u32> = self
            .covered_lines
            .difference(&other.covered_lines)
            .copied()
            .collect();
        let missing_lines: BTreeSet<u32> = self
            .missing_lines
            .iter()
            .copied()
            .chain(self.covered_lines.intersection(&other.covered_lines).copied())
            .collect();
        Coverage {
            filename: self.filename.clone(),
            covered_lines,
            missing_lines,
            stmts: self.stmts,
        }
    }

    /// Union of covered lines; a line is missing only if neither side covers it.
    pub fn union(&self, other: &Coverage) -> Coverage {
        let covered_lines: BTreeSet<u32> = self
            .covered_lines
            .union(&other.covered_lines)
            .copied()
            .collect();
        let missing_lines: BTreeSet<u32> = self
            .missing_lines
            .union(&other.missing_lines)
            .copied()
            .filter(|l| !covered_lines.contains(l))
            .collect();
        Coverage {
            filename: self.filename.clone(),
            covered_lines,
            missing_lines,
            stmts: self.stmts.max(other.stmts),
        }
    }
}

/// Aggregate counts across all files of a [`TestCoverage`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalCoverage {
    pub covered: usize,
    pub missing: usize,
    pub stmts: usize,
}

impl TotalCoverage {
    /// Covered percentage of statements, 0.0 when there are none.
    pub fn percent(&self) -> f64 {
        if self.stmts == 0 {
            return 0.0;
        }
        self.covered as f64 * 100.0 / self.stmts as f64
    }
}

/// Per-file coverage of one test run, or the difference of two runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCoverage {
    pub cov_list: Vec<Coverage>,
    /// Set when this value is the result of a subtraction.
    #[serde(default)]
    pub isdiff: bool,
}

impl TestCoverage {
    pub fn new(cov_list: Vec<Coverage>) -> Self {
        Self {
            cov_list,
            isdiff: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cov_list.is_empty()
    }

    pub fn total_cov(&self) -> TotalCoverage {
        self.cov_list
            .iter()
            .fold(TotalCoverage::default(), |mut total, cov| {
                total.covered += cov.covered();
                total.missing += cov.missing();
                total.stmts += cov.stmts;
                total
            })
    }

    pub fn get_file_cov(&self, path: &Path) -> Option<&Coverage> {
        self.cov_list.iter().find(|c| c.filename == path)
    }

    /// Number of lines covered in `other` that are also covered here.
    pub fn get_covered(&self, other: &TestCoverage) -> usize {
        other
            .cov_list
            .iter()
            .filter_map(|theirs| {
                self.get_file_cov(&theirs.filename).map(|ours| {
                    theirs
                        .covered_lines
                        .intersection(&ours.covered_lines)
                        .count()
                })
            })
            .sum()
    }

    /// Files with at least one covered line.
    pub fn covered_files(&self) -> impl Iterator<Item = &Coverage> {
        self.cov_list.iter().filter(|c| !c.covered_lines.is_empty())
    }

    fn subtract(&self, other: &TestCoverage) -> TestCoverage {
        let cov_list = self
            .cov_list
            .iter()
            .map(|ours| match other.get_file_cov(&ours.filename) {
                Some(theirs) => ours.diff(theirs),
                None => ours.clone(),
            })
            .collect();
        TestCoverage {
            cov_list,
            isdiff: true,
        }
    }

    fn merge(&self, other: &TestCoverage) -> TestCoverage {
        let mut out = self.clone();
        out.merge_in(other);
        out
    }

    fn merge_in(&mut self, other: &TestCoverage) {
        for theirs in &other.cov_list {
            match self
                .cov_list
                .iter_mut()
                .find(|c| c.filename == theirs.filename)
            {
                Some(ours) => *ours = ours.union(theirs),
                None => self.cov_list.push(theirs.clone()),
            }
        }
        self.isdiff = self.isdiff || other.isdiff;
    }
}

impl Sub<&TestCoverage> for &TestCoverage {
    type Output = TestCoverage;

    fn sub(self, rhs: &TestCoverage) -> TestCoverage {
        self.subtract(rhs)
    }
}

impl Sub for TestCoverage {
    type Output = TestCoverage;

    fn sub(self, rhs: TestCoverage) -> TestCoverage {
        self.subtract(&rhs)
    }
}

impl Add<&TestCoverage> for &TestCoverage {
    type Output = TestCoverage;

    fn add(self, rhs: &TestCoverage) -> TestCoverage {
        self.merge(rhs)
    }
}

impl Add for TestCoverage {
    type Output = TestCoverage;

    fn add(mut self, rhs: TestCoverage) -> TestCoverage {
        self.merge_in(&rhs);
        self
    }
}

impl AddAssign<&TestCoverage> for TestCoverage {
    fn add_assign(&mut self, rhs: &TestCoverage) {
        self.merge_in(rhs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cov(name: &str, covered: &[u32], missing: &[u32]) -> Coverage {
        Coverage::new(name, covered.iter().copied(), missing.iter().copied())
    }

    fn lines(set: &BTreeSet<u32>) -> Vec<u32> {
        set.iter().copied().collect()
    }

    // ========================================================================
    // Coverage
    // ========================================================================

    #[test]
    fn test_new_drops_missing_that_are_covered() {
        let c = cov("a.py", &[1, 2], &[2, 3]);
        assert_eq!(lines(&c.missing_lines), vec![3]);
        assert_eq!(c.stmts, 3);
    }

    #[test]
    fn test_with_stmts_never_below_line_count() {
        let c = cov("a.py", &[1, 2], &[3]).with_stmts(1);
        assert_eq!(c.stmts, 3);
        let c = cov("a.py", &[1, 2], &[3]).with_stmts(10);
        assert_eq!(c.stmts, 10);
    }

    #[test]
    fn test_file_diff_moves_shared_lines_to_missing() {
        let a = cov("file1", &[1, 2, 3, 4, 5], &[6, 7, 8]);
        let b = cov("file1", &[1, 2, 3], &[4, 5, 6, 7, 8]);

        let d = a.diff(&b);
        assert_eq!(lines(&d.covered_lines), vec![4, 5]);
        assert_eq!(lines(&d.missing_lines), vec![1, 2, 3, 6, 7, 8]);
        assert_eq!(d.stmts, 8);
    }

    #[test]
    fn test_file_union() {
        let a = cov("f.py", &[1, 2], &[3, 4]);
        let b = cov("f.py", &[3], &[1, 2, 4]);
        let u = a.union(&b);
        assert_eq!(lines(&u.covered_lines), vec![1, 2, 3]);
        assert_eq!(lines(&u.missing_lines), vec![4]);
    }

    // ========================================================================
    // TestCoverage
    // ========================================================================

    #[test]
    fn test_subtraction_scenario() {
        let a = TestCoverage::new(vec![cov("file1.py", &[1, 2, 3, 4], &[5, 6])]);
        let b = TestCoverage::new(vec![cov("file1.py", &[1, 2], &[3, 4, 5, 6])]);

        let d = &a - &b;
        assert!(d.isdiff);
        let f = d.get_file_cov(Path::new("file1.py")).unwrap();
        assert_eq!(lines(&f.covered_lines), vec![3, 4]);
        assert_eq!(d.total_cov().covered, 2);
    }

    #[test]
    fn test_subtraction_keeps_files_only_in_lhs() {
        let a = TestCoverage::new(vec![
            cov("a.py", &[1], &[]),
            cov("b.py", &[5, 6], &[7]),
        ]);
        let b = TestCoverage::new(vec![cov("a.py", &[1], &[]), cov("z.py", &[1], &[])]);

        let d = a - b;
        assert_eq!(d.cov_list.len(), 2);
        assert_eq!(d.cov_list[0].filename, PathBuf::from("a.py"));
        assert_eq!(d.total_cov().covered, 2);
    }

    #[test]
    fn test_identical_runs_have_zero_diff() {
        let a = TestCoverage::new(vec![cov("a.py", &[1, 2, 3], &[4])]);
        assert_eq!((&a - &a).total_cov().covered, 0);
    }

    #[test]
    fn test_addition_is_saturating() {
        let a = TestCoverage::new(vec![cov("a.py", &[1, 2, 3], &[4])]);
        assert_eq!((&a + &a).total_cov().covered, a.total_cov().covered);
    }

    #[test]
    fn test_addition_carries_new_files() {
        let a = TestCoverage::new(vec![cov("a.py", &[1], &[2])]);
        let b = TestCoverage::new(vec![cov("b.py", &[3], &[])]);
        let mut sum = a.clone();
        sum += &b;
        assert_eq!(sum.cov_list.len(), 2);
        assert_eq!(sum.total_cov().covered, 2);
        assert_eq!(sum, &a + &b);
    }

    #[test]
    fn test_addition_keeps_diff_flag() {
        let a = TestCoverage::new(vec![cov("a.py", &[1], &[2])]);
        let d = &a - &TestCoverage::default();
        assert!((&TestCoverage::default() + &d).isdiff);
    }

    #[test]
    fn test_get_covered_counts_shared_lines() {
        let a = TestCoverage::new(vec![cov("a.py", &[1, 2, 3], &[]), cov("b.py", &[1], &[])]);
        let b = TestCoverage::new(vec![cov("a.py", &[2, 3, 9], &[]), cov("c.py", &[1], &[])]);
        assert_eq!(a.get_covered(&b), 2);
        assert_eq!(b.get_covered(&a), 2);
    }

    #[test]
    fn test_total_cov_and_percent() {
        let a = TestCoverage::new(vec![
            cov("a.py", &[1, 2], &[3, 4]),
            cov("b.py", &[1], &[2, 3, 4]),
        ]);
        let total = a.total_cov();
        assert_eq!(total.covered, 3);
        assert_eq!(total.missing, 5);
        assert_eq!(total.stmts, 8);
        assert!((total.percent() - 37.5).abs() < f64::EPSILON);
        assert_eq!(TotalCoverage::default().percent(), 0.0);
    }

    #[test]
    fn test_covered_files_skips_empty() {
        let a = TestCoverage::new(vec![cov("a.py", &[], &[1]), cov("b.py", &[2], &[])]);
        let names: Vec<_> = a.covered_files().map(|c| c.filename.clone()).collect();
        assert_eq!(names, vec![PathBuf::from("b.py")]);
    }

    #[test]
    fn test_serde_roundtrip_preserves_order() {
        let a = TestCoverage::new(vec![cov("z.py", &[3, 1], &[]), cov("a.py", &[2], &[])]);
        let json = serde_json::to_string(&a).unwrap();
        let back: TestCoverage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
        assert_eq!(back.cov_list[0].filename, PathBuf::from("z.py"));
    }
}
