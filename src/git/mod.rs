//! Git access for checkouts: HEAD lookup via gix, commits via the git CLI.

use std::path::{Path, PathBuf};
use std::process::Command;

use gix::Repository;

use crate::core::{Error, Result};

/// Git repository wrapper for a single checkout.
pub struct GitRepo {
    repo: Repository,
    root: PathBuf,
}

impl GitRepo {
    /// Open a git repository at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let repo =
            gix::open(path).map_err(|e| Error::git(format!("Failed to open repository: {e}")))?;
        let root = repo
            .work_dir()
            .ok_or_else(|| Error::git("Not a work tree"))?
            .to_path_buf();

        Ok(Self { repo, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the HEAD commit SHA.
    pub fn head_sha(&self) -> Result<String> {
        let head = self
            .repo
            .head_id()
            .map_err(|e| Error::git(format!("Failed to get HEAD: {e}")))?;
        Ok(head.to_string())
    }

    /// Commit only `paths` with `message`, leaving other changes in the
    /// work tree and index alone.
    ///
    /// Returns the new HEAD SHA.
    pub fn commit_paths(&self, paths: &[PathBuf], message: &str) -> Result<String> {
        if paths.is_empty() {
            return Err(Error::git("nothing to commit"));
        }
        let pathspecs: Vec<String> = paths
            .iter()
            .map(|p| p.strip_prefix(&self.root).unwrap_or(p).display().to_string())
            .collect();

        let mut add = vec!["add", "--"];
        add.extend(pathspecs.iter().map(String::as_str));
        self.git(&add)?;

        let mut commit = vec!["commit", "--no-verify", "-m", message, "--"];
        commit.extend(pathspecs.iter().map(String::as_str));
        self.git(&commit)?;
        // Re-open so gix sees the new HEAD.
        GitRepo::open(&self.root)?.head_sha()
    }

    fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .map_err(|e| Error::git(format!("Failed to run git {}: {e}", args[0])))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::git(format!("git {} failed: {}", args[0], stderr.trim())));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Commit message listing the tests removed from each file.
pub fn neuter_commit_message(removed: &[(PathBuf, Vec<String>)]) -> String {
    let total: usize = removed.iter().map(|(_, names)| names.len()).sum();
    let mut msg = format!("Remove {total} tests\n");
    for (file, names) in removed {
        msg.push_str(&format!("\n{}:\n", file.display()));
        for name in names {
            msg.push_str(&format!("  - {name}\n"));
        }
    }
    msg
}
