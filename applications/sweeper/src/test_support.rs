//! Fixtures shared by the unit tests.

use std::{path::Path, process::Command};

use tempfile::TempDir;

/// Runs git in `dir`, which may also be a bare repository, and returns trimmed stdout.
/// Panics on failure.
pub fn git_in(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A throwaway git repository with `main` checked out and a local identity.
pub struct TempRepo {
    dir: TempDir,
}

impl TempRepo {
    pub fn new() -> Self {
        let repo = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        repo.git(&["init", "-q"]);
        repo.git(&["symbolic-ref", "HEAD", "refs/heads/main"]);
        repo.configure_identity();
        repo
    }

    /// Clones `source`; the clone's `origin` points at it.
    pub fn clone_of(source: &Path) -> Self {
        let repo = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        repo.git(&["clone", "-q", source.to_str().unwrap(), "."]);
        repo.configure_identity();
        repo
    }

    fn configure_identity(&self) {
        self.git(&["config", "user.name", "Test User"]);
        self.git(&["config", "user.email", "test@example.com"]);
        self.git(&["config", "commit.gpgsign", "false"]);
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn git(&self, args: &[&str]) -> String {
        git_in(self.path(), args)
    }

    pub fn commit(&self, file: &str, contents: &str, message: &str) -> String {
        let path = self.path().join(file);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        self.git(&["add", file]);
        self.git(&["commit", "-q", "-m", message]);
        self.git(&["rev-parse", "HEAD"])
    }

    /// Commits `file` on a new branch and merges it back into `main` without fast-forward.
    /// Returns the full hash of the merge commit.
    pub fn merge_feature(&self, branch: &str, file: &str, message: &str) -> String {
        self.git(&["checkout", "-q", "-b", branch]);
        self.commit(file, &format!("{branch}\n"), &format!("change {file}"));
        self.git(&["checkout", "-q", "main"]);
        self.git(&["merge", "-q", "--no-ff", "--no-edit", "-m", message, branch]);
        self.git(&["rev-parse", "HEAD"])
    }
}
