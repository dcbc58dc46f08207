//! Thin wrapper around the `git` binary, always run inside the repository root.

use std::{
    path::PathBuf,
    process::{Command, ExitStatus},
};

use anyhow::{bail, Context, Result};
use log::{debug, error};

use crate::util;

/// Remote the sweeps are fetched from, after `origin` was renamed.
pub const UPSTREAM_REMOTE: &str = "upstream";
/// Remote of the project the sweep pull requests are opened from.
pub const FORK_REMOTE: &str = "origin";

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Runs git with `args`.
    /// A non-zero exit is not an error here, callers inspect the status.
    pub fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        self.run_displayed(args, &args.join(" "))
    }

    fn run_displayed(&self, args: &[&str], display: &str) -> Result<CommandOutput> {
        debug!("working directory: {}", self.workdir.display());
        debug!("running command 'git {display}'");

        let output = Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .context(format!("spawning 'git {display}'"))?;

        let result = CommandOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };

        debug!("command returned {}", result.status);
        for (name, stream) in [("stdout", &result.stdout), ("stderr", &result.stderr)] {
            if !stream.is_empty() {
                debug!("{name}:");
                for line in stream.lines() {
                    debug!("  {line}");
                }
            }
        }

        Ok(result)
    }

    /// Like [`Git::run`] but fails on a non-zero exit and returns stdout.
    pub fn run_checked(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args)?;
        if !output.success() {
            bail!("'git {}' failed: {}", args.join(" "), output.stderr);
        }

        Ok(output.stdout)
    }

    /// Contents of `path` at `rev`.
    pub fn show_file(&self, rev: &str, path: &str) -> Result<String> {
        self.run_checked(&["show", &format!("{rev}:{path}")])
    }

    /// Full commit message of `rev`.
    pub fn commit_message(&self, rev: &str) -> Result<String> {
        self.run_checked(&["show", "--no-patch", "--format=%B", rev])
    }

    /// Abbreviated hashes of the first-parent merge commits on `branch` in the interval, newest first.
    pub fn merge_commits(&self, branch: &str, since: &str, until: &str) -> Result<Vec<String>> {
        let since = format!("--since={since}");
        let until = format!("--until={until}");
        let out = self
            .run_checked(&[
                "log",
                "--merges",
                "--first-parent",
                "--oneline",
                &since,
                &until,
                branch,
            ])
            .context("retrieving merge commits")?;

        parse_merge_commits(&out)
    }

    pub fn fetch(&self, remote: &str, prune: bool) -> Result<CommandOutput> {
        if prune {
            self.run(&["fetch", "--prune", remote])
        } else {
            self.run(&["fetch", remote])
        }
    }

    pub fn rename_remote(&self, from: &str, to: &str) -> Result<CommandOutput> {
        self.run(&["remote", "rename", from, to])
    }

    /// Adds a remote whose URL embeds `token`, keeping the token out of the log.
    pub fn add_token_remote(&self, name: &str, project: &str, token: &str) -> Result<CommandOutput> {
        let url = format!("https://{token}@github.com/{project}.git");
        let display = format!(
            "remote add {name} https://{}@github.com/{project}.git",
            util::redact(token)
        );
        self.run_displayed(&["remote", "add", name, &url], &display)
    }

    pub fn checkout(&self, branch: &str) -> Result<CommandOutput> {
        self.run(&["checkout", branch])
    }

    pub fn cherry_pick(&self, sha: &str) -> Result<CommandOutput> {
        self.run(&["cherry-pick", "-x", "-m", "1", sha])
    }

    pub fn abort_cherry_pick(&self) -> Result<CommandOutput> {
        self.run(&["cherry-pick", "--abort"])
    }

    pub fn amend(&self, message: &str, author: &str) -> Result<CommandOutput> {
        let author = format!("--author={author}");
        self.run(&["commit", "--amend", "-m", message, &author])
    }

    pub fn push(&self, remote: &str, branch: &str) -> Result<CommandOutput> {
        self.run(&["push", remote, branch])
    }
}

/// Extracts the leading commit hash of every `git log --oneline` line, keeping order and
/// dropping duplicates.
pub fn parse_merge_commits(out: &str) -> Result<Vec<String>> {
    let mut hashes: Vec<String> = Vec::new();
    for line in out.lines() {
        if line.trim().is_empty() {
            continue;
        }

        match util::capture_lossy(r"\A([0-9a-f]{6,})", line, 1)? {
            Some(hash) if !hashes.contains(&hash) => hashes.push(hash),
            Some(_) => {}
            None => error!("could not extract merge commit hash from '{line}'"),
        }
    }

    Ok(hashes)
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::test_support::TempRepo;

    #[test]
    fn merge_commit_hashes_are_extracted_in_order() {
        let out = "abc1234 Merge pull request #2 from a/b\n\
                   \n\
                   not a hash\n\
                   0123def Merge pull request #1 from a/c\n\
                   abc1234 Merge pull request #2 from a/b\n";

        assert_eq!(
            parse_merge_commits(out).unwrap(),
            vec!["abc1234".to_string(), "0123def".to_string()]
        );
    }

    #[test]
    fn short_prefixes_are_not_hashes() {
        assert!(parse_merge_commits("abc12 too short").unwrap().is_empty());
    }

    #[test]
    fn lists_first_parent_merges_of_a_branch() {
        let repo = TempRepo::new();
        repo.commit("README.md", "hello\n", "initial");
        let first = repo.merge_feature("fix-a", "a.txt", "Merge pull request #1 from someone/fix-a");
        let second = repo.merge_feature("fix-b", "b.txt", "Merge pull request #2 from someone/fix-b");

        let git = Git::new(repo.path());
        let merges = git.merge_commits("main", "1 month ago", "now").unwrap();

        assert_eq!(merges.len(), 2);
        assert!(second.starts_with(&merges[0]));
        assert!(first.starts_with(&merges[1]));
    }

    #[test]
    fn reads_files_and_messages_at_a_revision() {
        let repo = TempRepo::new();
        repo.commit("Sweep/config.yaml", "sweep-targets: {}\n", "add config");
        let merge = repo.merge_feature("fix", "fix.txt", "Merge pull request #9 from someone/fix");

        let git = Git::new(repo.path());

        assert_eq!(
            git.show_file("main", "Sweep/config.yaml").unwrap(),
            "sweep-targets: {}"
        );
        assert!(git.show_file("main", "missing.yaml").is_err());
        assert!(git
            .commit_message(&merge)
            .unwrap()
            .starts_with("Merge pull request #9"));
    }

    #[test]
    fn failing_commands_are_reported() {
        let repo = TempRepo::new();
        let git = Git::new(repo.path());

        let output = git.checkout("does-not-exist").unwrap();
        assert!(!output.success());
        assert!(!output.stderr.is_empty());
    }
}
