//! The forge operations the sweeper relies on.

use std::{collections::BTreeSet, fmt, str::FromStr};

use anyhow::bail;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("{method} {url} returned {status}: {message}")]
    Api {
        method: String,
        url: String,
        status: u16,
        message: String,
    },
    #[error("request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected response from {url}: {reason}")]
    Decode { url: String, reason: String },
}

/// A repository in `owner/name` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub owner: String,
    pub name: String,
}

impl FromStr for RepoSlug {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((owner, name)) = s.split_once('/') {
            Ok(Self {
                owner: owner.to_string(),
                name: name.to_string(),
            })
        } else {
            bail!("couldn't parse project {s}, expected 'owner/name'");
        }
    }
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub author_login: String,
    pub html_url: String,
    pub labels: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

impl fmt::Display for CommitAuthor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    /// `owner:branch` of the branch holding the changes
    pub head: String,
    pub base: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIssue {
    pub title: String,
    pub body: String,
    pub assignee: Option<String>,
}

/// Pull requests and issues share their number space, so labels and comments
/// take either kind of number.
#[async_trait]
pub trait Forge: Send + Sync {
    async fn check_repo(&self, repo: &RepoSlug) -> Result<(), ForgeError>;

    /// Resolves `rev` to the full commit SHA.
    async fn commit_sha(&self, repo: &RepoSlug, rev: &str) -> Result<String, ForgeError>;

    async fn pull_request(&self, repo: &RepoSlug, number: u64) -> Result<PullRequest, ForgeError>;

    /// Author of the most recent commit made by `login`, if there is any.
    async fn latest_commit_author(
        &self,
        repo: &RepoSlug,
        login: &str,
    ) -> Result<Option<CommitAuthor>, ForgeError>;

    async fn changed_files(&self, repo: &RepoSlug, number: u64) -> Result<Vec<String>, ForgeError>;

    /// Replaces all labels.
    async fn set_labels(
        &self,
        repo: &RepoSlug,
        number: u64,
        labels: &[String],
    ) -> Result<(), ForgeError>;

    async fn add_labels(
        &self,
        repo: &RepoSlug,
        number: u64,
        labels: &[String],
    ) -> Result<(), ForgeError>;

    async fn branch_head(&self, repo: &RepoSlug, branch: &str) -> Result<String, ForgeError>;

    async fn create_branch(&self, repo: &RepoSlug, branch: &str, sha: &str)
        -> Result<(), ForgeError>;

    /// Merges `head` (a branch or SHA) into the branch `base`.
    async fn merge(&self, repo: &RepoSlug, base: &str, head: &str) -> Result<(), ForgeError>;

    async fn create_pull_request(
        &self,
        repo: &RepoSlug,
        request: &NewPullRequest,
    ) -> Result<u64, ForgeError>;

    async fn create_issue(&self, repo: &RepoSlug, issue: &NewIssue) -> Result<u64, ForgeError>;

    async fn comment(&self, repo: &RepoSlug, number: u64, body: &str) -> Result<(), ForgeError>;
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn repo_slug_round_trips_through_display() {
        let slug: RepoSlug = "org/project".parse().unwrap();
        assert_eq!(slug.owner, "org");
        assert_eq!(slug.name, "project");
        assert_eq!(slug.to_string(), "org/project");

        assert!("project".parse::<RepoSlug>().is_err());
    }

    #[test]
    fn commit_author_renders_like_git() {
        let author = CommitAuthor {
            name: "Jane Doe".to_string(),
            email: "jane@example.com".to_string(),
        };
        assert_eq!(author.to_string(), "Jane Doe <jane@example.com>");
    }
}
