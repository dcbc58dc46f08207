//! GitHub REST implementation of [`Forge`].

use core::time;

use anyhow::Context;
use async_trait::async_trait;
use log::{debug, trace};
use reqwest::{header::USER_AGENT, Method};
use serde_json::{json, Value};

use super::forge::{
    CommitAuthor, Forge, ForgeError, NewIssue, NewPullRequest, PullRequest, RepoSlug,
};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const PAGE_SIZE: usize = 100;

pub struct GithubClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl GithubClient {
    pub fn new(api_url: &str, token: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(time::Duration::from_secs(30))
            .build()
            .context("building the HTTP client")?;

        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn repo_url(&self, repo: &RepoSlug, path: &str) -> String {
        format!("{}/repos/{}/{}{path}", self.api_url, repo.owner, repo.name)
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Value, ForgeError> {
        let mut req = self
            .http
            .request(method.clone(), url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header(
                USER_AGENT,
                concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")),
            )
            .bearer_auth(&self.token);
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(body) = &body {
            req = req.json(body);
        }

        debug!("{method} {url} {query:?}");

        let transport = |source| ForgeError::Transport {
            url: url.to_string(),
            source,
        };
        let response = req.send().await.map_err(transport)?;
        let status = response.status();
        let text = response.text().await.map_err(transport)?;
        trace!("{url} responded {status}: {text}");

        if !status.is_success() {
            // GitHub puts a human readable explanation into `.message`
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(text);

            return Err(ForgeError::Api {
                method: method.to_string(),
                url: url.to_string(),
                status: status.as_u16(),
                message,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&text).map_err(|e| ForgeError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<Value, ForgeError> {
        self.send(Method::GET, url, query, None).await
    }

    async fn post(&self, url: &str, body: Value) -> Result<Value, ForgeError> {
        self.send(Method::POST, url, &[], Some(body)).await
    }
}

fn str_at<'v>(value: &'v Value, pointer: &str, url: &str) -> Result<&'v str, ForgeError> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .ok_or_else(|| ForgeError::Decode {
            url: url.to_string(),
            reason: format!("couldn't find a string at '{pointer}'"),
        })
}

fn u64_at(value: &Value, pointer: &str, url: &str) -> Result<u64, ForgeError> {
    value
        .pointer(pointer)
        .and_then(Value::as_u64)
        .ok_or_else(|| ForgeError::Decode {
            url: url.to_string(),
            reason: format!("couldn't find a number at '{pointer}'"),
        })
}

#[async_trait]
impl Forge for GithubClient {
    async fn check_repo(&self, repo: &RepoSlug) -> Result<(), ForgeError> {
        self.get(&self.repo_url(repo, ""), &[]).await?;

        Ok(())
    }

    async fn commit_sha(&self, repo: &RepoSlug, rev: &str) -> Result<String, ForgeError> {
        let url = self.repo_url(repo, &format!("/commits/{rev}"));
        let commit = self.get(&url, &[]).await?;

        Ok(str_at(&commit, "/sha", &url)?.to_string())
    }

    async fn pull_request(&self, repo: &RepoSlug, number: u64) -> Result<PullRequest, ForgeError> {
        let url = self.repo_url(repo, &format!("/pulls/{number}"));
        let pull = self.get(&url, &[]).await?;

        let labels = pull
            .get("labels")
            .and_then(Value::as_array)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|label| label.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(PullRequest {
            number,
            title: str_at(&pull, "/title", &url)?.to_string(),
            body: pull.get("body").and_then(Value::as_str).map(str::to_string),
            author_login: str_at(&pull, "/user/login", &url)?.to_string(),
            html_url: str_at(&pull, "/html_url", &url)?.to_string(),
            labels,
        })
    }

    async fn latest_commit_author(
        &self,
        repo: &RepoSlug,
        login: &str,
    ) -> Result<Option<CommitAuthor>, ForgeError> {
        let url = self.repo_url(repo, "/commits");
        let commits = self
            .get(
                &url,
                &[("author", login.to_string()), ("per_page", "1".to_string())],
            )
            .await?;

        let Some(latest) = commits.as_array().and_then(|commits| commits.first()) else {
            return Ok(None);
        };

        Ok(Some(CommitAuthor {
            name: str_at(latest, "/commit/author/name", &url)?.to_string(),
            email: str_at(latest, "/commit/author/email", &url)?.to_string(),
        }))
    }

    async fn changed_files(&self, repo: &RepoSlug, number: u64) -> Result<Vec<String>, ForgeError> {
        let url = self.repo_url(repo, &format!("/pulls/{number}/files"));
        let mut files = Vec::new();

        for page in 1.. {
            let listed = self
                .get(
                    &url,
                    &[
                        ("per_page", PAGE_SIZE.to_string()),
                        ("page", page.to_string()),
                    ],
                )
                .await?;
            let entries = listed.as_array().ok_or_else(|| ForgeError::Decode {
                url: url.clone(),
                reason: "expected an array of files".to_string(),
            })?;

            for entry in entries {
                files.push(str_at(entry, "/filename", &url)?.to_string());
            }

            if entries.len() < PAGE_SIZE {
                break;
            }
        }

        Ok(files)
    }

    async fn set_labels(
        &self,
        repo: &RepoSlug,
        number: u64,
        labels: &[String],
    ) -> Result<(), ForgeError> {
        let url = self.repo_url(repo, &format!("/issues/{number}/labels"));
        self.send(Method::PUT, &url, &[], Some(json!({ "labels": labels })))
            .await?;

        Ok(())
    }

    async fn add_labels(
        &self,
        repo: &RepoSlug,
        number: u64,
        labels: &[String],
    ) -> Result<(), ForgeError> {
        let url = self.repo_url(repo, &format!("/issues/{number}/labels"));
        self.post(&url, json!({ "labels": labels })).await?;

        Ok(())
    }

    async fn branch_head(&self, repo: &RepoSlug, branch: &str) -> Result<String, ForgeError> {
        let url = self.repo_url(repo, &format!("/branches/{branch}"));
        let found = self.get(&url, &[]).await?;

        Ok(str_at(&found, "/commit/sha", &url)?.to_string())
    }

    async fn create_branch(
        &self,
        repo: &RepoSlug,
        branch: &str,
        sha: &str,
    ) -> Result<(), ForgeError> {
        let url = self.repo_url(repo, "/git/refs");
        self.post(
            &url,
            json!({ "ref": format!("refs/heads/{branch}"), "sha": sha }),
        )
        .await?;

        Ok(())
    }

    async fn merge(&self, repo: &RepoSlug, base: &str, head: &str) -> Result<(), ForgeError> {
        let url = self.repo_url(repo, "/merges");
        // 204 means there was nothing to merge, which is fine as well
        self.post(&url, json!({ "base": base, "head": head })).await?;

        Ok(())
    }

    async fn create_pull_request(
        &self,
        repo: &RepoSlug,
        request: &NewPullRequest,
    ) -> Result<u64, ForgeError> {
        let url = self.repo_url(repo, "/pulls");
        let created = self
            .post(
                &url,
                json!({
                    "title": request.title,
                    "body": request.body,
                    "head": request.head,
                    "base": request.base,
                }),
            )
            .await?;

        u64_at(&created, "/number", &url)
    }

    async fn create_issue(&self, repo: &RepoSlug, issue: &NewIssue) -> Result<u64, ForgeError> {
        let url = self.repo_url(repo, "/issues");
        let mut body = json!({ "title": issue.title, "body": issue.body });
        if let Some(assignee) = &issue.assignee {
            body["assignees"] = json!([assignee]);
        }
        let created = self.post(&url, body).await?;

        u64_at(&created, "/number", &url)
    }

    async fn comment(&self, repo: &RepoSlug, number: u64, body: &str) -> Result<(), ForgeError> {
        let url = self.repo_url(repo, &format!("/issues/{number}/comments"));
        self.post(&url, json!({ "body": body })).await?;

        Ok(())
    }
}
