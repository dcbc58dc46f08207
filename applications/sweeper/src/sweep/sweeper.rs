use std::collections::BTreeSet;

use anyhow::{bail, Context};
use log::{debug, error, info, warn, LevelFilter};

use super::{
    args::{RemoteBranch, Strategy, SweepArgs},
    forge::{CommitAuthor, Forge, ForgeError, NewIssue, NewPullRequest, PullRequest, RepoSlug},
    git::{Git, FORK_REMOTE, UPSTREAM_REMOTE},
    github::{GithubClient, DEFAULT_API_URL},
    pr::{self, Directives, FailedSweep, FixerInstructions, SkipReason},
    rules::TargetRules,
};

/// Facts about the surrounding CI run, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub repository: String,
    pub run_id: String,
    pub api_url: String,
}

impl RunContext {
    pub fn from_env() -> Self {
        let var = |key: &str, default: &str| std::env::var(key).unwrap_or_else(|_| default.to_string());

        Self {
            repository: var("GITHUB_REPOSITORY", "GITHUB_REPOSITORY"),
            run_id: var("GITHUB_RUN_ID", "GITHUB_RUN_ID"),
            api_url: var("GITHUB_API_URL", DEFAULT_API_URL),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub repo: RepoSlug,
    pub pr_repo: RepoSlug,
    pub source: RemoteBranch,
    pub rules: TargetRules,
    pub strategy: Strategy,
    pub dry_run: bool,
}

/// What happened to one merge commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrOutcome {
    /// the commit or its pull request could not be resolved
    Unresolved,
    Skipped(SkipReason),
    DryRun {
        targets: BTreeSet<String>,
    },
    Swept {
        succeeded: BTreeSet<String>,
        failed: Vec<String>,
    },
}

/// The merged pull request behind one merge commit.
struct Origin {
    merge_commit: String,
    sha: String,
    pull: PullRequest,
    title: String,
    watcher: String,
    author: CommitAuthor,
    release_notes: String,
}

pub struct Sweeper<'a, F: Forge> {
    forge: &'a F,
    git: &'a Git,
    settings: Settings,
    context: &'a RunContext,
}

impl<'a, F: Forge> Sweeper<'a, F> {
    pub fn new(forge: &'a F, git: &'a Git, settings: Settings, context: &'a RunContext) -> Self {
        Self {
            forge,
            git,
            settings,
            context,
        }
    }

    pub async fn sweep_all(&self, merge_commits: &[String]) -> Vec<PrOutcome> {
        let mut outcomes = Vec::with_capacity(merge_commits.len());
        for merge_commit in merge_commits {
            debug!("===== Next PR: {merge_commit} ======");
            match self.cherry_pick_pr(merge_commit).await {
                Ok(outcome) => {
                    debug!("[{merge_commit}] {outcome:?}");
                    outcomes.push(outcome);
                }
                Err(e) => {
                    error!("[{merge_commit}] {e:#}");
                    outcomes.push(PrOutcome::Unresolved);
                }
            }
        }

        outcomes
    }

    /// Sweeps the pull request merged by `merge_commit` to all of its target branches.
    pub async fn cherry_pick_pr(&self, merge_commit: &str) -> anyhow::Result<PrOutcome> {
        let Some(origin) = self.resolve(merge_commit).await? else {
            return Ok(PrOutcome::Unresolved);
        };
        let number = origin.pull.number;

        let (mut targets, excluded) = match pr::inspect_labels(&origin.pull.labels) {
            Directives::Skip(reason) => {
                info!("[{merge_commit}] PR {number} is skipped: {reason:?}");
                return Ok(PrOutcome::Skipped(reason));
            }
            Directives::Sweep {
                also_targeting,
                excluded,
            } => (also_targeting, excluded),
        };

        let changed_files = self
            .forge
            .changed_files(&self.settings.repo, number)
            .await
            .context(format!("listing the files changed by PR {number}"))?;
        debug!("[{merge_commit}] PR {number} changes {changed_files:#?}");
        targets.extend(self.settings.rules.targets_for(&changed_files)?);

        info!(
            "[{merge_commit}] PR {number} is swept to {} branches: {targets:?}",
            targets.len()
        );

        let mut labels = origin.pull.labels.clone();
        if targets.is_empty() {
            debug!("[{merge_commit}] zero target branches found, adding {}", pr::LABEL_IGNORE);
            labels.insert(pr::LABEL_IGNORE.to_string());
        } else {
            labels.insert(pr::LABEL_DONE.to_string());
        }

        if self.settings.dry_run {
            debug!("[{merge_commit}] ----- This is a test run, stop with this PR here ----");
            return Ok(PrOutcome::DryRun { targets });
        }

        self.forge
            .set_labels(
                &self.settings.repo,
                number,
                &labels.into_iter().collect::<Vec<_>>(),
            )
            .await
            .context(format!("labelling PR {number}"))?;

        let mut succeeded = BTreeSet::new();
        let mut failed = Vec::new();
        for target in &targets {
            if excluded.contains(target) {
                info!("[{merge_commit}] the PR originates from {target} -> skip back sweep to {target}");
                continue;
            }

            match self.sweep_to(&origin, target).await {
                Ok(()) => {
                    succeeded.insert(target.clone());
                }
                Err(failure) => failed.push(failure),
            }
        }

        if !targets.is_empty() {
            self.report(&origin, &succeeded, &failed).await;
        }

        Ok(PrOutcome::Swept {
            succeeded,
            failed: failed.into_iter().map(|failure| failure.target).collect(),
        })
    }

    /// Looks up the pull request behind `merge_commit`. Lookup failures are logged and yield `None`.
    async fn resolve(&self, merge_commit: &str) -> anyhow::Result<Option<Origin>> {
        let repo = &self.settings.repo;

        let sha = match self.forge.commit_sha(repo, merge_commit).await {
            Ok(sha) => sha,
            Err(e) => {
                error!("[{merge_commit}] failed to get merge commit with\n{e}");
                return Ok(None);
            }
        };

        let message = self.git.commit_message(merge_commit)?;
        let Some(number) = pr::pr_number_from_message(&message)? else {
            error!("[{merge_commit}] failed to determine PR number");
            return Ok(None);
        };
        debug!("[{merge_commit}] corresponds to PR {number}");

        let pull = match self.forge.pull_request(repo, number).await {
            Ok(pull) => pull,
            Err(e) => {
                error!("[{merge_commit}] failed to retrieve GitHub pull request {number}: {e}");
                return Ok(None);
            }
        };

        let body = pull.body.clone().unwrap_or_default();
        let release_notes = pr::release_notes(&body)?;
        debug!("[{merge_commit}] release_notes: {release_notes}");

        let watcher = pr::watcher_from_body(&body)?.unwrap_or_else(|| pull.author_login.clone());
        debug!("[{merge_commit}] original_pr_author: {watcher}");

        let author = match self.forge.latest_commit_author(repo, &watcher).await {
            Ok(Some(author)) => author,
            Ok(None) => {
                warn!("[{merge_commit}] no commits by {watcher} found, using their noreply address");
                noreply_author(&watcher)
            }
            Err(e) => {
                warn!("[{merge_commit}] looking up commits by {watcher}: {e}");
                noreply_author(&watcher)
            }
        };
        debug!("[{merge_commit}] commits will be made as: {author}");

        let title = pr::strip_title_prefix(&pull.title)?;

        Ok(Some(Origin {
            merge_commit: merge_commit.to_string(),
            sha,
            pull,
            title,
            watcher,
            author,
            release_notes,
        }))
    }

    async fn sweep_to(&self, origin: &Origin, target: &str) -> Result<(), FailedSweep> {
        let merge_commit = &origin.merge_commit;
        let number = origin.pull.number;
        let branch = pr::cherry_pick_branch(merge_commit, target);
        let new_title = pr::swept_title(target, &origin.title);
        let mut body = pr::swept_body(
            number,
            &origin.title,
            target,
            &origin.watcher,
            &origin.release_notes,
        );

        if let Err(reason) = self.prepare_branch(origin, &branch, target).await {
            error!("[{merge_commit}] {reason}");
            body.push_str(&format!("\nCloses #{}", pr::FAILED_ISSUE_PLACEHOLDER));

            let author = origin.author.to_string();
            let project = self.settings.repo.to_string();
            let details = FixerInstructions {
                merge_commit,
                target,
                branch: &branch,
                number,
                title: &origin.title,
                author: &author,
                source_basename: self.settings.source.basename(),
                project: &project,
                new_title: &new_title,
                body: &body,
            }
            .render();
            error!("[{merge_commit}] {details}");

            return Err(FailedSweep {
                target: target.to_string(),
                details,
            });
        }
        info!("[{merge_commit}] cherry-picked into '{target}'");

        let request = NewPullRequest {
            title: new_title,
            body,
            head: format!("{}:{branch}", self.settings.pr_repo.owner),
            base: target.to_string(),
        };
        let created = match self
            .forge
            .create_pull_request(&self.settings.repo, &request)
            .await
        {
            Ok(created) => created,
            Err(e) => {
                error!("[{merge_commit}] failed to create pull request for '{branch}' into '{target}' with\n{e}");
                return Err(FailedSweep {
                    target: target.to_string(),
                    details: format!(
                        "Failed to open the PR, try to open a PR from {} to {target}",
                        request.head
                    ),
                });
            }
        };

        let label = format!("{}{}", pr::SWEEP_FROM_PREFIX, self.settings.source.basename());
        if let Err(e) = self
            .forge
            .add_labels(&self.settings.repo, created, &[label])
            .await
        {
            warn!("[{merge_commit}] labelling sweep PR {created}: {e}");
        }
        debug!(
            "[{merge_commit}] sweeping PR {number} to {target} as PR {created} with title '{}'",
            request.title
        );

        Ok(())
    }

    /// Creates the sweep branch and brings the merge commit onto it.
    async fn prepare_branch(&self, origin: &Origin, branch: &str, target: &str) -> Result<(), String> {
        let head = self
            .forge
            .branch_head(&self.settings.repo, target)
            .await
            .map_err(|e| format!("failed to find the head of '{target}' with\n{e}"))?;
        self.forge
            .create_branch(&self.settings.pr_repo, branch, &head)
            .await
            .map_err(|e| format!("failed to create remote branch '{branch}' with\n{e}"))?;

        match self.settings.strategy {
            Strategy::Merge => self
                .forge
                .merge(&self.settings.pr_repo, branch, &origin.sha)
                .await
                .map_err(|e| format!("failed to merge merge commit, error: {e}")),
            Strategy::CherryPick => self
                .cherry_pick_locally(origin, branch)
                .map_err(|e| format!("{e:#}")),
        }
    }

    fn cherry_pick_locally(&self, origin: &Origin, branch: &str) -> anyhow::Result<()> {
        self.git.fetch(UPSTREAM_REMOTE, false)?;
        self.git.fetch(FORK_REMOTE, false)?;
        self.git.checkout(branch)?;

        let picked = self.git.cherry_pick(&origin.sha)?;
        if !picked.success() {
            self.git.abort_cherry_pick()?;
            bail!("failed to cherry pick merge commit, error: {}", picked.stderr);
        }

        let message = format!("sweep: #{} {}", origin.pull.number, origin.title);
        let amended = self.git.amend(&message, &origin.author.to_string())?;
        if !amended.success() {
            bail!("edit commit message, error: {}", amended.stderr);
        }

        let pushed = self.git.push(FORK_REMOTE, branch)?;
        if !pushed.success() {
            bail!("failed to push, error: {}", pushed.stderr);
        }

        Ok(())
    }

    /// Leaves a summary on the original pull request and tracks failures in an issue.
    async fn report(&self, origin: &Origin, succeeded: &BTreeSet<String>, failed: &[FailedSweep]) {
        let repo = &self.settings.repo;
        let merge_commit = &origin.merge_commit;
        let number = origin.pull.number;
        let failed_label = [pr::LABEL_FAILED.to_string()];

        if !failed.is_empty() {
            if let Err(e) = self.forge.add_labels(repo, number, &failed_label).await {
                error!("[{merge_commit}] labelling PR {number} as failed: {e}");
            }
        }

        let comment = pr::summary_comment(
            &self.context.repository,
            &self.context.run_id,
            succeeded,
            failed,
        );

        if let Err(e) = self.post_summary(origin, comment, !failed.is_empty()).await {
            error!("[{merge_commit}] failed to add comment with sweep summary with\n{e}");
        }
    }

    async fn post_summary(
        &self,
        origin: &Origin,
        mut comment: String,
        track_failure: bool,
    ) -> Result<(), ForgeError> {
        let repo = &self.settings.repo;

        if track_failure {
            let issue_title = format!("Sweep failed for PR {}", origin.title);
            let issue = NewIssue {
                body: format!("{issue_title}\nSee {}", origin.pull.html_url),
                title: issue_title,
                assignee: Some(origin.watcher.clone()),
            };
            let created = self.forge.create_issue(repo, &issue).await?;
            self.forge
                .add_labels(repo, created, &[pr::LABEL_FAILED.to_string()])
                .await?;
            comment = comment.replace(pr::FAILED_ISSUE_PLACEHOLDER, &created.to_string());
        }

        self.forge.comment(repo, origin.pull.number, &comment).await
    }
}

fn noreply_author(login: &str) -> CommitAuthor {
    CommitAuthor {
        name: login.to_string(),
        email: format!("{login}@users.noreply.github.com"),
    }
}

fn init_logging(level: LevelFilter) {
    if env_logger::builder()
        .filter_level(level)
        .parse_default_env()
        .try_init()
        .is_err()
    {
        // already set up by the entry point when running in-process
        log::set_max_level(level);
    }
}

/// Runs a complete sweep as described by `args`.
pub async fn run(args: SweepArgs, context: RunContext) -> anyhow::Result<()> {
    init_logging(args.verbose.level_filter());
    args.log_arguments();

    if args.dry_run {
        info!("running in TEST mode");
    }

    let forge = GithubClient::new(&context.api_url, &args.token)?;
    sweep_repository(&forge, &args, &context).await?;

    Ok(())
}

/// Sweeps the merge commits of `args.branch` through `forge` and returns what happened to each.
///
/// A failed fetch of the source remote ends the run early without an error.
pub async fn sweep_repository<F: Forge>(
    forge: &F,
    args: &SweepArgs,
    context: &RunContext,
) -> anyhow::Result<Vec<PrOutcome>> {
    // only merge commits on remote branches are swept, since they are expected to
    // come from the GitHub web interface
    let source: RemoteBranch = args.branch.parse()?;

    let repo: RepoSlug = args.project_name.parse()?;
    let pr_repo: RepoSlug = args.pr_project_name.parse()?;

    forge
        .check_repo(&repo)
        .await
        .context("error communicating with the GitHub API")?;
    debug!("retrieved GitHub project handle");
    forge
        .check_repo(&pr_repo)
        .await
        .context("error communicating with the GitHub API")?;
    debug!("retrieved GitHub PR project handle");

    let workdir = args.repository_root()?;
    info!("working in the root directory of git repository '{}'", workdir.display());
    let git = Git::new(&workdir);

    for (what, output) in [
        (
            "renaming remote origin",
            git.rename_remote(FORK_REMOTE, UPSTREAM_REMOTE)?,
        ),
        (
            "adding the PR project remote",
            git.add_token_remote(FORK_REMOTE, &args.pr_project_name, &args.token)?,
        ),
    ] {
        if !output.success() {
            warn!("{what} failed: {}", output.stderr);
        }
    }

    if !git.fetch(&source.remote, true)?.success() {
        error!("failed to fetch from '{}'", source.remote);
        return Ok(Vec::new());
    }

    let rules = TargetRules::load(&git, &source).unwrap_or_else(|| {
        info!("no sweeping rules for branch '{source}' found");
        TargetRules::default()
    });

    let merge_commits = git.merge_commits(&source.to_string(), &args.since, &args.until)?;
    info!("found {} merge commits", merge_commits.len());
    if merge_commits.is_empty() {
        info!(
            "no PRs to '{source}' found in period from {} until {}",
            args.since, args.until
        );
        return Ok(Vec::new());
    }

    let settings = Settings {
        repo,
        pr_repo,
        source,
        rules,
        strategy: args.strategy,
        dry_run: args.dry_run,
    };

    Ok(Sweeper::new(forge, &git, settings, context)
        .sweep_all(&merge_commits)
        .await)
}
