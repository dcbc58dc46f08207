//! Command line contract of the sweeper.
//!
//! The entry point forwards exactly these flags, whether it runs the sweeper
//! in-process or as an installed executable.

use std::{fmt, path::PathBuf, str::FromStr};

use anyhow::{bail, Context};
use clap::{builder::TypedValueParser, Parser, ValueEnum};
use log::{debug, LevelFilter};

use crate::util;

pub const DEFAULT_SINCE: &str = "1 month ago";
pub const DEFAULT_UNTIL: &str = "now";
pub const DEFAULT_STRATEGY: &str = "cherry-pick";

/// How a merge commit is brought onto a target branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Strategy {
    /// cherry-pick the merge commit locally and push the result
    CherryPick,
    /// let GitHub merge the merge commit into the new branch
    Merge,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CherryPick => f.write_str("cherry-pick"),
            Self::Merge => f.write_str("merge"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Verbosity {
    #[value(name = "DEBUG")]
    Debug,
    #[value(name = "INFO")]
    Info,
    #[value(name = "WARNING")]
    Warning,
    #[value(name = "ERROR")]
    Error,
    #[value(name = "CRITICAL")]
    Critical,
}

impl Verbosity {
    pub fn level_filter(self) -> LevelFilter {
        match self {
            Self::Debug => LevelFilter::Debug,
            Self::Info => LevelFilter::Info,
            Self::Warning => LevelFilter::Warn,
            Self::Error | Self::Critical => LevelFilter::Error,
        }
    }
}

/// GitHub pull request sweeper
#[derive(Clone, Parser)]
#[command(name = "sweep_pr", about = "GitHub pull request sweeper")]
pub struct SweepArgs {
    /// remote branch whose merge commits should be swept (e.g. upstream/main)
    #[arg(short = 'b', long)]
    pub branch: String,

    /// only perform a test run without actually modifying anything
    #[arg(short = 'd', long)]
    pub dry_run: bool,

    /// GitHub project with namespace (e.g. user/my-project)
    #[arg(short = 'p', long)]
    pub project_name: String,

    /// GitHub project with namespace for creating the PR from
    #[arg(long)]
    pub pr_project_name: String,

    /// start of time interval for sweeping PRs (e.g. 1 week ago)
    #[arg(short = 's', long, default_value = DEFAULT_SINCE)]
    pub since: String,

    /// cherry-pick the merge commit or merge it
    #[arg(short = 'g', long, value_enum, default_value = DEFAULT_STRATEGY)]
    pub strategy: Strategy,

    /// GitHub Personal Access Token (PAT)
    #[arg(short = 't', long)]
    pub token: String,

    /// end of time interval for sweeping PRs (e.g. 1 hour ago)
    #[arg(short = 'u', long, default_value = DEFAULT_UNTIL)]
    pub until: String,

    /// verbosity level
    #[arg(short = 'v', long, value_enum, default_value = "DEBUG")]
    pub verbose: Verbosity,

    /// path to root directory of git repository, empty for the working directory
    #[arg(
        long = "repository-root",
        value_parser = clap::builder::OsStringValueParser::new().map(PathBuf::from)
    )]
    pub root: Option<PathBuf>,
}

impl SweepArgs {
    /// The repository root, defaulting to the parent of the directory holding the executable.
    /// An empty root means the working directory.
    pub fn repository_root(&self) -> anyhow::Result<PathBuf> {
        let root = match &self.root {
            Some(root) if !root.as_os_str().is_empty() => root.clone(),
            Some(_) => std::env::current_dir().context("reading the working directory")?,
            None => {
                let exe = std::env::current_exe().context("locating the running executable")?;
                exe.parent()
                    .and_then(|dir| dir.parent())
                    .map(PathBuf::from)
                    .ok_or_else(|| anyhow::anyhow!("{exe:?} has no grandparent directory"))?
            }
        };

        std::fs::canonicalize(&root).context(format!("canonicalizing repository root {root:?}"))
    }

    pub fn log_arguments(&self) {
        debug!("parsed arguments:");
        for (name, value) in [
            ("branch", self.branch.clone()),
            ("dry_run", self.dry_run.to_string()),
            ("project_name", self.project_name.clone()),
            ("pr_project_name", self.pr_project_name.clone()),
            ("since", self.since.clone()),
            ("strategy", self.strategy.to_string()),
            ("token", util::redact(&self.token)),
            ("until", self.until.clone()),
            ("verbose", format!("{:?}", self.verbose)),
            ("root", format!("{:?}", self.root)),
        ] {
            debug!("    {name:>15} : {value}");
        }
    }
}

/// A branch on a named remote, e.g. `upstream/main`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBranch {
    pub remote: String,
    pub name: String,
}

impl RemoteBranch {
    /// The last path segment of the branch name.
    pub fn basename(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

impl FromStr for RemoteBranch {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((remote, name)) if !remote.is_empty() && !name.is_empty() => Ok(Self {
                remote: remote.to_string(),
                name: name.to_string(),
            }),
            _ => bail!(
                "received branch '{s}' which does not look like a remote branch (e.g. 'upstream/main')"
            ),
        }
    }
}

impl fmt::Display for RemoteBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.remote, self.name)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    const REQUIRED: [&str; 9] = [
        "sweep_pr",
        "-b",
        "upstream/main",
        "-p",
        "org/project",
        "--pr-project-name",
        "fork/project",
        "-t",
        "ghp_secret",
    ];

    #[test]
    fn defaults_match_the_documented_ones() {
        let args = SweepArgs::try_parse_from(REQUIRED).unwrap();

        assert_eq!(args.since, DEFAULT_SINCE);
        assert_eq!(args.until, DEFAULT_UNTIL);
        assert_eq!(args.strategy, Strategy::CherryPick);
        assert_eq!(args.verbose, Verbosity::Debug);
        assert!(!args.dry_run);
        assert_eq!(args.root, None);
    }

    #[test]
    fn short_flags_are_accepted() {
        let args = SweepArgs::try_parse_from(
            REQUIRED
                .into_iter()
                .chain(["-g", "merge", "-s", "1 week ago", "-u", "1 hour ago", "-d"])
                .chain(["-v", "WARNING", "--repository-root", "/tmp"]),
        )
        .unwrap();

        assert_eq!(args.strategy, Strategy::Merge);
        assert_eq!(args.since, "1 week ago");
        assert_eq!(args.until, "1 hour ago");
        assert!(args.dry_run);
        assert_eq!(args.verbose.level_filter(), LevelFilter::Warn);
        assert_eq!(args.root, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn empty_repository_root_is_the_working_directory() {
        let args = SweepArgs::try_parse_from(
            REQUIRED.into_iter().chain(["--repository-root", ""]),
        )
        .unwrap();

        assert_eq!(args.root, Some(PathBuf::new()));
        assert_eq!(
            args.repository_root().unwrap(),
            std::env::current_dir().unwrap().canonicalize().unwrap()
        );
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        assert!(SweepArgs::try_parse_from(REQUIRED.into_iter().chain(["-g", "rebase"])).is_err());
    }

    #[test]
    fn token_is_required() {
        assert!(SweepArgs::try_parse_from(REQUIRED[..7].iter().copied()).is_err());
    }

    #[test]
    fn remote_branch_parsing() {
        let branch: RemoteBranch = "upstream/release/v2".parse().unwrap();
        assert_eq!(branch.remote, "upstream");
        assert_eq!(branch.name, "release/v2");
        assert_eq!(branch.basename(), "v2");
        assert_eq!(branch.to_string(), "upstream/release/v2");

        assert!("main".parse::<RemoteBranch>().is_err());
        assert!("upstream/".parse::<RemoteBranch>().is_err());
    }
}
