//! Turns the CI environment into a resolved invocation of the sweeper.
//!
//! Everything is read once into a [`LaunchConfig`]; nothing below consults the
//! environment again, except the in-process sweeper picking up its [`RunContext`].

use std::{
    fmt,
    path::{Path, PathBuf},
};

use anyhow::Context;
use clap::Parser;
use log::{debug, info, LevelFilter};
use serde::Deserialize;
use thiserror::Error;

use crate::{
    sweep::{
        self,
        args::{DEFAULT_SINCE, DEFAULT_STRATEGY, DEFAULT_UNTIL},
        RunContext, SweepArgs,
    },
    util,
};

/// Value that asks for the derived default instead of being taken literally.
pub const SENTINEL: &str = "auto";
/// File name of the installed sweeper below `THIS`.
pub const SWEEPER_SCRIPT: &str = "sweep_PR.py";
pub const LOCAL_MODE: &str = "local";

/// Environment variables the entry point consumes.
const ENV_KEYS: &[&str] = &[
    "BRANCH",
    "GITHUB_PAT",
    "PROJECT_NAME",
    "PR_PROJECT_NAME",
    "GITHUB_REF",
    "GITHUB_REPOSITORY",
    "GITHUB_WORKSPACE",
    "SINCE",
    "STRATEGY",
    "UNTIL",
    "THIS",
];

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("GITHUB_PAT is empty or not set, a GitHub personal access token is required")]
    MissingCredential,
    #[error("{0} is not set")]
    MissingVariable(&'static str),
    #[error("reading the environment")]
    Environment(#[from] config::ConfigError),
}

/// A value that is either given or left to be derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Setting<T> {
    Explicit(T),
    UseDefault,
}

impl Setting<String> {
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        if raw == SENTINEL {
            Self::UseDefault
        } else {
            Self::Explicit(raw)
        }
    }
}

impl<T> Setting<T> {
    pub fn resolve_with(self, default: impl FnOnce() -> T) -> T {
        match self {
            Self::Explicit(value) => value,
            Self::UseDefault => default(),
        }
    }

    /// Like [`Setting::resolve_with`] for defaults that can be unavailable.
    pub fn try_resolve_with<E>(self, default: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        match self {
            Self::Explicit(value) => Ok(value),
            Self::UseDefault => default(),
        }
    }
}

/// `upstream/<last segment of the ref>`, e.g. `refs/heads/main` becomes `upstream/main`.
pub fn default_branch(github_ref: &str) -> String {
    let basename = github_ref.rsplit('/').next().unwrap_or(github_ref);
    format!("upstream/{basename}")
}

/// The raw environment, before any defaulting.
#[derive(Debug, Default, Deserialize)]
pub struct LaunchEnv {
    pub branch: Option<String>,
    pub github_pat: Option<String>,
    pub project_name: Option<String>,
    pub pr_project_name: Option<String>,
    pub github_ref: Option<String>,
    pub github_repository: Option<String>,
    pub github_workspace: Option<String>,
    pub since: String,
    pub strategy: String,
    pub until: String,
    pub this: Option<String>,
}

impl LaunchEnv {
    pub fn from_env() -> Result<Self, LaunchError> {
        Self::from_vars(std::env::vars())
    }

    /// Builds from `(NAME, value)` pairs; unknown names are ignored.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, LaunchError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let known = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| ENV_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect::<config::Map<String, String>>();

        let env = config::Config::builder()
            .set_default("since", DEFAULT_SINCE)?
            .set_default("strategy", DEFAULT_STRATEGY)?
            .set_default("until", DEFAULT_UNTIL)?
            .add_source(config::Environment::default().source(Some(known)))
            .build()?
            .try_deserialize()?;

        Ok(env)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitIdentity {
    pub email: String,
    pub name: String,
}

impl Default for GitIdentity {
    fn default() -> Self {
        Self {
            email: "noreply@github.com".to_string(),
            name: "sweeper".to_string(),
        }
    }
}

impl GitIdentity {
    /// Makes this the global git author for everything the sweeper commits.
    pub fn configure_global(&self) -> anyhow::Result<()> {
        util::cmd_checked("git", ["config", "--global", "user.email", self.email.as_str()])?;
        util::cmd_checked("git", ["config", "--global", "user.name", self.name.as_str()])?;
        info!("configured git identity {} <{}>", self.name, self.email);

        Ok(())
    }
}

/// Fully resolved inputs of one invocation.
#[derive(Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    pub branch: String,
    pub token: String,
    pub project_name: String,
    pub pr_project_name: String,
    pub repository_root: String,
    pub since: String,
    pub strategy: String,
    pub until: String,
    pub install_dir: Option<PathBuf>,
    pub identity: GitIdentity,
}

impl fmt::Debug for LaunchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchConfig")
            .field("branch", &self.branch)
            .field("token", &util::redact(&self.token))
            .field("project_name", &self.project_name)
            .field("pr_project_name", &self.pr_project_name)
            .field("repository_root", &self.repository_root)
            .field("since", &self.since)
            .field("strategy", &self.strategy)
            .field("until", &self.until)
            .field("install_dir", &self.install_dir)
            .field("identity", &self.identity)
            .finish()
    }
}

impl LaunchConfig {
    /// Applies the defaults and checks that a token is present.
    pub fn resolve(env: LaunchEnv) -> Result<Self, LaunchError> {
        let github_ref = env.github_ref.filter(|github_ref| !github_ref.is_empty());
        let branch = Setting::parse(env.branch.unwrap_or_default()).try_resolve_with(|| {
            github_ref
                .as_deref()
                .map(default_branch)
                .ok_or(LaunchError::MissingVariable("GITHUB_REF"))
        })?;

        let token = match env.github_pat {
            Some(token) if !token.is_empty() => token,
            _ => return Err(LaunchError::MissingCredential),
        };

        let github_repository = env.github_repository.unwrap_or_default();
        let project_name =
            Setting::parse(env.project_name.unwrap_or_default()).resolve_with(|| github_repository);
        let pr_project_name = env
            .pr_project_name
            .unwrap_or_else(|| project_name.clone());

        Ok(Self {
            branch,
            token,
            project_name,
            pr_project_name,
            repository_root: env.github_workspace.unwrap_or_default(),
            since: env.since,
            strategy: env.strategy,
            until: env.until,
            install_dir: env.this.map(PathBuf::from),
            identity: GitIdentity::default(),
        })
    }

    /// The flags handed to the sweeper, identical for both runners.
    pub fn forwarded_args(&self) -> Vec<String> {
        [
            "-b",
            self.branch.as_str(),
            "-p",
            self.project_name.as_str(),
            "--pr-project-name",
            self.pr_project_name.as_str(),
            "-t",
            self.token.as_str(),
            "--repository-root",
            self.repository_root.as_str(),
            "-s",
            self.since.as_str(),
            "-g",
            self.strategy.as_str(),
            "-u",
            self.until.as_str(),
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// run the sweeper inside this process
    Local,
    /// run the sweeper installed below `THIS`
    Installed,
}

impl Mode {
    pub fn from_arg(arg: Option<&str>) -> Self {
        match arg {
            Some(LOCAL_MODE) => Self::Local,
            _ => Self::Installed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Runner {
    InProcess,
    Subprocess { program: PathBuf },
}

impl Runner {
    pub fn select(mode: Mode, install_dir: Option<&Path>) -> Result<Self, LaunchError> {
        match mode {
            Mode::Local => Ok(Self::InProcess),
            Mode::Installed => {
                let install_dir = install_dir.ok_or(LaunchError::MissingVariable("THIS"))?;
                Ok(Self::Subprocess {
                    program: install_dir.join(SWEEPER_SCRIPT),
                })
            }
        }
    }
}

pub struct Invocation {
    pub runner: Runner,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn prepare(config: &LaunchConfig, mode: Mode) -> Result<Self, LaunchError> {
        Ok(Self {
            runner: Runner::select(mode, config.install_dir.as_deref())?,
            args: config.forwarded_args(),
        })
    }

    /// Runs the sweeper and returns its exit code.
    pub async fn execute(&self) -> anyhow::Result<i32> {
        match &self.runner {
            Runner::InProcess => {
                info!("running the sweeper in-process");
                let args = SweepArgs::try_parse_from(
                    std::iter::once(SWEEPER_SCRIPT).chain(self.args.iter().map(String::as_str)),
                )
                .context("parsing the forwarded sweeper arguments")?;
                sweep::run(args, RunContext::from_env()).await?;

                Ok(0)
            }
            Runner::Subprocess { program } => {
                info!("running {}", program.display());
                let status = util::cmd_helper(program, &self.args)?;
                debug!("{} exited with {status}", program.display());

                // terminated by a signal
                Ok(status.code().unwrap_or(1))
            }
        }
    }
}

/// Logger of the entry point: `Info` unless `RUST_LOG` says otherwise.
pub fn logger() -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(LevelFilter::Info).parse_default_env();
    builder
}

/// Validates the environment, sets up the git identity and dispatches to the sweeper.
pub async fn launch(env: LaunchEnv, mode: Mode) -> anyhow::Result<i32> {
    let config = LaunchConfig::resolve(env)?;
    debug!("resolved {config:?}");

    let invocation = Invocation::prepare(&config, mode)?;
    config.identity.configure_global()?;

    invocation.execute().await
}

/// Entry point arguments; everything else comes from the environment.
#[derive(Debug, Parser)]
#[command(name = "sweeper", about = "Runs the pull request sweeper from CI")]
pub struct EntryArgs {
    /// `local` runs the sweeper in this process, anything else runs `$THIS/sweep_PR.py`
    pub mode: Option<String>,
}

impl EntryArgs {
    pub fn mode(&self) -> Mode {
        Mode::from_arg(self.mode.as_deref())
    }
}
