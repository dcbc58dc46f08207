/// Creates pull requests that sweep merged pull requests onto other branches.
///
/// Expects to be called like this:
/// sweep_pr -b upstream/main -p org/project --pr-project-name fork/project -t $GITHUB_PAT
use clap::Parser;

use sweeper::sweep::{self, RunContext, SweepArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = SweepArgs::parse();

    sweep::run(args, RunContext::from_env()).await
}
