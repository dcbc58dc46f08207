/// Entry point meant to be executed from a GitHub Actions step.
///
/// Reads the sweeper settings from the environment (see `sweeper::launcher`), configures the
/// git identity and runs the sweeper, either in this process (`sweeper local`) or from the
/// installation below `$THIS`.
use std::process::ExitCode;

use clap::Parser;

use sweeper::launcher::{self, EntryArgs, LaunchEnv};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    launcher::logger().init();

    let args = EntryArgs::parse();

    let code = launcher::launch(LaunchEnv::from_env()?, args.mode()).await?;

    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}
