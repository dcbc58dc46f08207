//! Sweeps merged pull requests onto other branches.
//!
//! Merge commits on a remote branch are mapped back to the pull requests they merged.
//! Each pull request is then cherry-picked (or merged) onto the branches chosen by its
//! `alsoTargeting:<branch>` labels and by the path rules in `Sweep/config.yaml`, and a
//! new pull request is opened per target branch.

pub mod args;
pub mod forge;
pub mod git;
pub mod github;
pub mod pr;
pub mod rules;
mod sweeper;

pub use args::SweepArgs;
pub use sweeper::{run, sweep_repository, PrOutcome, RunContext, Settings, Sweeper};
