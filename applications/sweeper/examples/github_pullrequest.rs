/// Expects to be called like this:
/// env \
///   GITHUB_PAT=github_pat_*** \
///   RUST_LOG=trace \
///   cargo run --example github_pullrequest org/project 2410
use sweeper::sweep::{
    forge::{Forge, RepoSlug},
    github::{GithubClient, DEFAULT_API_URL},
    pr,
};

#[tokio::main]
async fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .parse_default_env()
        .init();

    let repo: RepoSlug = std::env::args().nth(1).unwrap().parse().unwrap();
    let number: u64 = std::env::args().nth(2).unwrap().parse().unwrap();
    let token = std::env::var("GITHUB_PAT").unwrap();

    let client = GithubClient::new(DEFAULT_API_URL, &token).unwrap();
    let pull = client.pull_request(&repo, number).await.unwrap();
    let files = client.changed_files(&repo, number).await.unwrap();

    println!("{pull:#?}");
    println!("changed files: {files:#?}");
    println!("directives: {:#?}", pr::inspect_labels(&pull.labels));
}
