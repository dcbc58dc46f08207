//! Text and label handling around the swept pull requests.

use std::collections::BTreeSet;

use log::{info, warn};

use crate::util::{self, shell_escape};

pub const LABEL_DONE: &str = "sweep:done";
pub const LABEL_IGNORE: &str = "sweep:ignore";
pub const LABEL_FAILED: &str = "sweep:failed";
pub const SWEPT_FROM_PREFIX: &str = "sweptFrom:";
pub const SWEEP_FROM_PREFIX: &str = "sweep:from ";
pub const ALSO_TARGETING_PREFIX: &str = "alsoTargeting:";

/// Stands in for the number of the tracking issue until it exists.
pub const FAILED_ISSUE_PLACEHOLDER: &str = "@@@FAILED_ISSUE_ID@@@";

pub fn pr_number_from_message(message: &str) -> anyhow::Result<Option<u64>> {
    Ok(util::capture_lossy(r"Merge pull request #(\d+)", message, 1)?
        .and_then(|number| number.parse().ok()))
}

/// The `BEGINRELEASENOTES` .. `ENDRELEASENOTES` block of a description, markers included.
pub fn release_notes(body: &str) -> anyhow::Result<String> {
    Ok(util::capture_lossy(r"(?s)(BEGINRELEASENOTES.+ENDRELEASENOTES)", body, 1)?.unwrap_or_default())
}

/// The login a previous sweep recorded as watcher, so chained sweeps keep the original author.
pub fn watcher_from_body(body: &str) -> anyhow::Result<Option<String>> {
    util::capture_lossy(r"Adding original author @(.+) as watcher.", body, 1)
}

/// Drops a leading tag such as `[v7r2] ` from a title.
pub fn strip_title_prefix(title: &str) -> anyhow::Result<String> {
    Ok(util::capture_lossy(r"\A\[[^\]]+\]\s+(.+)\z", title, 1)?.unwrap_or_else(|| title.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    AlreadySwept,
    Ignored,
    /// the pull request is itself a sweep, carrying this label
    SweptFrom(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directives {
    Skip(SkipReason),
    Sweep {
        also_targeting: BTreeSet<String>,
        excluded: BTreeSet<String>,
    },
}

/// Interprets the sweep related labels of a pull request.
pub fn inspect_labels(labels: &BTreeSet<String>) -> Directives {
    if labels.contains(LABEL_DONE) {
        info!("was already swept -> skipping");
        return Directives::Skip(SkipReason::AlreadySwept);
    }
    if labels.contains(LABEL_IGNORE) {
        info!("is marked as ignore -> skipping");
        return Directives::Skip(SkipReason::Ignored);
    }

    let mut also_targeting = BTreeSet::new();
    let mut excluded = BTreeSet::new();

    for label in labels {
        if label.starts_with(SWEPT_FROM_PREFIX) {
            info!("contains {label} label -> skipping to prevent sweeping it twice");
            return Directives::Skip(SkipReason::SweptFrom(label.clone()));
        }

        if label.starts_with(SWEEP_FROM_PREFIX) {
            if let [_, branch] = label.split(' ').collect::<Vec<_>>()[..] {
                info!("was swept from branch: {branch} -> excluding {branch} from the target list");
                excluded.insert(branch.to_string());
            }
        }

        if label.starts_with(ALSO_TARGETING_PREFIX) {
            match label.split(':').collect::<Vec<_>>()[..] {
                [_, branch] if !branch.is_empty() => {
                    info!("also targets the following branch: {branch} -> add to target list");
                    also_targeting.insert(branch.to_string());
                }
                _ => warn!("has malformed '{label}' label -> ignore"),
            }
        }
    }

    Directives::Sweep {
        also_targeting,
        excluded,
    }
}

pub fn cherry_pick_branch(merge_commit: &str, target: &str) -> String {
    format!("cherry-pick-2-{merge_commit}-{target}")
}

pub fn swept_title(target: &str, title: &str) -> String {
    format!("[sweep:{}] {title}", target.replace("rel-", ""))
}

pub fn swept_body(number: u64, title: &str, target: &str, watcher: &str, release_notes: &str) -> String {
    format!(
        "Sweep #{number} `{title}` to `{target}`.\n\
         \n\
         Adding original author @{watcher} as watcher.\n\
         \n\
         {release_notes}"
    )
}

/// Everything needed to redo a failed sweep by hand.
pub struct FixerInstructions<'a> {
    pub merge_commit: &'a str,
    pub target: &'a str,
    pub branch: &'a str,
    pub number: u64,
    pub title: &'a str,
    pub author: &'a str,
    pub source_basename: &'a str,
    pub project: &'a str,
    pub new_title: &'a str,
    pub body: &'a str,
}

impl FixerInstructions<'_> {
    pub fn render(&self) -> String {
        let commit_message = format!("sweep: #{} {}", self.number, self.title);
        let label = format!("{SWEEP_FROM_PREFIX}{}", self.source_basename);

        [
            format!("cherry-pick {} into {} failed", self.merge_commit, self.target),
            "check merge conflicts on a local copy of this repository".to_string(),
            "```bash".to_string(),
            "git fetch upstream".to_string(),
            format!(
                "git checkout upstream/{} -b {}",
                shell_escape(self.target),
                shell_escape(self.branch)
            ),
            format!("git cherry-pick -x -m 1 {}", shell_escape(self.merge_commit)),
            "# Fix the conflicts".to_string(),
            "git cherry-pick --continue".to_string(),
            format!(
                "git commit --amend -m {} --author={}",
                shell_escape(&commit_message),
                shell_escape(self.author)
            ),
            format!("git push -u origin {}", shell_escape(self.branch)),
            String::new(),
            "# If you have the GitHub CLI installed the PR can be made with".to_string(),
            "gh pr create \\".to_string(),
            format!("     --label {} \\", shell_escape(&label)),
            format!("     --base {} \\", shell_escape(self.target)),
            format!("     --repo {} \\", shell_escape(self.project)),
            format!("     --title {} \\", shell_escape(self.new_title)),
            format!("     --body {}", shell_escape(self.body)),
            "```".to_string(),
        ]
        .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedSweep {
    pub target: String,
    pub details: String,
}

/// The comment posted on the original pull request after sweeping it.
pub fn summary_comment(
    repository: &str,
    run_id: &str,
    succeeded: &BTreeSet<String>,
    failed: &[FailedSweep],
) -> String {
    let mut lines = vec![
        "**Sweep summary**\n".to_string(),
        format!("Sweep ran in https://github.com/{repository}/actions/runs/{run_id}"),
    ];

    if !succeeded.is_empty() {
        lines.push("\n### Successful:".to_string());
        lines.extend(succeeded.iter().map(|target| format!("* {target}")));
    }

    if !failed.is_empty() {
        lines.push("\n### Failed:".to_string());
        for failure in failed {
            lines.push(format!("* **{}**", failure.target));
            lines.push(format!("  {}", failure.details.replace('\n', "\n  ")));
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn labels<const N: usize>(names: [&str; N]) -> BTreeSet<String> {
        names.into_iter().map(str::to_string).collect()
    }

    #[test]
    fn finds_the_merged_pull_request() {
        assert_eq!(
            pr_number_from_message("Merge pull request #123 from org/branch\n\nFix it").unwrap(),
            Some(123)
        );
        assert_eq!(pr_number_from_message("Merge branch 'main'").unwrap(), None);
    }

    #[test]
    fn release_notes_span_lines() {
        let body = "Intro\nBEGINRELEASENOTES\n*Core\nNEW: thing\nENDRELEASENOTES\ntrailer";
        assert_eq!(
            release_notes(body).unwrap(),
            "BEGINRELEASENOTES\n*Core\nNEW: thing\nENDRELEASENOTES"
        );
        assert_eq!(release_notes("nothing here").unwrap(), "");
    }

    #[test]
    fn watcher_is_taken_from_previous_sweeps() {
        let body = swept_body(4, "Fix", "rel-1.0", "alice", "");
        assert_eq!(watcher_from_body(&body).unwrap(), Some("alice".to_string()));
        assert_eq!(watcher_from_body("plain description").unwrap(), None);
    }

    #[test]
    fn title_prefixes_are_stripped_once() {
        assert_eq!(strip_title_prefix("[v7r2] Fix parser").unwrap(), "Fix parser");
        assert_eq!(
            strip_title_prefix("[sweep:1.0] [v7r2] Fix").unwrap(),
            "[v7r2] Fix"
        );
        assert_eq!(strip_title_prefix("Fix [x] parser").unwrap(), "Fix [x] parser");
        assert_eq!(strip_title_prefix("[v7r2]Fix").unwrap(), "[v7r2]Fix");
    }

    #[test]
    fn sweep_labels_stop_a_sweep() {
        assert_eq!(
            inspect_labels(&labels([LABEL_DONE, "bug"])),
            Directives::Skip(SkipReason::AlreadySwept)
        );
        assert_eq!(
            inspect_labels(&labels([LABEL_IGNORE])),
            Directives::Skip(SkipReason::Ignored)
        );
        assert_eq!(
            inspect_labels(&labels(["sweptFrom:main"])),
            Directives::Skip(SkipReason::SweptFrom("sweptFrom:main".to_string()))
        );
    }

    #[test]
    fn targeting_labels_are_collected() {
        let directives = inspect_labels(&labels([
            "alsoTargeting:rel-1.0",
            "alsoTargeting:",
            "alsoTargeting:a:b",
            "sweep:from rel-2.0",
            "sweep:from too many parts",
            "bug",
        ]));

        assert_eq!(
            directives,
            Directives::Sweep {
                also_targeting: labels(["rel-1.0"]),
                excluded: labels(["rel-2.0"]),
            }
        );
    }

    #[test]
    fn sweep_naming() {
        assert_eq!(
            cherry_pick_branch("abc1234", "rel-1.0"),
            "cherry-pick-2-abc1234-rel-1.0"
        );
        assert_eq!(swept_title("rel-1.0", "Fix parser"), "[sweep:1.0] Fix parser");
        assert_eq!(swept_title("stable", "Fix parser"), "[sweep:stable] Fix parser");
    }

    #[test]
    fn swept_body_mentions_the_original() {
        assert_eq!(
            swept_body(12, "Fix parser", "rel-1.0", "alice", "BEGINRELEASENOTES\nENDRELEASENOTES"),
            "Sweep #12 `Fix parser` to `rel-1.0`.\n\nAdding original author @alice as watcher.\n\nBEGINRELEASENOTES\nENDRELEASENOTES"
        );
    }

    #[test]
    fn fixer_instructions_quote_for_the_shell() {
        let rendered = FixerInstructions {
            merge_commit: "abc1234",
            target: "rel-1.0",
            branch: "cherry-pick-2-abc1234-rel-1.0",
            number: 12,
            title: "Don't crash",
            author: "Jane Doe <jane@example.com>",
            source_basename: "main",
            project: "org/project",
            new_title: "[sweep:1.0] Don't crash",
            body: "body",
        }
        .render();

        assert!(rendered.starts_with("cherry-pick abc1234 into rel-1.0 failed\n"));
        assert!(rendered.contains(
            "git checkout upstream/rel-1.0 -b cherry-pick-2-abc1234-rel-1.0\n"
        ));
        assert!(rendered.contains(
            r#"git commit --amend -m 'sweep: #12 Don'"'"'t crash' --author='Jane Doe <jane@example.com>'"#
        ));
        assert!(rendered.contains("     --label 'sweep:from main' \\\n"));
        assert!(rendered.contains("     --repo org/project \\\n"));
        assert!(rendered.ends_with("     --body body\n```"));
    }

    #[test]
    fn summary_lists_successes_and_failures() {
        let comment = summary_comment(
            "org/project",
            "99",
            &labels(["rel-1.0"]),
            &[FailedSweep {
                target: "rel-2.0".to_string(),
                details: "line one\nline two".to_string(),
            }],
        );

        assert_eq!(
            comment,
            "**Sweep summary**\n\n\
             Sweep ran in https://github.com/org/project/actions/runs/99\n\
             \n### Successful:\n\
             * rel-1.0\n\
             \n### Failed:\n\
             * **rel-2.0**\n\
             \x20 line one\n\
             \x20 line two"
        );
    }
}
