//! Sweep target rules read from `Sweep/config.yaml` on the source branch.
//!
//! ```yaml
//! sweep-targets:
//!   main:
//!     "^src/": [rel-1.0, rel-2.0]
//!     "^docs/": [rel-2.0]
//! ```
//!
//! A rule applies to a pull request when every file it changed matches the rule's
//! pattern at the start of the path.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::Context;
use log::{debug, error, info, warn};
use serde::Deserialize;

use super::{args::RemoteBranch, git::Git};
use crate::util;

pub const CONFIG_PATH: &str = "Sweep/config.yaml";

#[derive(Debug, Default, Deserialize)]
struct SweepConfig {
    #[serde(rename = "sweep-targets", default)]
    sweep_targets: HashMap<String, Option<BTreeMap<String, Vec<String>>>>,
}

/// Path pattern to target branches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetRules(BTreeMap<String, Vec<String>>);

impl TargetRules {
    /// Parses the rules for `branch_name` (the branch without its remote).
    /// Returns `None` when the document has no rules for it.
    pub fn parse(yaml: &str, branch_name: &str) -> anyhow::Result<Option<Self>> {
        if yaml.trim().is_empty() {
            return Ok(None);
        }

        let config: Option<SweepConfig> =
            serde_yaml::from_str(yaml).context(format!("interpreting as YAML:\n{yaml}"))?;

        Ok(config
            .and_then(|mut config| config.sweep_targets.remove(branch_name).flatten())
            .filter(|rules| !rules.is_empty())
            .map(Self))
    }

    /// Reads the rules from the source branch. Any problem is logged and treated as no rules.
    pub fn load(git: &Git, branch: &RemoteBranch) -> Option<Self> {
        let yaml = match git.show_file(&branch.to_string(), CONFIG_PATH) {
            Ok(yaml) => yaml,
            Err(e) => {
                error!("failed to retrieve the sweep configuration: {e:#}");
                return None;
            }
        };

        if yaml.trim().is_empty() {
            warn!("empty {CONFIG_PATH} in {branch}, hopefully you knew what you were doing.");
            return None;
        }

        match Self::parse(&yaml, &branch.name) {
            Ok(Some(rules)) => {
                info!("read {} sweeping rules for PRs to '{branch}'", rules.len());
                debug!("sweeping rules: {rules:?}");
                Some(rules)
            }
            Ok(None) => None,
            Err(e) => {
                error!("{e:#}");
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Union of the branches of all rules matched by every one of `files`.
    pub fn targets_for<S: AsRef<str>>(&self, files: &[S]) -> anyhow::Result<BTreeSet<String>> {
        let mut targets = BTreeSet::new();
        if files.is_empty() {
            return Ok(targets);
        }

        for (rule, branches) in &self.0 {
            let all_match = files.iter().try_fold(true, |prev, file| {
                anyhow::Ok(prev && util::is_re_match_at_start(rule, file.as_ref())?)
            })?;

            if all_match {
                debug!("add branches for rule '{rule}': {branches:?}");
                targets.extend(branches.iter().cloned());
            } else {
                debug!("skip branches for rule '{rule}': {branches:?}");
            }
        }

        Ok(targets)
    }
}

impl<K, V> FromIterator<(K, V)> for TargetRules
where
    K: Into<String>,
    V: IntoIterator,
    V::Item: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into_iter().map(Into::into).collect()))
                .collect(),
        )
    }
}
