pub mod launcher;
pub mod sweep;

#[cfg(test)]
pub(crate) mod test_support;

pub mod util {
    use std::{
        ffi::OsStr,
        process::{ExitStatus, Stdio},
    };

    use anyhow::{bail, Context};

    /// Runs `program` with stdio passed through and returns how it exited.
    ///
    /// Arguments are kept out of the error context since they may carry credentials.
    pub fn cmd_helper<P, I, K>(program: P, args: I) -> anyhow::Result<ExitStatus>
    where
        P: AsRef<OsStr>,
        I: IntoIterator<Item = K>,
        K: AsRef<OsStr>,
    {
        let mut cmd = std::process::Command::new(program);
        cmd.args(args)
            // pass stdio through so it becomes visible in the log
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let context = format!("running {:?}", cmd.get_program());

        let mut spawned = cmd.spawn().context(context.clone())?;
        let finished = spawned.wait().context(context)?;

        Ok(finished)
    }

    /// Like [`cmd_helper`] but treats a non-zero exit as an error.
    pub fn cmd_checked<P, I, K>(program: P, args: I) -> anyhow::Result<()>
    where
        P: AsRef<OsStr>,
        I: IntoIterator<Item = K>,
        K: AsRef<OsStr>,
    {
        let program = program.as_ref();
        let finished = cmd_helper(program, args)?;
        if !finished.success() {
            bail!("running {program:?} failed with {finished}.");
        }

        Ok(())
    }

    /// Matches `re` against the beginning of `subject`, the way a path rule is applied.
    pub fn is_re_match_at_start(re: &str, subject: &str) -> anyhow::Result<bool> {
        let compiled_re = pcre2::bytes::Regex::new(&format!(r"\A(?:{re})"))
            .context(format!("compiling '{re}'"))?;
        let is_match = compiled_re.is_match(subject.as_bytes())?;

        log::trace!("'{re}' matched '{subject}': {is_match}");

        Ok(is_match)
    }

    /// Returns capture group `group` of the first match of `re` anywhere in `subject`.
    pub fn capture_lossy(re: &str, subject: &str, group: usize) -> anyhow::Result<Option<String>> {
        let compiled_re = pcre2::bytes::Regex::new(re).context(format!("compiling '{re}'"))?;

        Ok(compiled_re
            .captures(subject.as_bytes())?
            .and_then(|captures| captures.get(group))
            .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned()))
    }

    /// Quotes `input` for a POSIX shell, leaving plain words untouched.
    pub fn shell_escape(input: &str) -> String {
        if !input.is_empty()
            && input.chars().all(|ch| {
                ch.is_ascii_alphanumeric()
                    || matches!(ch, '_' | '@' | '%' | '+' | '=' | ':' | ',' | '.' | '/' | '-')
            })
        {
            return input.to_string();
        }
        let mut escaped = String::from("'");
        for ch in input.chars() {
            if ch == '\'' {
                escaped.push_str("'\"'\"'");
            } else {
                escaped.push(ch);
            }
        }
        escaped.push('\'');
        escaped
    }

    /// Shortens a secret to its last few characters so it can be logged.
    pub fn redact(secret: &str) -> String {
        let chars = secret.chars().count();
        if chars < 12 {
            return "***".to_string();
        }
        let reveal = std::cmp::max(3, chars / 8);
        let tail: String = secret.chars().skip(chars - reveal).collect();

        format!("..{tail}")
    }

    #[cfg(test)]
    mod tests {
        use test_log::test;

        use super::*;

        #[test]
        fn shell_escape_leaves_plain_words() {
            assert_eq!(shell_escape("upstream/rel-1.0"), "upstream/rel-1.0");
            assert_eq!(shell_escape("sweep:from main"), "'sweep:from main'");
            assert_eq!(shell_escape("it's"), r#"'it'"'"'s'"#);
            assert_eq!(shell_escape(""), "''");
        }

        #[test]
        fn redact_hides_short_and_long_secrets() {
            assert_eq!(redact("short"), "***");
            assert_eq!(redact("ghp_0123456789abcdef"), "..def");
        }

        #[test]
        fn rules_are_anchored_at_the_start() {
            assert!(is_re_match_at_start("src/", "src/lib.rs").unwrap());
            assert!(!is_re_match_at_start("lib", "src/lib.rs").unwrap());
            assert!(is_re_match_at_start("docs|src", "src/lib.rs").unwrap());
            assert!(is_re_match_at_start(".*", "anything").unwrap());
        }

        #[test]
        fn capture_returns_the_requested_group() {
            assert_eq!(
                capture_lossy(r"#(\d+)", "Merge pull request #42 from x/y", 1).unwrap(),
                Some("42".to_string())
            );
            assert_eq!(capture_lossy(r"#(\d+)", "no number", 1).unwrap(), None);
        }

        #[cfg(unix)]
        #[test]
        fn cmd_checked_reports_failure() {
            assert!(cmd_checked("true", std::iter::empty::<&str>()).is_ok());
            assert!(cmd_checked("false", std::iter::empty::<&str>()).is_err());
        }
    }
}
