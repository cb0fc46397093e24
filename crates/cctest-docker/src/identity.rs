//! User and group identity inside a container.
//!
//! `docker run -u <spec> --group-add <g>... <image> id` must report the
//! requested user, primary group and every supplementary group. A part of
//! the spec that is left empty means `root`.

use std::fmt;

use cctest_common::error::{CctestError, Result};
use cctest_loop::command::CommandOutput;

/// Supplementary groups requested by the "with additional groups" cases.
pub const ADDITIONAL_GROUPS: [&str; 4] = ["cdrom", "games", "video", "audio"];

const DEFAULT_IDENTITY: &str = "root";

/// A `-u` value split into its user and group parts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserSpec {
    raw: String,
    user: Option<String>,
    group: Option<String>,
}

impl UserSpec {
    /// Parses `""`, `user`, `user:group` or `:group`.
    ///
    /// A bare `user` also selects the group of the same name.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        let (user, group) = match raw.split_once(':') {
            Some((user, group)) => (non_empty(user), non_empty(group)),
            None => (non_empty(raw), non_empty(raw)),
        };
        Self {
            raw: raw.to_string(),
            user,
            group,
        }
    }

    /// The value passed to `-u`, possibly empty.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// User name expected in the `uid=` field.
    #[must_use]
    pub fn expected_user(&self) -> &str {
        self.user.as_deref().unwrap_or(DEFAULT_IDENTITY)
    }

    /// Group name expected in the `gid=` field.
    #[must_use]
    pub fn expected_group(&self) -> &str {
        self.group.as_deref().unwrap_or(DEFAULT_IDENTITY)
    }
}

/// The three fields printed by `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdOutput {
    uid: String,
    gid: String,
    groups: String,
}

impl IdOutput {
    /// Parses `uid=0(root) gid=0(root) groups=0(root),24(cdrom)`.
    ///
    /// # Errors
    ///
    /// Returns [`CctestError::Verification`] unless the output has exactly
    /// three whitespace-separated fields.
    pub fn parse(stdout: &str) -> Result<Self> {
        let fields: Vec<&str> = stdout.split_whitespace().collect();
        match fields.as_slice() {
            [uid, gid, groups] => Ok(Self {
                uid: (*uid).to_string(),
                gid: (*gid).to_string(),
                groups: (*groups).to_string(),
            }),
            _ => Err(CctestError::Verification {
                message: format!(
                    "expected 3 fields from id (uid, gid, groups), got {}: {stdout:?}",
                    fields.len()
                ),
            }),
        }
    }

    /// Names in the `uid=` field.
    #[must_use]
    pub fn user_names(&self) -> Vec<&str> {
        names(&self.uid)
    }

    /// Names in the `gid=` field.
    #[must_use]
    pub fn group_names(&self) -> Vec<&str> {
        names(&self.gid)
    }

    /// Names in the `groups=` field.
    #[must_use]
    pub fn supplementary_names(&self) -> Vec<&str> {
        names(&self.groups)
    }
}

/// Extracts every `(name)` in a field such as `groups=0(root),24(cdrom)`.
fn names(field: &str) -> Vec<&str> {
    field
        .split('(')
        .skip(1)
        .filter_map(|chunk| chunk.split_once(')').map(|(name, _)| name))
        .collect()
}

/// One identity case: who to run as and whether docker must refuse it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityExpectation {
    /// The `-u` value.
    pub spec: UserSpec,
    /// Supplementary groups passed with `--group-add`.
    pub groups: Vec<String>,
    /// Whether the run is expected to fail.
    pub should_fail: bool,
}

impl IdentityExpectation {
    /// Builds a case for `user`, optionally with [`ADDITIONAL_GROUPS`].
    #[must_use]
    pub fn new(user: &str, with_groups: bool, should_fail: bool) -> Self {
        let groups = if with_groups {
            ADDITIONAL_GROUPS.iter().map(ToString::to_string).collect()
        } else {
            Vec::new()
        };
        Self {
            spec: UserSpec::parse(user),
            groups,
            should_fail,
        }
    }

    /// Checks the output of `docker run ... id` against this case.
    ///
    /// # Errors
    ///
    /// Returns [`CctestError::Verification`] describing the first mismatch.
    pub fn check(&self, output: &CommandOutput) -> Result<()> {
        if self.should_fail {
            if output.success() || output.stderr.trim().is_empty() {
                return Err(mismatch(format!(
                    "{self}: expected a failing run with stderr, got exit {} and stderr {:?}",
                    output.exit_code, output.stderr
                )));
            }
            return Ok(());
        }

        if !output.success() {
            return Err(mismatch(format!(
                "{self}: exited with {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }
        if !output.stderr.trim().is_empty() {
            return Err(mismatch(format!("{self}: unexpected stderr {:?}", output.stderr)));
        }

        let id = IdOutput::parse(&output.stdout)?;
        let user = self.spec.expected_user();
        if !id.user_names().contains(&user) {
            return Err(mismatch(format!("{self}: uid field lacks ({user}): {}", id.uid)));
        }
        let group = self.spec.expected_group();
        if !id.group_names().contains(&group) {
            return Err(mismatch(format!("{self}: gid field lacks ({group}): {}", id.gid)));
        }
        let supplementary = id.supplementary_names();
        if let Some(missing) = self
            .groups
            .iter()
            .find(|g| !supplementary.contains(&g.as_str()))
        {
            return Err(mismatch(format!(
                "{self}: groups field lacks ({missing}): {}",
                id.groups
            )));
        }
        Ok(())
    }
}

impl fmt::Display for IdentityExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "as '{}' user", self.spec.raw())?;
        if self.groups.is_empty() {
            write!(f, " without additional groups")
        } else {
            write!(f, " with additional groups {:?}", self.groups)
        }
    }
}

fn mismatch(message: String) -> CctestError {
    CctestError::Verification { message }
}

/// Every identity case: valid specs must succeed, unknown users or groups
/// must be refused, each with and without supplementary groups.
#[must_use]
pub fn identity_cases() -> Vec<IdentityExpectation> {
    const VALID: [&str; 6] = [
        "",
        "root",
        "postgres",
        ":postgres",
        "postgres:postgres",
        "root:postgres",
    ];
    const INVALID: [&str; 3] = [
        "nonexistentuser",
        "nonexistentuser:postgres",
        ":nonexistentuser",
    ];

    let valid = VALID.iter().map(|u| (*u, false));
    let invalid = INVALID.iter().map(|u| (*u, true));
    valid
        .chain(invalid)
        .flat_map(|(user, should_fail)| {
            [
                IdentityExpectation::new(user, true, should_fail),
                IdentityExpectation::new(user, false, should_fail),
            ]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            stdout: stdout.into(),
            ..CommandOutput::default()
        }
    }

    #[test]
    fn empty_spec_defaults_to_root() {
        let spec = UserSpec::parse("");
        assert_eq!(spec.expected_user(), "root");
        assert_eq!(spec.expected_group(), "root");
    }

    #[test]
    fn bare_user_implies_same_group() {
        let spec = UserSpec::parse("postgres");
        assert_eq!(spec.expected_user(), "postgres");
        assert_eq!(spec.expected_group(), "postgres");
    }

    #[test]
    fn group_only_spec_keeps_root_user() {
        let spec = UserSpec::parse(":postgres");
        assert_eq!(spec.expected_user(), "root");
        assert_eq!(spec.expected_group(), "postgres");
    }

    #[test]
    fn user_and_group_are_split() {
        let spec = UserSpec::parse("root:postgres");
        assert_eq!(spec.expected_user(), "root");
        assert_eq!(spec.expected_group(), "postgres");
        assert_eq!(spec.raw(), "root:postgres");
    }

    #[test]
    fn id_output_names_are_extracted() {
        let id = IdOutput::parse(
            "uid=999(postgres) gid=999(postgres) groups=999(postgres),24(cdrom),60(games)\n",
        )
        .expect("parse");
        assert_eq!(id.user_names(), vec!["postgres"]);
        assert_eq!(id.group_names(), vec!["postgres"]);
        assert_eq!(id.supplementary_names(), vec!["postgres", "cdrom", "games"]);
    }

    #[test]
    fn id_output_needs_three_fields() {
        let err = IdOutput::parse("uid=0(root) gid=0(root)").unwrap_err();
        assert!(matches!(err, CctestError::Verification { .. }));
    }

    #[test]
    fn successful_case_accepts_matching_output() {
        let case = IdentityExpectation::new("postgres", true, false);
        let out = ok("uid=999(postgres) gid=999(postgres) \
                      groups=999(postgres),24(cdrom),60(games),44(video),29(audio)");
        case.check(&out).expect("match");
    }

    #[test]
    fn missing_supplementary_group_is_reported() {
        let case = IdentityExpectation::new("", true, false);
        let out = ok("uid=0(root) gid=0(root) groups=0(root),24(cdrom)");
        let err = case.check(&out).unwrap_err();
        assert!(err.to_string().contains("(games)"));
    }

    #[test]
    fn wrong_group_is_reported() {
        let case = IdentityExpectation::new("root:postgres", false, false);
        let out = ok("uid=0(root) gid=0(root) groups=0(root)");
        let err = case.check(&out).unwrap_err();
        assert!(err.to_string().contains("gid field lacks (postgres)"));
    }

    #[test]
    fn stderr_on_success_is_a_mismatch() {
        let case = IdentityExpectation::new("", false, false);
        let out = CommandOutput {
            stdout: "uid=0(root) gid=0(root) groups=0(root)".into(),
            stderr: "warning".into(),
            exit_code: 0,
        };
        assert!(case.check(&out).is_err());
    }

    #[test]
    fn failing_case_requires_exit_and_stderr() {
        let case = IdentityExpectation::new("nonexistentuser", false, true);
        let refused = CommandOutput {
            stdout: String::new(),
            stderr: "unable to find user nonexistentuser".into(),
            exit_code: 125,
        };
        case.check(&refused).expect("refusal expected");
        assert!(case.check(&ok("uid=0(root) gid=0(root) groups=0(root)")).is_err());
        let silent = CommandOutput {
            exit_code: 125,
            ..CommandOutput::default()
        };
        assert!(case.check(&silent).is_err());
    }

    #[test]
    fn case_table_covers_every_spec_both_ways() {
        let cases = identity_cases();
        assert_eq!(cases.len(), 18);
        assert_eq!(cases.iter().filter(|c| c.should_fail).count(), 6);
        assert_eq!(cases.iter().filter(|c| c.groups.is_empty()).count(), 9);
    }

    #[test]
    fn case_description_mentions_groups() {
        let case = IdentityExpectation::new("postgres", false, false);
        assert_eq!(case.to_string(), "as 'postgres' user without additional groups");
    }
}
