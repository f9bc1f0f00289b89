//! Environment filtering for spawned children.
//!
//! A fixed denylist of marker variables is always stripped so a child never
//! inherits a flag meant only for a debugging wrapper invocation.

use std::collections::HashSet;
use std::ffi::{OsStr, OsString};

/// Variables always removed from a child's environment.
pub const DEFAULT_FORBIDDEN_VARS: &[&str] =
    &["WARDEN_HEADLESS", "WARDEN_DEBUG_SESSION", "WARDEN_WRAPPER"];

/// Filter `vars` against the built-in denylist plus `additional`, then apply
/// `extra` on top. Forbidden names are dropped from `extra` as well.
pub fn build_child_env<I, S>(
    vars: I,
    additional: &[S],
    extra: &[(String, String)],
) -> Vec<(OsString, OsString)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
    S: AsRef<str>,
{
    let forbidden: HashSet<&OsStr> = DEFAULT_FORBIDDEN_VARS
        .iter()
        .map(OsStr::new)
        .chain(additional.iter().map(|s| OsStr::new(s.as_ref())))
        .collect();

    let mut env: Vec<(OsString, OsString)> = vars
        .into_iter()
        .filter(|(key, _)| !forbidden.contains(key.as_os_str()))
        .collect();

    for (key, value) in extra {
        if forbidden.contains(OsStr::new(key)) {
            tracing::debug!(var = %key, "Dropping forbidden variable from spawn overrides");
            continue;
        }
        env.retain(|(existing, _)| existing.as_os_str() != OsStr::new(key));
        env.push((OsString::from(key), OsString::from(value)));
    }

    env
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(OsString, OsString)> {
        pairs
            .iter()
            .map(|(k, v)| (OsString::from(k), OsString::from(v)))
            .collect()
    }

    fn keys(env: &[(OsString, OsString)]) -> Vec<String> {
        env.iter().map(|(k, _)| k.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn strips_builtin_denylist() {
        let env = build_child_env(
            vars(&[("PATH", "/bin"), ("WARDEN_HEADLESS", "1"), ("WARDEN_WRAPPER", "x")]),
            &[] as &[&str],
            &[],
        );
        assert_eq!(keys(&env), vec!["PATH"]);
    }

    #[test]
    fn strips_additional_names() {
        let env = build_child_env(
            vars(&[("PATH", "/bin"), ("CI", "true"), ("HOME", "/root")]),
            &["CI"],
            &[],
        );
        assert_eq!(keys(&env), vec!["PATH", "HOME"]);
    }

    #[test]
    fn extra_entries_override_and_respect_denylist() {
        let env = build_child_env(
            vars(&[("PORT", "1"), ("PATH", "/bin")]),
            &[] as &[&str],
            &[
                ("PORT".to_string(), "8080".to_string()),
                ("WARDEN_DEBUG_SESSION".to_string(), "abc".to_string()),
            ],
        );
        assert_eq!(keys(&env), vec!["PATH", "PORT"]);
        assert_eq!(env[1].1, OsString::from("8080"));
    }
}
