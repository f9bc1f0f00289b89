//! Socket entry naming: `<prefix>-<pid>-<label>`.
//!
//! The naming convention belongs to the debug-capable child; this module only
//! reads it. Labels may themselves contain `-`.

use regex::Regex;

/// Owner pid and session label decoded from an entry's file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryName {
    pub pid: u32,
    pub label: String,
}

/// Compiled matcher for one entry prefix.
#[derive(Debug, Clone)]
pub struct EntryParser {
    prefix: String,
    pattern: Regex,
}

impl EntryParser {
    pub fn new(prefix: &str) -> Result<Self, regex::Error> {
        let pattern = Regex::new(&format!(r"^{}-(\d+)-(.+)$", regex::escape(prefix)))?;
        Ok(Self {
            prefix: prefix.to_string(),
            pattern,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// True if `file_name` belongs to this registry (starts with `<prefix>-`),
    /// whether or not the rest parses.
    pub fn is_candidate(&self, file_name: &str) -> bool {
        file_name
            .strip_prefix(self.prefix.as_str())
            .is_some_and(|rest| rest.starts_with('-'))
    }

    /// Decode `file_name`. `None` means the name is malformed.
    pub fn parse(&self, file_name: &str) -> Option<EntryName> {
        let caps = self.pattern.captures(file_name)?;
        let pid = caps[1].parse::<u32>().ok().filter(|pid| *pid > 0)?;
        Some(EntryName {
            pid,
            label: caps[2].to_string(),
        })
    }

    /// Compose the entry name a child with `pid` would use for `label`.
    pub fn format(&self, pid: u32, label: &str) -> String {
        format!("{}-{pid}-{label}", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> EntryParser {
        EntryParser::new("warden-debug").unwrap()
    }

    #[test]
    fn parses_pid_and_label() {
        let parsed = parser().parse("warden-debug-4242-web").unwrap();
        assert_eq!(parsed, EntryName { pid: 4242, label: "web".into() });
    }

    #[test]
    fn label_may_contain_dashes() {
        let parsed = parser()
            .parse("warden-debug-17-3f2a-b9c1-session")
            .unwrap();
        assert_eq!(parsed.pid, 17);
        assert_eq!(parsed.label, "3f2a-b9c1-session");
    }

    #[test]
    fn rejects_malformed_names() {
        let p = parser();
        assert_eq!(p.parse("warden-debug-abc-web"), None);
        assert_eq!(p.parse("warden-debug-42"), None);
        assert_eq!(p.parse("warden-debug-42-"), None);
        assert_eq!(p.parse("warden-debug-0-web"), None);
        assert_eq!(p.parse("warden-debug-99999999999-web"), None);
        assert_eq!(p.parse("other-42-web"), None);
    }

    #[test]
    fn prefix_is_matched_literally() {
        let p = EntryParser::new("dbg.sock").unwrap();
        assert!(p.parse("dbgxsock-1-a").is_none());
        assert!(p.parse("dbg.sock-1-a").is_some());
    }

    #[test]
    fn candidates_require_prefix_and_dash() {
        let p = parser();
        assert!(p.is_candidate("warden-debug-garbage"));
        assert!(!p.is_candidate("warden-debugger-1-x"));
        assert!(!p.is_candidate("unrelated.sock"));
    }

    #[test]
    fn format_round_trips_through_parse() {
        let p = parser();
        let name = p.format(311, "abc-def");
        assert_eq!(p.parse(&name).unwrap().label, "abc-def");
    }
}
