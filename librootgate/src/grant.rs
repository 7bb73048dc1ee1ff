//! Grant scope for a single user and command matching

use std::collections::BTreeSet;
use std::fmt;

/// Keyword granting unrestricted access in the policy file.
pub const ALL_KEYWORD: &str = "all";

/// What a user may run as root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    AllCommands,
    /// Canonical absolute paths, never empty.
    CommandSet(BTreeSet<String>),
}

impl Grant {
    /// Union `other` into `self`. `AllCommands` absorbs everything.
    pub fn merge(&mut self, other: Grant) {
        match (&mut *self, other) {
            (Grant::AllCommands, _) => {}
            (_, Grant::AllCommands) => *self = Grant::AllCommands,
            (Grant::CommandSet(mine), Grant::CommandSet(theirs)) => mine.extend(theirs),
        }
    }

    /// Exact match of an already canonicalized command path.
    pub fn permits(&self, command: &str) -> bool {
        match self {
            Grant::AllCommands => true,
            Grant::CommandSet(commands) => commands.contains(command),
        }
    }

    /// Commands shown by `-l`, one entry per line.
    pub fn listing(&self) -> Vec<String> {
        match self {
            Grant::AllCommands => vec!["(all commands)".to_string()],
            Grant::CommandSet(commands) => commands.iter().cloned().collect(),
        }
    }
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grant::AllCommands => f.write_str(ALL_KEYWORD),
            Grant::CommandSet(commands) => {
                let joined: Vec<&str> = commands.iter().map(String::as_str).collect();
                f.write_str(&joined.join(","))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(paths: &[&str]) -> Grant {
        Grant::CommandSet(paths.iter().map(|p| p.to_string()).collect())
    }

    #[test]
    fn test_all_permits_anything() {
        assert!(Grant::AllCommands.permits("/usr/sbin/reboot"));
        assert!(Grant::AllCommands.permits("/opt/tool/bin/x"));
    }

    #[test]
    fn test_command_set_is_exact_match() {
        let grant = set(&["/bin/ls", "/usr/bin/apt"]);
        assert!(grant.permits("/bin/ls"));
        assert!(!grant.permits("/bin/ls2"));
        assert!(!grant.permits("/bin/l"));
        assert!(!grant.permits("/bin/ls "));
    }

    #[test]
    fn test_merge_unions_sets() {
        let mut grant = set(&["/bin/ls"]);
        grant.merge(set(&["/usr/bin/apt", "/bin/ls"]));
        assert_eq!(grant, set(&["/bin/ls", "/usr/bin/apt"]));
    }

    #[test]
    fn test_merge_all_short_circuits() {
        let mut grant = set(&["/bin/ls"]);
        grant.merge(Grant::AllCommands);
        assert_eq!(grant, Grant::AllCommands);

        grant.merge(set(&["/usr/bin/apt"]));
        assert_eq!(grant, Grant::AllCommands);
    }

    #[test]
    fn test_display_matches_file_grammar() {
        assert_eq!(Grant::AllCommands.to_string(), "all");
        assert_eq!(set(&["/usr/bin/apt", "/bin/ls"]).to_string(), "/bin/ls,/usr/bin/apt");
    }
}
