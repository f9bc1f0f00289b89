use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Number of hex digits of the UUID v5 kept as the namespace token.
const NAMESPACE_TOKEN_LEN: usize = 16;

/// On-disk layout for one workspace's tracker state.
///
/// Several workspaces may share the same state root (typically a directory in
/// the system temp area); each gets its own subdirectory named by a token
/// derived from the canonical workspace path.
#[derive(Debug, Clone)]
pub struct StateLayout {
    namespace: String,
    root: PathBuf,
}

impl StateLayout {
    /// Resolve the layout for `workspace` under `state_root`.
    ///
    /// The workspace is canonicalized (symlinks resolved) so the same
    /// directory always maps to the same token.
    pub fn for_workspace(state_root: &Path, workspace: &Path) -> std::io::Result<Self> {
        let canonical = std::fs::canonicalize(workspace)?;
        let namespace = namespace_token(&canonical);
        Ok(Self::with_namespace(state_root, namespace))
    }

    /// Build a layout for an already-known namespace token.
    pub fn with_namespace(state_root: &Path, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let root = state_root.join(&namespace);
        Self { namespace, root }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn slots_dir(&self) -> PathBuf {
        self.root.join("slots")
    }

    pub fn reasons_dir(&self) -> PathBuf {
        self.root.join("reasons")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    pub fn journal_path(&self) -> PathBuf {
        self.root.join("events.jsonl")
    }
}

/// Derive the namespace token for a canonical workspace path.
pub fn namespace_token(canonical_workspace: &Path) -> String {
    let name = canonical_workspace.to_string_lossy();
    let uuid = Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes());
    uuid.simple().to_string()[..NAMESPACE_TOKEN_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn token_is_stable_and_workspace_specific() {
        let a = namespace_token(Path::new("/home/dev/project-a"));
        let b = namespace_token(Path::new("/home/dev/project-b"));
        assert_eq!(a, namespace_token(Path::new("/home/dev/project-a")));
        assert_ne!(a, b);
        assert_eq!(a.len(), NAMESPACE_TOKEN_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn symlinked_workspace_shares_namespace() {
        let tmp = TempDir::new().unwrap();
        let real = tmp.path().join("real");
        std::fs::create_dir(&real).unwrap();
        let link = tmp.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let state = tmp.path().join("state");
        let via_real = StateLayout::for_workspace(&state, &real).unwrap();
        let via_link = StateLayout::for_workspace(&state, &link).unwrap();
        assert_eq!(via_real.namespace(), via_link.namespace());
        assert!(via_real.slots_dir().starts_with(&state));
    }

    #[test]
    fn missing_workspace_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let result = StateLayout::for_workspace(tmp.path(), &tmp.path().join("nope"));
        assert!(result.is_err());
    }
}
