use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::RevisionId;

pub type WorkspaceId = Uuid;

static WORKSPACE_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f0c9a2e-5d41-5b7e-9c6a-1e8b4d2f7a90").expect("valid namespace UUID")
});

/// Stable id for the session state kept against one server.
pub fn workspace_id_for_server(server_url: &str) -> WorkspaceId {
    let normalized = server_url.trim().trim_end_matches('/').to_ascii_lowercase();
    Uuid::new_v5(&WORKSPACE_NAMESPACE, normalized.as_bytes())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub revision: Option<RevisionId>,
    /// Earlier revisions, oldest first.
    #[serde(default)]
    pub history: Vec<RevisionId>,
    #[serde(default)]
    pub page_count: usize,
    #[serde(default)]
    pub edit_mode: bool,
}

pub trait StateStore: Send + Sync {
    fn load(&self, workspace: WorkspaceId) -> Result<Option<SessionSnapshot>>;
    fn save(&self, workspace: WorkspaceId, snapshot: &SessionSnapshot) -> Result<()>;
}

pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create state directory at {:?}", root))?;
        Ok(Self { root })
    }

    fn state_path(&self, workspace: WorkspaceId) -> PathBuf {
        self.root.join(format!("{}.json", workspace))
    }
}

impl StateStore for FileStateStore {
    fn load(&self, workspace: WorkspaceId) -> Result<Option<SessionSnapshot>> {
        let path = self.state_path(workspace);
        if !path.exists() {
            return Ok(None);
        }
        let mut file =
            File::open(&path).with_context(|| format!("failed to open state file {:?}", path))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        let snapshot = serde_json::from_str(&buf)
            .with_context(|| format!("failed to decode state file {:?}", path))?;
        Ok(Some(snapshot))
    }

    fn save(&self, workspace: WorkspaceId, snapshot: &SessionSnapshot) -> Result<()> {
        let path = self.state_path(workspace);
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_string_pretty(snapshot)?;
        let mut file = File::create(&tmp)
            .with_context(|| format!("failed to open temp state file {:?}", tmp))?;
        file.write_all(payload.as_bytes())?;
        file.flush()?;
        fs::rename(tmp, path)?;
        Ok(())
    }
}

pub struct MemoryStateStore {
    inner: Mutex<HashMap<WorkspaceId, SessionSnapshot>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, workspace: WorkspaceId) -> Result<Option<SessionSnapshot>> {
        Ok(self.inner.lock().get(&workspace).cloned())
    }

    fn save(&self, workspace: WorkspaceId, snapshot: &SessionSnapshot) -> Result<()> {
        self.inner.lock().insert(workspace, snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn workspace_id_ignores_trailing_slash_and_case() {
        let first = workspace_id_for_server("http://127.0.0.1:5000/");
        let second = workspace_id_for_server("HTTP://127.0.0.1:5000");
        assert_eq!(first, second);
        assert_ne!(first, workspace_id_for_server("http://127.0.0.1:5001"));
    }

    #[test]
    fn file_state_store_restores_snapshot() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state")).unwrap();
        let workspace = workspace_id_for_server("http://localhost:5000");

        assert!(store.load(workspace).unwrap().is_none());

        let snapshot = SessionSnapshot {
            revision: Some(RevisionId::new("modified_doc.pdf")),
            history: vec![RevisionId::new("doc.pdf")],
            page_count: 3,
            edit_mode: true,
        };
        store.save(workspace, &snapshot).unwrap();

        let restored = store.load(workspace).unwrap().unwrap();
        assert_eq!(restored, snapshot);
        assert!(!dir
            .path()
            .join("state")
            .join(format!("{}.json.tmp", workspace))
            .exists());
    }

    #[test]
    fn memory_store_keeps_workspaces_apart() {
        let store = MemoryStateStore::new();
        let a = workspace_id_for_server("http://a");
        let b = workspace_id_for_server("http://b");
        store
            .save(
                a,
                &SessionSnapshot {
                    revision: Some(RevisionId::new("a.pdf")),
                    ..SessionSnapshot::default()
                },
            )
            .unwrap();
        assert!(store.load(b).unwrap().is_none());
        assert_eq!(
            store.load(a).unwrap().unwrap().revision,
            Some(RevisionId::new("a.pdf"))
        );
    }
}
