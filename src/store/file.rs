use super::{NodeStore, UpdateFn};
use crate::errors::StoreError;
use crate::node::Node;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// JSON-snapshot store for the CLI: the whole tree lives in one file,
/// loaded at open and rewritten after every mutation.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    nodes: RwLock<Vec<Node>>,
}

impl FileStore {
    /// Load an existing tree file.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path).map_err(|source| StoreError::SnapshotRead {
            path: path.to_path_buf(),
            source,
        })?;
        let nodes: Vec<Node> =
            serde_json::from_str(&raw).map_err(|source| StoreError::SnapshotDecode {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            nodes: RwLock::new(nodes),
        })
    }

    /// Create a new tree file seeded with the given nodes. Refuses to
    /// overwrite an existing file.
    pub fn create(path: &Path, nodes: Vec<Node>) -> Result<Self, StoreError> {
        if path.exists() {
            return Err(StoreError::SnapshotWrite {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "tree file already exists",
                ),
            });
        }
        let store = Self {
            path: path.to_path_buf(),
            nodes: RwLock::new(nodes),
        };
        store.persist_blocking()?;
        Ok(store)
    }

    fn persist_blocking(&self) -> Result<(), StoreError> {
        let nodes = self.nodes.try_read().map(|g| g.clone()).unwrap_or_default();
        self.write_nodes(&nodes)
    }

    fn write_nodes(&self, nodes: &[Node]) -> Result<(), StoreError> {
        // to_string_pretty on plain data structures cannot fail.
        let json = serde_json::to_string_pretty(nodes).unwrap_or_default();
        std::fs::write(&self.path, json).map_err(|source| StoreError::SnapshotWrite {
            path: self.path.clone(),
            source,
        })
    }
}

#[async_trait]
impl NodeStore for FileStore {
    async fn snapshot(&self) -> Result<Vec<Node>, StoreError> {
        Ok(self.nodes.read().await.clone())
    }

    async fn mutate(&self, update: UpdateFn) -> Result<(), StoreError> {
        let mut guard = self.nodes.write().await;
        let current = std::mem::take(&mut *guard);
        *guard = update(current);
        let updated = guard.clone();
        drop(guard);
        self.write_nodes(&updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;
    use tempfile::tempdir;

    #[tokio::test]
    async fn create_persist_reopen_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tree.json");

        let root = Node::root("Book", "premise");
        let root_id = root.id.clone();
        {
            let store = FileStore::create(&path, vec![root]).unwrap();
            let child = Node::new(NodeKind::Outline, "Volume I");
            let parent_id = root_id.clone();
            store
                .mutate(Box::new(move |mut nodes| {
                    crate::node::attach(&mut nodes, &parent_id, None, child);
                    nodes
                }))
                .await
                .unwrap();
        }

        let reopened = FileStore::open(&path).unwrap();
        let snapshot = reopened.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        let root = crate::node::find(&snapshot, &root_id).unwrap();
        assert_eq!(root.children.len(), 1);
    }

    #[test]
    fn create_refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tree.json");
        FileStore::create(&path, vec![]).unwrap();
        assert!(FileStore::create(&path, vec![]).is_err());
    }

    #[test]
    fn open_missing_file_is_a_read_error() {
        let err = FileStore::open(Path::new("/nonexistent/tree.json")).unwrap_err();
        assert!(matches!(err, StoreError::SnapshotRead { .. }));
    }
}
