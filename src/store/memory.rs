use super::{NodeStore, UpdateFn};
use crate::errors::StoreError;
use crate::node::Node;
use async_trait::async_trait;
use tokio::sync::RwLock;

/// In-process store with immediate visibility. The test and library default.
#[derive(Default)]
pub struct MemoryStore {
    nodes: RwLock<Vec<Node>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodes(nodes: Vec<Node>) -> Self {
        Self {
            nodes: RwLock::new(nodes),
        }
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn snapshot(&self) -> Result<Vec<Node>, StoreError> {
        Ok(self.nodes.read().await.clone())
    }

    async fn mutate(&self, update: UpdateFn) -> Result<(), StoreError> {
        let mut guard = self.nodes.write().await;
        let current = std::mem::take(&mut *guard);
        *guard = update(current);
        Ok(())
    }
}
