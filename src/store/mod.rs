//! The node store seam.
//!
//! The document tree is externally owned: the core reads whole snapshots and
//! submits functional mutations, and a mutation may become visible to
//! readers only after a delay. [`await_visible`] is the correctness
//! primitive that bridges that gap: after creating nodes, a component polls
//! until the new ids appear in a snapshot (or a bounded timeout passes, at
//! which point it warns and proceeds optimistically).
//!
//! [`MemoryStore`] backs tests and applies mutations immediately;
//! [`FileStore`] is the CLI's JSON-snapshot adapter.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::errors::StoreError;
use crate::node::Node;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// A functional update over the whole node collection.
pub type UpdateFn = Box<dyn FnOnce(Vec<Node>) -> Vec<Node> + Send>;

#[async_trait]
pub trait NodeStore: Send + Sync {
    async fn snapshot(&self) -> Result<Vec<Node>, StoreError>;

    /// Submit a mutation. The store applies it at its own pace; visibility
    /// in later snapshots is eventual, not immediate.
    async fn mutate(&self, update: UpdateFn) -> Result<(), StoreError>;
}

/// Mutate a single node in place, by id. Missing nodes are left alone; the
/// caller's next read will notice.
pub async fn update_node<F>(store: &dyn NodeStore, id: &str, f: F) -> Result<(), StoreError>
where
    F: FnOnce(&mut Node) + Send + 'static,
{
    let id = id.to_string();
    store
        .mutate(Box::new(move |mut nodes| {
            if let Some(node) = nodes.iter_mut().find(|n| n.id == id) {
                f(node);
            }
            nodes
        }))
        .await
}

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Default bound for [`await_visible`].
pub const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll snapshots until every id in `ids` is present.
///
/// Returns `true` once all are visible, `false` after the timeout (a
/// warning is logged and the caller proceeds optimistically).
pub async fn await_visible(
    store: &dyn NodeStore,
    ids: &[String],
    timeout: Duration,
) -> Result<bool, StoreError> {
    let deadline = Instant::now() + timeout;
    loop {
        let snapshot = store.snapshot().await?;
        if ids.iter().all(|id| snapshot.iter().any(|n| &n.id == id)) {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            tracing::warn!(
                pending = ids.len(),
                "created nodes not yet visible after {:?}, proceeding optimistically",
                timeout
            );
            return Ok(false);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
