//! Synchronization layer: forwards store change notifications to a cache.

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::store::{DocumentStore, Filter, Snapshot, StoreError};

/// Live subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct SyncHandle {
    collection: String,
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub fn collection(&self) -> &str { &self.collection }
    pub fn is_active(&self) -> bool { !self.task.is_finished() }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        debug!(collection = %self.collection, "unsubscribing");
        self.task.abort();
    }
}

/// Subscribes to `collection` and calls `on_change` with every delivered
/// result set, in delivery order, or `on_error` when the stream reports one.
pub async fn listen<C, E>(
    store: &dyn DocumentStore,
    collection: &str,
    filter: Filter,
    on_change: C,
    on_error: E,
) -> Result<SyncHandle, StoreError>
where
    C: Fn(Vec<Snapshot>) + Send + 'static,
    E: Fn(StoreError) + Send + 'static,
{
    let mut stream = store.subscribe(collection, filter).await?;
    let name = collection.to_string();
    let task = tokio::spawn(async move {
        while let Some(delivery) = stream.recv().await {
            match delivery {
                Ok(snapshots) => on_change(snapshots),
                Err(e) => {
                    warn!(collection = %name, error = %e, "change stream error");
                    on_error(e);
                }
            }
        }
        debug!(collection = %name, "change stream ended");
    });
    Ok(SyncHandle { collection: collection.to_string(), task })
}
