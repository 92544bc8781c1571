use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use crate::error::CloudError;
use crate::models::{Appliance, DiscoveredMachine, Location, VmSku};

/// Single-flight memoization: concurrent misses for the same key share one
/// upstream fetch, and a failed fetch leaves the slot empty so the next
/// requester retries.
///
/// The outer lock only guards the key map; fetches run under the per-key
/// [`OnceCell`], so unrelated keys never serialize behind each other.
pub(crate) struct SingleFlight<K, V> {
    cells: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub(crate) fn new() -> Self {
        Self { cells: Mutex::new(HashMap::new()) }
    }

    fn cell(&self, key: &K) -> Arc<OnceCell<V>> {
        let mut cells = self.cells.lock().expect("cache mutex poisoned");
        cells.entry(key.clone()).or_default().clone()
    }

    pub(crate) async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> Result<V, CloudError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, CloudError>>,
    {
        let cell = self.cell(&key);
        cell.get_or_try_init(fetch).await.cloned()
    }
}

/// Per-run response cache for the hot list operations.
///
/// Keys always include the subscription, resource group and project (where
/// the operation has them); the operation itself is encoded by which map
/// the entry lives in, so distinct operations can never collide. Entries
/// are immutable snapshots for the run; there is no TTL.
pub(crate) struct ResponseCache {
    pub(crate) locations: SingleFlight<String, Arc<Vec<Location>>>,
    pub(crate) skus: SingleFlight<(String, String), Arc<Vec<VmSku>>>,
    pub(crate) appliances: SingleFlight<(String, String, String), Arc<Vec<Appliance>>>,
    pub(crate) discovered: SingleFlight<(String, String, String), Arc<Vec<DiscoveredMachine>>>,
}

impl ResponseCache {
    pub(crate) fn new() -> Self {
        Self {
            locations: SingleFlight::new(),
            skus: SingleFlight::new(),
            appliances: SingleFlight::new(),
            discovered: SingleFlight::new(),
        }
    }
}
