use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use crate::cluster::ClusterSnapshot;
use crate::error::{Error, Result};
use crate::progress::{ProgressRecord, ProgressTarget};

use super::{ClusterStore, ProgressStore};

/// In-process store that keeps every progress write, in order.
#[derive(Default)]
pub struct MemoryStore {
    clusters: RwLock<HashMap<String, ClusterSnapshot>>,
    writes: Mutex<Vec<(ProgressTarget, ProgressRecord)>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cluster(self, cluster: ClusterSnapshot) -> Self {
        self.insert(cluster);
        self
    }

    pub fn insert(&self, cluster: ClusterSnapshot) {
        if let Ok(mut clusters) = self.clusters.write() {
            clusters.insert(cluster.uuid.clone(), cluster);
        }
    }

    /// Makes every subsequent progress write fail.
    pub fn fail_progress_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<(ProgressTarget, ProgressRecord)> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    pub fn history(&self, node_role_id: &str) -> Vec<ProgressRecord> {
        self.writes()
            .into_iter()
            .filter(|(target, _)| target.node_role_id == node_role_id)
            .map(|(_, record)| record)
            .collect()
    }

    pub fn latest(&self, node_role_id: &str) -> Option<ProgressRecord> {
        self.history(node_role_id).pop()
    }
}

impl ClusterStore for MemoryStore {
    fn get_cluster(&self, id: &str) -> Result<ClusterSnapshot> {
        let clusters = self
            .clusters
            .read()
            .map_err(|_| Error::load_failed(id, "cluster table lock poisoned"))?;
        clusters
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }
}

impl ProgressStore for MemoryStore {
    fn put_progress(&self, target: &ProgressTarget, record: &ProgressRecord) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::ReportFailed {
                target: target.to_string(),
                reason: "progress store unavailable".to_string(),
            });
        }
        let mut writes = self.writes.lock().map_err(|_| Error::ReportFailed {
            target: target.to_string(),
            reason: "progress log lock poisoned".to_string(),
        })?;
        writes.push((target.clone(), record.clone()));
        Ok(())
    }
}
