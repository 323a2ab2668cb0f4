//! Collaborator Stores
//!
//! The orchestrator reads cluster snapshots and writes progress records
//! through these traits; the resource API behind them lives elsewhere.

mod file;
mod http;
mod memory;

pub use file::FileStore;
pub use http::{HttpStore, HttpStoreConfig};
pub use memory::MemoryStore;

use std::sync::Arc;

use crate::cluster::ClusterSnapshot;
use crate::config::{StoreConfig, StoreKind};
use crate::error::Result;
use crate::progress::{ProgressRecord, ProgressTarget};

pub trait ClusterStore: Send + Sync {
    /// Fails with `NotFound` for unknown ids and `LoadFailed` otherwise.
    fn get_cluster(&self, id: &str) -> Result<ClusterSnapshot>;
}

pub trait ProgressStore: Send + Sync {
    /// Replaces the stored record for `target`.
    fn put_progress(&self, target: &ProgressTarget, record: &ProgressRecord) -> Result<()>;
}

/// Both halves of the resource API as the orchestrator sees them.
#[derive(Clone)]
pub struct Stores {
    pub clusters: Arc<dyn ClusterStore>,
    pub progress: Arc<dyn ProgressStore>,
}

impl Stores {
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        match config.kind {
            StoreKind::File => {
                let store = Arc::new(FileStore::new(&config.path));
                Ok(Self {
                    clusters: store.clone(),
                    progress: store,
                })
            }
            StoreKind::Http => {
                let store = Arc::new(HttpStore::new(HttpStoreConfig::from(config))?);
                Ok(Self {
                    clusters: store.clone(),
                    progress: store,
                })
            }
        }
    }

    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: ClusterStore + ProgressStore + 'static,
    {
        Self {
            clusters: store.clone(),
            progress: store,
        }
    }
}
