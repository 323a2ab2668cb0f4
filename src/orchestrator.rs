//! Orchestrator
//!
//! Entry point for the rest of the system: `provision` and `teardown`,
//! with at most one run in flight per (cluster, action) pair.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use tracing::info;

use crate::backend::{RunOptions, RunReport};
use crate::cluster::Action;
use crate::config::ProvisionConfig;
use crate::error::{Error, Result};
use crate::factory::ProvisionerFactory;
use crate::store::Stores;

type RunKey = (String, Action);

/// Table of (cluster, action) pairs with a run in flight.
#[derive(Debug, Default)]
pub struct RunGuards {
    active: Mutex<HashSet<RunKey>>,
}

impl RunGuards {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<RunKey>> {
        // A panicking run cannot leave the set inconsistent: inserts and
        // removes are single operations.
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim `(cluster, action)`; fails with `AlreadyRunning` if taken.
    pub fn acquire(self: &Arc<Self>, cluster_id: &str, action: Action) -> Result<RunGuard> {
        let key = (cluster_id.to_string(), action);
        if !self.lock().insert(key.clone()) {
            return Err(Error::AlreadyRunning {
                cluster: cluster_id.to_string(),
                action: action.to_string(),
            });
        }
        Ok(RunGuard {
            guards: Arc::clone(self),
            key,
        })
    }

    pub fn is_active(&self, cluster_id: &str, action: Action) -> bool {
        self.lock().contains(&(cluster_id.to_string(), action))
    }

    pub fn cluster_busy(&self, cluster_id: &str) -> bool {
        self.lock().iter().any(|(id, _)| id == cluster_id)
    }
}

/// Releases its (cluster, action) claim on drop.
#[derive(Debug)]
pub struct RunGuard {
    guards: Arc<RunGuards>,
    key: RunKey,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.guards.lock().remove(&self.key);
    }
}

pub struct Orchestrator {
    factory: ProvisionerFactory,
    guards: Arc<RunGuards>,
}

impl Orchestrator {
    pub fn new(config: ProvisionConfig, stores: Stores) -> Self {
        Self {
            factory: ProvisionerFactory::new(Arc::new(config), stores),
            guards: Arc::new(RunGuards::new()),
        }
    }

    pub fn from_config(config: ProvisionConfig) -> Result<Self> {
        let stores = Stores::from_config(&config.store)?;
        Ok(Self::new(config, stores))
    }

    pub fn factory(&self) -> &ProvisionerFactory {
        &self.factory
    }

    pub fn guards(&self) -> &Arc<RunGuards> {
        &self.guards
    }

    /// Drive `action` for `cluster_id` to completion on the calling thread.
    pub fn provision(
        &self,
        cluster_id: &str,
        action: Action,
        options: &RunOptions,
    ) -> Result<RunReport> {
        let _guard = self.guards.acquire(cluster_id, action)?;
        let provisioner = self.factory.resolve(cluster_id, action)?;
        provisioner.run(options)
    }

    /// Run `provision` on its own thread.
    pub fn spawn(
        self: &Arc<Self>,
        cluster_id: &str,
        action: Action,
        options: RunOptions,
    ) -> std::io::Result<JoinHandle<Result<RunReport>>> {
        let orchestrator = Arc::clone(self);
        let cluster_id = cluster_id.to_string();
        std::thread::Builder::new()
            .name(format!("provision-{cluster_id}-{action}"))
            .spawn(move || orchestrator.provision(&cluster_id, action, &options))
    }

    /// Remove every workspace of a decommissioned cluster.
    pub fn teardown(&self, cluster_id: &str) -> Result<()> {
        let claims = Action::ALL
            .iter()
            .map(|action| self.guards.acquire(cluster_id, *action))
            .collect::<Result<Vec<_>>>()?;
        self.factory.workspaces().teardown(cluster_id)?;
        drop(claims);
        info!(cluster = cluster_id, "cluster workspace torn down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_is_rejected_until_release() {
        let guards = Arc::new(RunGuards::new());
        let first = guards.acquire("c1", Action::Install).unwrap();
        assert!(matches!(
            guards.acquire("c1", Action::Install),
            Err(Error::AlreadyRunning { .. })
        ));
        // Different action or cluster is independent.
        let _other_action = guards.acquire("c1", Action::Update).unwrap();
        let _other_cluster = guards.acquire("c2", Action::Install).unwrap();

        drop(first);
        assert!(!guards.is_active("c1", Action::Install));
        guards.acquire("c1", Action::Install).unwrap();
    }

    #[test]
    fn cluster_busy_sees_any_action() {
        let guards = Arc::new(RunGuards::new());
        assert!(!guards.cluster_busy("c1"));
        let _g = guards.acquire("c1", Action::Uninstall).unwrap();
        assert!(guards.cluster_busy("c1"));
        assert!(!guards.cluster_busy("c2"));
    }
}
